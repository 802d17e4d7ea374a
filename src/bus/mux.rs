/// PCA9548A I2C multiplexer control and channel scanning
use std::thread;
use std::time::Duration;

use log::debug;

use crate::bus::{BusError, BusTransport};

/// Number of downstream channels on the PCA9548A.
pub const CHANNEL_COUNT: u8 = 8;

// First and last valid 7-bit device addresses probed during a scan.
const SCAN_ADDR_FIRST: u8 = 0x03;
const SCAN_ADDR_LAST: u8 = 0x77;

// The switch needs a moment after its control register changes before
// downstream transactions are reliable.
const SETTLE_DELAY_MS: u64 = 20;

/// Read the multiplexer's channel-select register.
///
/// Doubles as the presence check: if this read fails the multiplexer is
/// missing and nothing behind it is reachable.
pub fn read_state(bus: &mut dyn BusTransport, mux_addr: u8) -> Result<u8, BusError> {
    bus.read_byte(mux_addr)
}

/// Select one downstream channel (0-7) by writing its bit mask.
///
/// Selecting a channel while a transaction is in flight on another channel
/// would corrupt it, so callers must hold the bus exclusively from the
/// select through the final device read.
pub fn select_channel(bus: &mut dyn BusTransport, mux_addr: u8, channel: u8) -> Result<(), BusError> {
    if channel >= CHANNEL_COUNT {
        return Err(BusError::InvalidChannel(channel));
    }
    bus.write_byte(mux_addr, 1 << channel)?;
    thread::sleep(Duration::from_millis(SETTLE_DELAY_MS));
    Ok(())
}

/// Disconnect all downstream channels.
pub fn disable_all(bus: &mut dyn BusTransport, mux_addr: u8) -> Result<(), BusError> {
    bus.write_byte(mux_addr, 0x00)?;
    thread::sleep(Duration::from_millis(SETTLE_DELAY_MS));
    Ok(())
}

/// Probe every address on every channel and return the devices that answer.
///
/// The multiplexer's own address is skipped; it answers on every channel.
/// All channels are disconnected again before returning.
pub fn scan(bus: &mut dyn BusTransport, mux_addr: u8) -> Result<Vec<Vec<u8>>, BusError> {
    let mut channels = Vec::with_capacity(CHANNEL_COUNT as usize);

    for ch in 0..CHANNEL_COUNT {
        select_channel(bus, mux_addr, ch)?;

        let mut devices = Vec::new();
        for addr in SCAN_ADDR_FIRST..=SCAN_ADDR_LAST {
            if addr == mux_addr {
                continue;
            }
            if bus.read_byte(addr).is_ok() {
                devices.push(addr);
            }
        }

        debug!("Channel {}: {} device(s)", ch, devices.len());
        channels.push(devices);
    }

    disable_all(bus, mux_addr)?;
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;

    const MUX: u8 = 0x70;

    #[test]
    fn select_writes_one_bit_per_channel() {
        let mut bus = MockBus::new(MUX);
        select_channel(&mut bus, MUX, 0).unwrap();
        select_channel(&mut bus, MUX, 5).unwrap();
        let masks: Vec<u8> = bus.writes.iter().map(|(_, _, p)| p[0]).collect();
        assert_eq!(masks, vec![0b0000_0001, 0b0010_0000]);
    }

    #[test]
    fn select_rejects_channel_out_of_range() {
        let mut bus = MockBus::new(MUX);
        match select_channel(&mut bus, MUX, 8) {
            Err(BusError::InvalidChannel(8)) => {}
            other => panic!("expected InvalidChannel, got {:?}", other),
        }
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn disable_clears_the_select_register() {
        let mut bus = MockBus::new(MUX);
        select_channel(&mut bus, MUX, 3).unwrap();
        disable_all(&mut bus, MUX).unwrap();
        assert_eq!(bus.selected, 0x00);
    }

    #[test]
    fn scan_reports_devices_per_channel() {
        let mut bus = MockBus::new(MUX);
        bus.present.insert((0, 0x44));
        bus.present.insert((1, 0x76));
        bus.present.insert((3, 0x3C));

        let channels = scan(&mut bus, MUX).unwrap();

        assert_eq!(channels.len(), 8);
        assert_eq!(channels[0], vec![0x44]);
        assert_eq!(channels[1], vec![0x76]);
        assert_eq!(channels[2], Vec::<u8>::new());
        assert_eq!(channels[3], vec![0x3C]);
        // Everything disconnected again afterwards.
        assert_eq!(bus.selected, 0x00);
    }

    #[test]
    fn scan_never_reports_the_multiplexer_itself() {
        let mut bus = MockBus::new(MUX);
        let channels = scan(&mut bus, MUX).unwrap();
        assert!(channels.iter().all(|devices| !devices.contains(&MUX)));
    }
}

/// I2C bus transport abstraction and the Linux implementation
pub mod mux;

use std::fmt;

use rppal::i2c::I2c;

/// Errors raised by the bus transport layer.
///
/// Transport failures are terminal for the transaction that caused them;
/// retry policy, if any, belongs to the caller.
#[derive(Debug)]
pub enum BusError {
    /// The underlying I2C transaction failed (NAK, bus error, missing device).
    Transaction { addr: u8, source: String },
    /// A multiplexer channel outside 0-7 was requested.
    InvalidChannel(u8),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transaction { addr, source } => {
                write!(f, "I2C transaction with 0x{:02X} failed: {}", addr, source)
            }
            BusError::InvalidChannel(ch) => {
                write!(f, "multiplexer channel {} out of range (0-7)", ch)
            }
        }
    }
}

impl std::error::Error for BusError {}

/// Byte-level I2C primitives used by every hardware probe.
///
/// Mirrors the SMBus operations the diagnostics rely on: bare reads/writes
/// for presence checks and multiplexer control, register reads/writes for
/// device configuration, and block reads for calibration and measurement
/// bursts. Implementations are blocking; callers own the bus exclusively
/// for the duration of a channel-select-then-read sequence.
pub trait BusTransport {
    /// Read a single byte from a device without addressing a register.
    fn read_byte(&mut self, addr: u8) -> Result<u8, BusError>;

    /// Write a single byte to a device without addressing a register.
    fn write_byte(&mut self, addr: u8, value: u8) -> Result<(), BusError>;

    /// Read one byte from a device register.
    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, BusError>;

    /// Write one byte to a device register.
    fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError>;

    /// Fill `buf` from consecutive registers starting at `reg`.
    fn read_block(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), BusError>;
}

/// Linux I2C bus via rppal (`/dev/i2c-N`).
pub struct LinuxI2c {
    i2c: I2c,
}

impl LinuxI2c {
    /// Open the given bus number (1 on all recent Raspberry Pi models).
    pub fn open(bus: u8) -> Result<Self, Box<dyn std::error::Error>> {
        let i2c = I2c::with_bus(bus)?;
        Ok(LinuxI2c { i2c })
    }

    fn select(&mut self, addr: u8) -> Result<(), BusError> {
        self.i2c
            .set_slave_address(addr as u16)
            .map_err(|e| BusError::Transaction {
                addr,
                source: e.to_string(),
            })
    }
}

impl BusTransport for LinuxI2c {
    fn read_byte(&mut self, addr: u8) -> Result<u8, BusError> {
        self.select(addr)?;
        let mut buf = [0u8; 1];
        self.i2c.read(&mut buf).map_err(|e| BusError::Transaction {
            addr,
            source: e.to_string(),
        })?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        self.select(addr)?;
        self.i2c
            .write(&[value])
            .map_err(|e| BusError::Transaction {
                addr,
                source: e.to_string(),
            })?;
        Ok(())
    }

    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, BusError> {
        self.select(addr)?;
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(&[reg], &mut buf)
            .map_err(|e| BusError::Transaction {
                addr,
                source: e.to_string(),
            })?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
        self.select(addr)?;
        self.i2c
            .write(&[reg, value])
            .map_err(|e| BusError::Transaction {
                addr,
                source: e.to_string(),
            })?;
        Ok(())
    }

    fn read_block(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.select(addr)?;
        self.i2c
            .write_read(&[reg], buf)
            .map_err(|e| BusError::Transaction {
                addr,
                source: e.to_string(),
            })?;
        Ok(())
    }
}

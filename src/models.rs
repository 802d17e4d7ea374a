use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub name: String,
    pub status: TestStatus,
    pub message: String,
    pub error: Option<String>,
}

impl TestReport {
    pub fn pass(name: &str, message: impl Into<String>) -> Self {
        TestReport {
            name: name.to_string(),
            status: TestStatus::Pass,
            message: message.into(),
            error: None,
        }
    }

    pub fn fail(name: &str, message: impl Into<String>, error: Option<String>) -> Self {
        TestReport {
            name: name.to_string(),
            status: TestStatus::Fail,
            message: message.into(),
            error,
        }
    }

    pub fn skipped(name: &str, message: impl Into<String>) -> Self {
        TestReport {
            name: name.to_string(),
            status: TestStatus::Skipped,
            message: message.into(),
            error: None,
        }
    }
}

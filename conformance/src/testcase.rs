//! Case outcomes.

/// Result of running a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub passed: bool,
    /// Why the case failed.
    pub error: Option<String>,
}

impl TestResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(msg.into()),
        }
    }
}

impl From<Result<(), String>> for TestResult {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(),
            Err(msg) => Self::fail(msg),
        }
    }
}

/// Fail the case with a formatted message unless `cond` holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err(format!($($msg)+));
        }
    };
}

/// Fail the case unless both sides are equal.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr, $what:literal) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err(format!("{}: expected {:?}, got {:?}", $what, right, left));
        }
    }};
}

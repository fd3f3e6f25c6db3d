use jdbg_jdwp::JdwpError;
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("jdwp: {0}")]
    Jdwp(#[from] JdwpError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("debuggee disconnected")]
    Disconnected,
    #[error("no stack frame for thread {0:#x}")]
    NoFrame(u64),
}

impl DebugError {
    /// Failures after which the debuggee can no longer be talked to.
    pub fn is_disconnect(&self) -> bool {
        match self {
            DebugError::Jdwp(err) => err.is_disconnect(),
            DebugError::Disconnected => true,
            DebugError::Io(_) | DebugError::NoFrame(_) => false,
        }
    }
}

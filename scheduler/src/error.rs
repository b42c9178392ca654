use std::{error::Error, fmt, io};

use comms::{RemoteErr, specs::ShutdownReason};

/// The scheduler module's result type.
pub type Result<T> = std::result::Result<T, SchedulerErr>;

/// Failures while running the scheduler or talking to it.
#[derive(Debug)]
pub enum SchedulerErr {
    Io(io::Error),
    /// The scheduler refused the registration.
    Rejected(RemoteErr),
    /// The run ended before this member got an assignment.
    Shutdown(ShutdownReason),
    UnexpectedMessage {
        got: &'static str,
    },
}

impl fmt::Display for SchedulerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerErr::Io(e) => write!(f, "io error: {e}"),
            SchedulerErr::Rejected(e) => write!(f, "registration rejected: {e}"),
            SchedulerErr::Shutdown(reason) => write!(f, "shut down before assignment: {reason}"),
            SchedulerErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message from the scheduler: got {got}")
            }
        }
    }
}

impl Error for SchedulerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchedulerErr::Io(e) => Some(e),
            SchedulerErr::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SchedulerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SchedulerErr> for io::Error {
    fn from(value: SchedulerErr) -> Self {
        match value {
            SchedulerErr::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

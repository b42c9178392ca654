use std::{error::Error, fmt, io};

use comms::specs::MemberId;
use scheduler::SchedulerErr;

/// The parameter server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Failures that end a parameter server process.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    Scheduler(SchedulerErr),
    /// The scheduler registered this process as something else than a server.
    UnexpectedAssignment(MemberId),
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Io(e) => write!(f, "io error: {e}"),
            ServerErr::Scheduler(e) => write!(f, "scheduler error: {e}"),
            ServerErr::UnexpectedAssignment(member) => {
                write!(f, "expected a server assignment, got {member}")
            }
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Io(e) => Some(e),
            ServerErr::Scheduler(e) => Some(e),
            ServerErr::UnexpectedAssignment(_) => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SchedulerErr> for ServerErr {
    fn from(value: SchedulerErr) -> Self {
        Self::Scheduler(value)
    }
}

use std::{error::Error, fmt, io};

use comms::{KvErr, ParameterKey, RemoteErr, specs::MemberId};
use scheduler::SchedulerErr;

use crate::data::PartitionErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Scheduler(SchedulerErr),
    Partition(PartitionErr),
    /// A shard refused a request, never retried.
    Kv(KvErr),
    /// A shard refused the conversation itself.
    Remote(RemoteErr),
    UnexpectedMessage {
        step: u64,
        got: &'static str,
    },
    UnexpectedAssignment(MemberId),
    /// The compute collaborator needs a parameter that wasn't pulled.
    MissingParameter {
        key: ParameterKey,
    },
    /// The scheduler shut the run down before this worker was done.
    Cancelled,
}

impl WorkerErr {
    /// Whether retrying over a new connection could succeed.
    pub fn is_transient(&self) -> bool {
        let WorkerErr::Io(e) = self else {
            return false;
        };

        matches!(
            e.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        )
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Scheduler(e) => write!(f, "scheduler error: {e}"),
            WorkerErr::Partition(e) => write!(f, "partition error: {e}"),
            WorkerErr::Kv(e) => write!(f, "kv error: {e}"),
            WorkerErr::Remote(e) => write!(f, "remote error: {e}"),
            WorkerErr::UnexpectedMessage { step, got } => {
                write!(f, "unexpected message at step {step}: got {got}")
            }
            WorkerErr::UnexpectedAssignment(member) => {
                write!(f, "expected a worker assignment, got {member}")
            }
            WorkerErr::MissingParameter { key } => write!(f, "parameter {key} wasn't pulled"),
            WorkerErr::Cancelled => f.write_str("the run was shut down"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Scheduler(e) => Some(e),
            WorkerErr::Partition(e) => Some(e),
            WorkerErr::Kv(e) => Some(e),
            WorkerErr::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SchedulerErr> for WorkerErr {
    fn from(value: SchedulerErr) -> Self {
        Self::Scheduler(value)
    }
}

impl From<PartitionErr> for WorkerErr {
    fn from(value: PartitionErr) -> Self {
        Self::Partition(value)
    }
}

impl From<RemoteErr> for WorkerErr {
    fn from(value: RemoteErr) -> Self {
        match value {
            RemoteErr::Kv(e) => Self::Kv(e),
            other => Self::Remote(other),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_transient() {
        let transient = [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ];
        for kind in transient {
            assert!(WorkerErr::Io(kind.into()).is_transient());
        }

        let corrupt = WorkerErr::Io(io::ErrorKind::InvalidData.into());
        assert!(!corrupt.is_transient());

        let unknown = WorkerErr::Kv(KvErr::UnknownKey { key: "w".into() });
        assert!(!unknown.is_transient());
    }

    #[test]
    fn remote_kv_errors_stay_structured() {
        let err = WorkerErr::from(RemoteErr::Kv(KvErr::UnknownKey { key: "w".into() }));
        assert!(matches!(err, WorkerErr::Kv(KvErr::UnknownKey { .. })));

        let err = WorkerErr::from(RemoteErr::Protocol("bad rank".into()));
        assert!(matches!(err, WorkerErr::Remote(_)));
    }
}

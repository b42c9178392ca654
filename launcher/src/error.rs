use std::{fmt, io, process::ExitStatus};

/// All errors that can occur while launching a cluster.
#[derive(Debug)]
pub enum LauncherError {
    /// Invalid configuration, caught before spawning anything.
    InvalidConfig(String),
    /// A process couldn't be started.
    SpawnFailed { name: String, source: io::Error },
    /// A process exited with a failure status.
    ProcessFailed { name: String, status: ExitStatus },
    Io(io::Error),
}

impl fmt::Display for LauncherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::SpawnFailed { name, source } => write!(f, "couldn't spawn {name}: {source}"),
            Self::ProcessFailed { name, status } => write!(f, "{name} failed with {status}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for LauncherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SpawnFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LauncherError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

mod barrier;
mod non_blocking;
mod synchronizer;

use std::{error::Error, fmt};

use comms::KvErr;

pub use barrier::{BarrierPolicy, BarrierSync};
pub use non_blocking::NoBlockingSync;
pub use synchronizer::Synchronizer;

/// Why a gradient couldn't be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepErr {
    Kv(KvErr),
    /// The aggregator of the key is gone, only happens while shutting down.
    Closed,
}

impl fmt::Display for StepErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepErr::Kv(e) => e.fmt(f),
            StepErr::Closed => f.write_str("the step aggregator is closed"),
        }
    }
}

impl Error for StepErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StepErr::Kv(e) => Some(e),
            StepErr::Closed => None,
        }
    }
}

impl From<KvErr> for StepErr {
    fn from(value: KvErr) -> Self {
        Self::Kv(value)
    }
}

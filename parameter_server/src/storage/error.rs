use std::{
    error::Error,
    fmt::{self, Display},
};

/// Error returned by an `Optimizer` when the gradient doesn't line up with the
/// parameters or its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatchErr {
    pub expected: usize,
    pub got: usize,
}

impl Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the provided buffer holds {} elements but {} were expected",
            self.got, self.expected
        )
    }
}

impl Error for SizeMismatchErr {}

mod error;
mod handle;
mod slot;
mod store;

pub use error::SizeMismatchErr;
pub use handle::StoreHandle;
pub(crate) use slot::add_assign;
pub use store::ShardStore;

/// The specific result type for size mismatch checks of the optimizers.
pub type Result<T> = std::result::Result<T, SizeMismatchErr>;

//! User/key directory: versioned snapshots and their hot reload

pub mod reload;
pub mod snapshot;

pub use reload::{Directory, HotReloadCoordinator, RefreshHandle, RefreshOutcome};
pub use snapshot::{DirectoryEvent, DirectorySnapshot, UserEntry};

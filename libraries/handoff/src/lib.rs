//! This is a library for keeping a user's word sets across the switch from guest to account.
//! It was created for Exquizite, so it doesn't include much that was not needed for that project.
//!
//! Strategy:
//! 1. A guest's sets live on the device, in a [`local::LocalStore`] over any [`storage::KeyValueStorage`].
//! 2. A signed-in user's sets live in a remote service, reached through a [`remote::RemoteStore`] over any [`remote::RemoteBackend`].
//! 3. When a guest signs in, the [`reconciler::SyncReconciler`] copies every local set to the account, one at a time.
//!   1. Local data is only removed once every set made it.
//!   2. A per-account flag on the device makes sure a finished migration never runs again.
//!
//! Every remote call is wrapped in a [`retry::RetryPolicy`], which retries network-flavoured failures after a fixed delay.

pub mod error;
pub mod local;
pub mod memory_backend;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod storage;

#[cfg(feature = "supabase")]
pub mod supabase;

pub use error::{Error, RemoteError, Result, StorageError};
pub use local::LocalStore;
pub use memory_backend::MemoryBackend;
pub use reconciler::{MigrationOutcome, MigrationPhase, MigrationReport, SyncReconciler};
pub use remote::{RemoteBackend, RemoteStore, Session};
pub use retry::{RetryPolicy, Transient, retry};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageOp};

//! ghmirror core library: mirrors GitHub repository metadata, issues,
//! pull requests, comments, users and labels into a local sqlite database
//! and keeps the mirror up to date incrementally.

pub mod api;
pub mod constants;
pub mod context;
pub mod error;
pub mod map;
pub mod models;
pub mod page;
pub mod stats;
pub mod store;
pub mod sync;
pub mod transport;

pub use context::Context;
pub use error::{Result, SyncError};
pub use models::ResourceKind;
pub use store::Store;
pub use sync::{SyncEngine, SyncReport};

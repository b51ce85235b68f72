mod connections;
mod groups;
pub mod models;
pub mod pool;
pub mod pricing;
mod retry;
pub mod store;
mod tables;
mod users;
mod vehicles;

pub use pool::{PoolError, PooledStore, StorePool};
pub use retry::{with_backoff, INITIAL_BACKOFF, MAX_ATTEMPTS};
pub use store::{StorageError, Store};
pub use tables::*;

//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::config::Config;
use crate::proto::VehicleKind;
use crate::server::SubscriberRegistry;
use crate::sessions::SessionRegistry;
use crate::storage::models::{User, Vehicle};
use crate::storage::{Store, StorePool};
use crate::AppState;

/// Open a fresh store in a temporary directory.
///
/// Returns both the `Store` and the `TempDir` guard — the caller must keep
/// the `TempDir` alive for the duration of the test.
pub fn setup_store() -> (Store, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();
    (store, temp_dir)
}

/// Build a full `Arc<AppState>` around a fresh store (pool of 2 handles).
pub fn test_state() -> (Arc<AppState>, TempDir) {
    let (store, temp_dir) = setup_store();
    let state = Arc::new(AppState {
        config: Config::default(),
        pool: StorePool::new(&store, 2),
        sessions: SessionRegistry::new(),
        subscribers: SubscriberRegistry::new(),
    });
    (state, temp_dir)
}

/// A user row with sensible defaults.
pub fn make_user(urn: &str) -> User {
    User {
        active: true,
        age: 25,
        name: format!("User_{urn}"),
        pin_hash: "default_hash".to_string(),
        registration_date: Utc::now(),
        urn: urn.to_string(),
    }
}

/// A fully seated vehicle on route `Route_<uri>`.
pub fn make_vehicle(uri: &str, kind: VehicleKind, capacity: u32) -> Vehicle {
    Vehicle {
        active: true,
        available_seats: capacity,
        capacity,
        kind,
        last_update: Utc::now(),
        route: format!("Route_{uri}"),
        uri: uri.to_string(),
    }
}

//! transit-coordinator - Secure coordination engine for a municipal
//! public-transport backend.
//!
//! The coordinator accepts framed messages over TLS and provides:
//! - A checksummed, length-prefixed binary wire protocol with key/value
//!   payloads
//! - Transactional seat reservation and ticket purchase with retry under
//!   contention
//! - Session lifecycle with TTL expiry and leader-gated group operations
//! - Best-effort update fan-out to authenticated subscribers
//! - UDP multicast discovery (DISCOVER/ANNOUNCE) on the LAN
//! - redb embedded storage behind a fixed-size connection pool

pub mod config;
pub mod discovery;
pub mod proto;
pub mod server;
pub mod sessions;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod transport;

use config::Config;
use server::SubscriberRegistry;
use sessions::SessionRegistry;
use storage::StorePool;

/// Shared application state, built once in `main` and passed to handlers.
pub struct AppState {
    pub config: Config,
    pub pool: StorePool,
    pub sessions: SessionRegistry,
    pub subscribers: SubscriberRegistry,
}

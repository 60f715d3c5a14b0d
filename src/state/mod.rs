//! State management module.
//!
//! This module provides the storage for last-known resource state: one entry
//! per resource address, holding the remote id and the attributes last
//! applied or observed.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{ResourceState, STATE_VERSION, StateDocument};

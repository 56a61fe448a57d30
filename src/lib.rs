//! Replicated term-windowed Bloom filter.
//!
//! Answers "has this key been seen recently?" with a bounded false positive
//! rate and a fixed amount of memory, for deduplicating events over a sliding
//! window.
//!
//! HowTo:
//!    * Terms: insertions are grouped into numbered epochs. A ring of
//!      `retention` Bloom filters holds the most recent terms, one per term.
//!    * Rotation: the active term closes once it has absorbed `capacity` new
//!      keys, or when the caller moves to a later term explicitly. The slot
//!      of the term falling out of the window is cleared and reused.
//!    * Archive: a closing term can be handed to a [`TermArchive`] before its
//!      slot is reused.
//!
//! Insertion:
//!     * `set(key)` first tests the closed terms of the window; a hit means
//!       the key is already known and nothing changes.
//!     * Otherwise the key's bits are set in the active term. A key whose bits
//!       were not all set before consumes one unit of capacity.
//! Query:
//!     * `check(key)` tests every live term, newest first.
//! Replication:
//!     * [`BloomStateMachine`] applies encoded [`Command`]s in log order and
//!       exchanges whole-window snapshots for log compaction.
//!     * [`Store`] accepts writes on the leader only and serves reads from the
//!       local replica.
//!
//! Limitations:
//!     * False positives: a key can be reported seen in any live term, so the
//!       effective rate is up to `retention` times the configured one.
//!     * Geometry is fixed for the lifetime of a filter; snapshots only
//!       restore into a filter with the same `m`, `k` and retention.

#[cfg(feature = "server")]
pub mod api;
mod bit_filter;
mod command;
pub mod common;
mod error;
mod filter;
mod hash;
#[cfg(feature = "redb")]
mod redb_archive;
mod replication;
pub mod snapshot;
mod state_machine;
mod storage;
mod store;
#[cfg(feature = "server")]
pub mod types;
mod windowed_filter;

pub use bit_filter::BitFilter;
pub use command::{
    Command, CommandOutcome, OP_CHECK, OP_SET, Operation, ValidCommand,
};
pub use error::{FilterError, Result, StoreError, StoreResult};
pub use filter::{
    FilterConfig, FilterConfigBuilder, FilterConfigBuilderError,
    FilterGeometry,
};
pub use hash::{
    MembershipHasher, bit_index, optimal_bit_vector_size, optimal_num_hashes,
};
#[cfg(feature = "redb")]
pub use redb_archive::RedbArchive;
pub use replication::{LocalReplicator, Replicator, SharedStateMachine};
pub use state_machine::{BloomStateMachine, StateMachine};
pub use storage::{InMemoryArchive, TermArchive};
pub use store::{Store, StoreConfig, StoreConfigBuilder, StoreConfigBuilderError};
#[cfg(feature = "server")]
pub use types::{
    AppState, ServerConfig, ServerConfigBuilder, ServerConfigBuilderError,
};
pub use windowed_filter::{
    MAX_TERM, TermSlot, TermStats, TermWindowedFilter, WindowStats,
};

//! Durable, file-backed stores shared between assistant processes.
//!
//! Every store owns one backing file and serialises writers through an
//! advisory lock file colocated with it (see [`lock`]).  Readers never lock.

pub mod error;
pub mod event_log;
pub mod facts;
pub mod history;
pub mod lock;

pub use error::{StoreError, StoreResult};
pub use event_log::{EventLog, EventRecord};
pub use facts::FactStore;
pub use history::{DEFAULT_HISTORY_WINDOW, HistoryTurn, HistoryWindow, Role};
pub use lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};

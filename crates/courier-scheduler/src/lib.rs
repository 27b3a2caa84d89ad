//! # Courier Scheduler
//!
//! Keyed, persisted, at-least-once job scheduler.
//!
//! ## Design
//! - Producers call `Scheduler::schedule(key, payload, delay)`; repeated
//!   submissions for one key collapse into the latest payload (debounce).
//! - Workers poll the store on a timer, claim due keys under a time-bounded
//!   lease and hand each key's batch to a `JobHandler`.
//! - No coordinator: exclusivity comes from the store's atomic claim, crashed
//!   workers are recovered by lease expiry.
//!
//! ## Architecture
//! ```text
//! schedule() ──► SchedulerStore (memory | SQLite)
//!                    │ claim_due (lease)
//!                    ▼
//!               Scheduler loop (tokio interval, bounded pool)
//!                    │ JobHandler::handle(batch)
//!                    ├── Success   → complete
//!                    ├── Retry     → fail (backoff) ─► Dead after max retries
//!                    └── Permanent → complete
//! ```

pub mod backoff;
pub mod engine;
pub mod item;
pub mod memory;
pub mod persistence;
pub mod store;

pub use backoff::BackoffPolicy;
pub use engine::{Clock, HandlerOutcome, JobHandler, Scheduler};
pub use item::{ItemState, ScheduledItem, SchedulerBatch};
pub use memory::InMemoryStore;
pub use persistence::SqliteStore;
pub use store::{EnqueueMode, FailOutcome, SchedulerStore};

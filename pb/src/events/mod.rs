//! Event bus, typed progress events, and log batching

mod batch;
mod bus;
pub mod types;

pub use batch::LogBatcher;
pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use types::{EventFilter, EventKind, TaskEvent};

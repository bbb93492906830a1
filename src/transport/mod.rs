//! Message bus abstraction for pluggable pub/sub backends

pub mod local;
pub mod traits;

pub use local::LocalBus;
pub use traits::{BusMessage, MessageBus};

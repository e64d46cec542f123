//! The Message Bus: persisted pub/sub between agents, with delivery and
//! acknowledgement tracking so messages survive a consumer crash.

pub mod model;
pub mod store;

pub use model::{Message, NewMessage, ReceiveFilter};
pub use store::{MessageBus, SqliteMessageBus};

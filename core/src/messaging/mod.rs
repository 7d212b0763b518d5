//! Broker integration: consumer, event handler and test-event publisher.

pub mod consumer;
pub mod emitter;
pub mod handler;

pub use consumer::{decode_event, BrokerConsumer};
pub use emitter::publish_event;
pub use handler::EventHandler;

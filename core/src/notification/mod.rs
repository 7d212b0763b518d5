//! Notification dispatch subsystem: limiter, dispatcher, queue worker and
//! channel transports.

pub mod channels;
pub mod dispatcher;
pub mod limiter;
pub mod worker;

pub use channels::{default_channels, NotificationChannel};
pub use dispatcher::NotificationDispatcher;
pub use limiter::{NotificationLimiter, Verdict};
pub use worker::NotificationWorker;

//! Alert delivery.
//!
//! Alerts produced by the watch sources travel through a bounded
//! [`queue`] to a single [`Dispatcher`], which hands each one to the
//! [`FanoutNotifier`] and retries failed deliveries at a fixed interval.
//!
//! # Features
//!
//! - Multiple notification channels (Telegram, Discord, Email, SendGrid, Teams, Webhook)
//! - Backpressure instead of dropping alerts when delivery falls behind
//! - Fixed-interval retry with a cancellable backoff
//!
//! # Example
//!
//! ```ignore
//! use logwatcher::notification::{Dispatcher, FanoutNotifier, RetryPolicy, alert_queue};
//!
//! let notifier = Arc::new(FanoutNotifier::from_config(&config.notifications)?);
//! let (tx, rx) = alert_queue(10);
//! let stats = Dispatcher::new(notifier, RetryPolicy::default(), reporter)
//!     .run(rx, token)
//!     .await;
//! ```

pub mod alert;
pub mod channels;
pub mod dispatcher;
pub mod fanout;
pub mod queue;

pub use alert::Alert;
pub use channels::{ChannelConfig, NotificationChannel, NotificationsConfig};
pub use dispatcher::{DispatchStats, Dispatcher, RetryPolicy};
pub use fanout::{FanoutNotifier, Notifier};
pub use queue::{AlertReceiver, AlertSender, DEFAULT_QUEUE_CAPACITY, alert_queue};

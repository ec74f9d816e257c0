//! Cluster view notifications.

pub mod events;

pub use events::{CacheManagerNotifier, LoggingNotifier, NoopNotifier, ViewChangeEvent};

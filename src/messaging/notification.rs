// User notifications - soft failures routed to the user through a single channel

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::messaging::channels::NotificationProducer;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Category of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Midi,
    Generation,
    Playback,
    Generic,
}

/// Notification with timestamp and metadata
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    /// Requires explicit acknowledgement from the user (modal)
    pub blocking: bool,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, category: NotificationCategory, message: String) -> Self {
        Self {
            level,
            category,
            message,
            blocking: false,
            timestamp: Utc::now(),
        }
    }

    pub fn info(category: NotificationCategory, message: String) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(category: NotificationCategory, message: String) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn error(category: NotificationCategory, message: String) -> Self {
        Self::new(NotificationLevel::Error, category, message)
    }

    /// Mark the notification as requiring acknowledgement
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// True if the notification is younger than `max_age_ms`
    pub fn is_recent(&self, max_age_ms: i64) -> bool {
        (Utc::now() - self.timestamp).num_milliseconds() < max_age_ms
    }
}

/// Destination of user notifications
pub trait UserNotifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Only logs notifications
#[derive(Debug, Default)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => info!("[{:?}] {}", notification.category, notification.message),
            NotificationLevel::Warning => warn!("[{:?}] {}", notification.category, notification.message),
            NotificationLevel::Error => error!("[{:?}] {}", notification.category, notification.message),
        }
    }
}

/// Pushes notifications into a ring buffer consumed by the UI
pub struct ChannelNotifier {
    tx: Mutex<NotificationProducer>,
}

impl ChannelNotifier {
    pub fn new(tx: NotificationProducer) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl UserNotifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        let Ok(mut tx) = self.tx.lock() else {
            return;
        };
        if let Err(dropped) = ringbuf::traits::Producer::try_push(&mut *tx, notification) {
            warn!("Notification channel full, dropped: {}", dropped.message);
        }
    }
}

// User notification plumbing

pub mod channels;
pub mod notification;

pub use channels::{NotificationConsumer, NotificationProducer, create_notification_channel};
pub use notification::{
    ChannelNotifier, LogNotifier, Notification, NotificationCategory, NotificationLevel,
    UserNotifier,
};

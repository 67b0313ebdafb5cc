// Lock-free channel carrying user notifications to the host UI

use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Split};

/// Default capacity; notifications are rare, a full channel drops the newest
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(capacity: usize) -> (NotificationProducer, NotificationConsumer) {
    HeapRb::<Notification>::new(capacity.max(1)).split()
}

//! Local notifications emitted by the push router

use alloy_primitives::Address;
use tracing::info;

/// What the user lands on when opening a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationIntent {
    /// Review and sign a transaction requested by a paired device
    ReviewTransaction { safe: Address, hash: String },
    /// Open the details of a Safe
    ViewSafe { safe: Address },
}

/// Notification handed to the platform sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNotification {
    /// Slot id; notifications with the same id replace each other
    pub id: i32,
    pub title: String,
    pub body: String,
    pub intent: NotificationIntent,
    pub channel_id: Option<String>,
}

/// Platform notification sink
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: LocalNotification);
}

/// Sink that writes notifications to the log, used by the daemon
#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn show(&self, notification: LocalNotification) {
        info!(
            "🔔 [{}] {}: {} ({:?})",
            notification.id, notification.title, notification.body, notification.intent
        );
    }
}

/// 31-multiplier string hash over UTF-16 code units with i32 wrap-around.
///
/// Notification slot ids must stay stable across restarts and match the ids
/// other clients derive for the same hash or address.
pub fn hash_code(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

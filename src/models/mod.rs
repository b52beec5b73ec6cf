pub mod alert;
pub mod notification;
pub mod quote;
pub mod user;

pub use alert::{alert_type_label, AlertLog, AlertRule, Frequency};
pub use notification::{parse_clock, Notification, NotificationPreference, ALERT_TRIGGERED};
pub use quote::{AssetClass, MarketSnapshot, Quote};
pub use user::CurrentUser;

//! 通知模块
//!
//! - `dispatcher`: 投递通道（Kafka、HTTP、测试用记录通道）
//! - `sender`: 后台发送与独立重试

mod dispatcher;
mod sender;

#[cfg(any(test, feature = "mocks"))]
pub use dispatcher::MockNotificationDispatcher;
pub use dispatcher::{
    HttpNotificationDispatcher, KafkaNotificationDispatcher, NotificationDispatcher,
    RecordingDispatcher,
};
pub use sender::NotificationSender;

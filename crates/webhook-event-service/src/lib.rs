//! webhook 事件服务
//!
//! 消费电商平台推送到 Kafka 的 webhook，解码为强类型事件后按事件类型记账：
//! 订单返现、会员资格赠送、注册赠送、以旧换新入账，以及会员资料同步。
//!
//! 平台按至少一次语义投递，所有入账都以 `tenant:eventKind:sourceEventId` 去重。

pub mod consumer;
pub mod error;
pub mod event;
pub mod processor;

pub use consumer::{DeadLetterSink, Disposition, HandlerSettings, WebhookConsumer, handle_message};
pub use error::{Result, WebhookError};
pub use event::{CommerceEvent, WebhookEvent};
pub use processor::{EventProcessor, HandleOutcome};

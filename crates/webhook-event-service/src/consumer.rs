//! Kafka 消费者与失败路由
//!
//! 将 Kafka 消息解码为 webhook 事件并交给 EventProcessor：
//! - 解码失败、不支持的 topic、未知会员等永久失败直接进入死信队列，不再重投
//! - 瞬时故障先在进程内按退避策略重试（同一幂等键，重试是安全的），
//!   耗尽后带着剩余重投预算进入死信队列，由 DlqConsumer 延迟发回原 topic

use std::time::Duration;

use async_trait::async_trait;
use credit_shared::config::AppConfig;
use credit_shared::dlq::DlqProducer;
use credit_shared::error::CreditError;
use credit_shared::events::WebhookEnvelope;
use credit_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use credit_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Result, WebhookError};
use crate::event::WebhookEvent;
use crate::processor::{EventProcessor, HandleOutcome};

/// 处理失败消息的去向
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// 永久失败，只供人工排查
    async fn permanent(
        &self,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> std::result::Result<(), CreditError>;

    /// 瞬时失败，稍后重投
    async fn retry_later(
        &self,
        envelope: &WebhookEnvelope,
        error: &str,
        retry_count: u32,
    ) -> std::result::Result<(), CreditError>;
}

#[async_trait]
impl DeadLetterSink for DlqProducer {
    async fn permanent(
        &self,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> std::result::Result<(), CreditError> {
        self.send_permanent(message_id, topics::WEBHOOK_EVENTS, payload, error)
            .await
    }

    async fn retry_later(
        &self,
        envelope: &WebhookEnvelope,
        error: &str,
        retry_count: u32,
    ) -> std::result::Result<(), CreditError> {
        self.send_envelope_to_dlq(envelope, error, retry_count)
            .await
    }
}

/// 单条消息的最终去向
#[derive(Debug, Clone)]
pub enum Disposition {
    Handled(HandleOutcome),
    DeadLettered { permanent: bool, code: &'static str },
}

/// 进程内重试参数
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl HandlerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry: config.webhooks.retry_policy(),
            timeout: config.webhooks.handler_timeout(),
        }
    }
}

/// webhook 事件消费者
pub struct WebhookConsumer {
    consumer: KafkaConsumer,
    processor: EventProcessor,
    dead_letters: DlqProducer,
    settings: HandlerSettings,
}

impl WebhookConsumer {
    pub fn new(
        config: &AppConfig,
        processor: EventProcessor,
        dead_letters: DlqProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("webhooks"))?;
        Ok(Self {
            consumer,
            processor,
            dead_letters,
            settings: HandlerSettings::from_config(config),
        })
    }

    /// 启动消费循环，直到收到关闭信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[topics::WEBHOOK_EVENTS])?;
        info!(topic = topics::WEBHOOK_EVENTS, "webhook 事件消费者已启动");

        let processor = self.processor;
        let dead_letters = self.dead_letters;
        let settings = self.settings;

        self.consumer
            .start(shutdown, |msg| {
                let processor = &processor;
                let dead_letters = &dead_letters;
                let settings = &settings;
                async move {
                    match handle_message(processor, dead_letters, settings, &msg).await {
                        Ok(_) => Ok(()),
                        Err(e) => {
                            error!(
                                error = %e,
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "webhook 消息未能处理也未能进入死信队列"
                            );
                            // 不提交位点，留给重新投递
                            Err(match e {
                                WebhookError::Infra(inner) => inner,
                                other => CreditError::Internal(other.to_string()),
                            })
                        }
                    }
                }
            })
            .await;

        info!("webhook 事件消费者已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息
///
/// 只有死信队列本身写入失败时才返回错误。
pub async fn handle_message(
    processor: &EventProcessor,
    dead_letters: &dyn DeadLetterSink,
    settings: &HandlerSettings,
    msg: &ConsumerMessage,
) -> Result<Disposition> {
    let message_id = msg
        .key
        .clone()
        .unwrap_or_else(|| format!("{}-{}-{}", msg.topic, msg.partition, msg.offset));

    let envelope: WebhookEnvelope = match msg.deserialize_payload() {
        Ok(envelope) => envelope,
        Err(e) => {
            let error = WebhookError::Malformed(e.to_string());
            let payload = String::from_utf8_lossy(&msg.payload);
            warn!(message_id = %message_id, error = %error, "信封无法解析，进入死信队列");
            dead_letters
                .permanent(&message_id, &payload, &error.to_string())
                .await?;
            return Ok(dead_lettered(true, &error));
        }
    };

    let event = match WebhookEvent::decode(&envelope) {
        Ok(event) => event,
        Err(error) => {
            warn!(
                event_id = %envelope.event_id,
                topic = %envelope.topic,
                error = %error,
                "事件解码失败，进入死信队列"
            );
            let payload = serde_json::to_string(&envelope).map_err(CreditError::from)?;
            dead_letters
                .permanent(&envelope.event_id, &payload, &error.to_string())
                .await?;
            return Ok(dead_lettered(true, &error));
        }
    };

    let timeout = settings.timeout;
    let result = retry_with_policy(
        &settings.retry,
        "webhook.handle",
        WebhookError::is_retryable,
        || {
            let event = &event;
            async move {
                tokio::time::timeout(timeout, processor.handle(event))
                    .await
                    .map_err(|_| WebhookError::Timeout(event.event.kind().to_string()))?
            }
        },
    )
    .await;

    match result {
        Ok(outcome) => {
            info!(
                event_id = %event.source_event_id,
                tenant_id = %event.tenant_id,
                event_kind = event.event.kind(),
                outcome = outcome.as_str(),
                "webhook 事件处理完成"
            );
            Ok(Disposition::Handled(outcome))
        }
        Err(error) if error.is_retryable() => {
            error!(
                event_id = %event.source_event_id,
                error = %error,
                "进程内重试耗尽，进入死信队列等待重投"
            );
            dead_letters
                .retry_later(&envelope, &error.to_string(), msg.dlq_retry_count())
                .await?;
            Ok(dead_lettered(false, &error))
        }
        Err(error) => {
            error!(
                event_id = %event.source_event_id,
                code = error.code(),
                error = %error,
                "事件永久失败，进入死信队列"
            );
            let payload = serde_json::to_string(&envelope).map_err(CreditError::from)?;
            dead_letters
                .permanent(&event.source_event_id, &payload, &error.to_string())
                .await?;
            Ok(dead_lettered(true, &error))
        }
    }
}

fn dead_lettered(permanent: bool, error: &WebhookError) -> Disposition {
    Disposition::DeadLettered {
        permanent,
        code: error.code(),
    }
}

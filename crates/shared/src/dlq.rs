//! 死信队列处理
//!
//! 当 webhook 事件处理失败且进程内重试耗尽后，消息会被发送到死信队列（DLQ）。
//! DLQ 消费者会按退避策略重新投递到原始 topic，超过上限后记录日志等待人工介入。
//! 负载格式错误属于永久失败，以 `max_retries = 0` 入队，只用于人工排查。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::CreditError;
use crate::events::WebhookEnvelope;
use crate::kafka::{ConsumerMessage, DLQ_RETRY_COUNT_HEADER, KafkaConsumer, KafkaProducer, topics};
use crate::retry::RetryPolicy;

/// 死信消息：原始负载加失败元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// webhook 的 event_id，无法解析时为 `topic-partition-offset`
    pub message_id: String,
    pub source_topic: String,
    pub payload: String,
    pub error: String,
    /// 已被重投的次数
    pub retry_count: u32,
    /// 0 表示永久失败
    pub max_retries: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    /// None 表示不再重投
    pub next_retry_at: Option<DateTime<Utc>>,
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 首次入队的消息立即可重投
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        max_retries: u32,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count: 0,
            max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: (max_retries > 0).then_some(now),
            source_service: source_service.into(),
        }
    }

    /// 以已有的重投次数构造（消息已被 DLQ 重投过，再次失败）
    pub fn with_retry_count(mut self, retry_count: u32, retry_policy: &RetryPolicy) -> Self {
        self.retry_count = retry_count;
        self.next_retry_at = if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(retry_count);
            Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default())
        } else {
            None
        };
        self
    }

    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// 死信写入端
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str, retry_policy: RetryPolicy) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            retry_policy,
        }
    }

    /// 将失败消息发送到死信队列
    ///
    /// `retry_count` 为消息已被 DLQ 重投的次数，来自消息头。
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        retry_count: u32,
    ) -> Result<(), CreditError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            self.retry_policy.max_retries,
            &self.source_service,
        )
        .with_retry_count(retry_count, &self.retry_policy);

        self.publish(&dlq_msg).await
    }

    /// 发送永久失败的消息（格式错误等），不会被重投
    pub async fn send_permanent(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
    ) -> Result<(), CreditError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            0,
            &self.source_service,
        );

        self.publish(&dlq_msg).await
    }

    /// 将 webhook 信封序列化后发送到死信队列
    pub async fn send_envelope_to_dlq(
        &self,
        envelope: &WebhookEnvelope,
        error: &str,
        retry_count: u32,
    ) -> Result<(), CreditError> {
        let payload = serde_json::to_string(envelope)?;
        self.send_to_dlq(
            &envelope.event_id,
            topics::WEBHOOK_EVENTS,
            &payload,
            error,
            retry_count,
        )
        .await
    }

    async fn publish(&self, dlq_msg: &DeadLetterMessage) -> Result<(), CreditError> {
        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, &dlq_msg.message_id, dlq_msg)
            .await?;

        warn!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            error = %dlq_msg.error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

/// 死信重放：到期的消息带着递增的重投次数发回原始 topic，预算用尽的只记录日志
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    /// 将待重试的消息发回原始 topic
    retry_producer: KafkaProducer,
}

impl DlqConsumer {
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, CreditError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?;
        consumer.subscribe(&[topics::DEAD_LETTER_QUEUE])?;

        info!(topic = topics::DEAD_LETTER_QUEUE, "DLQ 消费者已创建");

        Ok(Self {
            consumer,
            retry_producer,
        })
    }

    /// 启动 DLQ 消费循环
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let retry_producer = self.retry_producer.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let producer = retry_producer.clone();
                async move { handle_dlq_message(&msg, &producer).await }
            })
            .await;

        info!("DLQ 消费循环已退出");
    }
}

/// 重投时沿用信封的分区键，保持同一会员的事件有序
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
) -> Result<(), CreditError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    if dlq_msg.should_retry() {
        if let Some(next_retry) = dlq_msg.next_retry_at {
            let wait = (next_retry - Utc::now()).to_std().unwrap_or_default();
            if !wait.is_zero() {
                info!(
                    message_id = %dlq_msg.message_id,
                    wait_ms = wait.as_millis() as u64,
                    "死信消息重试时间未到，等待后重投"
                );
                tokio::time::sleep(wait).await;
            }
        }

        info!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            "重试死信消息，发回原始 topic"
        );

        let partition_key = serde_json::from_str::<WebhookEnvelope>(&dlq_msg.payload)
            .map(|envelope| envelope.partition_key())
            .unwrap_or_else(|_| dlq_msg.message_id.clone());

        retry_producer
            .send_with_headers(
                &dlq_msg.source_topic,
                &partition_key,
                dlq_msg.payload.as_bytes(),
                &[(DLQ_RETRY_COUNT_HEADER, (dlq_msg.retry_count + 1).to_string())],
            )
            .await?;
    } else {
        error!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            source_service = %dlq_msg.source_service,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            first_failed_at = %dlq_msg.first_failed_at,
            last_failed_at = %dlq_msg.last_failed_at,
            error = %dlq_msg.error,
            "死信消息不再重投，需人工介入"
        );
    }

    Ok(())
}

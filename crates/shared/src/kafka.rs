//! Kafka 生产者与消费者封装
//!
//! 消费端关闭自动提交：handler 返回后才提交位点，进程在处理中途退出时消息会被重新投递，
//! 下游依靠幂等键吸收重复。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::CreditError;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub mod topics {
    /// 电商平台 webhook 入站事件，key 为 `tenant:customer`，同一会员的事件落在同一分区
    pub const WEBHOOK_EVENTS: &str = "credit.webhook.events";
    /// 出站通知请求
    pub const CREDIT_NOTIFICATIONS: &str = "credit.notifications";
    pub const DEAD_LETTER_QUEUE: &str = "credit.dlq";
}

/// 死信重投时携带的重试次数消息头
pub const DLQ_RETRY_COUNT_HEADER: &str = "x-dlq-retry-count";

/// 已消费消息的自有副本，可以跨 await 传给 handler
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let headers: HashMap<String, String> = msg
            .headers()
            .map(|h| {
                h.iter()
                    .filter_map(|header| {
                        let value = std::str::from_utf8(header.value?).ok()?;
                        Some((header.key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(String::from),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 死信重投次数，首次投递为 0
    pub fn dlq_retry_count(&self) -> u32 {
        self.headers
            .get(DLQ_RETRY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, CreditError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| CreditError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

/// Kafka 生产者，克隆开销很小
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, CreditError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| CreditError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始负载，返回 (partition, offset)
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, String)],
    ) -> Result<(i32, i64), CreditError> {
        let owned_headers = headers.iter().fold(OwnedHeaders::new(), |acc, (k, v)| {
            acc.insert(Header {
                key: k,
                value: Some(v.as_str()),
            })
        });
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        let delivery = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| CreditError::Kafka(format!("发送消息失败: topic={topic}, {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), CreditError> {
        let payload = serde_json::to_vec(value)?;
        self.send_with_headers(topic, key, &payload, &[]).await
    }
}

/// Kafka 消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// `group_id_suffix` 让同一服务里的 webhook 消费与死信重放使用各自的消费组
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, CreditError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| CreditError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer, group_id })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), CreditError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| CreditError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }

    /// 消费循环，直到 `shutdown` 变为 true
    ///
    /// handler 成功后提交该消息的位点。handler 失败只记录日志，位点不提交，
    /// 进程重启前若没有后续提交，该消息会被重新投递。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), CreditError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(group_id = %self.group_id, "收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                next = stream.next() => {
                    let Some(received) = next else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    let borrowed = match received {
                        Ok(borrowed) => borrowed,
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let msg = ConsumerMessage::from_borrowed(&borrowed);
                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );
                    let (partition, offset) = (msg.partition, msg.offset);

                    match handler(msg).await {
                        Ok(()) => {
                            if let Err(e) = self.consumer.commit_message(&borrowed, CommitMode::Async) {
                                warn!(partition, offset, error = %e, "提交位点失败");
                            }
                        }
                        Err(e) => {
                            error!(partition, offset, error = %e, code = e.code(), "处理 Kafka 消息失败，位点未提交");
                        }
                    }
                }
            }
        }
    }
}

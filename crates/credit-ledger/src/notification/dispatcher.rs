//! 通知投递通道
//!
//! 通知服务本身是外部协作方，这里只负责把"给会员发送某模板"的请求送出去。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use credit_shared::error::CreditError;
use credit_shared::events::NotificationEvent;
use credit_shared::kafka::{KafkaProducer, topics};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// 通知投递接口
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &NotificationEvent) -> Result<(), CreditError>;
}

/// 发布到 `credit.notifications` 主题，按会员分区保证同一会员的通知有序
pub struct KafkaNotificationDispatcher {
    producer: Arc<KafkaProducer>,
}

impl KafkaNotificationDispatcher {
    pub fn new(producer: Arc<KafkaProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl NotificationDispatcher for KafkaNotificationDispatcher {
    async fn dispatch(&self, event: &NotificationEvent) -> Result<(), CreditError> {
        let key = format!("{}:{}", event.tenant_id, event.member_id);
        self.producer
            .send_json(topics::CREDIT_NOTIFICATIONS, &key, event)
            .await?;
        debug!(
            notification_id = %event.notification_id,
            template = %event.template,
            "通知请求已发布"
        );
        Ok(())
    }
}

/// 以 JSON POST 投递到外部通知服务
pub struct HttpNotificationDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotificationDispatcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CreditError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CreditError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn dispatch(&self, event: &NotificationEvent) -> Result<(), CreditError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| CreditError::ExternalService {
                service: "notification".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(CreditError::ExternalService {
                service: "notification".to_string(),
                message: format!("HTTP {}", resp.status()),
            });
        }
        Ok(())
    }
}

/// 记录投递内容的通道，可模拟前 N 次失败
#[derive(Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<NotificationEvent>>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
    notify: Notify,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 `count` 次投递返回可重试错误
    pub fn failing_first(count: u32) -> Self {
        let dispatcher = Self::default();
        *dispatcher.failures_left.lock() = count;
        dispatcher
    }

    pub fn delivered(&self) -> Vec<NotificationEvent> {
        self.delivered.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// 等待至少 `count` 条投递成功，超时返回当前已投递的内容
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<NotificationEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let delivered = self.delivered.lock();
                if delivered.len() >= count {
                    return delivered.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.delivered();
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &NotificationEvent) -> Result<(), CreditError> {
        *self.attempts.lock() += 1;
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(CreditError::ExternalService {
                    service: "notification".to_string(),
                    message: "模拟投递失败".to_string(),
                });
            }
        }
        self.delivered.lock().push(event.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

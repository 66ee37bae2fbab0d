//! 通知发送器
//!
//! 账本提交后由调用方触发。发送在独立任务中进行，拥有自己的重试策略与单次超时，
//! 调用方从不等待结果，投递失败也不会回滚或阻塞已提交的记账。

use std::sync::Arc;
use std::time::Duration;

use credit_shared::config::NotificationConfig;
use credit_shared::error::CreditError;
use credit_shared::events::{NotificationEvent, NotificationTemplate};
use credit_shared::observability::metrics;
use credit_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::dispatcher::NotificationDispatcher;

/// 通知发送器
#[derive(Clone)]
pub struct NotificationSender {
    dispatcher: Arc<dyn NotificationDispatcher>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl NotificationSender {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            policy,
            timeout,
        }
    }

    pub fn from_config(dispatcher: Arc<dyn NotificationDispatcher>, config: &NotificationConfig) -> Self {
        Self::new(dispatcher, config.retry_policy(), config.timeout())
    }

    /// 发送通知（fire-and-forget）
    ///
    /// 返回的句柄只用于测试等待，业务调用方直接丢弃。
    pub fn notify(
        &self,
        tenant_id: &str,
        member_id: &str,
        template: NotificationTemplate,
        context: serde_json::Value,
    ) -> JoinHandle<()> {
        let event = NotificationEvent::new(tenant_id, member_id, template, context);
        self.send_async(event)
    }

    fn send_async(&self, event: NotificationEvent) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let policy = self.policy.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = retry_with_policy(
                &policy,
                "notification.dispatch",
                CreditError::is_retryable,
                || {
                    let dispatcher = dispatcher.clone();
                    let event = &event;
                    async move {
                        tokio::time::timeout(timeout, dispatcher.dispatch(event))
                            .await
                            .map_err(|_| CreditError::timeout("notification.dispatch"))?
                    }
                },
            )
            .await;

            match result {
                Ok(()) => {
                    metrics::record_notification(event.template.as_str(), "delivered");
                    info!(
                        notification_id = %event.notification_id,
                        tenant_id = %event.tenant_id,
                        member_id = %event.member_id,
                        template = %event.template,
                        "通知发送成功"
                    );
                }
                Err(e) => {
                    metrics::record_notification(event.template.as_str(), "failed");
                    error!(
                        notification_id = %event.notification_id,
                        tenant_id = %event.tenant_id,
                        member_id = %event.member_id,
                        template = %event.template,
                        error = %e,
                        "通知发送失败"
                    );
                }
            }
        })
    }
}

//! 请求 DTO 定义

use chrono::NaiveDate;
use credit_ledger::period::parse_date;
use credit_ledger::{JobKind, JobRunFilter, JobRunStatus, Period};
use serde::Deserialize;
use validator::Validate;

use crate::error::ApiError;

/// 月度发放触发请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTriggerRequest {
    /// 为空时触发全部 active 租户
    #[validate(length(min = 1, max = 64, message = "租户 ID 长度必须在1-64个字符之间"))]
    pub tenant_id: Option<String>,
    /// `YYYY-MM`
    #[validate(length(equal = 7, message = "账期格式必须为 YYYY-MM"))]
    pub period: Option<String>,
}

impl MonthlyTriggerRequest {
    pub fn parsed_period(&self) -> Result<Option<Period>, ApiError> {
        self.period
            .as_deref()
            .map(str::parse::<Period>)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))
    }
}

/// 过期扫描 / 预警扫描触发请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScanTriggerRequest {
    #[validate(length(min = 1, max = 64, message = "租户 ID 长度必须在1-64个字符之间"))]
    pub tenant_id: Option<String>,
    /// `YYYY-MM-DD`
    #[validate(length(equal = 10, message = "日期格式必须为 YYYY-MM-DD"))]
    pub date: Option<String>,
}

impl ScanTriggerRequest {
    pub fn parsed_date(&self) -> Result<Option<NaiveDate>, ApiError> {
        self.date
            .as_deref()
            .map(parse_date)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))
    }
}

/// 运行记录列表查询
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobRunQuery {
    pub tenant_id: Option<String>,
    pub job_kind: Option<JobKind>,
    pub status: Option<JobRunStatus>,
    #[validate(range(min = 1, max = 500, message = "limit 必须在1-500之间"))]
    pub limit: Option<i64>,
}

impl From<JobRunQuery> for JobRunFilter {
    fn from(query: JobRunQuery) -> Self {
        Self {
            tenant_id: query.tenant_id,
            job_kind: query.job_kind,
            status: query.status,
            limit: query.limit,
        }
    }
}

/// 余额查询
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    /// 返回的最近流水条数
    #[validate(range(min = 1, max = 200, message = "limit 必须在1-200之间"))]
    pub limit: Option<i64>,
}

impl BalanceQuery {
    pub const DEFAULT_LIMIT: i64 = 20;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_trigger_period_validation() {
        let ok = MonthlyTriggerRequest {
            tenant_id: Some("t-1".into()),
            period: Some("2025-03".into()),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.parsed_period().unwrap(), Some("2025-03".parse().unwrap()));

        let wrong_length = MonthlyTriggerRequest {
            tenant_id: None,
            period: Some("2025-3".into()),
        };
        assert!(wrong_length.validate().is_err());

        let bad_month = MonthlyTriggerRequest {
            tenant_id: None,
            period: Some("2025-13".into()),
        };
        assert!(bad_month.validate().is_ok());
        assert!(bad_month.parsed_period().is_err());
    }

    #[test]
    fn test_scan_trigger_date_parsing() {
        let req = ScanTriggerRequest {
            tenant_id: None,
            date: Some("2025-04-02".into()),
        };
        assert_eq!(
            req.parsed_date().unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 2)
        );
        assert_eq!(ScanTriggerRequest::default().parsed_date().unwrap(), None);

        let empty_tenant = ScanTriggerRequest {
            tenant_id: Some(String::new()),
            date: None,
        };
        assert!(empty_tenant.validate().is_err());
    }

    #[test]
    fn test_job_run_query_deserializes_enums() {
        let query: JobRunQuery =
            serde_json::from_str(r#"{"jobKind":"monthly_credit","status":"failed","limit":10}"#)
                .unwrap();
        assert!(query.validate().is_ok());

        let filter = JobRunFilter::from(query);
        assert_eq!(filter.job_kind, Some(JobKind::MonthlyCredit));
        assert_eq!(filter.status, Some(JobRunStatus::Failed));
        assert_eq!(filter.limit, Some(10));
    }
}

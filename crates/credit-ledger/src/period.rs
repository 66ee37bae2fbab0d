//! 账期与日期计算
//!
//! 所有"月"与"日"的边界都以租户时区的本地零点为准，最终换算为 UTC 存储与比较。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::MAX_PROGRAM_DAYS;

/// 月度账期，键为 `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1970..=9999).contains(&year) {
            return Err(LedgerError::InvalidPeriod(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// 包含该时刻的本地月份
    pub fn containing(tz: Tz, at: DateTime<Utc>) -> Self {
        let local = at.with_timezone(&tz);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn first_day(&self) -> NaiveDate {
        // 构造时已校验月份
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// 账期开始：本月 1 日本地零点
    pub fn start(&self, tz: Tz) -> DateTime<Utc> {
        local_midnight(tz, self.first_day())
    }

    /// 账期结束：次月 1 日本地零点
    pub fn end(&self, tz: Tz) -> DateTime<Utc> {
        self.next().start(tz)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::InvalidPeriod(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Period {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

/// 本地日期零点对应的 UTC 时刻
///
/// 夏令时跳变导致零点不存在时，顺延到跳变后的第一个整点。
pub fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// 租户本地的"今天"
pub fn local_today(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// 过期扫描日期 D 的截止时刻：D+1 本地零点（不含）
///
/// 即"在 D 当天或之前到期"的记录。
pub fn expiration_cutoff(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let next = date.succ_opt().unwrap_or(date);
    local_midnight(tz, next)
}

/// 预警窗口：`[cutoff(D), cutoff(D + window_days))`
///
/// 覆盖将在之后 `window_days` 天内的过期扫描中被扣减的记录。
pub fn warning_window(
    tz: Tz,
    date: NaiveDate,
    window_days: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = expiration_cutoff(tz, date);
    let until_date = date
        .checked_add_signed(Duration::days(window_days.clamp(0, MAX_PROGRAM_DAYS)))
        .unwrap_or(date);
    (from, expiration_cutoff(tz, until_date))
}

/// 月度额度的过期时间：账期结束 + 有效期天数
pub fn monthly_credit_expires_at(tz: Tz, period: Period, validity_days: i64) -> DateTime<Utc> {
    let end = period.end(tz);
    end.checked_add_signed(Duration::days(validity_days.clamp(0, MAX_PROGRAM_DAYS)))
        .unwrap_or(end)
}

/// 解析 ISO 日期 `YYYY-MM-DD`
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| LedgerError::InvalidPeriod(s.to_string()))
}

//! 批处理任务
//!
//! - `monthly_credit`: 月度额度发放
//! - `expiration`: 到期扣减
//! - `warning`: 过期预警（只读扫描，不修改账本）

pub mod expiration;
pub mod monthly_credit;
pub mod warning;

pub use expiration::ExpirationJob;
pub use monthly_credit::MonthlyCreditJob;
pub use warning::WarningJob;

use chrono::{DateTime, Utc};
use credit_ledger::ExpiringEntry;

/// 同一会员的一组到期记录，是到期扣减与预警的处理单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberExpiry {
    pub member_id: String,
    /// 按 FIFO 排序
    pub entries: Vec<ExpiringEntry>,
}

impl MemberExpiry {
    pub fn total_cents(&self) -> i64 {
        self.entries.iter().map(|e| e.amount_cents).sum()
    }

    pub fn entry_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.entry_id).collect()
    }

    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.expires_at).min()
    }
}

/// 把按会员排好序的到期记录聚合为每会员一组
pub fn group_by_member(entries: Vec<ExpiringEntry>) -> Vec<MemberExpiry> {
    let mut groups: Vec<MemberExpiry> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(group) if group.member_id == entry.member_id => group.entries.push(entry),
            _ => groups.push(MemberExpiry {
                member_id: entry.member_id.clone(),
                entries: vec![entry],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: i64, member: &str, amount: i64, days: i64) -> ExpiringEntry {
        let now = Utc::now();
        ExpiringEntry {
            entry_id: id,
            tenant_id: "t-1".into(),
            member_id: member.into(),
            amount_cents: amount,
            created_at: now,
            expires_at: now + Duration::days(days),
        }
    }

    #[test]
    fn test_group_by_member_keeps_order() {
        let groups = group_by_member(vec![
            entry(1, "m-1", 1_000, 1),
            entry(2, "m-1", 1_500, 5),
            entry(3, "m-2", 700, 2),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].member_id, "m-1");
        assert_eq!(groups[0].entry_ids(), vec![1, 2]);
        assert_eq!(groups[0].total_cents(), 2_500);
        assert_eq!(groups[1].total_cents(), 700);
        assert_eq!(groups[0].earliest_expiry(), Some(groups[0].entries[0].expires_at));
    }

    #[test]
    fn test_group_by_member_empty() {
        assert!(group_by_member(Vec::new()).is_empty());
    }
}

//! 积分账本领域模型

pub mod enums;
pub mod job_run;
pub mod ledger;
pub mod member;
pub mod tenant;

pub use enums::{EntryKind, JobKind, JobRunStatus, MemberStatus, OverdraftPolicy};
pub use job_run::{
    BeginOptions, ChunkProgress, ClaimDecision, JobClaim, JobRun, JobRunFailure, JobRunFilter,
    ProgressAck,
};
pub use ledger::{
    ExpirationOffset, ExpiringEntry, ExpiringQuery, LedgerEntry, PostOutcome, PostRequest,
    attribute_fifo, batch_idempotency_key, event_idempotency_key,
};
pub use member::{Member, MemberProfileUpdate, NewMember};
pub use tenant::{
    BPS_DENOMINATOR, MAX_PROGRAM_DAYS, ProgramConfig, Tenant, TierBenefit, apply_bps,
};

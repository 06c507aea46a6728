pub mod session;
pub mod tracked_query;

use chrono::{DateTime, SubsecRound, Utc};

pub use session::{
    Message, MessagePreview, NewMessage, Role, Session, SessionMatch, SessionSummary,
};
pub use tracked_query::{
    ActiveQuery, Changes, Snapshot, SourceRef, Sources, TrackedQuery, TrackedQuerySummary,
};

/// Current UTC time at PostgreSQL `TIMESTAMPTZ` precision, so values compare
/// equal after a round trip through either store.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

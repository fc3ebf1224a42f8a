use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod round;
pub mod session;
pub mod sse;
pub mod validation;
pub mod ws;

pub(crate) fn format_timestamp(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

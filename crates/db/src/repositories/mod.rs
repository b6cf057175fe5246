use chrono::{DateTime, Utc};

use granta_core::errors::StoreError;

pub mod approval;
pub mod directory;
pub mod escalation;
pub mod request;

pub use approval::SqlApprovalStore;
pub use directory::SqlDirectory;
pub use escalation::SqlEscalationStore;
pub use request::SqlRequestStore;

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub(crate) fn decode(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

pub(crate) fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| decode(format!("invalid timestamp in `{column}`: {err}")))
}

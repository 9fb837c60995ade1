//! Shared datetime aliases

use chrono::{DateTime, Utc};

/// Database DateTime type used by every entity timestamp column
pub type DBDateTime = DateTime<Utc>;

/// Standard UTC DateTime type used in API payloads
///
/// When used with utoipa, add the schema attribute:
/// ```rust,ignore
/// #[schema(value_type = String, format = DateTime)]
/// pub field: UtcDateTime,
/// ```
pub type UtcDateTime = DateTime<Utc>;

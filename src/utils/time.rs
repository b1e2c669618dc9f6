//! Timestamps as stored in the durable state record.
//!
//! Timestamps are written in the `toISOString` shape (UTC, millisecond precision, trailing `Z`)
//! so that records written by this crate and records written by the browser client it replaces
//! can be read interchangeably.  Any RFC 3339 string is accepted on the way in.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const ISO_MILLIS: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// The current time, truncated to the precision that survives a round trip through storage.
pub fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_millisecond(now.millisecond()).unwrap_or(now)
}

/// Format a timestamp the way it is stored.
pub fn format(datetime: &OffsetDateTime) -> Result<String, time::error::Format> {
    datetime.to_offset(UtcOffset::UTC).format(ISO_MILLIS)
}

/// Parse any RFC 3339 timestamp, normalized to UTC.
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(s, &Rfc3339).map(|dt| dt.to_offset(UtcOffset::UTC))
}

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into a millisecond-precision UTC string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = format(datetime).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// The same encoding for optional timestamps.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    /// Deserialize an optional RFC 3339 string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// Serialize an optional timestamp.
    pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match datetime {
            Some(datetime) => super::serialize(datetime, serializer),
            None => serializer.serialize_none(),
        }
    }
}

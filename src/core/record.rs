use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::extractor::CardIdentity;
use crate::core::utils::format_hex_spaced;

/// One accepted card presentation, as stored in the record log.
///
/// Serialized keys match the log files written by earlier deployments
/// (`uid`, `reader`, `apdu`), so existing logs keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReadRecord {
    #[serde(rename = "uid")]
    pub identifier: String,
    pub raw_bytes: Vec<u8>,
    #[serde(rename = "reader")]
    pub reader_name: String,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_local_timestamp")]
    pub timestamp_local: DateTime<FixedOffset>,
    #[serde(rename = "apdu")]
    pub command_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atr: Option<String>,
}

impl CardReadRecord {
    /// Build a record for `identity`, stamped with the current time.
    pub fn new(identity: &CardIdentity, reader_name: &str, command: &[u8], atr: Option<&[u8]>) -> Self {
        Self::captured_at(identity, reader_name, command, atr, Utc::now())
    }

    pub fn captured_at(
        identity: &CardIdentity,
        reader_name: &str,
        command: &[u8],
        atr: Option<&[u8]>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identity.uid.clone(),
            raw_bytes: identity.raw.clone(),
            reader_name: reader_name.to_string(),
            timestamp_utc: at,
            timestamp_local: at.with_timezone(&Local).fixed_offset(),
            command_used: format_hex_spaced(command),
            atr: atr.map(format_hex_spaced),
        }
    }
}

/// Accepts RFC 3339, or a naive timestamp taken to be in the local zone
/// (older logs stored local time without an offset).
fn deserialize_local_timestamp<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(timestamp);
    }

    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| serde::de::Error::custom(format!("invalid local timestamp '{raw}': {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|timestamp| timestamp.fixed_offset())
        .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time '{raw}'")))
}

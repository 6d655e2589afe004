use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Wall-clock time with second precision, as seconds since the unix epoch.
///
/// Encodes to a fixed-size big-endian integer in table keys, so ordering of
/// keys matches chronological ordering.
#[derive(
    Debug,
    Encode,
    Decode,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        )
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs()))
    }

    pub fn to_offset_date_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(i64::try_from(self.0).ok()?).ok()
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self
            .to_offset_date_time()
            .and_then(|dt| dt.format(&Rfc3339).ok())
        {
            Some(formatted) => f.write_str(&formatted),
            None => write!(f, "@{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_sub_does_not_underflow() {
        let ts = Timestamp::from(10);
        assert_eq!(ts.saturating_sub(Duration::from_secs(60)), Timestamp::ZERO);
        assert_eq!(
            ts.saturating_sub(Duration::from_secs(4)),
            Timestamp::from(6)
        );
    }

    #[test]
    fn display_is_rfc3339() {
        assert_eq!(Timestamp::from(0).to_string(), "1970-01-01T00:00:00Z");
        assert_eq!(
            Timestamp::from(1_700_000_000).to_string(),
            "2023-11-14T22:13:20Z"
        );
    }
}

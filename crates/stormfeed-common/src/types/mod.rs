//! Common types used across stormfeed

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of storm report document published by the upstream source.
///
/// The set is closed: every fetched document and every record derived from it
/// carries exactly one of these tags.
///
/// # Examples
///
/// ```
/// use stormfeed_common::SourceType;
///
/// let source: SourceType = "hail".parse().unwrap();
/// assert_eq!(source, SourceType::Hail);
/// assert_eq!(source.tag(), "hail");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    /// Tornado reports
    #[serde(rename = "torn")]
    Tornado,
    /// Hail reports
    #[serde(rename = "hail")]
    Hail,
    /// Damaging wind reports
    #[serde(rename = "wind")]
    Wind,
}

impl SourceType {
    /// Every source type, in the order they are scheduled by default
    pub const ALL: [SourceType; 3] = [SourceType::Tornado, SourceType::Hail, SourceType::Wind];

    /// Short tag used in upstream file names and in the injected `sourceType` field
    pub fn tag(self) -> &'static str {
        match self {
            SourceType::Tornado => "torn",
            SourceType::Hail => "hail",
            SourceType::Wind => "wind",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "torn" | "tornado" => Ok(SourceType::Tornado),
            "hail" => Ok(SourceType::Hail),
            "wind" => Ok(SourceType::Wind),
            _ => Err(Error::UnknownSourceType(s.to_string())),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;

/// An integer match score in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MatchScore(u8);

impl MatchScore {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Result<Self, AllocationError> {
        if value > Self::MAX {
            return Err(AllocationError::Validation(format!(
                "match score {} is outside 0..=100",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for MatchScore {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MatchScore::new(value).map_err(|e| e.to_string())
    }
}

impl From<MatchScore> for u8 {
    fn from(score: MatchScore) -> Self {
        score.0
    }
}

impl std::fmt::Display for MatchScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Matched,
    Partial,
    Conflict,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Matched => "matched",
            AllocationStatus::Partial => "partial",
            AllocationStatus::Conflict => "conflict",
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(AllocationStatus::Matched),
            "partial" => Ok(AllocationStatus::Partial),
            "conflict" => Ok(AllocationStatus::Conflict),
            other => Err(format!("unknown allocation status '{}'", other)),
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score boundaries: `> matched_above` is matched, `> partial_above` is
/// partial, anything else is a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusThresholds {
    pub matched_above: u8,
    pub partial_above: u8,
}

impl StatusThresholds {
    pub const CANONICAL: StatusThresholds = StatusThresholds {
        matched_above: 90,
        partial_above: 60,
    };

    pub fn new(matched_above: u8, partial_above: u8) -> Result<Self, AllocationError> {
        let thresholds = Self { matched_above, partial_above };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.partial_above >= self.matched_above || self.matched_above > MatchScore::MAX {
            return Err(AllocationError::Validation(format!(
                "invalid thresholds: partial boundary {} must be below matched boundary {} (max 100)",
                self.partial_above, self.matched_above
            )));
        }
        Ok(())
    }

    pub fn classify(&self, score: MatchScore) -> AllocationStatus {
        let v = score.value();
        if v > self.matched_above {
            AllocationStatus::Matched
        } else if v > self.partial_above {
            AllocationStatus::Partial
        } else {
            AllocationStatus::Conflict
        }
    }
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self::CANONICAL
    }
}

/// Status under the canonical 90/60 thresholds.
pub fn derive_status(score: MatchScore) -> AllocationStatus {
    StatusThresholds::CANONICAL.classify(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_is_total_over_range() {
        for v in 0..=100u8 {
            let status = derive_status(MatchScore::new(v).unwrap());
            let expected = if v > 90 {
                AllocationStatus::Matched
            } else if v > 60 {
                AllocationStatus::Partial
            } else {
                AllocationStatus::Conflict
            };
            assert_eq!(status, expected, "score {}", v);
        }
    }

    #[test]
    fn test_boundaries() {
        let s = |v| derive_status(MatchScore::new(v).unwrap());
        assert_eq!(s(95), AllocationStatus::Matched);
        assert_eq!(s(91), AllocationStatus::Matched);
        assert_eq!(s(90), AllocationStatus::Partial);
        assert_eq!(s(65), AllocationStatus::Partial);
        assert_eq!(s(61), AllocationStatus::Partial);
        assert_eq!(s(60), AllocationStatus::Conflict);
        assert_eq!(s(30), AllocationStatus::Conflict);
    }

    #[test]
    fn test_override_thresholds() {
        let approval = StatusThresholds::new(85, 60).unwrap();
        assert_eq!(approval.classify(MatchScore::new(88).unwrap()), AllocationStatus::Matched);
        assert_eq!(derive_status(MatchScore::new(88).unwrap()), AllocationStatus::Partial);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(StatusThresholds::new(60, 60).is_err());
        assert!(StatusThresholds::new(101, 60).is_err());
    }

    #[test]
    fn test_match_score_bounds() {
        assert!(MatchScore::new(100).is_ok());
        assert!(MatchScore::new(101).is_err());
        assert!(serde_json::from_str::<MatchScore>("150").is_err());
        assert_eq!(serde_json::from_str::<MatchScore>("42").unwrap().value(), 42);
    }
}

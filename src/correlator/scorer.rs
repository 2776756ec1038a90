use crate::evidence::{Classification, EnrichedEvent};

const REGISTRY_PENALTY: i64 = 6;

/// Pure scoring function (spec §8 testable invariant): sum of every
/// member's baseline `score_contribution` plus any rule `score_bonus`,
/// minus the fixed registry penalty on a match. No I/O, no clock reads.
pub fn score(members: &[EnrichedEvent], registry_matched: bool) -> i64 {
    let total: i64 = members.iter().map(|m| m.total_score_contribution()).sum();
    if registry_matched {
        total - REGISTRY_PENALTY
    } else {
        total
    }
}

/// Verdict thresholds (spec §4.6): `<=4` authorized, `5..=8` suspect,
/// `>=9` unauthorized.
pub fn classify(score: i64) -> Classification {
    if score <= 4 {
        Classification::Authorized
    } else if score <= 8 {
        Classification::Suspect
    } else {
        Classification::Unauthorized
    }
}

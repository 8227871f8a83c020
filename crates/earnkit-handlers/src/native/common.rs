//! Join validation shared by every native-staking variant.
//!
//! The variants differ in how they compute nominations, unstaking
//! queues and minimum thresholds, but they all feed the same algorithm:
//! project the active stake toward the target, compare against the
//! effective minimum, and reject cap conflicts and pending unstakes.

use earnkit_core::error::ValidationIssue;
use earnkit_core::types::{Balance, UnstakingInfo, UnstakingStatus};

use crate::context::{EraProgress, UnlockChunk};

/// Per-target facts a variant assembles before validating a join.
#[derive(Debug, Clone, Default)]
pub struct NativeJoinFacts {
    pub chain_min: Balance,
    pub target_min: Balance,
    /// Current active stake already counting toward the chosen target.
    pub active_toward_target: Balance,
    /// Nomination count after the join.
    pub projected_nomination_count: u32,
    pub max_nominations: u32,
    pub target_blocked: bool,
    /// The target is past its nominator cap and the projected stake
    /// would not displace an existing nominator.
    pub target_crowded: bool,
    pub pending_unstake_toward_target: bool,
    pub target_id: String,
}

/// The shared native-staking join check. Monotonic in `amount`: any
/// amount that passes keeps passing when increased, all else equal.
pub fn validate_native_join(
    amount: Balance,
    facts: &NativeJoinFacts,
    symbol: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let projected = facts.active_toward_target.saturating_add(amount);
    let min = facts.chain_min.max(facts.target_min);
    if projected < min {
        issues.push(ValidationIssue::not_enough_min_stake(min, symbol));
    }

    if facts.max_nominations > 0 && facts.projected_nomination_count > facts.max_nominations {
        issues.push(ValidationIssue::exceed_max_nomination(facts.max_nominations));
    }

    if facts.target_blocked {
        issues.push(ValidationIssue::invalid_target(&facts.target_id));
    } else if facts.target_crowded && projected < facts.target_min.max(1) {
        issues.push(ValidationIssue::invalid_target(&facts.target_id));
    }

    if facts.pending_unstake_toward_target {
        issues.push(ValidationIssue::exist_unstake_request(&facts.target_id));
    }

    issues
}

/// Convert ledger unlock chunks into unstaking entries. Chunks whose
/// era has passed are claimable; the rest carry both the remaining wait
/// and the absolute unlock time.
pub fn unstakings_from_chunks(
    chain: &str,
    chunks: &[UnlockChunk],
    era: &EraProgress,
    now_ms: u64,
    target: Option<&str>,
) -> Vec<UnstakingInfo> {
    chunks
        .iter()
        .map(|chunk| {
            if chunk.era <= era.index {
                UnstakingInfo {
                    chain: chain.to_string(),
                    claimable: chunk.value,
                    status: UnstakingStatus::Claimable,
                    target: target.map(str::to_string),
                    waiting_time_ms: None,
                    unlock_timestamp: None,
                }
            } else {
                UnstakingInfo {
                    chain: chain.to_string(),
                    claimable: chunk.value,
                    status: UnstakingStatus::Unlocking,
                    target: target.map(str::to_string),
                    waiting_time_ms: Some(era.waiting_time_ms(chunk.era, now_ms)),
                    unlock_timestamp: Some(era.unlock_timestamp(chunk.era)),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use earnkit_core::error::ValidationIssueKind;

    fn facts() -> NativeJoinFacts {
        NativeJoinFacts {
            chain_min: 1_000,
            target_min: 500,
            active_toward_target: 0,
            projected_nomination_count: 1,
            max_nominations: 16,
            target_blocked: false,
            target_crowded: false,
            pending_unstake_toward_target: false,
            target_id: "validator-a".to_string(),
        }
    }

    #[test]
    fn rejects_below_effective_minimum() {
        let issues = validate_native_join(999, &facts(), "DOT");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, ValidationIssueKind::NotEnoughMinStake);
        assert!(validate_native_join(1_000, &facts(), "DOT").is_empty());
    }

    #[test]
    fn existing_stake_counts_toward_the_minimum() {
        let mut f = facts();
        f.active_toward_target = 800;
        assert!(validate_native_join(200, &f, "DOT").is_empty());
        assert_eq!(validate_native_join(199, &f, "DOT").len(), 1);
    }

    #[test]
    fn target_minimum_dominates_when_higher() {
        let mut f = facts();
        f.target_min = 5_000;
        assert_eq!(validate_native_join(4_999, &f, "DOT").len(), 1);
        assert!(validate_native_join(5_000, &f, "DOT").is_empty());
    }

    #[test]
    fn rejects_nomination_cap_overflow() {
        let mut f = facts();
        f.projected_nomination_count = 17;
        let issues = validate_native_join(2_000, &f, "DOT");
        assert_eq!(issues[0].kind, ValidationIssueKind::ExceedMaxNomination);
    }

    #[test]
    fn rejects_pending_unstake_toward_target() {
        let mut f = facts();
        f.pending_unstake_toward_target = true;
        let issues = validate_native_join(2_000, &f, "DOT");
        assert_eq!(issues[0].kind, ValidationIssueKind::ExistUnstakeRequest);
    }

    #[test]
    fn rejects_blocked_target() {
        let mut f = facts();
        f.target_blocked = true;
        let issues = validate_native_join(2_000, &f, "DOT");
        assert_eq!(issues[0].kind, ValidationIssueKind::InvalidTarget);
    }

    #[test]
    fn crowded_target_passes_when_stake_displaces() {
        let mut f = facts();
        f.target_crowded = true;
        f.target_min = 1_500;
        // Below the displacement threshold: rejected.
        assert!(!validate_native_join(1_200, &f, "DOT").is_empty());
        // Projected stake displaces the lowest nominator: allowed.
        assert!(validate_native_join(1_500, &f, "DOT").is_empty());
    }

    #[test]
    fn validation_is_monotonic_in_amount() {
        let f = facts();
        let mut passing = None;
        for amount in 0..3_000u128 {
            let ok = validate_native_join(amount, &f, "DOT").is_empty();
            if ok && passing.is_none() {
                passing = Some(amount);
            }
            if let Some(threshold) = passing {
                assert!(ok, "amount {amount} failed after {threshold} passed");
            }
        }
        assert!(passing.is_some());
    }

    #[test]
    fn claimable_and_unlocking_chunks_split_correctly() {
        let era = EraProgress {
            index: 100,
            start_ms: 0,
            duration_ms: 1_000,
        };
        let chunks = vec![
            UnlockChunk {
                value: 10,
                era: 99,
            },
            UnlockChunk {
                value: 20,
                era: 103,
            },
        ];
        let unstakings = unstakings_from_chunks("polkadot", &chunks, &era, 500, None);
        assert_eq!(unstakings[0].status, UnstakingStatus::Claimable);
        assert_eq!(unstakings[0].waiting_time_ms, None);
        assert_eq!(unstakings[1].status, UnstakingStatus::Unlocking);
        assert_eq!(unstakings[1].unlock_timestamp, Some(3_000));
        assert_eq!(unstakings[1].waiting_time_ms, Some(2_500));
    }
}

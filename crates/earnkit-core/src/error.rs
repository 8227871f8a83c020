//! Error types for the earning engine.
//!
//! Business-rule violations found during validation are **values**
//! ([`ValidationIssue`]), returned as a list and never thrown; everything
//! else is an [`EarningError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EarningError {
    /// A required chain could not be reached while planning. Non-fatal:
    /// planners catch this and return a best-effort path carrying the
    /// chain name instead.
    #[error("Failed to connect to chain {chain}")]
    ConnectionError { chain: String },

    #[error("Chain API error: {0}")]
    ChainApi(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The protocol family structurally lacks this capability. Distinct
    /// from a failure so callers can hide the action instead of retrying.
    #[error("Operation not supported: {0}")]
    UnsupportedOperation(&'static str),

    /// The user declined signing. Rolls the process back silently.
    #[error("Rejected by user")]
    UserRejected,

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unknown pool: {0}")]
    PoolNotFound(String),

    #[error("Unknown process: {0}")]
    ProcessNotFound(u64),
}

impl EarningError {
    /// Errors that planning treats as "chain unreachable" and converts
    /// into a soft `connection_error` marker on the path.
    pub fn is_network_shaped(&self) -> bool {
        matches!(
            self,
            EarningError::ConnectionError { .. } | EarningError::ChainApi(_)
        )
    }
}

/// Kinds of typed business-rule violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationIssueKind {
    NotEnoughMinStake,
    ExceedMaxNomination,
    ExistUnstakeRequest,
    NotEnoughFeeBalance,
    AmountExceedsBalance,
    MaxUnstakeRequests,
    PoolNotOpen,
    NotStaked,
    InvalidTarget,
}

/// One validation finding. An empty list means "safe to submit".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub kind: ValidationIssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: ValidationIssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_enough_min_stake(min: u128, symbol: &str) -> Self {
        Self::new(
            ValidationIssueKind::NotEnoughMinStake,
            format!("Amount is below the minimum stake of {min} {symbol}"),
        )
    }

    pub fn exceed_max_nomination(max: u32) -> Self {
        Self::new(
            ValidationIssueKind::ExceedMaxNomination,
            format!("Cannot nominate more than {max} targets"),
        )
    }

    pub fn exist_unstake_request(target: &str) -> Self {
        Self::new(
            ValidationIssueKind::ExistUnstakeRequest,
            format!("An unstake request toward {target} is still pending; withdraw or cancel it first"),
        )
    }

    pub fn not_enough_fee_balance(asset: &str) -> Self {
        Self::new(
            ValidationIssueKind::NotEnoughFeeBalance,
            format!("Balance of {asset} cannot cover the transaction fee"),
        )
    }

    pub fn amount_exceeds_balance(max_enterable: u128, symbol: &str) -> Self {
        Self::new(
            ValidationIssueKind::AmountExceedsBalance,
            format!("Amount too high; the maximum enterable amount is {max_enterable} {symbol}"),
        )
    }

    pub fn max_unstake_requests(max: u32) -> Self {
        Self::new(
            ValidationIssueKind::MaxUnstakeRequests,
            format!("At most {max} unstake requests can be pending at once"),
        )
    }

    pub fn pool_not_open(pool: &str) -> Self {
        Self::new(
            ValidationIssueKind::PoolNotOpen,
            format!("Pool {pool} is not open for new members"),
        )
    }

    pub fn not_staked() -> Self {
        Self::new(
            ValidationIssueKind::NotStaked,
            "No active stake in this pool",
        )
    }

    pub fn invalid_target(target: &str) -> Self {
        Self::new(
            ValidationIssueKind::InvalidTarget,
            format!("Target {target} is not nominable"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_shaped_errors() {
        assert!(
            EarningError::ConnectionError {
                chain: "bifrost".into()
            }
            .is_network_shaped()
        );
        assert!(EarningError::ChainApi("timeout".into()).is_network_shaped());
        assert!(!EarningError::UserRejected.is_network_shaped());
        assert!(!EarningError::UnsupportedOperation("claim").is_network_shaped());
    }

    #[test]
    fn issue_messages_carry_context() {
        let issue = ValidationIssue::not_enough_min_stake(250, "DOT");
        assert_eq!(issue.kind, ValidationIssueKind::NotEnoughMinStake);
        assert!(issue.message.contains("250"));
        assert!(issue.message.contains("DOT"));
    }
}

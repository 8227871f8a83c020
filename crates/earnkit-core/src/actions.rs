//! Request and result value types for the join/exit pipelines.
//!
//! Handlers consume requests and produce unsigned transactions; signing
//! and submission belong to the external transaction collaborator.

use serde::{Deserialize, Serialize};

use crate::types::{Balance, YieldPoolTarget, balance_string};

/// Parameters for planning or executing a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub address: String,
    #[serde(with = "balance_string")]
    pub amount: Balance,
    pub slug: String,
    /// Selected nomination targets; empty when the family needs none.
    #[serde(default)]
    pub targets: Vec<YieldPoolTarget>,
}

/// Parameters for unstaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub address: String,
    #[serde(with = "balance_string")]
    pub amount: Balance,
    pub slug: String,
    /// Target to unstake from, for families with per-target stake.
    #[serde(default)]
    pub target: Option<String>,
}

/// Parameters for withdrawing claimable unstaked funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub address: String,
    pub slug: String,
}

/// Parameters for cancelling a pending unstake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelUnstakeRequest {
    pub address: String,
    pub slug: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Parameters for claiming accumulated rewards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRewardRequest {
    pub address: String,
    pub slug: String,
    /// Restake the reward instead of paying it out.
    #[serde(default)]
    pub bond_reward: bool,
}

/// A Substrate-style call, described for an external signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicSpec {
    pub pallet: String,
    pub call: String,
    pub args: serde_json::Value,
}

impl ExtrinsicSpec {
    pub fn new(pallet: &str, call: &str, args: serde_json::Value) -> Self {
        Self {
            pallet: pallet.to_string(),
            call: call.to_string(),
            args,
        }
    }
}

/// An EVM-style call, described for an external signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTransactionRequest {
    pub to: String,
    /// ABI-encoded calldata, 0x-prefixed hex.
    pub data: String,
    #[serde(with = "balance_string")]
    pub value: Balance,
    #[serde(default, with = "balance_string")]
    pub gas_limit: Balance,
}

/// The chain-specific unsigned transaction produced by one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum StepTransaction {
    Substrate {
        chain: String,
        #[serde(flatten)]
        spec: ExtrinsicSpec,
    },
    Evm {
        chain: String,
        #[serde(flatten)]
        request: EvmTransactionRequest,
    },
}

impl StepTransaction {
    pub fn chain(&self) -> &str {
        match self {
            StepTransaction::Substrate { chain, .. } => chain,
            StepTransaction::Evm { chain, .. } => chain,
        }
    }
}

/// Result of executing one join step: the transaction to sign plus the
/// native amount it moves, used by callers to warn about fee and
/// existential-deposit interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub transaction: StepTransaction,
    #[serde(with = "balance_string")]
    pub transfer_native_amount: Balance,
}

/// What an exit action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Unstake everything and stop earning (chill + unbond all).
    FullUnstake,
    /// Reduce the active stake.
    PartialUnstake,
    Withdraw,
    CancelUnstake,
    ClaimReward,
}

/// Result of an exit-side action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitExecution {
    pub kind: ExitKind,
    pub transaction: StepTransaction,
    #[serde(with = "balance_string")]
    pub transfer_native_amount: Balance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_transaction_serde_is_tagged() {
        let tx = StepTransaction::Substrate {
            chain: "polkadot".into(),
            spec: ExtrinsicSpec::new("Staking", "bond", serde_json::json!({ "value": "100" })),
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["format"], "substrate");
        assert_eq!(json["pallet"], "Staking");
        let back: StepTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back.chain(), "polkadot");
    }

    #[test]
    fn evm_request_keeps_amounts_as_strings() {
        let tx = StepTransaction::Evm {
            chain: "moonbeam".into(),
            request: EvmTransactionRequest {
                to: "0xabc".into(),
                data: "0xa0712d68".into(),
                value: 0,
                gas_limit: 210_000,
            },
        };
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"210000\""));
    }
}

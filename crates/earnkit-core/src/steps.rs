//! Step plans ("optimal paths") for joining a pool.

use serde::{Deserialize, Serialize};

use crate::types::{Balance, balance_string};

/// Step kinds. `Default` is a placeholder that always occupies index 0;
/// the submit kinds are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldStepType {
    Default,
    /// Cross-chain top-up of the input asset.
    Xcm,
    /// EVM allowance grant for the protocol spender.
    TokenApproval,
    /// Native staking bond + nominate.
    Bond,
    JoinNominationPool,
    /// Liquid staking mint.
    Mint,
    /// Lending supply.
    Supply,
}

impl YieldStepType {
    /// Whether this kind submits funds into the protocol.
    pub fn is_submit(&self) -> bool {
        matches!(
            self,
            YieldStepType::Bond
                | YieldStepType::JoinNominationPool
                | YieldStepType::Mint
                | YieldStepType::Supply
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            YieldStepType::Default => "Prepare",
            YieldStepType::Xcm => "Cross-chain transfer",
            YieldStepType::TokenApproval => "Token approval",
            YieldStepType::Bond => "Bond and nominate",
            YieldStepType::JoinNominationPool => "Join pool",
            YieldStepType::Mint => "Mint",
            YieldStepType::Supply => "Supply",
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldStep {
    pub id: usize,
    pub name: String,
    pub step_type: YieldStepType,
    /// Step-kind specific details (origin chain for XCM, spender for
    /// approvals), carried for display and re-validation.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl YieldStep {
    pub fn new(id: usize, step_type: YieldStepType) -> Self {
        Self {
            id,
            name: step_type.label().to_string(),
            step_type,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Fee for one step: `(asset slug, amount)` in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldTokenBaseInfo {
    pub slug: String,
    #[serde(with = "balance_string")]
    pub amount: Balance,
}

impl YieldTokenBaseInfo {
    pub fn new(slug: impl Into<String>, amount: Balance) -> Self {
        Self {
            slug: slug.into(),
            amount,
        }
    }
}

/// An ordered step plan with an index-aligned fee per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalYieldPath {
    pub steps: Vec<YieldStep>,
    pub total_fee: Vec<YieldTokenBaseInfo>,
    /// Set when a required chain was unreachable during planning; the
    /// path still carries a usable DEFAULT + SUBMIT skeleton.
    #[serde(default)]
    pub connection_error: Option<String>,
}

impl OptimalYieldPath {
    /// Incremental builder used by planners.
    pub fn builder() -> OptimalYieldPathBuilder {
        OptimalYieldPathBuilder::default()
    }

    /// Verify the structural invariants:
    /// steps and fees are index-aligned, step 0 is `Default`, the last
    /// step is a submit kind, and XCM/approval steps precede it.
    pub fn check_shape(&self) -> Result<(), String> {
        if self.steps.len() != self.total_fee.len() {
            return Err(format!(
                "steps/fee length mismatch: {} vs {}",
                self.steps.len(),
                self.total_fee.len()
            ));
        }
        let Some(first) = self.steps.first() else {
            return Err("empty path".to_string());
        };
        if first.step_type != YieldStepType::Default {
            return Err("step 0 must be the placeholder".to_string());
        }
        let last = self.steps.last().expect("non-empty");
        if !last.step_type.is_submit() {
            return Err("last step must be a submit kind".to_string());
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.id != index {
                return Err(format!("step id {} out of order at {index}", step.id));
            }
            if step.step_type.is_submit() && index != self.steps.len() - 1 {
                return Err("submit step before the end of the plan".to_string());
            }
            if index > 0 && index < self.steps.len() - 1 {
                if !matches!(
                    step.step_type,
                    YieldStepType::Xcm | YieldStepType::TokenApproval
                ) {
                    return Err(format!(
                        "interior step {index} must be XCM or token approval"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Sequence of step kinds, for idempotence comparisons.
    pub fn step_types(&self) -> Vec<YieldStepType> {
        self.steps.iter().map(|s| s.step_type).collect()
    }

    /// Fee entry for a step index.
    pub fn fee_of(&self, step: usize) -> Option<&YieldTokenBaseInfo> {
        self.total_fee.get(step)
    }

    /// Index of the first step that actually executes (step 0 never does).
    pub fn first_executable_step(&self) -> usize {
        1
    }
}

/// Keeps `steps` and `total_fee` appended in lockstep.
#[derive(Debug, Default)]
pub struct OptimalYieldPathBuilder {
    steps: Vec<YieldStep>,
    fees: Vec<YieldTokenBaseInfo>,
    connection_error: Option<String>,
}

impl OptimalYieldPathBuilder {
    pub fn push(&mut self, step_type: YieldStepType, fee: YieldTokenBaseInfo) -> &mut Self {
        self.steps.push(YieldStep::new(self.steps.len(), step_type));
        self.fees.push(fee);
        self
    }

    pub fn push_with_metadata(
        &mut self,
        step_type: YieldStepType,
        fee: YieldTokenBaseInfo,
        metadata: serde_json::Value,
    ) -> &mut Self {
        self.steps
            .push(YieldStep::new(self.steps.len(), step_type).with_metadata(metadata));
        self.fees.push(fee);
        self
    }

    pub fn connection_error(&mut self, chain: impl Into<String>) -> &mut Self {
        self.connection_error = Some(chain.into());
        self
    }

    pub fn build(self) -> OptimalYieldPath {
        OptimalYieldPath {
            steps: self.steps,
            total_fee: self.fees,
            connection_error: self.connection_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fee(amount: Balance) -> YieldTokenBaseInfo {
        YieldTokenBaseInfo::new("DOT___polkadot", amount)
    }

    fn three_step_path() -> OptimalYieldPath {
        let mut builder = OptimalYieldPath::builder();
        builder
            .push(YieldStepType::Default, fee(0))
            .push(YieldStepType::Xcm, fee(120))
            .push(YieldStepType::Mint, fee(50));
        builder.build()
    }

    #[test]
    fn valid_shapes_pass() {
        assert!(three_step_path().check_shape().is_ok());

        let mut builder = OptimalYieldPath::builder();
        builder
            .push(YieldStepType::Default, fee(0))
            .push(YieldStepType::Bond, fee(10));
        assert!(builder.build().check_shape().is_ok());

        let mut builder = OptimalYieldPath::builder();
        builder
            .push(YieldStepType::Default, fee(0))
            .push(YieldStepType::Xcm, fee(1))
            .push(YieldStepType::TokenApproval, fee(2))
            .push(YieldStepType::Supply, fee(3));
        assert!(builder.build().check_shape().is_ok());
    }

    #[test]
    fn empty_path_is_rejected() {
        let path = OptimalYieldPath {
            steps: vec![],
            total_fee: vec![],
            connection_error: None,
        };
        assert!(path.check_shape().is_err());
    }

    #[test]
    fn misaligned_fees_are_rejected() {
        let mut path = three_step_path();
        path.total_fee.pop();
        assert!(path.check_shape().is_err());
    }

    #[test]
    fn submit_must_be_last() {
        let mut path = three_step_path();
        path.steps.swap(1, 2);
        path.steps[1].id = 1;
        path.steps[2].id = 2;
        assert!(path.check_shape().is_err());
    }

    #[test]
    fn head_must_be_placeholder() {
        let mut builder = OptimalYieldPath::builder();
        builder
            .push(YieldStepType::Xcm, fee(0))
            .push(YieldStepType::Mint, fee(1));
        assert!(builder.build().check_shape().is_err());
    }

    proptest! {
        /// Any plan assembled through the builder from interior
        /// XCM/approval steps and a submit tail is well-formed.
        #[test]
        fn builder_always_produces_valid_shapes(
            use_xcm in any::<bool>(),
            use_approval in any::<bool>(),
            submit_index in 0usize..4,
            amounts in proptest::collection::vec(0u128..1_000_000, 4),
        ) {
            let submit = [
                YieldStepType::Bond,
                YieldStepType::JoinNominationPool,
                YieldStepType::Mint,
                YieldStepType::Supply,
            ][submit_index];

            let mut builder = OptimalYieldPath::builder();
            builder.push(YieldStepType::Default, fee(amounts[0]));
            if use_xcm {
                builder.push(YieldStepType::Xcm, fee(amounts[1]));
            }
            if use_approval {
                builder.push(YieldStepType::TokenApproval, fee(amounts[2]));
            }
            builder.push(submit, fee(amounts[3]));
            let path = builder.build();

            prop_assert!(path.check_shape().is_ok());
            prop_assert_eq!(path.steps.len(), path.total_fee.len());
            prop_assert!(path.steps.last().unwrap().step_type.is_submit());
        }
    }
}

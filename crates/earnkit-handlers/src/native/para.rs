//! Parachain-collator style staking: per-collator delegations and
//! round-based exit requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{
    Balance, EarningStatus, NominationInfo, UnstakingInfo, UnstakingStatus, YieldPoolInfo,
    YieldPoolStatistic, YieldPoolTarget, YieldPositionInfo, now_ms,
};
use earnkit_core::{
    CancelUnstakeRequest, ExitExecution, ExitKind, ExtrinsicSpec, JoinRequest, LeaveRequest,
    StepExecutionResult, StepTransaction, WithdrawRequest, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::{DelegatorState, HandlerContext};
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::native::common::{NativeJoinFacts, validate_native_join};
use crate::native::relay::position_status;
use crate::stats;

#[derive(Clone)]
pub struct ParaStakingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl ParaStakingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    async fn delegator_state_of(
        &self,
        address: &str,
    ) -> Result<Option<DelegatorState>, EarningError> {
        let mut states = self
            .ctx
            .chain
            .delegator_states(&self.entry.chain, &[address.to_string()])
            .await?;
        Ok(states.pop().flatten())
    }

    fn substrate_tx(&self, spec: ExtrinsicSpec) -> StepTransaction {
        StepTransaction::Substrate {
            chain: self.entry.chain.clone(),
            spec,
        }
    }

    fn leave_target<'r>(&self, req: &'r LeaveRequest) -> Result<&'r str, EarningError> {
        req.target.as_deref().ok_or_else(|| {
            EarningError::InvalidData("collator staking needs a target to unstake from".to_string())
        })
    }
}

#[async_trait]
impl YieldPoolHandler for ParaStakingHandler {
    fn entry(&self) -> &ChainEarningEntry {
        &self.entry
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_pool_info(&self) -> Result<YieldPoolInfo, EarningError> {
        let chain = &self.entry.chain;
        let constants = self.ctx.chain.staking_constants(chain).await?;
        let round = self.ctx.chain.era_progress(chain).await?;
        let candidates = self.ctx.chain.collator_candidates(chain).await?;

        let offchain = match &self.entry.stats_url {
            Some(url) => stats::fetch_pool_stats(&self.ctx.http, url, &self.slug).await,
            None => None,
        };

        let tvl: Balance = candidates.iter().map(|c| c.total_counted).sum();
        let unstaking_hours =
            (constants.bonding_duration_eras as u64 * round.duration_ms / 3_600_000) as u32;
        let statistic = YieldPoolStatistic {
            apy: offchain.as_ref().and_then(|s| s.apy_or_compounded(round.duration_ms)),
            apr: offchain.as_ref().and_then(|s| s.apr),
            tvl: offchain
                .as_ref()
                .and_then(|s| s.tvl_amount())
                .or(Some(tvl)),
            min_join_amount: constants.min_nominator_bond.max(self.entry.min_join_amount),
            unstaking_period_hours: Some(unstaking_hours),
            max_unstake_requests: Some(constants.max_unlocking_chunks),
        };

        Ok(YieldPoolInfo {
            slug: self.slug.clone(),
            chain: chain.clone(),
            pool_type: self.pool_type(),
            metadata: self.entry.pool_metadata(),
            statistic: Some(statistic),
            last_updated: now_ms(),
        })
    }

    async fn fetch_positions(
        &self,
        addresses: &[String],
    ) -> Result<Vec<YieldPositionInfo>, EarningError> {
        let chain = &self.entry.chain;
        let states = self.ctx.chain.delegator_states(chain, addresses).await?;
        let round = self.ctx.chain.era_progress(chain).await?;
        let now = now_ms();

        let mut positions = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let state = states.get(index).and_then(|s| s.clone()).unwrap_or_default();

            // A scheduled request keeps its amount inside the delegation
            // until executed, so the active part is what remains.
            let mut unstakings = Vec::new();
            for request in &state.requests {
                let claimable_now = request.executable_round <= round.index;
                unstakings.push(UnstakingInfo {
                    chain: chain.clone(),
                    claimable: request.amount,
                    status: if claimable_now {
                        UnstakingStatus::Claimable
                    } else {
                        UnstakingStatus::Unlocking
                    },
                    target: Some(request.collator.clone()),
                    waiting_time_ms: (!claimable_now)
                        .then(|| round.waiting_time_ms(request.executable_round, now)),
                    unlock_timestamp: (!claimable_now)
                        .then(|| round.unlock_timestamp(request.executable_round)),
                });
            }

            let nominations: Vec<NominationInfo> = state
                .delegations
                .iter()
                .map(|delegation| {
                    let pending = state
                        .requests
                        .iter()
                        .any(|r| r.collator == delegation.collator);
                    let pending_amount: Balance = state
                        .requests
                        .iter()
                        .filter(|r| r.collator == delegation.collator)
                        .map(|r| r.amount)
                        .sum();
                    NominationInfo {
                        target: delegation.collator.clone(),
                        target_name: None,
                        active_stake: delegation.amount.saturating_sub(pending_amount),
                        status: if delegation.amount > pending_amount {
                            EarningStatus::EarningReward
                        } else {
                            EarningStatus::Waiting
                        },
                        has_unstaking: pending,
                    }
                })
                .collect();

            let active: Balance = nominations.iter().map(|n| n.active_stake).sum();
            let status = position_status(active, &nominations);
            positions.push(YieldPositionInfo::with_computed_total(
                self.slug.clone(),
                chain.clone(),
                address.clone(),
                self.pool_type(),
                active,
                status,
                nominations,
                unstakings,
            ));
        }
        Ok(positions)
    }

    fn subscribe_pool_info(&self, sender: UnboundedSender<YieldPoolInfo>) -> SubscriptionHandle {
        spawn_pool_info_worker(self.clone(), sender)
    }

    fn subscribe_pool_position(
        &self,
        addresses: Vec<String>,
        sender: UnboundedSender<YieldPositionInfo>,
    ) -> SubscriptionHandle {
        spawn_position_worker(self.clone(), addresses, sender)
    }

    async fn pool_targets(&self) -> Result<Vec<YieldPoolTarget>, EarningError> {
        let candidates = self
            .ctx
            .chain
            .collator_candidates(&self.entry.chain)
            .await?;
        Ok(candidates
            .into_iter()
            .map(|c| YieldPoolTarget {
                id: c.address,
                name: c.identity.clone(),
                commission: 0.0,
                total_stake: c.total_counted,
                own_stake: c.self_bond,
                other_stake: c.total_counted.saturating_sub(c.self_bond),
                nominator_count: c.delegation_count,
                is_crowded: c.max_delegations > 0 && c.delegation_count >= c.max_delegations,
                blocked: false,
                is_verified: c.identity.is_some(),
                min_bond: c.lowest_top_delegation,
                expected_return: None,
            })
            .collect())
    }

    async fn min_join_amount(&self) -> Result<Balance, EarningError> {
        let constants = self.ctx.chain.staking_constants(&self.entry.chain).await?;
        Ok(constants.min_nominator_bond.max(self.entry.min_join_amount))
    }

    async fn validate_submit(
        &self,
        req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        let constants = self.ctx.chain.staking_constants(&self.entry.chain).await?;
        let state = self
            .delegator_state_of(&req.address)
            .await?
            .unwrap_or_default();

        let mut issues = Vec::new();
        for target in &req.targets {
            let existing = state
                .delegations
                .iter()
                .find(|d| d.collator == target.id)
                .map(|d| d.amount)
                .unwrap_or(0);
            let adds_new = existing == 0;
            let projected_count = state.delegations.len() as u32 + u32::from(adds_new);
            let pending = state.requests.iter().any(|r| r.collator == target.id);

            let facts = NativeJoinFacts {
                chain_min: constants.min_nominator_bond.max(self.entry.min_join_amount),
                target_min: target.min_bond,
                active_toward_target: existing,
                projected_nomination_count: projected_count,
                max_nominations: constants.max_nominations,
                target_blocked: target.blocked,
                target_crowded: target.is_crowded,
                pending_unstake_toward_target: pending,
                target_id: target.id.clone(),
            };
            issues.extend(validate_native_join(req.amount, &facts, &self.entry.symbol));
        }
        issues.dedup();
        Ok(issues)
    }

    async fn estimate_submit_fee(
        &self,
        req: &JoinRequest,
    ) -> Result<YieldTokenBaseInfo, EarningError> {
        let collator = req
            .targets
            .first()
            .map(|t| t.id.clone())
            .unwrap_or_default();
        let spec = ExtrinsicSpec::new(
            "ParachainStaking",
            "delegate_with_auto_compound",
            serde_json::json!({
                "candidate": collator,
                "amount": req.amount.to_string(),
                "auto_compound": 0,
            }),
        );
        let fee = self.ctx.chain.estimate_fee(&self.entry.chain, &spec).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        let collator = req
            .targets
            .first()
            .map(|t| t.id.clone())
            .ok_or_else(|| EarningError::InvalidData("no collator selected".to_string()))?;
        let state = self
            .delegator_state_of(&req.address)
            .await?
            .unwrap_or_default();
        let existing = state.delegations.iter().any(|d| d.collator == collator);

        let spec = if existing {
            ExtrinsicSpec::new(
                "ParachainStaking",
                "delegator_bond_more",
                serde_json::json!({
                    "candidate": collator,
                    "more": req.amount.to_string(),
                }),
            )
        } else {
            ExtrinsicSpec::new(
                "ParachainStaking",
                "delegate_with_auto_compound",
                serde_json::json!({
                    "candidate": collator,
                    "amount": req.amount.to_string(),
                    "auto_compound": 0,
                }),
            )
        };
        Ok(StepExecutionResult {
            transaction: self.substrate_tx(spec),
            transfer_native_amount: req.amount,
        })
    }

    async fn validate_leave(
        &self,
        req: &LeaveRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        let target = self.leave_target(req)?;
        let state = self
            .delegator_state_of(&req.address)
            .await?
            .unwrap_or_default();
        let delegated = state
            .delegations
            .iter()
            .find(|d| d.collator == target)
            .map(|d| d.amount)
            .unwrap_or(0);

        let mut issues = Vec::new();
        if delegated == 0 {
            issues.push(ValidationIssue::not_staked());
            return Ok(issues);
        }
        if state.requests.iter().any(|r| r.collator == target) {
            issues.push(ValidationIssue::exist_unstake_request(target));
        }
        if req.amount == 0 || req.amount > delegated {
            issues.push(ValidationIssue::amount_exceeds_balance(
                delegated,
                &self.entry.symbol,
            ));
        }
        Ok(issues)
    }

    async fn handle_leave(&self, req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        let target = self.leave_target(req)?;
        let state = self
            .delegator_state_of(&req.address)
            .await?
            .unwrap_or_default();
        let delegated = state
            .delegations
            .iter()
            .find(|d| d.collator == target)
            .map(|d| d.amount)
            .unwrap_or(0);

        let (kind, spec) = if req.amount >= delegated {
            (
                ExitKind::FullUnstake,
                ExtrinsicSpec::new(
                    "ParachainStaking",
                    "schedule_revoke_delegation",
                    serde_json::json!({ "collator": target }),
                ),
            )
        } else {
            (
                ExitKind::PartialUnstake,
                ExtrinsicSpec::new(
                    "ParachainStaking",
                    "schedule_delegator_bond_less",
                    serde_json::json!({
                        "candidate": target,
                        "less": req.amount.to_string(),
                    }),
                ),
            )
        };
        Ok(ExitExecution {
            kind,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }

    async fn handle_withdraw(&self, req: &WithdrawRequest) -> Result<ExitExecution, EarningError> {
        let state = self
            .delegator_state_of(&req.address)
            .await?
            .unwrap_or_default();
        let round = self.ctx.chain.era_progress(&self.entry.chain).await?;
        let request = state
            .requests
            .iter()
            .find(|r| r.executable_round <= round.index)
            .ok_or_else(|| EarningError::InvalidData("nothing is claimable yet".to_string()))?;

        let spec = ExtrinsicSpec::new(
            "ParachainStaking",
            "execute_delegation_request",
            serde_json::json!({
                "delegator": req.address,
                "candidate": request.collator,
            }),
        );
        Ok(ExitExecution {
            kind: ExitKind::Withdraw,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: request.amount,
        })
    }

    async fn handle_cancel_unstake(
        &self,
        req: &CancelUnstakeRequest,
    ) -> Result<ExitExecution, EarningError> {
        let target = req.target.as_deref().ok_or_else(|| {
            EarningError::InvalidData("a collator must be named to cancel".to_string())
        })?;
        let spec = ExtrinsicSpec::new(
            "ParachainStaking",
            "cancel_delegation_request",
            serde_json::json!({ "candidate": target }),
        );
        Ok(ExitExecution {
            kind: ExitKind::CancelUnstake,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }
}

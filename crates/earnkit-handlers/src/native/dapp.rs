//! dApp-staking style: stake toward registered contracts, period-based
//! unlocks, explicit reward claims.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{
    Balance, EarningStatus, NominationInfo, YieldPoolInfo, YieldPoolStatistic, YieldPoolTarget,
    YieldPositionInfo, now_ms,
};
use earnkit_core::{
    ClaimRewardRequest, ExitExecution, ExitKind, ExtrinsicSpec, JoinRequest, LeaveRequest,
    StepExecutionResult, StepTransaction, WithdrawRequest, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::{DappStake, HandlerContext};
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::native::common::{NativeJoinFacts, unstakings_from_chunks, validate_native_join};
use crate::native::relay::position_status;
use crate::stats;

#[derive(Clone)]
pub struct DappStakingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl DappStakingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    async fn stakes_of(&self, address: &str) -> Result<Vec<DappStake>, EarningError> {
        let mut stakes = self
            .ctx
            .chain
            .dapp_stakes(&self.entry.chain, &[address.to_string()])
            .await?;
        Ok(stakes.pop().unwrap_or_default())
    }

    fn substrate_tx(&self, spec: ExtrinsicSpec) -> StepTransaction {
        StepTransaction::Substrate {
            chain: self.entry.chain.clone(),
            spec,
        }
    }
}

#[async_trait]
impl YieldPoolHandler for DappStakingHandler {
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
        let era = self.ctx.chain.era_progress(chain).await?;
        let registry = self.ctx.chain.dapp_registry(chain).await?;

        let offchain = match &self.entry.stats_url {
            Some(url) => stats::fetch_pool_stats(&self.ctx.http, url, &self.slug).await,
            None => None,
        };

        let tvl: Balance = registry.iter().map(|d| d.total_staked).sum();
        let unstaking_hours =
            (constants.bonding_duration_eras as u64 * era.duration_ms / 3_600_000) as u32;
        let statistic = YieldPoolStatistic {
            apy: offchain.as_ref().and_then(|s| s.apy_or_compounded(era.duration_ms)),
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
        let all_stakes = self.ctx.chain.dapp_stakes(chain, addresses).await?;
        let era = self.ctx.chain.era_progress(chain).await?;
        let now = now_ms();

        let mut positions = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let stakes = all_stakes.get(index).cloned().unwrap_or_default();

            let mut nominations = Vec::new();
            let mut unstakings = Vec::new();
            let mut active: Balance = 0;
            for stake in &stakes {
                active += stake.staked;
                nominations.push(NominationInfo {
                    target: stake.contract.clone(),
                    target_name: None,
                    active_stake: stake.staked,
                    status: if stake.staked > 0 {
                        EarningStatus::EarningReward
                    } else {
                        EarningStatus::Waiting
                    },
                    has_unstaking: !stake.unlocking.is_empty(),
                });
                unstakings.extend(unstakings_from_chunks(
                    chain,
                    &stake.unlocking,
                    &era,
                    now,
                    Some(&stake.contract),
                ));
            }

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
        let registry = self.ctx.chain.dapp_registry(&self.entry.chain).await?;
        Ok(registry
            .into_iter()
            .filter(|d| d.is_registered)
            .map(|d| YieldPoolTarget {
                id: d.contract,
                name: d.name.clone(),
                commission: 0.0,
                total_stake: d.total_staked,
                own_stake: 0,
                other_stake: d.total_staked,
                nominator_count: d.staker_count,
                is_crowded: false,
                blocked: false,
                is_verified: d.name.is_some(),
                min_bond: 0,
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
        let stakes = self.stakes_of(&req.address).await?;

        let mut issues = Vec::new();
        for target in &req.targets {
            let existing = stakes
                .iter()
                .find(|s| s.contract == target.id)
                .map(|s| s.staked)
                .unwrap_or(0);
            let pending = stakes
                .iter()
                .filter(|s| s.contract == target.id)
                .any(|s| !s.unlocking.is_empty());
            let adds_new = existing == 0;

            let facts = NativeJoinFacts {
                chain_min: constants.min_nominator_bond.max(self.entry.min_join_amount),
                target_min: target.min_bond,
                active_toward_target: existing,
                projected_nomination_count: stakes.len() as u32 + u32::from(adds_new),
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
        let contract = req
            .targets
            .first()
            .map(|t| t.id.clone())
            .unwrap_or_default();
        let spec = ExtrinsicSpec::new(
            "DappStaking",
            "lock_and_stake",
            serde_json::json!({
                "smart_contract": contract,
                "amount": req.amount.to_string(),
            }),
        );
        let fee = self.ctx.chain.estimate_fee(&self.entry.chain, &spec).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        let contract = req
            .targets
            .first()
            .map(|t| t.id.clone())
            .ok_or_else(|| EarningError::InvalidData("no dApp selected".to_string()))?;
        let spec = ExtrinsicSpec::new(
            "Utility",
            "batch_all",
            serde_json::json!({
                "calls": [
                    { "call": "lock", "amount": req.amount.to_string() },
                    {
                        "call": "stake",
                        "smart_contract": contract,
                        "amount": req.amount.to_string(),
                    },
                ]
            }),
        );
        Ok(StepExecutionResult {
            transaction: self.substrate_tx(spec),
            transfer_native_amount: req.amount,
        })
    }

    async fn validate_leave(
        &self,
        req: &LeaveRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        let target = req.target.as_deref().ok_or_else(|| {
            EarningError::InvalidData("dApp staking needs a contract to unstake from".to_string())
        })?;
        let stakes = self.stakes_of(&req.address).await?;
        let staked = stakes
            .iter()
            .find(|s| s.contract == target)
            .map(|s| s.staked)
            .unwrap_or(0);

        let mut issues = Vec::new();
        if staked == 0 {
            issues.push(ValidationIssue::not_staked());
        } else if req.amount == 0 || req.amount > staked {
            issues.push(ValidationIssue::amount_exceeds_balance(
                staked,
                &self.entry.symbol,
            ));
        }
        Ok(issues)
    }

    async fn handle_leave(&self, req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        let target = req.target.as_deref().ok_or_else(|| {
            EarningError::InvalidData("dApp staking needs a contract to unstake from".to_string())
        })?;
        let stakes = self.stakes_of(&req.address).await?;
        let staked = stakes
            .iter()
            .find(|s| s.contract == target)
            .map(|s| s.staked)
            .unwrap_or(0);

        let kind = if req.amount >= staked {
            ExitKind::FullUnstake
        } else {
            ExitKind::PartialUnstake
        };
        let spec = ExtrinsicSpec::new(
            "DappStaking",
            "unstake_and_unlock",
            serde_json::json!({
                "smart_contract": target,
                "amount": req.amount.to_string(),
            }),
        );
        Ok(ExitExecution {
            kind,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }

    async fn handle_withdraw(&self, req: &WithdrawRequest) -> Result<ExitExecution, EarningError> {
        let stakes = self.stakes_of(&req.address).await?;
        let era = self.ctx.chain.era_progress(&self.entry.chain).await?;
        let claimable: Balance = stakes
            .iter()
            .flat_map(|s| s.unlocking.iter())
            .filter(|c| c.era <= era.index)
            .map(|c| c.value)
            .sum();
        if claimable == 0 {
            return Err(EarningError::InvalidData(
                "nothing is claimable yet".to_string(),
            ));
        }
        let spec = ExtrinsicSpec::new("DappStaking", "withdraw_unbonded", serde_json::json!({}));
        Ok(ExitExecution {
            kind: ExitKind::Withdraw,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: claimable,
        })
    }

    async fn handle_cancel_unstake(
        &self,
        req: &earnkit_core::CancelUnstakeRequest,
    ) -> Result<ExitExecution, EarningError> {
        let stakes = self.stakes_of(&req.address).await?;
        if stakes.iter().all(|s| s.unlocking.is_empty()) {
            return Err(EarningError::InvalidData(
                "no pending unstake to cancel".to_string(),
            ));
        }
        let spec = ExtrinsicSpec::new("DappStaking", "relock_unlocking", serde_json::json!({}));
        Ok(ExitExecution {
            kind: ExitKind::CancelUnstake,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }

    async fn handle_claim_reward(
        &self,
        _req: &ClaimRewardRequest,
    ) -> Result<ExitExecution, EarningError> {
        let spec = ExtrinsicSpec::new(
            "DappStaking",
            "claim_staker_rewards",
            serde_json::json!({}),
        );
        Ok(ExitExecution {
            kind: ExitKind::ClaimReward,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }
}

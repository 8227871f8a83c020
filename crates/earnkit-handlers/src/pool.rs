//! Nomination-pool handler: single-pool membership, join only while the
//! pool is open.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{
    Balance, EarningStatus, NominationInfo, UnstakingInfo, UnstakingStatus, YieldPoolInfo,
    YieldPoolStatistic, YieldPoolTarget, YieldPositionInfo, now_ms,
};
use earnkit_core::{
    ClaimRewardRequest, ExitExecution, ExitKind, ExtrinsicSpec, JoinRequest, LeaveRequest,
    StepExecutionResult, StepTransaction, WithdrawRequest, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::{BondedPool, BondedPoolState, HandlerContext, PoolMember};
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::stats;

#[derive(Clone)]
pub struct NominationPoolHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl NominationPoolHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    async fn member_of(&self, address: &str) -> Result<Option<PoolMember>, EarningError> {
        let mut members = self
            .ctx
            .chain
            .pool_members(&self.entry.chain, &[address.to_string()])
            .await?;
        Ok(members.pop().flatten())
    }

    async fn pool_by_id(&self, pool_id: u32) -> Result<Option<BondedPool>, EarningError> {
        let pools = self.ctx.chain.bonded_pools(&self.entry.chain).await?;
        Ok(pools.into_iter().find(|p| p.id == pool_id))
    }

    fn substrate_tx(&self, spec: ExtrinsicSpec) -> StepTransaction {
        StepTransaction::Substrate {
            chain: self.entry.chain.clone(),
            spec,
        }
    }

    fn selected_pool_id(req: &JoinRequest) -> Result<u32, EarningError> {
        let target = req
            .targets
            .first()
            .ok_or_else(|| EarningError::InvalidData("no pool selected".to_string()))?;
        target
            .id
            .parse::<u32>()
            .map_err(|_| EarningError::InvalidData(format!("invalid pool id {}", target.id)))
    }
}

#[async_trait]
impl YieldPoolHandler for NominationPoolHandler {
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
        let pools = self.ctx.chain.bonded_pools(chain).await?;

        let offchain = match &self.entry.stats_url {
            Some(url) => stats::fetch_pool_stats(&self.ctx.http, url, &self.slug).await,
            None => None,
        };

        let tvl: Balance = pools.iter().map(|p| p.bonded).sum();
        let unstaking_hours =
            (constants.bonding_duration_eras as u64 * era.duration_ms / 3_600_000) as u32;
        let statistic = YieldPoolStatistic {
            apy: offchain.as_ref().and_then(|s| s.apy_or_compounded(era.duration_ms)),
            apr: offchain.as_ref().and_then(|s| s.apr),
            tvl: offchain
                .as_ref()
                .and_then(|s| s.tvl_amount())
                .or(Some(tvl)),
            min_join_amount: constants.min_pool_join_bond.max(self.entry.min_join_amount),
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
        let members = self.ctx.chain.pool_members(chain, addresses).await?;
        let era = self.ctx.chain.era_progress(chain).await?;
        let pools = self.ctx.chain.bonded_pools(chain).await?;
        let now = now_ms();

        let mut positions = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let member = members.get(index).and_then(|m| m.clone());

            let (active, nominations, unstakings) = match member {
                Some(member) => {
                    let pool = pools.iter().find(|p| p.id == member.pool_id);
                    let earning =
                        pool.map(|p| p.state != BondedPoolState::Destroying).unwrap_or(false);
                    let nomination = NominationInfo {
                        target: member.pool_id.to_string(),
                        target_name: pool.and_then(|p| p.name.clone()),
                        active_stake: member.bonded,
                        status: if earning && member.bonded > 0 {
                            EarningStatus::EarningReward
                        } else {
                            EarningStatus::NotEarning
                        },
                        has_unstaking: !member.unbonding.is_empty(),
                    };
                    let unstakings: Vec<UnstakingInfo> = member
                        .unbonding
                        .iter()
                        .map(|(unlock_era, amount)| {
                            let claimable_now = *unlock_era <= era.index;
                            UnstakingInfo {
                                chain: chain.clone(),
                                claimable: *amount,
                                status: if claimable_now {
                                    UnstakingStatus::Claimable
                                } else {
                                    UnstakingStatus::Unlocking
                                },
                                target: Some(member.pool_id.to_string()),
                                waiting_time_ms: (!claimable_now)
                                    .then(|| era.waiting_time_ms(*unlock_era, now)),
                                unlock_timestamp: (!claimable_now)
                                    .then(|| era.unlock_timestamp(*unlock_era)),
                            }
                        })
                        .collect();
                    (member.bonded, vec![nomination], unstakings)
                }
                None => (0, Vec::new(), Vec::new()),
            };

            let status = if active > 0 {
                nominations
                    .first()
                    .map(|n| n.status)
                    .unwrap_or(EarningStatus::NotEarning)
            } else {
                EarningStatus::NotEarning
            };
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
        let constants = self.ctx.chain.staking_constants(&self.entry.chain).await?;
        let pools = self.ctx.chain.bonded_pools(&self.entry.chain).await?;
        Ok(pools
            .into_iter()
            .map(|p| YieldPoolTarget {
                id: p.id.to_string(),
                name: p.name.clone(),
                commission: p.commission,
                total_stake: p.bonded,
                own_stake: 0,
                other_stake: p.bonded,
                nominator_count: p.member_count,
                is_crowded: false,
                blocked: p.state != BondedPoolState::Open,
                is_verified: p.name.is_some(),
                min_bond: constants.min_pool_join_bond,
                expected_return: None,
            })
            .collect())
    }

    async fn min_join_amount(&self) -> Result<Balance, EarningError> {
        let constants = self.ctx.chain.staking_constants(&self.entry.chain).await?;
        Ok(constants.min_pool_join_bond.max(self.entry.min_join_amount))
    }

    async fn validate_submit(
        &self,
        req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        let pool_id = Self::selected_pool_id(req)?;
        let mut issues = Vec::new();

        match self.pool_by_id(pool_id).await? {
            Some(pool) => {
                if pool.state != BondedPoolState::Open {
                    issues.push(ValidationIssue::pool_not_open(&pool_id.to_string()));
                }
            }
            None => {
                issues.push(ValidationIssue::invalid_target(&pool_id.to_string()));
            }
        }

        // Membership is exclusive: one pool at a time.
        if let Some(member) = self.member_of(&req.address).await? {
            if member.pool_id != pool_id {
                issues.push(ValidationIssue::new(
                    earnkit_core::error::ValidationIssueKind::InvalidTarget,
                    format!(
                        "Already a member of pool {}; leave it before joining another",
                        member.pool_id
                    ),
                ));
            }
        }
        Ok(issues)
    }

    async fn estimate_submit_fee(
        &self,
        req: &JoinRequest,
    ) -> Result<YieldTokenBaseInfo, EarningError> {
        let pool_id = Self::selected_pool_id(req).unwrap_or(1);
        let spec = ExtrinsicSpec::new(
            "NominationPools",
            "join",
            serde_json::json!({
                "amount": req.amount.to_string(),
                "pool_id": pool_id,
            }),
        );
        let fee = self.ctx.chain.estimate_fee(&self.entry.chain, &spec).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        let pool_id = Self::selected_pool_id(req)?;
        let member = self.member_of(&req.address).await?;

        let spec = match member {
            Some(member) if member.pool_id == pool_id => ExtrinsicSpec::new(
                "NominationPools",
                "bond_extra",
                serde_json::json!({
                    "extra": { "FreeBalance": req.amount.to_string() },
                }),
            ),
            _ => ExtrinsicSpec::new(
                "NominationPools",
                "join",
                serde_json::json!({
                    "amount": req.amount.to_string(),
                    "pool_id": pool_id,
                }),
            ),
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
        let constants = self.ctx.chain.staking_constants(&self.entry.chain).await?;
        let member = self.member_of(&req.address).await?;
        let bonded = member.as_ref().map(|m| m.bonded).unwrap_or(0);

        let mut issues = Vec::new();
        if bonded == 0 {
            issues.push(ValidationIssue::not_staked());
            return Ok(issues);
        }
        if req.amount == 0 || req.amount > bonded {
            issues.push(ValidationIssue::amount_exceeds_balance(
                bonded,
                &self.entry.symbol,
            ));
        }
        let remaining = bonded.saturating_sub(req.amount);
        if remaining > 0 && remaining < constants.min_pool_join_bond {
            issues.push(ValidationIssue::not_enough_min_stake(
                constants.min_pool_join_bond,
                &self.entry.symbol,
            ));
        }
        if let Some(member) = &member {
            if constants.max_unlocking_chunks > 0
                && member.unbonding.len() as u32 >= constants.max_unlocking_chunks
            {
                issues.push(ValidationIssue::max_unstake_requests(
                    constants.max_unlocking_chunks,
                ));
            }
        }
        Ok(issues)
    }

    async fn handle_leave(&self, req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        let member = self
            .member_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("not a pool member".to_string()))?;
        let kind = if req.amount >= member.bonded {
            ExitKind::FullUnstake
        } else {
            ExitKind::PartialUnstake
        };
        let spec = ExtrinsicSpec::new(
            "NominationPools",
            "unbond",
            serde_json::json!({
                "member_account": req.address,
                "unbonding_points": req.amount.to_string(),
            }),
        );
        Ok(ExitExecution {
            kind,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }

    async fn handle_withdraw(&self, req: &WithdrawRequest) -> Result<ExitExecution, EarningError> {
        let member = self
            .member_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("not a pool member".to_string()))?;
        let era = self.ctx.chain.era_progress(&self.entry.chain).await?;
        let claimable: Balance = member
            .unbonding
            .iter()
            .filter(|(unlock_era, _)| *unlock_era <= era.index)
            .map(|(_, amount)| *amount)
            .sum();
        if claimable == 0 {
            return Err(EarningError::InvalidData(
                "nothing is claimable yet".to_string(),
            ));
        }
        let spec = ExtrinsicSpec::new(
            "NominationPools",
            "withdraw_unbonded",
            serde_json::json!({
                "member_account": req.address,
                "num_slashing_spans": 0,
            }),
        );
        Ok(ExitExecution {
            kind: ExitKind::Withdraw,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: claimable,
        })
    }

    async fn fetch_reward_item(
        &self,
        address: &str,
    ) -> Result<earnkit_core::types::EarningRewardItem, EarningError> {
        let member = self.member_of(address).await?;
        Ok(earnkit_core::types::EarningRewardItem {
            slug: self.slug.clone(),
            address: address.to_string(),
            unclaimed: member.map(|m| m.pending_rewards).unwrap_or(0),
            last_updated: now_ms(),
        })
    }

    async fn handle_claim_reward(
        &self,
        req: &ClaimRewardRequest,
    ) -> Result<ExitExecution, EarningError> {
        let member = self
            .member_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("not a pool member".to_string()))?;
        if member.pending_rewards == 0 {
            return Err(EarningError::InvalidData("no pending rewards".to_string()));
        }
        let spec = if req.bond_reward {
            ExtrinsicSpec::new(
                "NominationPools",
                "bond_extra",
                serde_json::json!({ "extra": "Rewards" }),
            )
        } else {
            ExtrinsicSpec::new("NominationPools", "claim_payout", serde_json::json!({}))
        };
        Ok(ExitExecution {
            kind: ExitKind::ClaimReward,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }
}

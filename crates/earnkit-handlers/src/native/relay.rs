//! Relay-chain style native staking: one shared ledger, a nomination
//! list, and era-indexed unlock chunks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{
    Balance, EarningStatus, NominationInfo, YieldPoolInfo, YieldPoolStatistic, YieldPoolTarget,
    YieldPositionInfo, now_ms,
};
use earnkit_core::{
    CancelUnstakeRequest, ClaimRewardRequest, ExitExecution, ExitKind, ExtrinsicSpec, JoinRequest,
    LeaveRequest, StepExecutionResult, StepTransaction, WithdrawRequest, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::{HandlerContext, StakingLedger, ValidatorSnapshot};
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::native::common::{NativeJoinFacts, unstakings_from_chunks, validate_native_join};
use crate::stats;

#[derive(Clone)]
pub struct RelayStakingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl RelayStakingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    async fn ledger_of(&self, address: &str) -> Result<Option<StakingLedger>, EarningError> {
        let mut ledgers = self
            .ctx
            .chain
            .staking_ledgers(&self.entry.chain, &[address.to_string()])
            .await?;
        Ok(ledgers.pop().flatten())
    }

    fn bond_and_nominate(&self, req: &JoinRequest, already_bonded: bool) -> ExtrinsicSpec {
        let targets: Vec<&str> = req.targets.iter().map(|t| t.id.as_str()).collect();
        let bond = if already_bonded {
            serde_json::json!({
                "call": "bond_extra",
                "max_additional": req.amount.to_string(),
            })
        } else {
            serde_json::json!({
                "call": "bond",
                "value": req.amount.to_string(),
                "payee": "Staked",
            })
        };
        ExtrinsicSpec::new(
            "Utility",
            "batch_all",
            serde_json::json!({
                "calls": [
                    bond,
                    { "call": "nominate", "targets": targets },
                ]
            }),
        )
    }

    fn substrate_tx(&self, spec: ExtrinsicSpec) -> StepTransaction {
        StepTransaction::Substrate {
            chain: self.entry.chain.clone(),
            spec,
        }
    }
}

#[async_trait]
impl YieldPoolHandler for RelayStakingHandler {
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

        let offchain = match &self.entry.stats_url {
            Some(url) => stats::fetch_pool_stats(&self.ctx.http, url, &self.slug).await,
            None => None,
        };

        let unstaking_hours = (constants.bonding_duration_eras as u64 * era.duration_ms
            / 3_600_000) as u32;
        let statistic = YieldPoolStatistic {
            apy: offchain.as_ref().and_then(|s| s.apy_or_compounded(era.duration_ms)),
            apr: offchain.as_ref().and_then(|s| s.apr),
            tvl: offchain.as_ref().and_then(|s| s.tvl_amount()),
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
        let ledgers = self.ctx.chain.staking_ledgers(chain, addresses).await?;
        let nominations = self.ctx.chain.nominations(chain, addresses).await?;
        let era = self.ctx.chain.era_progress(chain).await?;
        let validators = self.ctx.chain.validator_snapshots(chain).await?;
        let by_address: HashMap<&str, &ValidatorSnapshot> =
            validators.iter().map(|v| (v.address.as_str(), v)).collect();
        let now = now_ms();

        let mut positions = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let ledger = ledgers.get(index).and_then(|l| l.clone());
            let noms = nominations.get(index).and_then(|n| n.clone());

            let (active, unstakings) = match &ledger {
                Some(ledger) => (
                    ledger.active,
                    unstakings_from_chunks(chain, &ledger.unlocking, &era, now, None),
                ),
                None => (0, Vec::new()),
            };

            let nomination_infos: Vec<NominationInfo> = noms
                .map(|n| {
                    n.targets
                        .iter()
                        .map(|target| {
                            let snapshot = by_address.get(target.as_str());
                            let earning = snapshot.map(|v| v.active).unwrap_or(false);
                            NominationInfo {
                                target: target.clone(),
                                target_name: snapshot.and_then(|v| v.identity.clone()),
                                // The relay ledger does not split stake
                                // per target.
                                active_stake: 0,
                                status: if earning && active > 0 {
                                    EarningStatus::EarningReward
                                } else {
                                    EarningStatus::Waiting
                                },
                                has_unstaking: false,
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();

            let status = position_status(active, &nomination_infos);
            positions.push(YieldPositionInfo::with_computed_total(
                self.slug.clone(),
                chain.clone(),
                address.clone(),
                self.pool_type(),
                active,
                status,
                nomination_infos,
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
        let chain = &self.entry.chain;
        let constants = self.ctx.chain.staking_constants(chain).await?;
        let validators = self.ctx.chain.validator_snapshots(chain).await?;
        Ok(validators
            .into_iter()
            .map(|v| YieldPoolTarget {
                id: v.address,
                name: v.identity.clone(),
                commission: v.commission,
                total_stake: v.total_stake,
                own_stake: v.own_stake,
                other_stake: v.total_stake.saturating_sub(v.own_stake),
                nominator_count: v.nominator_count,
                is_crowded: v.max_nominators > 0 && v.nominator_count >= v.max_nominators,
                blocked: v.blocked,
                is_verified: v.identity.is_some(),
                min_bond: constants.min_nominator_bond,
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
        let chain = &self.entry.chain;
        let constants = self.ctx.chain.staking_constants(chain).await?;
        let ledger = self.ledger_of(&req.address).await?;
        let active = ledger.as_ref().map(|l| l.active).unwrap_or(0);

        let mut nominations = self
            .ctx
            .chain
            .nominations(chain, &[req.address.clone()])
            .await?;
        let existing = mut_pop_targets(&mut nominations);

        // Nominating replaces the whole set, so the projected count is
        // the selected set (or the existing one when nothing changes).
        let projected_count = if req.targets.is_empty() {
            existing.len() as u32
        } else {
            req.targets.len() as u32
        };

        let mut issues = Vec::new();
        for target in &req.targets {
            let facts = NativeJoinFacts {
                chain_min: constants.min_nominator_bond.max(self.entry.min_join_amount),
                target_min: target.min_bond,
                active_toward_target: active,
                projected_nomination_count: projected_count,
                max_nominations: constants.max_nominations,
                target_blocked: target.blocked,
                target_crowded: target.is_crowded,
                pending_unstake_toward_target: false,
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
        let spec = self.bond_and_nominate(req, false);
        let fee = self.ctx.chain.estimate_fee(&self.entry.chain, &spec).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        // Recomputed from the live ledger: a plan built for a fresh
        // account must not bond twice after a concurrent join landed.
        let already_bonded = self
            .ledger_of(&req.address)
            .await?
            .map(|l| l.active > 0)
            .unwrap_or(false);
        let spec = self.bond_and_nominate(req, already_bonded);
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
        let ledger = self.ledger_of(&req.address).await?;
        let active = ledger.as_ref().map(|l| l.active).unwrap_or(0);

        let mut issues = Vec::new();
        if active == 0 {
            issues.push(ValidationIssue::not_staked());
            return Ok(issues);
        }
        if req.amount == 0 || req.amount > active {
            issues.push(ValidationIssue::amount_exceeds_balance(
                active,
                &self.entry.symbol,
            ));
        }
        let remaining = active.saturating_sub(req.amount);
        if remaining > 0 && remaining < constants.min_nominator_bond {
            issues.push(ValidationIssue::not_enough_min_stake(
                constants.min_nominator_bond,
                &self.entry.symbol,
            ));
        }
        if let Some(ledger) = &ledger {
            if constants.max_unlocking_chunks > 0
                && ledger.unlocking.len() as u32 >= constants.max_unlocking_chunks
            {
                issues.push(ValidationIssue::max_unstake_requests(
                    constants.max_unlocking_chunks,
                ));
            }
        }
        Ok(issues)
    }

    async fn handle_leave(&self, req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        let ledger = self
            .ledger_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("no staking ledger".to_string()))?;

        if req.amount >= ledger.active {
            // Full exit: stop nominating and release the whole stake.
            let spec = ExtrinsicSpec::new(
                "Utility",
                "batch_all",
                serde_json::json!({
                    "calls": [
                        { "call": "chill" },
                        { "call": "unbond", "value": ledger.active.to_string() },
                    ]
                }),
            );
            Ok(ExitExecution {
                kind: ExitKind::FullUnstake,
                transaction: self.substrate_tx(spec),
                transfer_native_amount: 0,
            })
        } else {
            let spec = ExtrinsicSpec::new(
                "Staking",
                "unbond",
                serde_json::json!({ "value": req.amount.to_string() }),
            );
            Ok(ExitExecution {
                kind: ExitKind::PartialUnstake,
                transaction: self.substrate_tx(spec),
                transfer_native_amount: 0,
            })
        }
    }

    async fn handle_withdraw(&self, req: &WithdrawRequest) -> Result<ExitExecution, EarningError> {
        let ledger = self
            .ledger_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("no staking ledger".to_string()))?;
        let era = self.ctx.chain.era_progress(&self.entry.chain).await?;
        let claimable: Balance = ledger
            .unlocking
            .iter()
            .filter(|c| c.era <= era.index)
            .map(|c| c.value)
            .sum();
        if claimable == 0 {
            return Err(EarningError::InvalidData(
                "nothing is claimable yet".to_string(),
            ));
        }
        let spec = ExtrinsicSpec::new(
            "Staking",
            "withdraw_unbonded",
            serde_json::json!({ "num_slashing_spans": 0 }),
        );
        Ok(ExitExecution {
            kind: ExitKind::Withdraw,
            transaction: self.substrate_tx(spec),
            transfer_native_amount: claimable,
        })
    }

    async fn handle_cancel_unstake(
        &self,
        req: &CancelUnstakeRequest,
    ) -> Result<ExitExecution, EarningError> {
        let ledger = self
            .ledger_of(&req.address)
            .await?
            .ok_or_else(|| EarningError::InvalidData("no staking ledger".to_string()))?;
        let unlocking: Balance = ledger.unlocking.iter().map(|c| c.value).sum();
        if unlocking == 0 {
            return Err(EarningError::InvalidData(
                "no pending unstake to cancel".to_string(),
            ));
        }
        let spec = ExtrinsicSpec::new(
            "Staking",
            "rebond",
            serde_json::json!({ "value": unlocking.to_string() }),
        );
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
        // Era rewards are paid out by the network itself.
        Err(EarningError::UnsupportedOperation("claim reward"))
    }
}

/// Overall position status from the per-nomination statuses.
pub(crate) fn position_status(active: Balance, nominations: &[NominationInfo]) -> EarningStatus {
    if active == 0 {
        return EarningStatus::NotEarning;
    }
    if nominations.is_empty() {
        return EarningStatus::NotEarning;
    }
    let earning = nominations
        .iter()
        .filter(|n| n.status == EarningStatus::EarningReward)
        .count();
    if earning == nominations.len() {
        EarningStatus::EarningReward
    } else if earning > 0 {
        EarningStatus::PartiallyEarning
    } else {
        EarningStatus::Waiting
    }
}

fn mut_pop_targets(nominations: &mut Vec<Option<crate::context::Nominations>>) -> Vec<String> {
    nominations
        .pop()
        .flatten()
        .map(|n| n.targets)
        .unwrap_or_default()
}

//! The protocol-handler capability contract.
//!
//! One handler exists per (chain, protocol) pair. Family bases supply
//! shared behavior as default trait methods: planning and the pipeline
//! walk are common to every family, exit operations default to
//! "unsupported" so a family that structurally lacks one reports that
//! distinctly from a failure.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::steps::{OptimalYieldPath, YieldStepType};
use earnkit_core::types::{
    Balance, EarningRewardHistoryItem, EarningRewardItem, YieldPoolInfo, YieldPoolTarget,
    YieldPoolType, YieldPositionInfo,
};
use earnkit_core::{
    CancelUnstakeRequest, ClaimRewardRequest, ExitExecution, JoinRequest, LeaveRequest,
    StepExecutionResult, WithdrawRequest,
};

use crate::config::ChainEarningEntry;
use crate::context::HandlerContext;
use crate::{pipeline, plan};

/// Cancellation handle for one subscription.
///
/// Cooperative: the worker checks the token before every emission, so
/// an in-flight fetch that resolves after cancellation emits nothing.
/// Cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Capability contract implemented by every protocol handler.
#[async_trait]
pub trait YieldPoolHandler: Send + Sync {
    fn entry(&self) -> &ChainEarningEntry;

    fn context(&self) -> &HandlerContext;

    fn slug(&self) -> &str;

    fn chain(&self) -> &str {
        &self.entry().chain
    }

    fn pool_type(&self) -> YieldPoolType {
        self.entry().variant.family()
    }

    /// Submit kind terminating this family's join plan.
    fn submit_step_type(&self) -> YieldStepType {
        match self.pool_type() {
            YieldPoolType::NativeStaking | YieldPoolType::Passthrough => YieldStepType::Bond,
            YieldPoolType::NominationPool => YieldStepType::JoinNominationPool,
            YieldPoolType::LiquidStaking => YieldStepType::Mint,
            YieldPoolType::Lending => YieldStepType::Supply,
        }
    }

    /// One statistics fetch. Subscription workers call this repeatedly.
    async fn fetch_pool_info(&self) -> Result<YieldPoolInfo, EarningError>;

    /// One position fetch for a batch of addresses, results in input
    /// order. Batched because most chains expose efficient multi-key
    /// queries.
    async fn fetch_positions(
        &self,
        addresses: &[String],
    ) -> Result<Vec<YieldPositionInfo>, EarningError>;

    /// Start emitting pool info: one emission immediately, then on the
    /// entry's refresh interval.
    fn subscribe_pool_info(&self, sender: UnboundedSender<YieldPoolInfo>) -> SubscriptionHandle;

    /// Start emitting positions for a batch of addresses.
    fn subscribe_pool_position(
        &self,
        addresses: Vec<String>,
        sender: UnboundedSender<YieldPositionInfo>,
    ) -> SubscriptionHandle;

    /// Nominable targets with risk metadata. Families without targets
    /// return an empty list.
    async fn pool_targets(&self) -> Result<Vec<YieldPoolTarget>, EarningError> {
        Ok(Vec::new())
    }

    /// Minimum amount a join must bond/supply.
    async fn min_join_amount(&self) -> Result<Balance, EarningError> {
        Ok(self.entry().min_join_amount)
    }

    /// Plan the step sequence for a join. Never touches signing. A
    /// network-shaped failure produces a best-effort path carrying
    /// `connection_error` instead of an error.
    async fn generate_optimal_path(
        &self,
        req: &JoinRequest,
    ) -> Result<OptimalYieldPath, EarningError> {
        plan::build_join_path(self, req).await
    }

    /// Validate the whole plan once, before any step is submitted.
    /// Empty result means "safe to submit".
    async fn validate_join(
        &self,
        req: &JoinRequest,
        path: &OptimalYieldPath,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        pipeline::validate_plan(self, req, path).await
    }

    /// Execute exactly one step of the plan.
    async fn handle_join(
        &self,
        req: &JoinRequest,
        path: &OptimalYieldPath,
        current_step: usize,
    ) -> Result<StepExecutionResult, EarningError> {
        pipeline::execute_step(self, req, path, current_step).await
    }

    /// Family-specific join rules, checked as part of the submit step.
    async fn validate_submit(
        &self,
        _req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        Err(EarningError::UnsupportedOperation("join"))
    }

    /// Fee estimate for the submit step, used while planning.
    async fn estimate_submit_fee(
        &self,
        _req: &JoinRequest,
    ) -> Result<earnkit_core::YieldTokenBaseInfo, EarningError> {
        Err(EarningError::UnsupportedOperation("join"))
    }

    /// Build the protocol submission transaction.
    async fn build_submit(
        &self,
        _req: &JoinRequest,
    ) -> Result<StepExecutionResult, EarningError> {
        Err(EarningError::UnsupportedOperation("join"))
    }

    async fn validate_token_approval(
        &self,
        _req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        Err(EarningError::UnsupportedOperation("token approval"))
    }

    async fn build_token_approval(
        &self,
        _req: &JoinRequest,
    ) -> Result<StepExecutionResult, EarningError> {
        Err(EarningError::UnsupportedOperation("token approval"))
    }

    /// Build the cross-chain top-up transaction. Recomputes the
    /// delivered amount from live balances: chain state may have moved
    /// since planning.
    async fn build_xcm_step(
        &self,
        req: &JoinRequest,
        path: &OptimalYieldPath,
        current_step: usize,
    ) -> Result<StepExecutionResult, EarningError> {
        pipeline::build_xcm_transfer(self, req, path, current_step).await
    }

    async fn validate_leave(
        &self,
        _req: &LeaveRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        Err(EarningError::UnsupportedOperation("leave"))
    }

    async fn handle_leave(&self, _req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        Err(EarningError::UnsupportedOperation("leave"))
    }

    async fn handle_withdraw(
        &self,
        _req: &WithdrawRequest,
    ) -> Result<ExitExecution, EarningError> {
        Err(EarningError::UnsupportedOperation("withdraw"))
    }

    async fn handle_cancel_unstake(
        &self,
        _req: &CancelUnstakeRequest,
    ) -> Result<ExitExecution, EarningError> {
        Err(EarningError::UnsupportedOperation("cancel unstake"))
    }

    async fn handle_claim_reward(
        &self,
        _req: &ClaimRewardRequest,
    ) -> Result<ExitExecution, EarningError> {
        Err(EarningError::UnsupportedOperation("claim reward"))
    }

    /// Current unclaimed reward for one address.
    async fn fetch_reward_item(
        &self,
        _address: &str,
    ) -> Result<EarningRewardItem, EarningError> {
        Err(EarningError::UnsupportedOperation("reward lookup"))
    }

    /// Historical reward events for one address.
    async fn fetch_reward_history(
        &self,
        _address: &str,
    ) -> Result<Vec<EarningRewardHistoryItem>, EarningError> {
        Err(EarningError::UnsupportedOperation("reward history"))
    }
}

/// Spawn the pool-info worker for a handler.
///
/// The token is checked both when selecting the next tick and again
/// after each fetch resolves, so a cancellation that lands mid-fetch
/// suppresses the emission.
pub(crate) fn spawn_pool_info_worker<H>(
    handler: H,
    sender: UnboundedSender<YieldPoolInfo>,
) -> SubscriptionHandle
where
    H: YieldPoolHandler + Clone + 'static,
{
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let interval = Duration::from_secs(handler.entry().refresh_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = worker_token.cancelled() => break,
                _ = ticker.tick() => {
                    match handler.fetch_pool_info().await {
                        Ok(info) => {
                            if worker_token.is_cancelled() {
                                break;
                            }
                            if sender.send(info).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(slug = handler.slug(), "pool info fetch failed: {e}");
                        }
                    }
                }
            }
        }
        tracing::debug!(slug = handler.slug(), "pool info subscription stopped");
    });

    SubscriptionHandle::new(token)
}

/// Spawn the position worker for a handler and a batch of addresses.
/// Emissions within one batch preserve address input order.
pub(crate) fn spawn_position_worker<H>(
    handler: H,
    addresses: Vec<String>,
    sender: UnboundedSender<YieldPositionInfo>,
) -> SubscriptionHandle
where
    H: YieldPoolHandler + Clone + 'static,
{
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let interval = Duration::from_secs(handler.entry().refresh_interval_secs);

    tokio::spawn(async move {
        if addresses.is_empty() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = worker_token.cancelled() => break,
                _ = ticker.tick() => {
                    match handler.fetch_positions(&addresses).await {
                        Ok(positions) => {
                            if worker_token.is_cancelled() {
                                break;
                            }
                            let mut closed = false;
                            for position in positions {
                                if sender.send(position).is_err() {
                                    closed = true;
                                    break;
                                }
                            }
                            if closed {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(slug = handler.slug(), "position fetch failed: {e}");
                        }
                    }
                }
            }
        }
        tracing::debug!(slug = handler.slug(), "position subscription stopped");
    });

    SubscriptionHandle::new(token)
}

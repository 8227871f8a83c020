//! Liquid staking: mint a derivative token against the input asset,
//! redeem it back through the protocol at the current rate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{YieldPoolInfo, YieldPositionInfo};
use earnkit_core::{
    ExitExecution, ExitKind, ExtrinsicSpec, JoinRequest, LeaveRequest, StepExecutionResult,
    StepTransaction, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::HandlerContext;
use crate::derivative;
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};

#[derive(Clone)]
pub struct LiquidStakingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl LiquidStakingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    fn mint_call(&self, req: &JoinRequest) -> ExtrinsicSpec {
        ExtrinsicSpec::new(
            "TokenMinting",
            "mint",
            serde_json::json!({
                "asset": self.entry.input_asset,
                "amount": req.amount.to_string(),
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
impl YieldPoolHandler for LiquidStakingHandler {
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
        derivative::fetch_pool_info(self).await
    }

    async fn fetch_positions(
        &self,
        addresses: &[String],
    ) -> Result<Vec<YieldPositionInfo>, EarningError> {
        derivative::fetch_positions(self, addresses).await
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

    async fn validate_submit(
        &self,
        _req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        // The rate must be readable for the mint to be priced; the
        // amount floor is already covered by the pipeline.
        derivative::exchange_rate(self).await?;
        Ok(Vec::new())
    }

    async fn estimate_submit_fee(
        &self,
        req: &JoinRequest,
    ) -> Result<YieldTokenBaseInfo, EarningError> {
        let spec = self.mint_call(req);
        let fee = self.ctx.chain.estimate_fee(&self.entry.chain, &spec).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        let spec = self.mint_call(req);
        // Minting spends a local (non-native) input asset unless the
        // input is the chain's native token.
        let native = self.entry.input_asset == self.entry.fee_asset;
        Ok(StepExecutionResult {
            transaction: self.substrate_tx(spec),
            transfer_native_amount: if native { req.amount } else { 0 },
        })
    }

    async fn validate_leave(
        &self,
        req: &LeaveRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        let derivative = derivative::derivative_asset(self)?.to_string();
        let held = self
            .ctx
            .balances
            .transferable(&req.address, &self.entry.chain, &derivative)
            .await?;

        let mut issues = Vec::new();
        if held == 0 {
            issues.push(ValidationIssue::not_staked());
        } else if req.amount == 0 || req.amount > held {
            issues.push(ValidationIssue::amount_exceeds_balance(
                held,
                &self.entry.symbol,
            ));
        }
        Ok(issues)
    }

    async fn handle_leave(&self, req: &LeaveRequest) -> Result<ExitExecution, EarningError> {
        let derivative = derivative::derivative_asset(self)?.to_string();
        let held = self
            .ctx
            .balances
            .transferable(&req.address, &self.entry.chain, &derivative)
            .await?;
        let rate = derivative::exchange_rate(self).await?;
        let quote = derivative::quote_redeem(&rate, req.amount, self.entry.min_amount_bps);

        let spec = ExtrinsicSpec::new(
            "TokenMinting",
            "redeem",
            serde_json::json!({
                "asset": derivative,
                "amount": req.amount.to_string(),
                "min_receive": quote.weighted_min.to_string(),
            }),
        );
        Ok(ExitExecution {
            kind: if req.amount >= held {
                ExitKind::FullUnstake
            } else {
                ExitKind::PartialUnstake
            },
            transaction: self.substrate_tx(spec),
            transfer_native_amount: 0,
        })
    }

    // Withdraw, cancel-unstake and claim-reward keep the "unsupported"
    // defaults: redeeming is immediate and rewards accrue in the rate.
}

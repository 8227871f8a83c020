//! In-memory collaborators for handler tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use earnkit_core::types::Balance;
use earnkit_core::{EarningError, EvmTransactionRequest, ExtrinsicSpec, StepTransaction};
use earnkit_handlers::{
    BalanceProvider, BondedPool, ChainApi, CollatorCandidate, DappInfo, DappStake,
    DelegatorState, EraProgress, EvmApi, ExchangeRate, HandlerContext, Nominations, PoolMember,
    StakingConstants, StakingLedger, ValidatorSnapshot, XcmBuilder,
};

#[derive(Default)]
pub struct MockChain {
    pub constants: StakingConstants,
    pub era: EraProgress,
    pub ledgers: Mutex<HashMap<String, StakingLedger>>,
    pub nominations: Mutex<HashMap<String, Nominations>>,
    pub validators: Mutex<Vec<ValidatorSnapshot>>,
    pub pools: Mutex<Vec<BondedPool>>,
    pub members: Mutex<HashMap<String, PoolMember>>,
    pub delegators: Mutex<HashMap<String, DelegatorState>>,
    pub collators: Mutex<Vec<CollatorCandidate>>,
    pub rates: Mutex<HashMap<String, ExchangeRate>>,
    pub fee: Balance,
    pub down_chains: Mutex<HashSet<String>>,
    /// Artificial latency injected into every query, to let tests race
    /// cancellation against an in-flight fetch.
    pub query_delay_ms: u64,
}

impl MockChain {
    pub fn set_down(&self, chain: &str) {
        self.down_chains.lock().unwrap().insert(chain.to_string());
    }

    async fn gate(&self, chain: &str) -> Result<(), EarningError> {
        if self.query_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.query_delay_ms)).await;
        }
        if self.down_chains.lock().unwrap().contains(chain) {
            return Err(EarningError::ConnectionError {
                chain: chain.to_string(),
            });
        }
        Ok(())
    }

    fn batch<T: Clone>(
        map: &Mutex<HashMap<String, T>>,
        addresses: &[String],
    ) -> Vec<Option<T>> {
        let map = map.lock().unwrap();
        addresses.iter().map(|a| map.get(a).cloned()).collect()
    }
}

#[async_trait]
impl ChainApi for MockChain {
    async fn wait_ready(&self, chain: &str) -> Result<(), EarningError> {
        self.gate(chain).await
    }

    async fn staking_constants(&self, chain: &str) -> Result<StakingConstants, EarningError> {
        self.gate(chain).await?;
        Ok(self.constants.clone())
    }

    async fn era_progress(&self, chain: &str) -> Result<EraProgress, EarningError> {
        self.gate(chain).await?;
        Ok(self.era)
    }

    async fn staking_ledgers(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<StakingLedger>>, EarningError> {
        self.gate(chain).await?;
        Ok(Self::batch(&self.ledgers, addresses))
    }

    async fn nominations(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<Nominations>>, EarningError> {
        self.gate(chain).await?;
        Ok(Self::batch(&self.nominations, addresses))
    }

    async fn validator_snapshots(
        &self,
        chain: &str,
    ) -> Result<Vec<ValidatorSnapshot>, EarningError> {
        self.gate(chain).await?;
        Ok(self.validators.lock().unwrap().clone())
    }

    async fn bonded_pools(&self, chain: &str) -> Result<Vec<BondedPool>, EarningError> {
        self.gate(chain).await?;
        Ok(self.pools.lock().unwrap().clone())
    }

    async fn pool_members(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<PoolMember>>, EarningError> {
        self.gate(chain).await?;
        Ok(Self::batch(&self.members, addresses))
    }

    async fn delegator_states(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<DelegatorState>>, EarningError> {
        self.gate(chain).await?;
        Ok(Self::batch(&self.delegators, addresses))
    }

    async fn collator_candidates(
        &self,
        chain: &str,
    ) -> Result<Vec<CollatorCandidate>, EarningError> {
        self.gate(chain).await?;
        Ok(self.collators.lock().unwrap().clone())
    }

    async fn dapp_stakes(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Vec<DappStake>>, EarningError> {
        self.gate(chain).await?;
        Ok(addresses.iter().map(|_| Vec::new()).collect())
    }

    async fn dapp_registry(&self, chain: &str) -> Result<Vec<DappInfo>, EarningError> {
        self.gate(chain).await?;
        Ok(Vec::new())
    }

    async fn exchange_rate(
        &self,
        chain: &str,
        derivative_asset: &str,
    ) -> Result<ExchangeRate, EarningError> {
        self.gate(chain).await?;
        self.rates
            .lock()
            .unwrap()
            .get(derivative_asset)
            .copied()
            .ok_or_else(|| EarningError::InvalidData(format!("no rate for {derivative_asset}")))
    }

    async fn estimate_fee(
        &self,
        chain: &str,
        _call: &ExtrinsicSpec,
    ) -> Result<Balance, EarningError> {
        self.gate(chain).await?;
        Ok(self.fee)
    }
}

#[derive(Default)]
pub struct MockBalances {
    pub balances: Mutex<HashMap<(String, String, String), Balance>>,
    pub min_balances: Mutex<HashMap<(String, String), Balance>>,
}

impl MockBalances {
    pub fn set(&self, address: &str, chain: &str, asset: &str, amount: Balance) {
        self.balances.lock().unwrap().insert(
            (address.to_string(), chain.to_string(), asset.to_string()),
            amount,
        );
    }
}

#[async_trait]
impl BalanceProvider for MockBalances {
    async fn transferable(
        &self,
        address: &str,
        chain: &str,
        asset: &str,
    ) -> Result<Balance, EarningError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(address.to_string(), chain.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn min_balance(&self, chain: &str, asset: &str) -> Result<Balance, EarningError> {
        Ok(self
            .min_balances
            .lock()
            .unwrap()
            .get(&(chain.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[derive(Default)]
pub struct MockEvm {
    pub allowances: Mutex<HashMap<String, Balance>>,
    pub gas_fee: Balance,
}

#[async_trait]
impl EvmApi for MockEvm {
    async fn allowance(
        &self,
        _chain: &str,
        owner: &str,
        _spender: &str,
        _token: &str,
    ) -> Result<Balance, EarningError> {
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(owner)
            .copied()
            .unwrap_or(0))
    }

    async fn build_approval(
        &self,
        _chain: &str,
        spender: &str,
        token: &str,
        amount: Balance,
    ) -> Result<EvmTransactionRequest, EarningError> {
        Ok(EvmTransactionRequest {
            to: token.to_string(),
            data: format!("0x095ea7b3-{spender}-{amount}"),
            value: 0,
            gas_limit: self.gas_fee,
        })
    }

    async fn estimate_gas_fee(
        &self,
        _chain: &str,
        _request: &EvmTransactionRequest,
    ) -> Result<Balance, EarningError> {
        Ok(self.gas_fee)
    }
}

#[derive(Default)]
pub struct MockXcm {
    pub fee: Balance,
}

#[async_trait]
impl XcmBuilder for MockXcm {
    async fn estimate_fee(
        &self,
        _origin_chain: &str,
        _dest_chain: &str,
        _asset: &str,
        _amount: Balance,
    ) -> Result<Balance, EarningError> {
        Ok(self.fee)
    }

    async fn build_transfer(
        &self,
        origin_chain: &str,
        dest_chain: &str,
        asset: &str,
        amount: Balance,
        recipient: &str,
    ) -> Result<StepTransaction, EarningError> {
        Ok(StepTransaction::Substrate {
            chain: origin_chain.to_string(),
            spec: ExtrinsicSpec::new(
                "XcmPallet",
                "limited_reserve_transfer_assets",
                serde_json::json!({
                    "dest": dest_chain,
                    "asset": asset,
                    "amount": amount.to_string(),
                    "beneficiary": recipient,
                }),
            ),
        })
    }
}

pub struct MockWorld {
    pub chain: Arc<MockChain>,
    pub balances: Arc<MockBalances>,
    pub evm: Arc<MockEvm>,
    pub xcm: Arc<MockXcm>,
}

impl MockWorld {
    pub fn new(chain: MockChain, xcm_fee: Balance) -> Self {
        Self {
            chain: Arc::new(chain),
            balances: Arc::new(MockBalances::default()),
            evm: Arc::new(MockEvm::default()),
            xcm: Arc::new(MockXcm { fee: xcm_fee }),
        }
    }

    pub fn context(&self) -> Arc<HandlerContext> {
        Arc::new(HandlerContext::new(
            self.chain.clone(),
            self.balances.clone(),
            self.evm.clone(),
            self.xcm.clone(),
        ))
    }
}

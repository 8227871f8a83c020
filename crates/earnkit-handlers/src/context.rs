//! Collaborator contracts consumed by the handlers.
//!
//! The chain-connectivity layer, the balance service, the EVM bridge and
//! the cross-chain transfer builder are external systems; handlers reach
//! them only through these narrow trait objects. Tests substitute
//! in-memory implementations.

use std::sync::Arc;

use async_trait::async_trait;

use earnkit_core::rates::mul_div;
use earnkit_core::{Balance, EarningError, EvmTransactionRequest, ExtrinsicSpec, StepTransaction};

/// Chain-level staking constants.
#[derive(Debug, Clone, Default)]
pub struct StakingConstants {
    pub min_nominator_bond: Balance,
    pub min_pool_join_bond: Balance,
    pub max_nominations: u32,
    pub max_unlocking_chunks: u32,
    /// Eras (or rounds) an unbond waits before it becomes claimable.
    pub bonding_duration_eras: u32,
    pub existential_deposit: Balance,
}

/// Progress of the active era (or round, for round-based chains).
#[derive(Debug, Clone, Copy, Default)]
pub struct EraProgress {
    pub index: u32,
    pub start_ms: u64,
    pub duration_ms: u64,
}

impl EraProgress {
    /// Absolute unlock time of something claimable at `unlock_era`.
    pub fn unlock_timestamp(&self, unlock_era: u32) -> u64 {
        let remaining = unlock_era.saturating_sub(self.index) as u64;
        self.start_ms + remaining * self.duration_ms
    }

    /// Remaining wait until `unlock_era`, measured from `now_ms`.
    pub fn waiting_time_ms(&self, unlock_era: u32, now_ms: u64) -> u64 {
        self.unlock_timestamp(unlock_era).saturating_sub(now_ms)
    }
}

/// An unlocking chunk of a staking ledger.
#[derive(Debug, Clone)]
pub struct UnlockChunk {
    pub value: Balance,
    pub era: u32,
}

/// Staking ledger of one account.
#[derive(Debug, Clone, Default)]
pub struct StakingLedger {
    pub total: Balance,
    pub active: Balance,
    pub unlocking: Vec<UnlockChunk>,
}

impl StakingLedger {
    pub fn new(active: Balance, unlocking: Vec<UnlockChunk>) -> Self {
        let total = active + unlocking.iter().map(|c| c.value).sum::<Balance>();
        Self {
            total,
            active,
            unlocking,
        }
    }
}

/// Current nominations of one account.
#[derive(Debug, Clone, Default)]
pub struct Nominations {
    pub targets: Vec<String>,
    pub submitted_in: u32,
}

/// One validator as seen at the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSnapshot {
    pub address: String,
    pub identity: Option<String>,
    /// Commission rate as a fraction (0.0 to 1.0).
    pub commission: f64,
    pub blocked: bool,
    pub total_stake: Balance,
    pub own_stake: Balance,
    pub nominator_count: u32,
    pub max_nominators: u32,
    /// In the active set this era.
    pub active: bool,
}

/// Nomination pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondedPoolState {
    Open,
    Blocked,
    Destroying,
}

/// One bonded nomination pool.
#[derive(Debug, Clone)]
pub struct BondedPool {
    pub id: u32,
    pub name: Option<String>,
    pub state: BondedPoolState,
    pub bonded: Balance,
    pub member_count: u32,
    pub commission: f64,
}

/// Pool membership of one account.
#[derive(Debug, Clone, Default)]
pub struct PoolMember {
    pub pool_id: u32,
    pub bonded: Balance,
    pub pending_rewards: Balance,
    /// `(unlock era, amount)` pairs.
    pub unbonding: Vec<(u32, Balance)>,
}

/// One delegation of a parachain-staking delegator.
#[derive(Debug, Clone)]
pub struct Delegation {
    pub collator: String,
    pub amount: Balance,
}

/// A scheduled delegation decrease/revoke.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub collator: String,
    pub amount: Balance,
    pub executable_round: u32,
}

/// Parachain-staking delegator state.
#[derive(Debug, Clone, Default)]
pub struct DelegatorState {
    pub delegations: Vec<Delegation>,
    pub requests: Vec<DelegationRequest>,
}

/// One collator candidate.
#[derive(Debug, Clone, Default)]
pub struct CollatorCandidate {
    pub address: String,
    pub identity: Option<String>,
    pub total_counted: Balance,
    pub self_bond: Balance,
    pub delegation_count: u32,
    pub max_delegations: u32,
    /// Smallest delegation still earning on this collator.
    pub lowest_top_delegation: Balance,
}

/// One dApp-staking stake of an account.
#[derive(Debug, Clone)]
pub struct DappStake {
    pub contract: String,
    pub staked: Balance,
    pub unlocking: Vec<UnlockChunk>,
}

/// One registered dApp.
#[derive(Debug, Clone, Default)]
pub struct DappInfo {
    pub contract: String,
    pub name: Option<String>,
    pub total_staked: Balance,
    pub staker_count: u32,
    pub is_registered: bool,
}

/// Derivative/input conversion rate as an exact rational.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRate {
    pub numerator: Balance,
    pub denominator: Balance,
}

impl ExchangeRate {
    pub fn derivative_to_input(&self, amount: Balance) -> Balance {
        mul_div(amount, self.numerator, self.denominator)
    }

    pub fn input_to_derivative(&self, amount: Balance) -> Balance {
        mul_div(amount, self.denominator, self.numerator)
    }
}

/// Typed query surface of the chain-connectivity collaborator.
///
/// One method per storage shape the handlers read. Errors carry no retry
/// policy; subscription workers log and continue, planners map
/// network-shaped errors into soft path markers.
#[async_trait]
pub trait ChainApi: Send + Sync {
    /// Resolve when the chain is connected and its metadata is usable.
    async fn wait_ready(&self, chain: &str) -> Result<(), EarningError>;

    async fn staking_constants(&self, chain: &str) -> Result<StakingConstants, EarningError>;

    async fn era_progress(&self, chain: &str) -> Result<EraProgress, EarningError>;

    async fn staking_ledgers(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<StakingLedger>>, EarningError>;

    async fn nominations(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<Nominations>>, EarningError>;

    async fn validator_snapshots(&self, chain: &str)
    -> Result<Vec<ValidatorSnapshot>, EarningError>;

    async fn bonded_pools(&self, chain: &str) -> Result<Vec<BondedPool>, EarningError>;

    async fn pool_members(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<PoolMember>>, EarningError>;

    async fn delegator_states(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<DelegatorState>>, EarningError>;

    async fn collator_candidates(&self, chain: &str)
    -> Result<Vec<CollatorCandidate>, EarningError>;

    async fn dapp_stakes(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Vec<DappStake>>, EarningError>;

    async fn dapp_registry(&self, chain: &str) -> Result<Vec<DappInfo>, EarningError>;

    async fn exchange_rate(
        &self,
        chain: &str,
        derivative_asset: &str,
    ) -> Result<ExchangeRate, EarningError>;

    async fn estimate_fee(
        &self,
        chain: &str,
        call: &ExtrinsicSpec,
    ) -> Result<Balance, EarningError>;
}

/// The generic balance service.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Transferable balance of `asset` held by `address` on `chain`.
    async fn transferable(
        &self,
        address: &str,
        chain: &str,
        asset: &str,
    ) -> Result<Balance, EarningError>;

    /// Minimum balance (existential deposit) of an asset.
    async fn min_balance(&self, chain: &str, asset: &str) -> Result<Balance, EarningError>;
}

/// EVM-side reads and transaction building.
#[async_trait]
pub trait EvmApi: Send + Sync {
    async fn allowance(
        &self,
        chain: &str,
        owner: &str,
        spender: &str,
        token: &str,
    ) -> Result<Balance, EarningError>;

    async fn build_approval(
        &self,
        chain: &str,
        spender: &str,
        token: &str,
        amount: Balance,
    ) -> Result<EvmTransactionRequest, EarningError>;

    /// Fee in the chain's native asset for executing `request`.
    async fn estimate_gas_fee(
        &self,
        chain: &str,
        request: &EvmTransactionRequest,
    ) -> Result<Balance, EarningError>;
}

/// The cross-chain transfer builder, used only by the XCM step.
#[async_trait]
pub trait XcmBuilder: Send + Sync {
    async fn estimate_fee(
        &self,
        origin_chain: &str,
        dest_chain: &str,
        asset: &str,
        amount: Balance,
    ) -> Result<Balance, EarningError>;

    async fn build_transfer(
        &self,
        origin_chain: &str,
        dest_chain: &str,
        asset: &str,
        amount: Balance,
        recipient: &str,
    ) -> Result<StepTransaction, EarningError>;
}

/// Shared handle bundle passed to every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub chain: Arc<dyn ChainApi>,
    pub balances: Arc<dyn BalanceProvider>,
    pub evm: Arc<dyn EvmApi>,
    pub xcm: Arc<dyn XcmBuilder>,
    pub http: reqwest::Client,
}

impl HandlerContext {
    pub fn new(
        chain: Arc<dyn ChainApi>,
        balances: Arc<dyn BalanceProvider>,
        evm: Arc<dyn EvmApi>,
        xcm: Arc<dyn XcmBuilder>,
    ) -> Self {
        Self {
            chain,
            balances,
            evm,
            xcm,
            http: reqwest::Client::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn era_progress_unlock_math() {
        let era = EraProgress {
            index: 100,
            start_ms: 1_000_000,
            duration_ms: 3_600_000,
        };
        // Already claimable: unlock era in the past maps to era start.
        assert_eq!(era.unlock_timestamp(99), 1_000_000);
        assert_eq!(era.unlock_timestamp(102), 1_000_000 + 2 * 3_600_000);
        assert_eq!(era.waiting_time_ms(102, 2_000_000), 7_200_000 - 1_000_000);
        assert_eq!(era.waiting_time_ms(99, 2_000_000), 0);
    }

    #[test]
    fn ledger_total_includes_unlocking() {
        let ledger = StakingLedger::new(
            1_000,
            vec![
                UnlockChunk {
                    value: 200,
                    era: 105,
                },
                UnlockChunk {
                    value: 300,
                    era: 110,
                },
            ],
        );
        assert_eq!(ledger.total, 1_500);
    }

    #[test]
    fn exchange_rate_round_trips_with_floor() {
        // 1 derivative = 1.25 input
        let rate = ExchangeRate {
            numerator: 125,
            denominator: 100,
        };
        assert_eq!(rate.derivative_to_input(1_000), 1_250);
        assert_eq!(rate.input_to_derivative(1_250), 1_000);
        // Floors, never rounds up.
        assert_eq!(rate.derivative_to_input(3), 3);
        assert_eq!(rate.input_to_derivative(3), 2);
    }
}

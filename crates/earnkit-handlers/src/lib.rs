//! Protocol handlers, step planning and the validation/execution
//! pipeline for multi-protocol yield earning.
//!
//! This crate provides:
//! - The handler capability contract (`handler` module)
//! - Collaborator trait contracts for chain, balance, EVM and XCM
//!   access (`context` module)
//! - The static chain→family table (`config` module)
//! - Step-plan construction (`plan` module) and the validator/executor
//!   pipeline (`pipeline` module)
//! - Family implementations: native staking variants (`native`),
//!   nomination pools (`pool`), liquid staking (`liquid`), lending
//!   (`lending`) and the pass-through family (`passthrough`)
//! - Off-chain statistics feeds (`stats` module)

pub mod config;
pub mod context;
pub mod derivative;
pub mod handler;
pub mod lending;
pub mod liquid;
pub mod native;
pub mod passthrough;
pub mod pipeline;
pub mod plan;
pub mod pool;
pub mod stats;

pub use config::{ChainEarningEntry, HandlerVariant, default_chain_table};
pub use context::{
    BalanceProvider, BondedPool, BondedPoolState, ChainApi, CollatorCandidate, DappInfo,
    DappStake, Delegation, DelegationRequest, DelegatorState, EraProgress, EvmApi, ExchangeRate,
    HandlerContext, Nominations, PoolMember, StakingConstants, StakingLedger, UnlockChunk,
    ValidatorSnapshot, XcmBuilder,
};
pub use handler::{SubscriptionHandle, YieldPoolHandler};
pub use lending::LendingHandler;
pub use liquid::LiquidStakingHandler;
pub use native::{DappStakingHandler, IndexedStakingHandler, ParaStakingHandler, RelayStakingHandler};
pub use passthrough::PassthroughHandler;
pub use pool::NominationPoolHandler;

use std::sync::Arc;

/// Instantiate the handler for one table entry.
pub fn build_handler(
    entry: ChainEarningEntry,
    ctx: Arc<HandlerContext>,
) -> Arc<dyn YieldPoolHandler> {
    match entry.variant {
        HandlerVariant::RelayStaking => Arc::new(RelayStakingHandler::new(entry, ctx)),
        HandlerVariant::ParaStaking => Arc::new(ParaStakingHandler::new(entry, ctx)),
        HandlerVariant::DappStaking => Arc::new(DappStakingHandler::new(entry, ctx)),
        HandlerVariant::IndexedStaking => Arc::new(IndexedStakingHandler::new(entry, ctx)),
        HandlerVariant::NominationPool => Arc::new(NominationPoolHandler::new(entry, ctx)),
        HandlerVariant::LiquidStaking => Arc::new(LiquidStakingHandler::new(entry, ctx)),
        HandlerVariant::Lending => Arc::new(LendingHandler::new(entry, ctx)),
        HandlerVariant::Passthrough => Arc::new(PassthroughHandler::new(entry, ctx)),
    }
}

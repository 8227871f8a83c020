//! Native-staking handlers.

pub mod common;
pub mod dapp;
pub mod indexed;
pub mod para;
pub mod relay;

pub use dapp::DappStakingHandler;
pub use indexed::IndexedStakingHandler;
pub use para::ParaStakingHandler;
pub use relay::RelayStakingHandler;

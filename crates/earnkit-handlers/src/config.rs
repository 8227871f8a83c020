//! Static chain configuration.
//!
//! Which protocol families run on which chain is a deployment decision,
//! not something inspected from on-chain data at runtime: the table below
//! is fixed at startup and the registry instantiates one handler per
//! entry whose chain is active.

use serde::{Deserialize, Serialize};

use earnkit_core::rates::DEFAULT_MIN_AMOUNT_BPS;
use earnkit_core::types::{AltAsset, Balance, YieldPoolType, balance_string};
use earnkit_core::derive_pool_slug;

/// Concrete handler implementation to instantiate for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerVariant {
    /// Relay-chain style: ledger + nominations + era unlock chunks.
    RelayStaking,
    /// Parachain-collator style: delegations + round-based requests.
    ParaStaking,
    /// dApp-staking style: contract targets + period unlocks.
    DappStaking,
    /// Positions sourced from an external index; join/leave unsupported.
    IndexedStaking,
    NominationPool,
    LiquidStaking,
    Lending,
    Passthrough,
}

impl HandlerVariant {
    pub fn family(&self) -> YieldPoolType {
        match self {
            HandlerVariant::RelayStaking
            | HandlerVariant::ParaStaking
            | HandlerVariant::DappStaking
            | HandlerVariant::IndexedStaking => YieldPoolType::NativeStaking,
            HandlerVariant::NominationPool => YieldPoolType::NominationPool,
            HandlerVariant::LiquidStaking => YieldPoolType::LiquidStaking,
            HandlerVariant::Lending => YieldPoolType::Lending,
            HandlerVariant::Passthrough => YieldPoolType::Passthrough,
        }
    }
}

/// One row of the chain→family table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEarningEntry {
    pub chain: String,
    pub variant: HandlerVariant,
    /// Symbol of the asset earned with, used in slug derivation.
    pub symbol: String,
    pub name: String,
    /// Asset bonded/supplied into the protocol.
    pub input_asset: String,
    /// Asset fees are paid in on this chain.
    pub fee_asset: String,
    #[serde(default)]
    pub alt_input_assets: Vec<AltAsset>,
    #[serde(default)]
    pub derivative_asset: Option<String>,
    #[serde(default)]
    pub reward_asset: Option<String>,
    /// EVM-style chain; enables the token-approval step.
    #[serde(default)]
    pub evm: bool,
    #[serde(default)]
    pub approval_spender: Option<String>,
    #[serde(default)]
    pub token_contract: Option<String>,
    /// Slippage tolerance for derivative redeems, in basis points.
    #[serde(default = "default_min_amount_bps")]
    pub min_amount_bps: u32,
    /// Join floor used when chain constants do not provide one.
    #[serde(default, with = "balance_string")]
    pub min_join_amount: Balance,
    /// Off-chain statistics feed, queried on the refresh interval.
    #[serde(default)]
    pub stats_url: Option<String>,
    /// External position index, for `IndexedStaking`.
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
}

fn default_min_amount_bps() -> u32 {
    DEFAULT_MIN_AMOUNT_BPS
}

fn default_refresh_secs() -> u64 {
    90
}

impl ChainEarningEntry {
    pub fn new(chain: &str, variant: HandlerVariant, symbol: &str, name: &str) -> Self {
        let native = format!("{chain}-NATIVE-{}", symbol.to_uppercase());
        Self {
            chain: chain.to_string(),
            variant,
            symbol: symbol.to_string(),
            name: name.to_string(),
            input_asset: native.clone(),
            fee_asset: native,
            alt_input_assets: Vec::new(),
            derivative_asset: None,
            reward_asset: None,
            evm: false,
            approval_spender: None,
            token_contract: None,
            min_amount_bps: DEFAULT_MIN_AMOUNT_BPS,
            min_join_amount: 0,
            stats_url: None,
            index_url: None,
            refresh_interval_secs: default_refresh_secs(),
        }
    }

    pub fn slug(&self) -> String {
        derive_pool_slug(&self.symbol, self.variant.family(), &self.chain)
    }

    /// Display metadata block emitted with every pool-info update.
    pub fn pool_metadata(&self) -> earnkit_core::types::YieldPoolMetadata {
        earnkit_core::types::YieldPoolMetadata {
            name: self.name.clone(),
            short_name: self.symbol.clone(),
            description: String::new(),
            input_asset: self.input_asset.clone(),
            alt_input_assets: self.alt_input_assets.clone(),
            derivative_asset: self.derivative_asset.clone(),
            reward_asset: self.reward_asset.clone(),
            is_available: true,
        }
    }

    pub fn with_input_asset(mut self, asset: &str) -> Self {
        self.input_asset = asset.to_string();
        self
    }

    pub fn with_alt_asset(mut self, slug: &str, chain: &str) -> Self {
        self.alt_input_assets.push(AltAsset {
            slug: slug.to_string(),
            chain: chain.to_string(),
        });
        self
    }

    pub fn with_derivative(mut self, asset: &str) -> Self {
        self.derivative_asset = Some(asset.to_string());
        self
    }

    pub fn with_evm_approval(mut self, spender: &str, token: &str) -> Self {
        self.evm = true;
        self.approval_spender = Some(spender.to_string());
        self.token_contract = Some(token.to_string());
        self
    }

    pub fn with_min_join(mut self, amount: Balance) -> Self {
        self.min_join_amount = amount;
        self
    }

    pub fn with_stats_url(mut self, url: &str) -> Self {
        self.stats_url = Some(url.to_string());
        self
    }

    pub fn with_index_url(mut self, url: &str) -> Self {
        self.index_url = Some(url.to_string());
        self
    }
}

/// The built-in deployment table.
pub fn default_chain_table() -> Vec<ChainEarningEntry> {
    vec![
        ChainEarningEntry::new(
            "polkadot",
            HandlerVariant::RelayStaking,
            "DOT",
            "Polkadot staking",
        ),
        ChainEarningEntry::new(
            "polkadot",
            HandlerVariant::NominationPool,
            "DOT",
            "Polkadot nomination pools",
        ),
        ChainEarningEntry::new(
            "kusama",
            HandlerVariant::RelayStaking,
            "KSM",
            "Kusama staking",
        ),
        ChainEarningEntry::new(
            "moonbeam",
            HandlerVariant::ParaStaking,
            "GLMR",
            "Moonbeam collator staking",
        ),
        ChainEarningEntry::new("astar", HandlerVariant::DappStaking, "ASTR", "Astar dApp staking"),
        ChainEarningEntry::new(
            "bifrost",
            HandlerVariant::LiquidStaking,
            "DOT",
            "Bifrost liquid staking",
        )
        .with_input_asset("bifrost-LOCAL-DOT")
        .with_derivative("bifrost-LOCAL-vDOT")
        .with_alt_asset("polkadot-NATIVE-DOT", "polkadot")
        .with_min_join(5_000_000_000),
        ChainEarningEntry::new(
            "moonbeam",
            HandlerVariant::Lending,
            "xcDOT",
            "Moonwell lending",
        )
        .with_input_asset("moonbeam-LOCAL-xcDOT")
        .with_derivative("moonbeam-LOCAL-mDOT")
        .with_evm_approval(
            "0xd22da948c0ab3a27f5570b604f3adef5f68211c3",
            "0xffffffff1fcacbd218edc0eba20fc2308c778080",
        )
        .with_alt_asset("polkadot-NATIVE-DOT", "polkadot")
        .with_min_join(1_000_000_000),
        ChainEarningEntry::new(
            "manta",
            HandlerVariant::IndexedStaking,
            "MANTA",
            "Manta staking (indexed)",
        )
        .with_index_url("https://index.example.network/staking"),
        ChainEarningEntry::new(
            "interlay",
            HandlerVariant::Passthrough,
            "qDOT",
            "Interlay qDOT",
        )
        .with_input_asset("interlay-LOCAL-qDOT"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_slugs_are_unique() {
        let table = default_chain_table();
        let slugs: std::collections::HashSet<_> = table.iter().map(|e| e.slug()).collect();
        assert_eq!(slugs.len(), table.len());
    }

    #[test]
    fn one_chain_may_host_several_handlers() {
        let table = default_chain_table();
        let on_polkadot: Vec<_> = table.iter().filter(|e| e.chain == "polkadot").collect();
        assert!(on_polkadot.len() >= 2);
    }

    #[test]
    fn families_resolve_from_variants() {
        assert_eq!(
            HandlerVariant::IndexedStaking.family(),
            YieldPoolType::NativeStaking
        );
        assert_eq!(
            HandlerVariant::Lending.family(),
            YieldPoolType::Lending
        );
    }

    #[test]
    fn derivative_entries_carry_their_assets() {
        let table = default_chain_table();
        for entry in table {
            if entry.variant.family().mints_derivative() {
                assert!(entry.derivative_asset.is_some(), "{} misses derivative", entry.slug());
            }
        }
    }
}

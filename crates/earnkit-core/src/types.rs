//! Core domain types for multi-protocol yield orchestration.

use serde::{Deserialize, Serialize};

pub type Balance = u128;

/// Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serde helpers encoding `Balance` as a decimal string.
///
/// Persisted documents and anything crossing the JSON boundary carry
/// amounts as base-unit integer strings, since a 128-bit integer does not
/// survive every JSON reader intact.
pub mod balance_string {
    use super::Balance;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Balance, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Balance, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Balance>().map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for `Option<Balance>` with the same string encoding.
pub mod balance_string_opt {
    use super::Balance;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Balance>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Balance>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => s
                .parse::<Balance>()
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Protocol families - exhaustive match required (no default case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldPoolType {
    NativeStaking,
    NominationPool,
    LiquidStaking,
    Lending,
    /// Pool visible to the wallet but with no active protocol logic.
    Passthrough,
}

impl YieldPoolType {
    /// Token used in slug derivation.
    pub fn slug_token(&self) -> &'static str {
        match self {
            YieldPoolType::NativeStaking => "native_staking",
            YieldPoolType::NominationPool => "nomination_pool",
            YieldPoolType::LiquidStaking => "liquid_staking",
            YieldPoolType::Lending => "lending",
            YieldPoolType::Passthrough => "passthrough",
        }
    }

    /// Get display label.
    pub fn label(&self) -> &'static str {
        match self {
            YieldPoolType::NativeStaking => "Direct nomination",
            YieldPoolType::NominationPool => "Nomination pool",
            YieldPoolType::LiquidStaking => "Liquid staking",
            YieldPoolType::Lending => "Lending",
            YieldPoolType::Passthrough => "Special",
        }
    }

    /// Whether joining mints a derivative asset against the input asset.
    pub fn mints_derivative(&self) -> bool {
        matches!(self, YieldPoolType::LiquidStaking | YieldPoolType::Lending)
    }
}

impl std::fmt::Display for YieldPoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An input asset reachable on another chain, usable to top up via XCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltAsset {
    pub slug: String,
    pub chain: String,
}

/// Display and routing metadata for a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct YieldPoolMetadata {
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    /// Asset bonded/supplied into the protocol.
    pub input_asset: String,
    /// Same asset on other chains, usable for a cross-chain top-up.
    #[serde(default)]
    pub alt_input_assets: Vec<AltAsset>,
    /// Receipt asset minted by derivative protocols.
    #[serde(default)]
    pub derivative_asset: Option<String>,
    #[serde(default)]
    pub reward_asset: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

/// Mutable statistics block, refreshed by the owning handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct YieldPoolStatistic {
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apr: Option<f64>,
    #[serde(default, with = "balance_string_opt")]
    pub tvl: Option<Balance>,
    #[serde(default, with = "balance_string")]
    pub min_join_amount: Balance,
    #[serde(default)]
    pub unstaking_period_hours: Option<u32>,
    #[serde(default)]
    pub max_unstake_requests: Option<u32>,
}

/// A yield pool: one (chain, protocol, asset) earning opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPoolInfo {
    pub slug: String,
    pub chain: String,
    pub pool_type: YieldPoolType,
    pub metadata: YieldPoolMetadata,
    #[serde(default)]
    pub statistic: Option<YieldPoolStatistic>,
    /// Unix ms of the emitting fetch. Store writes are gated on this.
    #[serde(default)]
    pub last_updated: u64,
}

/// Earning state of a position or a single nomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    EarningReward,
    PartiallyEarning,
    #[default]
    NotEarning,
    /// Bonded but not yet in the active set.
    Waiting,
}

/// Unstake request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnstakingStatus {
    Claimable,
    Unlocking,
}

/// A pending withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstakingInfo {
    pub chain: String,
    #[serde(with = "balance_string")]
    pub claimable: Balance,
    pub status: UnstakingStatus,
    #[serde(default)]
    pub target: Option<String>,
    /// Remaining wait, when the chain only exposes a relative delay.
    #[serde(default)]
    pub waiting_time_ms: Option<u64>,
    /// Absolute unlock time, when it can be computed.
    #[serde(default)]
    pub unlock_timestamp: Option<u64>,
}

/// One allocation of stake toward a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NominationInfo {
    pub target: String,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(with = "balance_string")]
    pub active_stake: Balance,
    #[serde(default)]
    pub status: EarningStatus,
    /// An unstake toward this target is already in flight.
    #[serde(default)]
    pub has_unstaking: bool,
}

/// A wallet address's participation state in one pool.
///
/// Invariant: `total_stake == active_stake + sum(unstakings.claimable)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPositionInfo {
    pub slug: String,
    pub chain: String,
    pub address: String,
    pub pool_type: YieldPoolType,
    #[serde(default, with = "balance_string")]
    pub active_stake: Balance,
    #[serde(default, with = "balance_string")]
    pub total_stake: Balance,
    #[serde(default)]
    pub status: EarningStatus,
    #[serde(default)]
    pub nominations: Vec<NominationInfo>,
    #[serde(default)]
    pub unstakings: Vec<UnstakingInfo>,
}

impl YieldPositionInfo {
    /// Build a position whose total is derived from the parts, so the
    /// stake invariant holds by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn with_computed_total(
        slug: impl Into<String>,
        chain: impl Into<String>,
        address: impl Into<String>,
        pool_type: YieldPoolType,
        active_stake: Balance,
        status: EarningStatus,
        nominations: Vec<NominationInfo>,
        unstakings: Vec<UnstakingInfo>,
    ) -> Self {
        let unstaking_sum: Balance = unstakings.iter().map(|u| u.claimable).sum();
        Self {
            slug: slug.into(),
            chain: chain.into(),
            address: address.into(),
            pool_type,
            active_stake,
            total_stake: active_stake + unstaking_sum,
            status,
            nominations,
            unstakings,
        }
    }

    /// Check the stake invariant.
    pub fn check_total(&self) -> bool {
        let unstaking_sum: Balance = self.unstakings.iter().map(|u| u.claimable).sum();
        self.total_stake == self.active_stake + unstaking_sum
    }

    /// Whether the address holds or waits on anything in this pool.
    pub fn is_empty(&self) -> bool {
        self.total_stake == 0 && self.unstakings.is_empty()
    }
}

/// A nominable target (validator, collator, dApp or pool) with risk
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPoolTarget {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Commission rate as a fraction (0.0 to 1.0).
    #[serde(default)]
    pub commission: f64,
    #[serde(default, with = "balance_string")]
    pub total_stake: Balance,
    #[serde(default, with = "balance_string")]
    pub own_stake: Balance,
    #[serde(default, with = "balance_string")]
    pub other_stake: Balance,
    #[serde(default)]
    pub nominator_count: u32,
    /// Past the per-target nominator cap; new joiners may earn nothing.
    #[serde(default)]
    pub is_crowded: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, with = "balance_string")]
    pub min_bond: Balance,
    #[serde(default)]
    pub expected_return: Option<f64>,
}

/// Unclaimed reward for a position, keyed `(slug, address)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningRewardItem {
    pub slug: String,
    pub address: String,
    #[serde(default, with = "balance_string")]
    pub unclaimed: Balance,
    #[serde(default)]
    pub last_updated: u64,
}

/// One historical reward event, keyed `(slug, address, event_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningRewardHistoryItem {
    pub slug: String,
    pub address: String,
    pub event_index: u64,
    #[serde(with = "balance_string")]
    pub amount: Balance,
    pub block_timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unstaking(amount: Balance) -> UnstakingInfo {
        UnstakingInfo {
            chain: "polkadot".into(),
            claimable: amount,
            status: UnstakingStatus::Unlocking,
            target: None,
            waiting_time_ms: None,
            unlock_timestamp: None,
        }
    }

    #[test]
    fn computed_total_includes_unstakings() {
        let position = YieldPositionInfo::with_computed_total(
            "DOT___native_staking___polkadot",
            "polkadot",
            "addr",
            YieldPoolType::NativeStaking,
            1_000,
            EarningStatus::EarningReward,
            vec![],
            vec![unstaking(250), unstaking(750)],
        );
        assert_eq!(position.total_stake, 2_000);
        assert!(position.check_total());
    }

    #[test]
    fn check_total_detects_mismatch() {
        let mut position = YieldPositionInfo::with_computed_total(
            "slug",
            "polkadot",
            "addr",
            YieldPoolType::NativeStaking,
            500,
            EarningStatus::NotEarning,
            vec![],
            vec![unstaking(100)],
        );
        position.total_stake = 700;
        assert!(!position.check_total());
    }

    #[test]
    fn balance_survives_json_round_trip_as_string() {
        let position = YieldPositionInfo::with_computed_total(
            "slug",
            "polkadot",
            "addr",
            YieldPoolType::LiquidStaking,
            340_282_366_920_938_463_463_374_607_431_768_211_455u128,
            EarningStatus::EarningReward,
            vec![],
            vec![],
        );
        let json = serde_json::to_string(&position).unwrap();
        assert!(json.contains("\"340282366920938463463374607431768211455\""));
        let back: YieldPositionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, position);
    }

    #[test]
    fn missing_fields_default_to_not_staking() {
        // Old persisted rows carry only the identity fields.
        let json = r#"{
            "slug": "DOT___native_staking___polkadot",
            "chain": "polkadot",
            "address": "addr",
            "pool_type": "native_staking"
        }"#;
        let position: YieldPositionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(position.active_stake, 0);
        assert_eq!(position.total_stake, 0);
        assert_eq!(position.status, EarningStatus::NotEarning);
        assert!(position.nominations.is_empty());
        assert!(position.check_total());
    }

    #[test]
    fn pool_type_slug_tokens_are_distinct() {
        let tokens = [
            YieldPoolType::NativeStaking,
            YieldPoolType::NominationPool,
            YieldPoolType::LiquidStaking,
            YieldPoolType::Lending,
            YieldPoolType::Passthrough,
        ]
        .map(|t| t.slug_token());
        let unique: std::collections::HashSet<_> = tokens.iter().collect();
        assert_eq!(unique.len(), tokens.len());
    }

    #[test]
    fn derivative_families() {
        assert!(YieldPoolType::LiquidStaking.mints_derivative());
        assert!(YieldPoolType::Lending.mints_derivative());
        assert!(!YieldPoolType::NativeStaking.mints_derivative());
        assert!(!YieldPoolType::NominationPool.mints_derivative());
        assert!(!YieldPoolType::Passthrough.mints_derivative());
    }
}

//! Pool slugs and store keys.
//!
//! A slug identifies one (asset, protocol, chain) earning opportunity and
//! is globally unique: `SYMBOL___family_token___chain`. Positions are keyed
//! `slug---address`.

use crate::types::YieldPoolType;

const SLUG_SEPARATOR: &str = "___";
const POSITION_SEPARATOR: &str = "---";

/// Derive the slug for a pool.
pub fn derive_pool_slug(symbol: &str, pool_type: YieldPoolType, chain: &str) -> String {
    format!(
        "{}{SLUG_SEPARATOR}{}{SLUG_SEPARATOR}{}",
        symbol.to_uppercase(),
        pool_type.slug_token(),
        chain
    )
}

/// Split a slug back into (symbol, family token, chain).
pub fn parse_pool_slug(slug: &str) -> Option<(&str, &str, &str)> {
    let mut parts = slug.splitn(3, SLUG_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(symbol), Some(family), Some(chain))
            if !symbol.is_empty() && !family.is_empty() && !chain.is_empty() =>
        {
            Some((symbol, family, chain))
        }
        _ => None,
    }
}

/// Store key for a position.
pub fn position_key(slug: &str, address: &str) -> String {
    format!("{slug}{POSITION_SEPARATOR}{address}")
}

/// Split a position key back into (slug, address).
pub fn parse_position_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(POSITION_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_and_parse_round_trip() {
        let slug = derive_pool_slug("dot", YieldPoolType::NativeStaking, "polkadot");
        assert_eq!(slug, "DOT___native_staking___polkadot");
        assert_eq!(
            parse_pool_slug(&slug),
            Some(("DOT", "native_staking", "polkadot"))
        );
    }

    #[test]
    fn position_key_round_trip() {
        let slug = derive_pool_slug("vDOT", YieldPoolType::LiquidStaking, "bifrost");
        let key = position_key(&slug, "5Grw...utQY");
        assert_eq!(parse_position_key(&key), Some((slug.as_str(), "5Grw...utQY")));
    }

    #[test]
    fn parse_rejects_malformed_slugs() {
        assert_eq!(parse_pool_slug("DOT___native_staking"), None);
        assert_eq!(parse_pool_slug(""), None);
        assert_eq!(parse_pool_slug("______"), None);
    }

    #[test]
    fn slugs_differ_per_family_on_one_chain() {
        // One chain may host several handlers; their slugs must not collide.
        let native = derive_pool_slug("DOT", YieldPoolType::NativeStaking, "polkadot");
        let pooled = derive_pool_slug("DOT", YieldPoolType::NominationPool, "polkadot");
        assert_ne!(native, pooled);
    }
}

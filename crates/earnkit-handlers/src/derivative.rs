//! Shared base for the derivative families (liquid staking and
//! lending): both mint a receipt asset against an input asset, price
//! positions through an exchange rate, and protect redeems with a
//! slippage floor.

use earnkit_core::error::EarningError;
use earnkit_core::rates::apply_slippage_bps;
use earnkit_core::types::{
    Balance, EarningStatus, YieldPoolInfo, YieldPoolStatistic, YieldPositionInfo, now_ms,
};

use crate::context::ExchangeRate;
use crate::handler::YieldPoolHandler;
use crate::stats;

/// The entry's derivative asset, which every derivative handler must
/// configure.
pub(crate) fn derivative_asset<H>(handler: &H) -> Result<&str, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    handler
        .entry()
        .derivative_asset
        .as_deref()
        .ok_or_else(|| {
            EarningError::InvalidData(format!(
                "{} is a derivative pool without a derivative asset",
                handler.slug()
            ))
        })
}

pub(crate) async fn exchange_rate<H>(handler: &H) -> Result<ExchangeRate, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let derivative = derivative_asset(handler)?.to_string();
    handler
        .context()
        .chain
        .exchange_rate(&handler.entry().chain, &derivative)
        .await
}

/// Pool info shared by both derivative families: statistics come from
/// the off-chain feed, the minimum join from the entry.
pub(crate) async fn fetch_pool_info<H>(handler: &H) -> Result<YieldPoolInfo, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    // Probe the rate so an unreachable chain degrades the same way the
    // staking families do.
    let _ = exchange_rate(handler).await?;

    let offchain = match &entry.stats_url {
        Some(url) => stats::fetch_pool_stats(&handler.context().http, url, handler.slug()).await,
        None => None,
    };
    let statistic = YieldPoolStatistic {
        apy: offchain.as_ref().and_then(|s| s.apy),
        apr: offchain.as_ref().and_then(|s| s.apr),
        tvl: offchain.as_ref().and_then(|s| s.tvl_amount()),
        min_join_amount: entry.min_join_amount,
        unstaking_period_hours: None,
        max_unstake_requests: None,
    };
    Ok(YieldPoolInfo {
        slug: handler.slug().to_string(),
        chain: entry.chain.clone(),
        pool_type: handler.pool_type(),
        metadata: entry.pool_metadata(),
        statistic: Some(statistic),
        last_updated: now_ms(),
    })
}

/// Positions shared by both derivative families: the derivative balance
/// valued back into the input asset through the exchange rate. No
/// unstaking queue exists; redeeming is a direct swap.
pub(crate) async fn fetch_positions<H>(
    handler: &H,
    addresses: &[String],
) -> Result<Vec<YieldPositionInfo>, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    let derivative = derivative_asset(handler)?.to_string();
    let rate = exchange_rate(handler).await?;

    let balances = &handler.context().balances;
    let held = futures::future::join_all(
        addresses
            .iter()
            .map(|address| balances.transferable(address, &entry.chain, &derivative)),
    )
    .await;

    let mut positions = Vec::with_capacity(addresses.len());
    for (address, held) in addresses.iter().zip(held) {
        let active = rate.derivative_to_input(held?);
        let status = if active > 0 {
            EarningStatus::EarningReward
        } else {
            EarningStatus::NotEarning
        };
        positions.push(YieldPositionInfo::with_computed_total(
            handler.slug().to_string(),
            entry.chain.clone(),
            address.clone(),
            handler.pool_type(),
            active,
            status,
            vec![],
            vec![],
        ));
    }
    Ok(positions)
}

/// Quote a redeem: the input-asset amount a derivative holding is worth
/// right now, and the floor the transaction will insist on after
/// slippage.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RedeemQuote {
    pub expected: Balance,
    pub weighted_min: Balance,
}

pub(crate) fn quote_redeem(
    rate: &ExchangeRate,
    derivative_amount: Balance,
    min_amount_bps: u32,
) -> RedeemQuote {
    let expected = rate.derivative_to_input(derivative_amount);
    RedeemQuote {
        expected,
        weighted_min: apply_slippage_bps(expected, min_amount_bps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_quote_applies_the_floor() {
        let rate = ExchangeRate {
            numerator: 110,
            denominator: 100,
        };
        let quote = quote_redeem(&rate, 1_000, 9_800);
        assert_eq!(quote.expected, 1_100);
        assert_eq!(quote.weighted_min, 1_078);
    }

    #[test]
    fn per_integration_bps_override() {
        let rate = ExchangeRate {
            numerator: 1,
            denominator: 1,
        };
        assert_eq!(quote_redeem(&rate, 10_000, 9_900).weighted_min, 9_900);
        assert_eq!(quote_redeem(&rate, 10_000, 9_800).weighted_min, 9_800);
    }
}

//! Rate and amount arithmetic shared by planners and handlers.

use crate::types::Balance;

/// Milliseconds per year (accounting for leap years).
pub const MS_PER_YEAR: f64 = 365.24219 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Default slippage tolerance for derivative redeems, in basis points.
pub const DEFAULT_MIN_AMOUNT_BPS: u32 = 9_800;

/// Convert a per-period rate to a yearly compounded rate.
///
/// `APY = (1 + periodRate)^periodsPerYear - 1`
pub fn apr_to_apy(period_rate: f64, period_ms: u64) -> f64 {
    if period_ms == 0 {
        return 0.0;
    }
    let periods_in_year = MS_PER_YEAR / period_ms as f64;
    (1.0 + period_rate).powf(periods_in_year) - 1.0
}

/// Reward-per-era APY given the era reward and the amount invested.
pub fn era_apy(era_reward: Balance, invested: Balance, era_duration_ms: u64) -> f64 {
    if invested == 0 {
        return 0.0;
    }
    apr_to_apy(era_reward as f64 / invested as f64, era_duration_ms)
}

/// Compound a simple annual rate at the chain's payout period.
pub fn annual_apr_to_apy(apr: f64, period_ms: u64) -> f64 {
    if period_ms == 0 {
        return apr;
    }
    apr_to_apy(apr * period_ms as f64 / MS_PER_YEAR, period_ms)
}

/// `floor(a * numerator / denominator)` without intermediate overflow for
/// realistic chain values.
pub fn mul_div(amount: Balance, numerator: Balance, denominator: Balance) -> Balance {
    if denominator == 0 {
        return 0;
    }
    match amount.checked_mul(numerator) {
        Some(product) => product / denominator,
        None => {
            let whole = (amount / denominator) * numerator;
            let rest = ((amount % denominator) * numerator) / denominator;
            whole + rest
        }
    }
}

/// Apply a slippage tolerance expressed in basis points:
/// `weightedMinAmount = floor(bps/10_000 * quoted)`.
///
/// Basis points keep the floor exact; a binary float coefficient can land
/// one unit short of the intended product.
pub fn apply_slippage_bps(quoted: Balance, bps: u32) -> Balance {
    mul_div(quoted, bps as Balance, 10_000)
}

/// Amount the XCM top-up step must deliver: the local shortfall plus the
/// cross-chain fee, which the origin chain withholds exactly once.
pub fn xcm_required(amount: Balance, local_balance: Balance, xcm_fee: Balance) -> Balance {
    amount.saturating_sub(local_balance).saturating_add(xcm_fee)
}

/// Largest join amount the two balances can fund through an XCM top-up.
pub fn max_enterable(local_balance: Balance, alt_balance: Balance, xcm_fee: Balance) -> Balance {
    local_balance.saturating_add(alt_balance.saturating_sub(xcm_fee))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn apy_zero_invested() {
        assert_eq!(era_apy(1_000, 0, 86_400_000), 0.0);
    }

    #[test]
    fn apy_daily_compounding() {
        // 0.1% reward per day compounds to about 44% a year.
        let apy = era_apy(10, 10_000, 86_400_000);
        assert_relative_eq!(apy, 0.4409, epsilon = 1e-3);
    }

    #[test]
    fn annual_rate_compounds_above_itself() {
        let apy = annual_apr_to_apy(0.10, 86_400_000);
        assert!(apy > 0.10);
        assert_relative_eq!(apy, 0.1051, epsilon = 1e-3);
        assert_eq!(annual_apr_to_apy(0.10, 0), 0.10);
    }

    #[test]
    fn slippage_floor_is_exact() {
        assert_eq!(apply_slippage_bps(1_000, 9_800), 980);
        assert_eq!(apply_slippage_bps(1_000, 9_900), 990);
        assert_eq!(apply_slippage_bps(3, 9_800), 2);
        assert_eq!(apply_slippage_bps(0, 9_800), 0);
    }

    #[test]
    fn mul_div_survives_large_amounts() {
        let huge = u128::MAX / 2;
        // (huge / 4) * 3 computed without overflowing the product
        assert_eq!(mul_div(huge, 3, 4), huge / 4 * 3 + (huge % 4) * 3 / 4);
        assert_eq!(mul_div(10, 1, 0), 0);
    }

    #[test]
    fn xcm_fee_applied_once() {
        // 100 requested, 30 local: the top-up carries 70 + fee, no more.
        assert_eq!(xcm_required(100, 30, 5), 75);
        assert_eq!(xcm_required(100, 100, 5), 5);
        assert_eq!(xcm_required(100, 150, 5), 5);
    }

    #[test]
    fn max_enterable_accounts_for_fee() {
        assert_eq!(max_enterable(30, 80, 5), 105);
        assert_eq!(max_enterable(30, 3, 5), 30);
    }
}

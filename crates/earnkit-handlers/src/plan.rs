//! Step-plan construction.
//!
//! Planning is read-only: it sizes an optional cross-chain top-up,
//! detects a missing token allowance, and estimates fees. A
//! network-shaped failure anywhere degrades to a DEFAULT + SUBMIT
//! skeleton tagged with the unreachable chain, so callers can prompt to
//! enable that chain instead of failing opaquely.

use earnkit_core::error::EarningError;
use earnkit_core::rates::xcm_required;
use earnkit_core::steps::{OptimalYieldPath, YieldStepType, YieldTokenBaseInfo};
use earnkit_core::JoinRequest;

use crate::handler::YieldPoolHandler;

/// Build the join plan for `req`.
pub async fn build_join_path<H>(
    handler: &H,
    req: &JoinRequest,
) -> Result<OptimalYieldPath, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    match try_build(handler, req).await {
        Ok(path) => Ok(path),
        Err(e) if e.is_network_shaped() => {
            let chain = match &e {
                EarningError::ConnectionError { chain } => chain.clone(),
                _ => handler.chain().to_string(),
            };
            tracing::warn!(
                slug = handler.slug(),
                chain,
                "planning degraded to fallback path: {e}"
            );
            Ok(fallback_path(handler, chain))
        }
        Err(e) => Err(e),
    }
}

async fn try_build<H>(handler: &H, req: &JoinRequest) -> Result<OptimalYieldPath, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    let ctx = handler.context();
    let mut builder = OptimalYieldPath::builder();
    builder.push(
        YieldStepType::Default,
        YieldTokenBaseInfo::new(entry.input_asset.clone(), 0),
    );

    // Cross-chain top-up when the local input balance falls short.
    let local = ctx
        .balances
        .transferable(&req.address, &entry.chain, &entry.input_asset)
        .await?;
    if local < req.amount {
        for alt in &entry.alt_input_assets {
            let alt_balance = ctx
                .balances
                .transferable(&req.address, &alt.chain, &alt.slug)
                .await?;
            if alt_balance == 0 {
                continue;
            }
            let shortfall = xcm_required(req.amount, local, 0);
            let xcm_fee = ctx
                .xcm
                .estimate_fee(&alt.chain, &entry.chain, &alt.slug, shortfall)
                .await?;
            builder.push_with_metadata(
                YieldStepType::Xcm,
                YieldTokenBaseInfo::new(alt.slug.clone(), xcm_fee),
                serde_json::json!({
                    "origin_chain": alt.chain,
                    "delivered_amount": xcm_required(req.amount, local, xcm_fee).to_string(),
                }),
            );
            break;
        }
    }

    // Allowance grant on EVM chains with a declared spender.
    if entry.evm {
        if let (Some(spender), Some(token)) = (&entry.approval_spender, &entry.token_contract) {
            let allowance = ctx
                .evm
                .allowance(&entry.chain, &req.address, spender, token)
                .await?;
            if allowance == 0 {
                let approval = ctx
                    .evm
                    .build_approval(&entry.chain, spender, token, req.amount)
                    .await?;
                let gas = ctx.evm.estimate_gas_fee(&entry.chain, &approval).await?;
                builder.push_with_metadata(
                    YieldStepType::TokenApproval,
                    YieldTokenBaseInfo::new(entry.fee_asset.clone(), gas),
                    serde_json::json!({ "spender": spender, "token": token }),
                );
            }
        }
    }

    let submit_fee = handler.estimate_submit_fee(req).await?;
    builder.push(handler.submit_step_type(), submit_fee);
    Ok(builder.build())
}

/// The best-effort path returned when a required chain is unreachable:
/// the submit step still exists so the caller can show what the join
/// would look like.
fn fallback_path<H>(handler: &H, unreachable_chain: String) -> OptimalYieldPath
where
    H: YieldPoolHandler + ?Sized,
{
    let input = handler.entry().input_asset.clone();
    let mut builder = OptimalYieldPath::builder();
    builder
        .push(YieldStepType::Default, YieldTokenBaseInfo::new(input.clone(), 0))
        .push(handler.submit_step_type(), YieldTokenBaseInfo::new(input, 0))
        .connection_error(unreachable_chain);
    builder.build()
}

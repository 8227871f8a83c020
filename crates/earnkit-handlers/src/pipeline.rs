//! Plan-wide validation and step-indexed execution.
//!
//! Validation runs once over the entire plan before any step is
//! submitted; the first failing step aborts the walk. Execution is
//! driven by the caller one step at a time and recomputes amounts from
//! live balances rather than trusting stale plan data.

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::rates::{max_enterable, xcm_required};
use earnkit_core::steps::{OptimalYieldPath, YieldStepType};
use earnkit_core::types::AltAsset;
use earnkit_core::{JoinRequest, StepExecutionResult};

use crate::handler::YieldPoolHandler;

/// Walk the plan in order, returning the first step's issues.
pub async fn validate_plan<H>(
    handler: &H,
    req: &JoinRequest,
    path: &OptimalYieldPath,
) -> Result<Vec<ValidationIssue>, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    path.check_shape().map_err(EarningError::InvalidData)?;

    for (index, step) in path.steps.iter().enumerate() {
        let issues = match step.step_type {
            YieldStepType::Default => continue,
            YieldStepType::Xcm => validate_xcm_step(handler, req, path, index).await?,
            YieldStepType::TokenApproval => handler.validate_token_approval(req).await?,
            _ => validate_submit_step(handler, req, path, index).await?,
        };
        if !issues.is_empty() {
            return Ok(issues);
        }
    }
    Ok(Vec::new())
}

/// Execute one step of a validated plan.
pub async fn execute_step<H>(
    handler: &H,
    req: &JoinRequest,
    path: &OptimalYieldPath,
    current_step: usize,
) -> Result<StepExecutionResult, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let step = path.steps.get(current_step).ok_or_else(|| {
        EarningError::InvalidData(format!("step {current_step} is out of range"))
    })?;
    match step.step_type {
        YieldStepType::Default => Err(EarningError::InvalidData(
            "the placeholder step is never executed directly".to_string(),
        )),
        YieldStepType::TokenApproval => handler.build_token_approval(req).await,
        YieldStepType::Xcm => handler.build_xcm_step(req, path, current_step).await,
        _ => handler.build_submit(req).await,
    }
}

/// Resolve which alternative asset an XCM step draws from, by its fee
/// entry.
fn xcm_alt_asset<'a, H>(
    handler: &'a H,
    path: &OptimalYieldPath,
    index: usize,
) -> Result<&'a AltAsset, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let fee = path
        .fee_of(index)
        .ok_or_else(|| EarningError::InvalidData(format!("no fee entry for step {index}")))?;
    handler
        .entry()
        .alt_input_assets
        .iter()
        .find(|alt| alt.slug == fee.slug)
        .ok_or_else(|| {
            EarningError::InvalidData(format!(
                "XCM step fee asset {} is not a configured alternative",
                fee.slug
            ))
        })
}

async fn validate_xcm_step<H>(
    handler: &H,
    req: &JoinRequest,
    path: &OptimalYieldPath,
    index: usize,
) -> Result<Vec<ValidationIssue>, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    let ctx = handler.context();
    let alt = xcm_alt_asset(handler, path, index)?;
    let xcm_fee = path.fee_of(index).map(|f| f.amount).unwrap_or(0);

    let local = ctx
        .balances
        .transferable(&req.address, &entry.chain, &entry.input_asset)
        .await?;
    let alt_balance = ctx
        .balances
        .transferable(&req.address, &alt.chain, &alt.slug)
        .await?;

    let required = xcm_required(req.amount, local, xcm_fee);
    if alt_balance < required {
        let ceiling = max_enterable(local, alt_balance, xcm_fee);
        return Ok(vec![ValidationIssue::amount_exceeds_balance(
            ceiling,
            &entry.symbol,
        )]);
    }
    Ok(Vec::new())
}

async fn validate_submit_step<H>(
    handler: &H,
    req: &JoinRequest,
    path: &OptimalYieldPath,
    index: usize,
) -> Result<Vec<ValidationIssue>, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    let ctx = handler.context();

    // Fee balance must survive the fee without dipping below the asset's
    // minimum-balance floor.
    if let Some(fee) = path.fee_of(index) {
        if fee.amount > 0 {
            let fee_balance = ctx
                .balances
                .transferable(&req.address, &entry.chain, &fee.slug)
                .await?;
            let floor = ctx.balances.min_balance(&entry.chain, &fee.slug).await?;
            if fee_balance < fee.amount.saturating_add(floor) {
                return Ok(vec![ValidationIssue::not_enough_fee_balance(&fee.slug)]);
            }
        }
    }

    let min_join = handler.min_join_amount().await?;
    if req.amount < min_join {
        return Ok(vec![ValidationIssue::not_enough_min_stake(
            min_join,
            &entry.symbol,
        )]);
    }

    handler.validate_submit(req).await
}

/// Default XCM transfer builder: sizes the delivery from live balances
/// and a fresh fee estimate, then delegates to the external builder.
pub async fn build_xcm_transfer<H>(
    handler: &H,
    req: &JoinRequest,
    path: &OptimalYieldPath,
    current_step: usize,
) -> Result<StepExecutionResult, EarningError>
where
    H: YieldPoolHandler + ?Sized,
{
    let entry = handler.entry();
    let ctx = handler.context();
    let alt = xcm_alt_asset(handler, path, current_step)?;

    let local = ctx
        .balances
        .transferable(&req.address, &entry.chain, &entry.input_asset)
        .await?;
    let shortfall = xcm_required(req.amount, local, 0);
    let fee = ctx
        .xcm
        .estimate_fee(&alt.chain, &entry.chain, &alt.slug, shortfall)
        .await?;
    let delivered = xcm_required(req.amount, local, fee);

    let transaction = ctx
        .xcm
        .build_transfer(&alt.chain, &entry.chain, &alt.slug, delivered, &req.address)
        .await?;
    Ok(StepExecutionResult {
        transaction,
        transfer_native_amount: 0,
    })
}

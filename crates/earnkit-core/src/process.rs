//! Join-process state machine.
//!
//! The multi-step join flow is re-entrant: the caller submits one
//! transaction per step and comes back for the next. The process record
//! lives on the service side, keyed by a process id, and the stored step
//! index is authoritative; a caller-supplied index is only ever checked
//! against it.

use crate::actions::JoinRequest;
use crate::error::EarningError;
use crate::steps::OptimalYieldPath;

pub type ProcessId = u64;

/// Lifecycle of a join process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Idle,
    Validating,
    /// Step `n` is executing or awaiting on-chain confirmation.
    Submitting(usize),
    /// Step `n` confirmed; the next step may start.
    StepComplete(usize),
    /// Step `n` failed; the user may retry the same step.
    Failed(usize),
    Done,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Done)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::Idle => "Idle",
            ProcessState::Validating => "Validating",
            ProcessState::Submitting(_) => "Submitting",
            ProcessState::StepComplete(_) => "Step complete",
            ProcessState::Failed(_) => "Failed",
            ProcessState::Done => "Done",
        }
    }
}

/// One in-flight join, bound to the validated request and its path.
#[derive(Debug, Clone)]
pub struct JoinProcess {
    pub id: ProcessId,
    pub request: JoinRequest,
    pub path: OptimalYieldPath,
    state: ProcessState,
}

impl JoinProcess {
    /// A process starts in `Validating`: it only exists once plan-wide
    /// validation has been requested.
    pub fn new(id: ProcessId, request: JoinRequest, path: OptimalYieldPath) -> Self {
        Self {
            id,
            request,
            path,
            state: ProcessState::Validating,
        }
    }

    pub fn slug(&self) -> &str {
        &self.request.slug
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Step the process expects to execute next, if any.
    pub fn current_step(&self) -> Option<usize> {
        match self.state {
            ProcessState::Validating => Some(self.path.first_executable_step()),
            ProcessState::Submitting(step) | ProcessState::Failed(step) => Some(step),
            ProcessState::StepComplete(step) => {
                let next = step + 1;
                (next < self.path.steps.len()).then_some(next)
            }
            ProcessState::Idle | ProcessState::Done => None,
        }
    }

    /// Claim `step` for execution. The caller's index must agree with the
    /// stored state.
    pub fn begin_step(&mut self, step: usize) -> Result<(), EarningError> {
        let expected = self.current_step().ok_or_else(|| {
            EarningError::InvalidData(format!("process {} has no step to execute", self.id))
        })?;
        if step != expected {
            return Err(EarningError::InvalidData(format!(
                "process {} expects step {expected}, caller supplied {step}",
                self.id
            )));
        }
        self.state = ProcessState::Submitting(step);
        Ok(())
    }

    /// Record on-chain confirmation of the submitting step.
    pub fn complete_step(&mut self) -> Result<(), EarningError> {
        let ProcessState::Submitting(step) = self.state else {
            return Err(EarningError::InvalidData(format!(
                "process {} is not submitting",
                self.id
            )));
        };
        self.state = if step + 1 >= self.path.steps.len() {
            ProcessState::Done
        } else {
            ProcessState::StepComplete(step)
        };
        Ok(())
    }

    /// Record a step failure. A user rejection before anything reached
    /// the chain rolls the whole process back to `Idle`; any other
    /// failure holds the step for a user-driven retry. Steps already
    /// confirmed on-chain are never reversed.
    pub fn fail_step(&mut self, user_rejected: bool) -> Result<(), EarningError> {
        let ProcessState::Submitting(step) = self.state else {
            return Err(EarningError::InvalidData(format!(
                "process {} is not submitting",
                self.id
            )));
        };
        self.state = if user_rejected && step == self.path.first_executable_step() {
            ProcessState::Idle
        } else {
            ProcessState::Failed(step)
        };
        Ok(())
    }
}

/// Per-step state machine of the phase-change convergence loop.
///
/// A step starts in `Init`. Settling an externally solved air state walks through the trial
/// states to `Check`; from there the step either loops back to `Trial` after a reset or is
/// committed via `Converged`, which hands over to the next step's `Init`.
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum PcmLoopState {
    Init,
    Trial,
    SurfaceTempTrial,
    WallTrial,
    Check,
    Converged,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Invalid PCM loop transition from {from} to {to}")]
pub struct InvalidTransitionError {
    from: PcmLoopState,
    to: PcmLoopState,
}

/// Result of settling a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Phase-change properties moved; nothing was committed and the caller should refresh the
    /// coefficients and solve again
    Reset { resets: u32 },
    /// The step was committed after this many settle passes
    Converged { iterations: u32 },
}

#[derive(Clone, Debug)]
pub struct PcmConvergenceController {
    state: PcmLoopState,
    /// resets flagged by the latest check
    resets: u32,
    /// settle passes in the current step
    iterations: u32,
}

impl Default for PcmConvergenceController {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmConvergenceController {
    pub fn new() -> Self {
        Self {
            state: PcmLoopState::Init,
            resets: 0,
            iterations: 0,
        }
    }

    pub fn state(&self) -> PcmLoopState {
        self.state
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn is_allowed(from: PcmLoopState, to: PcmLoopState) -> bool {
        use PcmLoopState::*;
        matches!(
            (from, to),
            (Init, Trial)
                | (Trial, SurfaceTempTrial)
                | (SurfaceTempTrial, WallTrial)
                | (WallTrial, Check)
                | (Check, Trial)
                | (Check, Converged)
                | (Converged, Init)
        )
    }

    pub fn transition(&mut self, to: PcmLoopState) -> Result<(), InvalidTransitionError> {
        if !Self::is_allowed(self.state, to) {
            return Err(InvalidTransitionError {
                from: self.state,
                to,
            });
        }
        if to == PcmLoopState::Trial {
            self.iterations += 1;
        }
        self.state = to;
        Ok(())
    }

    /// Coefficients may be refreshed before the first trial of a step or after a reset.
    pub fn can_update_coefficients(&self) -> bool {
        matches!(self.state, PcmLoopState::Init | PcmLoopState::Check)
    }

    /// Record the resets found by a check and decide the outcome. A converged check moves on
    /// to `Converged`; the caller commits and then calls `finish_step`.
    pub fn record_check(&mut self, resets: u32) -> Result<StepOutcome, InvalidTransitionError> {
        if self.state != PcmLoopState::Check {
            return Err(InvalidTransitionError {
                from: self.state,
                to: PcmLoopState::Check,
            });
        }
        self.resets = resets;
        if resets > 0 {
            return Ok(StepOutcome::Reset { resets });
        }
        self.transition(PcmLoopState::Converged)?;
        Ok(StepOutcome::Converged {
            iterations: self.iterations,
        })
    }

    /// Accept the latest trial even though it flagged resets.
    pub fn force_converged(&mut self) -> Result<u32, InvalidTransitionError> {
        self.transition(PcmLoopState::Converged)?;
        Ok(self.iterations)
    }

    pub fn finish_step(&mut self) -> Result<(), InvalidTransitionError> {
        self.transition(PcmLoopState::Init)?;
        self.resets = 0;
        self.iterations = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn walk_to_check(controller: &mut PcmConvergenceController) {
        for state in [
            PcmLoopState::Trial,
            PcmLoopState::SurfaceTempTrial,
            PcmLoopState::WallTrial,
            PcmLoopState::Check,
        ] {
            controller.transition(state).unwrap();
        }
    }

    #[rstest]
    fn test_reset_then_converge() {
        let mut controller = PcmConvergenceController::new();
        assert!(controller.can_update_coefficients());

        walk_to_check(&mut controller);
        assert_eq!(
            controller.record_check(2).unwrap(),
            StepOutcome::Reset { resets: 2 }
        );
        assert_eq!(controller.state(), PcmLoopState::Check);
        assert!(controller.can_update_coefficients());

        controller.transition(PcmLoopState::Trial).unwrap();
        assert!(!controller.can_update_coefficients());
        for state in [
            PcmLoopState::SurfaceTempTrial,
            PcmLoopState::WallTrial,
            PcmLoopState::Check,
        ] {
            controller.transition(state).unwrap();
        }
        assert_eq!(
            controller.record_check(0).unwrap(),
            StepOutcome::Converged { iterations: 2 }
        );

        controller.finish_step().unwrap();
        assert_eq!(controller.state(), PcmLoopState::Init);
        assert_eq!(controller.iterations(), 0);
        assert_eq!(controller.resets(), 0);
    }

    #[rstest]
    #[case(PcmLoopState::Init, PcmLoopState::Check)]
    #[case(PcmLoopState::Trial, PcmLoopState::WallTrial)]
    #[case(PcmLoopState::WallTrial, PcmLoopState::Converged)]
    #[case(PcmLoopState::Converged, PcmLoopState::Trial)]
    #[case(PcmLoopState::Check, PcmLoopState::Init)]
    fn test_rejects_invalid_transitions(#[case] from: PcmLoopState, #[case] to: PcmLoopState) {
        assert!(!PcmConvergenceController::is_allowed(from, to));
    }

    #[rstest]
    fn test_force_converged_only_from_check() {
        let mut controller = PcmConvergenceController::new();
        assert!(controller.force_converged().is_err());

        walk_to_check(&mut controller);
        controller.record_check(1).unwrap();
        assert_eq!(controller.force_converged().unwrap(), 1);
    }
}

//! Rollout state machine.
//!
//! Manual transitions are checked against a fixed table. The controller's
//! own reactions move strategies along a separate set of internal edges
//! (warmup completion and escape) that callers cannot request.

use flowgate_state::RolloutState;

use crate::error::{RolloutError, RolloutResult};

use RolloutState::*;

/// Targets a caller may request from `from`.
pub fn allowed_targets(from: RolloutState) -> &'static [RolloutState] {
    match from {
        Init => &[Warmup],
        Warmup | Monitor | Adaptive => &[ForcedEscaped, ForcedCompleted],
        Completed | ForcedEscaped | ForcedCompleted => &[Init],
        Escaped => &[],
    }
}

/// Targets the controller itself may move `from` to.
pub fn internal_targets(from: RolloutState) -> &'static [RolloutState] {
    match from {
        Warmup => &[Adaptive, Escaped],
        Adaptive => &[Escaped],
        _ => &[],
    }
}

pub fn check_transition(from: RolloutState, to: RolloutState) -> RolloutResult<()> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(RolloutError::TransitionNotAllowed { from, to })
    }
}

/// Guard for the controller's own moves.
pub fn check_internal_transition(from: RolloutState, to: RolloutState) -> RolloutResult<()> {
    if internal_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(RolloutError::TransitionNotAllowed { from, to })
    }
}

/// Configuration may only change before activation.
pub fn is_editable(state: RolloutState) -> bool {
    state == Init
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_documented_edges() {
        assert!(check_transition(Init, Warmup).is_ok());
        assert!(check_transition(Warmup, ForcedEscaped).is_ok());
        assert!(check_transition(Adaptive, ForcedCompleted).is_ok());
        assert!(check_transition(Monitor, ForcedEscaped).is_ok());
        assert!(check_transition(ForcedEscaped, Init).is_ok());
        assert!(check_transition(Completed, Init).is_ok());

        assert!(check_transition(Init, Adaptive).is_err());
        assert!(check_transition(Warmup, Adaptive).is_err());
        assert!(check_transition(Escaped, Init).is_err());
        assert!(check_transition(Adaptive, Escaped).is_err());
    }

    #[test]
    fn every_pair_is_decided_by_the_table() {
        let mut allowed = 0;
        for from in RolloutState::ALL {
            for to in RolloutState::ALL {
                match check_transition(from, to) {
                    Ok(()) => allowed += 1,
                    Err(e) => assert_eq!(e.code(), "transition-not-allowed"),
                }
            }
        }
        assert_eq!(allowed, 1 + 2 * 3 + 3);
    }

    #[test]
    fn internal_edges_cover_completion_and_escape_only() {
        assert!(check_internal_transition(Warmup, Adaptive).is_ok());
        assert!(check_internal_transition(Warmup, Escaped).is_ok());
        assert!(check_internal_transition(Adaptive, Escaped).is_ok());

        assert!(check_internal_transition(Init, Adaptive).is_err());
        assert!(check_internal_transition(Adaptive, Warmup).is_err());
        assert!(check_internal_transition(Escaped, Escaped).is_err());
        assert!(check_internal_transition(ForcedCompleted, Escaped).is_err());
    }

    #[test]
    fn manual_targets_stay_inside_the_state_set() {
        for from in RolloutState::ALL {
            for to in allowed_targets(from).iter().chain(internal_targets(from)) {
                assert!(RolloutState::ALL.contains(to));
                assert_ne!(from, *to);
            }
        }
    }

    #[test]
    fn only_init_is_editable() {
        let editable: Vec<_> = RolloutState::ALL.into_iter().filter(|s| is_editable(*s)).collect();
        assert_eq!(editable, vec![Init]);
    }
}

//! Rollout configuration rules: validation, warmup targets, rollback.

use std::collections::{HashMap, HashSet};

use flowgate_state::{EscapePhase, EscapeRule, Flow, FlowGoal, RolloutConfiguration, WarmupPhase};

use crate::converge::round2;

const PCT_EPSILON: f64 = 1e-9;

/// Check a configuration against the flows of its use case. Returns the
/// reason of the first violation.
pub fn validate(config: &RolloutConfiguration, flows: &[Flow]) -> Result<(), String> {
    let known: HashSet<&str> = flows.iter().map(|f| f.id.as_str()).collect();

    if let Some(warmup) = &config.warmup {
        validate_warmup(warmup, &known)?;
    }
    if let Some(escape) = &config.escape {
        validate_escape(escape, &known)?;
    }

    let adaptive = &config.adaptive;
    if !(adaptive.max_step_pct > 0.0 && adaptive.max_step_pct <= 100.0) {
        return Err(format!("adaptive.max_step_pct must be in (0, 100], got {}", adaptive.max_step_pct));
    }
    if adaptive.interval_mins == 0 {
        return Err("adaptive.interval_mins must be positive".into());
    }
    Ok(())
}

fn validate_warmup(warmup: &WarmupPhase, known: &HashSet<&str>) -> Result<(), String> {
    match (warmup.interval_mins, warmup.interval_session_reqs) {
        (Some(_), Some(_)) => {
            return Err("warmup.interval_mins and warmup.interval_session_reqs are mutually exclusive".into());
        }
        (None, None) => {
            return Err("warmup needs interval_mins or interval_session_reqs".into());
        }
        (Some(0), None) | (None, Some(0)) => return Err("warmup interval must be positive".into()),
        _ => {}
    }
    validate_goals("warmup.goals", &warmup.goals, known)?;
    let total: f64 = warmup.goals.iter().map(|g| g.final_serve_pct).sum();
    if total > 100.0 + PCT_EPSILON {
        return Err(format!("warmup goals sum to {total}, above 100"));
    }
    Ok(())
}

fn validate_escape(escape: &EscapePhase, known: &HashSet<&str>) -> Result<(), String> {
    for (i, rule) in escape.rules.iter().enumerate() {
        if !known.contains(rule.flow_id.as_str()) {
            return Err(format!("escape rule {i} references unknown flow {}", rule.flow_id));
        }
        if !rule.lower_score.is_finite() {
            return Err(format!("escape rule {i} has a non-finite lower_score"));
        }
        validate_goals(&format!("escape rule {i} rollback"), &rule.rollback, known)?;
    }
    Ok(())
}

fn validate_goals(context: &str, goals: &[FlowGoal], known: &HashSet<&str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for goal in goals {
        if !known.contains(goal.flow_id.as_str()) {
            return Err(format!("{context}: unknown flow {}", goal.flow_id));
        }
        if !seen.insert(goal.flow_id.as_str()) {
            return Err(format!("{context}: more than one goal for flow {}", goal.flow_id));
        }
        if !(0.0..=100.0).contains(&goal.final_serve_pct) {
            return Err(format!(
                "{context}: percentage {} for flow {} is outside 0..=100",
                goal.final_serve_pct, goal.flow_id
            ));
        }
    }
    Ok(())
}

/// Target percentage of every active flow at the end of warmup.
///
/// Flows with a goal take it; the others split what is left of 100 evenly.
pub fn warmup_targets(warmup: &WarmupPhase, active: &[Flow]) -> HashMap<String, f64> {
    let goals: HashMap<&str, f64> = warmup
        .goals
        .iter()
        .map(|g| (g.flow_id.as_str(), g.final_serve_pct))
        .collect();
    let unassigned = active.iter().filter(|f| !goals.contains_key(f.id.as_str())).count();
    let remainder = (100.0 - warmup.goals.iter().map(|g| g.final_serve_pct).sum::<f64>()).max(0.0);
    let share = if unassigned > 0 {
        round2(remainder / unassigned as f64)
    } else {
        0.0
    };

    active
        .iter()
        .map(|f| {
            let target = goals.get(f.id.as_str()).copied().unwrap_or(share);
            (f.id.clone(), target)
        })
        .collect()
}

/// Percentage of every active flow after applying `rule`'s rollback;
/// unlisted flows drop to zero.
pub fn rollback_targets(rule: &EscapeRule, active: &[Flow]) -> HashMap<String, f64> {
    active
        .iter()
        .map(|f| {
            let pct = rule
                .rollback
                .iter()
                .find(|g| g.flow_id == f.id)
                .map_or(0.0, |g| g.final_serve_pct);
            (f.id.clone(), pct)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_state::AdaptivePhase;

    fn flow(id: &str) -> Flow {
        Flow {
            id: id.to_string(),
            use_case_id: "uc1".into(),
            name: id.to_string(),
            active: true,
            fallback: false,
            current_serve_pct: 0.0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn goal(flow_id: &str, pct: f64) -> FlowGoal {
        FlowGoal {
            flow_id: flow_id.to_string(),
            final_serve_pct: pct,
        }
    }

    fn warmup(goals: Vec<FlowGoal>) -> WarmupPhase {
        WarmupPhase {
            interval_mins: None,
            interval_session_reqs: Some(100),
            goals,
        }
    }

    fn config(warmup: Option<WarmupPhase>) -> RolloutConfiguration {
        RolloutConfiguration {
            warmup,
            escape: None,
            adaptive: AdaptivePhase::default(),
        }
    }

    #[test]
    fn accepts_a_well_formed_configuration() {
        let flows = [flow("a"), flow("b")];
        let mut cfg = config(Some(warmup(vec![goal("a", 80.0), goal("b", 20.0)])));
        cfg.escape = Some(EscapePhase {
            rules: vec![EscapeRule {
                flow_id: "b".into(),
                min_feedback: 5,
                lower_score: 2.5,
                rollback: vec![goal("a", 100.0)],
            }],
        });
        assert_eq!(validate(&cfg, &flows), Ok(()));
    }

    #[test]
    fn warmup_interval_must_be_exactly_one() {
        let flows = [flow("a")];
        let mut both = warmup(vec![]);
        both.interval_mins = Some(5);
        assert!(validate(&config(Some(both)), &flows).unwrap_err().contains("mutually exclusive"));

        let mut neither = warmup(vec![]);
        neither.interval_session_reqs = None;
        assert!(validate(&config(Some(neither)), &flows).is_err());
    }

    #[test]
    fn goal_rules_are_enforced() {
        let flows = [flow("a"), flow("b")];
        let over = config(Some(warmup(vec![goal("a", 70.0), goal("b", 40.0)])));
        assert!(validate(&over, &flows).unwrap_err().contains("above 100"));

        let dup = config(Some(warmup(vec![goal("a", 10.0), goal("a", 20.0)])));
        assert!(validate(&dup, &flows).unwrap_err().contains("more than one goal"));

        let unknown = config(Some(warmup(vec![goal("zz", 10.0)])));
        assert!(validate(&unknown, &flows).unwrap_err().contains("unknown flow"));
    }

    #[test]
    fn adaptive_bounds_are_checked() {
        let mut cfg = config(None);
        cfg.adaptive.max_step_pct = 0.0;
        assert!(validate(&cfg, &[]).is_err());
        cfg.adaptive.max_step_pct = 5.0;
        cfg.adaptive.interval_mins = 0;
        assert!(validate(&cfg, &[]).is_err());
    }

    #[test]
    fn flows_without_goal_split_the_remainder() {
        let flows = [flow("a"), flow("b"), flow("c"), flow("d")];
        let targets = warmup_targets(&warmup(vec![goal("a", 40.0)]), &flows);
        assert_eq!(targets["a"], 40.0);
        assert_eq!(targets["b"], 20.0);
        assert_eq!(targets["c"], 20.0);
        assert_eq!(targets["d"], 20.0);

        let uneven = warmup_targets(&warmup(vec![]), &flows[..3]);
        assert_eq!(uneven["a"], 33.33);
    }

    #[test]
    fn rollback_zeroes_unlisted_flows() {
        let rule = EscapeRule {
            flow_id: "b".into(),
            min_feedback: 1,
            lower_score: 1.0,
            rollback: vec![goal("a", 20.0)],
        };
        let targets = rollback_targets(&rule, &[flow("a"), flow("b")]);
        assert_eq!(targets["a"], 20.0);
        assert_eq!(targets["b"], 0.0);
    }
}

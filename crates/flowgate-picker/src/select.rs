//! Weighted flow selection.

use rand::Rng;

use flowgate_state::Flow;

/// Pick one active flow with probability proportional to its
/// `current_serve_pct`.
///
/// The weights are not assumed to sum to 100: the draw is uniform over
/// `[0, total)` and the first flow whose cumulative weight exceeds it wins.
/// Returns `None` when no active flow carries positive weight.
pub fn select_weighted<'a, R: Rng + ?Sized>(flows: &'a [Flow], rng: &mut R) -> Option<&'a Flow> {
    let active: Vec<&Flow> = flows.iter().filter(|f| f.active).collect();
    let total: f64 = active.iter().map(|f| weight(f)).sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for flow in active {
        cumulative += weight(flow);
        if draw < cumulative {
            return Some(flow);
        }
    }
    None
}

fn weight(flow: &Flow) -> f64 {
    flow.current_serve_pct.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn flow(id: &str, pct: f64, active: bool) -> Flow {
        Flow {
            id: id.to_string(),
            use_case_id: "uc1".into(),
            name: id.to_string(),
            active,
            fallback: false,
            current_serve_pct: pct,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn selection_frequency_tracks_percentages() {
        let flows = vec![flow("a", 70.0, true), flow("b", 20.0, true), flow("c", 10.0, true)];
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            let picked = select_weighted(&flows, &mut rng).unwrap();
            let idx = flows.iter().position(|f| f.id == picked.id).unwrap();
            counts[idx] += 1;
        }
        for (count, expected) in counts.iter().zip([0.70, 0.20, 0.10]) {
            let share = *count as f64 / draws as f64;
            assert!((share - expected).abs() < 0.01, "share {share} vs {expected}");
        }
    }

    #[test]
    fn inactive_and_zero_weight_flows_are_never_picked() {
        let flows = vec![flow("off", 90.0, false), flow("zero", 0.0, true), flow("on", 10.0, true)];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert_eq!(select_weighted(&flows, &mut rng).unwrap().id, "on");
        }
    }

    #[test]
    fn drifted_totals_still_resolve() {
        let flows = vec![flow("a", 33.33, true), flow("b", 33.33, true), flow("c", 33.33, true)];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            assert!(select_weighted(&flows, &mut rng).is_some());
        }
    }

    #[test]
    fn totals_above_one_hundred_keep_their_ratio() {
        let flows = vec![flow("a", 33.33, true), flow("b", 77.78, true)];
        let mut rng = StdRng::seed_from_u64(9);
        let draws = 100_000;
        let picked_a = (0..draws)
            .filter(|_| select_weighted(&flows, &mut rng).unwrap().id == "a")
            .count();
        let share = picked_a as f64 / draws as f64;
        assert!((share - 0.3).abs() < 0.01, "share of a {share}");
    }

    #[test]
    fn no_positive_weight_yields_none() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(select_weighted(&[], &mut rng).is_none());
        assert!(select_weighted(&[flow("a", 0.0, true)], &mut rng).is_none());
        assert!(select_weighted(&[flow("a", 50.0, false)], &mut rng).is_none());
    }
}

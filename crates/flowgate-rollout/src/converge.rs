//! Percentage convergence.

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Move `current` one step toward `target`.
///
/// `done` already counts the step being applied, hence the `+ 1` in the
/// remaining-steps divisor. Once `done` reaches `total` the result snaps to
/// `target`.
pub fn converge(current: f64, target: f64, done: u64, total: u64) -> f64 {
    if current == target || done >= total {
        return target;
    }
    let delta = (target - current) / (total - done + 1) as f64;
    round2(current + delta)
}

//! Prefix Weight Builder (§4.3): a pure, deterministic schedule over
//! positions in a chunk. Kept free of any tensor dependency so it can be
//! unit-tested in isolation from `tch`/libtorch.

/// Which curve governs the transition from "fully guided" to "free" chunk
/// positions (§4.3, `--rtc.prefix_attention_schedule`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixAttentionSchedule {
    Zeros,
    Ones,
    Linear,
    Exp,
}

/// `linspace(a, b, n)`: `n` evenly spaced points from `a` to `b` inclusive,
/// matching `torch.linspace` semantics (including the `n <= 1` edge cases).
fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![a],
        _ => {
            let step = (b - a) / (n as f64 - 1.0);
            (0..n).map(|i| a + step * i as f64).collect()
        }
    }
}

/// The open transition ramp on `[start, end)`, linearly interpolated from
/// just below 1.0 to just above 0.0 (endpoints excluded).
fn lin_ramp(start: usize, end: usize, total: usize) -> Vec<f64> {
    let skip_steps_at_end = total.saturating_sub(end) as i64;
    let linspace_steps = total as i64 - skip_steps_at_end - start as i64;
    if end <= start || linspace_steps <= 0 {
        return Vec::new();
    }
    let full = linspace(1.0, 0.0, linspace_steps as usize + 2);
    full[1..full.len() - 1].to_vec()
}

fn add_trailing_zeros(mut w: Vec<f64>, total: usize, end: usize) -> Vec<f64> {
    let zeros_len = total as i64 - end as i64;
    if zeros_len <= 0 {
        return w;
    }
    w.extend(std::iter::repeat(0.0).take(zeros_len as usize));
    w
}

fn add_leading_ones(w: Vec<f64>, start: usize, total: usize) -> Vec<f64> {
    let ones_len = start.min(total);
    if ones_len == 0 {
        return w;
    }
    let mut out = vec![1.0; ones_len];
    out.extend(w);
    out
}

/// `weights(start, end, total, schedule)` (§4.3). `start` is clamped to
/// `min(start, end)` per the spec's signature note.
pub fn prefix_weights(
    start: usize,
    end: usize,
    total: usize,
    schedule: PrefixAttentionSchedule,
) -> Vec<f64> {
    let start = start.min(end);

    match schedule {
        PrefixAttentionSchedule::Zeros => {
            let mut w = vec![0.0; total];
            for slot in w.iter_mut().take(start.min(total)) {
                *slot = 1.0;
            }
            w
        }
        PrefixAttentionSchedule::Ones => {
            let mut w = vec![1.0; total];
            for slot in w.iter_mut().skip(end.min(total)) {
                *slot = 0.0;
            }
            w
        }
        PrefixAttentionSchedule::Linear => {
            let ramp = lin_ramp(start, end, total);
            let w = add_trailing_zeros(ramp, total, end);
            add_leading_ones(w, start, total)
        }
        PrefixAttentionSchedule::Exp => {
            let ramp: Vec<f64> = lin_ramp(start, end, total)
                .into_iter()
                .map(|r| r * (r.exp_m1()) / std::f64::consts::E.exp_m1())
                .collect();
            let w = add_trailing_zeros(ramp, total, end);
            add_leading_ones(w, start, total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len(), "length mismatch: {a:?} vs {b:?}");
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    /// §8-S1.
    #[test]
    fn s1_linear_schedule() {
        let w = prefix_weights(2, 6, 8, PrefixAttentionSchedule::Linear);
        approx_eq(&w, &[1.0, 1.0, 0.8, 0.6, 0.4, 0.2, 0.0, 0.0]);
    }

    /// §8-S2.
    #[test]
    fn s2_zeros_schedule() {
        let w = prefix_weights(3, 7, 10, PrefixAttentionSchedule::Zeros);
        approx_eq(&w, &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    /// P3: ZEROS sums to min(start, total).
    #[test]
    fn p3_zeros_sum() {
        for (start, total) in [(3usize, 10usize), (12, 10), (0, 10)] {
            let w = prefix_weights(start, start + 4, total, PrefixAttentionSchedule::Zeros);
            let sum: f64 = w.iter().sum();
            assert!((sum - start.min(total) as f64).abs() < 1e-9);
        }
    }

    /// P3: ONES sums to min(end, total).
    #[test]
    fn p3_ones_sum() {
        for (end, total) in [(7usize, 10usize), (15, 10), (0, 10)] {
            let w = prefix_weights(0, end, total, PrefixAttentionSchedule::Ones);
            let sum: f64 = w.iter().sum();
            assert!((sum - end.min(total) as f64).abs() < 1e-9);
        }
    }

    /// P3: LINEAR/EXP are 1.0 before start, 0.0 at/after end, strictly
    /// decreasing on the transition, and EXP <= LINEAR pointwise there.
    #[test]
    fn p3_linear_and_exp_shape() {
        let (start, end, total) = (2usize, 9usize, 12usize);
        let lin = prefix_weights(start, end, total, PrefixAttentionSchedule::Linear);
        let exp = prefix_weights(start, end, total, PrefixAttentionSchedule::Exp);

        for i in 0..start {
            assert_eq!(lin[i], 1.0);
            assert_eq!(exp[i], 1.0);
        }
        for i in end..total {
            assert_eq!(lin[i], 0.0);
            assert_eq!(exp[i], 0.0);
        }
        for window in lin[start..end].windows(2) {
            assert!(window[0] > window[1], "LINEAR must strictly decrease");
        }
        for (l, e) in lin[start..end].iter().zip(&exp[start..end]) {
            assert!(*e <= *l + 1e-12, "EXP must be <= LINEAR on the transition");
        }
    }

    /// Edge case: `end <= start` leaves no transition region.
    #[test]
    fn edge_empty_transition() {
        let w = prefix_weights(5, 5, 10, PrefixAttentionSchedule::Linear);
        approx_eq(&w, &[1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    /// Edge case: `total <= start` yields all-ones truncated to `total`.
    #[test]
    fn edge_total_le_start() {
        for schedule in [
            PrefixAttentionSchedule::Zeros,
            PrefixAttentionSchedule::Ones,
            PrefixAttentionSchedule::Linear,
            PrefixAttentionSchedule::Exp,
        ] {
            let w = prefix_weights(10, 12, 6, schedule);
            assert_eq!(w, vec![1.0; 6], "{schedule:?}");
        }
    }
}

//! Small sample statistics and the adaptive merge-acceptance window.

/// Arithmetic mean, or `0.0` for an empty sample.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation around `mean`, or `0.0` for an empty
/// sample.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn stddev(values: &[f32], mean: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / values.len() as f32).sqrt()
}

/// Mean and population standard deviation of `values`.
#[must_use]
pub fn mean_stddev(values: &[f32]) -> (f32, f32) {
    let m = mean(values);
    (m, stddev(values, m))
}

/// Successive differences with an implicit leading zero:
/// `[v0 - 0, v1 - v0, v2 - v1, ...]`.
#[must_use]
pub fn diffs(values: &[f32]) -> Vec<f32> {
    let mut prev = 0.0_f32;
    values
        .iter()
        .map(|&v| {
            let d = v - prev;
            prev = v;
            d
        })
        .collect()
}

/// Decide whether `current` is an acceptable next merge weight given the
/// history of accepted weights `weights`.
///
/// The window looks at the step from the last accepted weight to
/// `current` and rejects it only when that step is an upward outlier
/// compared to the steps already taken:
///
/// - one prior weight above `0.5` rejects outright, otherwise two or
///   fewer prior weights always accept;
/// - with three or more strictly positive steps, only the increasing
///   subsequence of weights (after the first) is considered;
/// - reject iff the steps vary (`stddev > 0.01`) and the new step is
///   positive and larger than `mean + 2 * stddev` of prior step sizes.
#[must_use]
pub fn pos_sample_within_bound(weights: &[f32], current: f32) -> bool {
    if weights.len() == 1 && weights[0] > 0.5 {
        return false;
    }
    if weights.len() <= 2 {
        return true;
    }

    let steps: Vec<f32> = diffs(weights)
        .into_iter()
        .skip(1)
        .filter(|d| *d != 0.0)
        .map(f32::abs)
        .collect();
    let positive_steps = diffs(weights)
        .into_iter()
        .skip(1)
        .filter(|d| *d > 0.0)
        .count();

    let (steps, last) = if positive_steps >= 3 {
        let mut increasing = Vec::new();
        let mut prev = weights[0];
        for &w in &weights[1..] {
            if w > prev {
                increasing.push(w);
                prev = w;
            }
        }
        let steps: Vec<f32> = diffs(&increasing).into_iter().skip(1).collect();
        (steps, increasing.last().copied().unwrap_or(weights[0]))
    } else {
        (steps, weights[weights.len() - 1])
    };

    let (step_mean, step_stddev) = mean_stddev(&steps);
    let upper = 2.0_f32.mul_add(step_stddev, step_mean);
    let delta = current - last;

    !(step_stddev > 0.01 && delta > 0.0 && delta > upper)
}

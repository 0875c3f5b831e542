use serde::Serialize;

/// Nearest-rank percentile of an ascending-sorted slice; `None` when empty.
pub fn nearest_rank(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = ((pct / 100.0) * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}

/// Distribution summary of one measured quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Summary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let pick = |p| nearest_rank(&sorted, p).unwrap_or_default();
        Self {
            count,
            mean: sorted.iter().sum::<f64>() / count as f64,
            p50: pick(50.0),
            p90: pick(90.0),
            p99: pick(99.0),
        }
    }
}

/// `num / den`, or 0 for an empty denominator.
pub fn rate(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// Unified inference engine.
//
// Three passes run under the heartbeat, in order: an ANOVA early-exit that
// bounds overhead on steady workloads, a binary-chop window-width tuner fed
// by speculative-prefetch accuracy, and an exponential decay-slope fit over
// the recent total-heat trajectory. Everything is integer-only Q48.16.

use std::collections::VecDeque;

use tracing::debug;

use crate::dict::Dictionary;
use crate::q48::Q48;

/// How many cycle samples the engine keeps for trend fitting.
pub const SAMPLE_HISTORY: usize = 8;

/// One heartbeat cycle's worth of observed metrics.
#[derive(Debug, Clone, Copy)]
pub struct CycleSample {
    pub ns: u64,
    /// Aggregate dictionary heat, raw Q48.16.
    pub total_heat_q48: u64,
    /// Variance of per-word heat units over the window sample.
    pub heat_variance_q48: u64,
}

/// Aggregated speculative-prefetch accuracy, the window tuner's input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineMetrics {
    pub prefetch_attempts: u64,
    pub prefetch_hits: u64,
    pub window_tuning_checks: u64,
    pub last_checked_window: usize,
    pub last_checked_accuracy: Q48,
    pub suggested_next_size: usize,
}

impl PipelineMetrics {
    pub fn accuracy(&self) -> Q48 {
        if self.prefetch_attempts == 0 {
            Q48::ZERO
        } else {
            Q48::from_ratio(self.prefetch_hits, self.prefetch_attempts)
        }
    }
}

/// What one inference pass decided; cached for the next ANOVA comparison and
/// applied to the knobs by the heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceOutputs {
    pub variance_stable: bool,
    pub window_suggestion: Option<usize>,
    pub fitted_slope_q48: Option<u64>,
    pub fit_confidence_q48: Q48,
    pub rebuild_cache: bool,
}

/// Variance of heat units across the words sampled by the window.
pub fn window_heat_variance(sample: &[u32], dict: &Dictionary) -> Q48 {
    if sample.is_empty() {
        return Q48::ZERO;
    }
    let heats: Vec<u64> = sample
        .iter()
        .filter_map(|id| dict.by_word_id(*id))
        .map(|idx| (dict.entry(idx).execution_heat >> 16).max(0) as u64)
        .collect();
    if heats.is_empty() {
        return Q48::ZERO;
    }
    let n = heats.len() as u64;
    let sum: u64 = heats.iter().sum();
    // E[x^2] - E[x]^2, all in Q48.
    let sum_sq: u128 = heats.iter().map(|h| (*h as u128) * (*h as u128)).sum();
    let mean = Q48::from_ratio(sum, n);
    let mean_sq = Q48((((sum_sq << 16) / n as u128).min(u64::MAX as u128)) as u64);
    mean_sq.saturating_sub(mean.mul(mean))
}

/// ANOVA early-exit: variance is "stable" when the last three samples stay
/// inside a relative tolerance band around their mean.
pub fn variance_stable(history: &VecDeque<CycleSample>, tolerance_q48: u64) -> bool {
    if history.len() < 3 {
        return false;
    }
    let last: Vec<u64> = history
        .iter()
        .rev()
        .take(3)
        .map(|s| s.heat_variance_q48)
        .collect();
    let hi = *last.iter().max().unwrap_or(&0);
    let lo = *last.iter().min().unwrap_or(&0);
    let mean = (last.iter().sum::<u64>()) / 3;
    let band = Q48(mean).mul(Q48(tolerance_q48)).0;
    hi - lo <= band
}

/// Binary-chop window tuning.
///
/// If accuracy moved with the last size change, keep pushing the same
/// direction with half the remaining headroom; if it moved against, back off
/// a quarter. Clamped to [min, cap] — the buffer itself never resizes.
pub fn tune_window(
    metrics: &mut PipelineMetrics,
    current: usize,
    min: usize,
    cap: usize,
) -> usize {
    let accuracy = metrics.accuracy();
    metrics.window_tuning_checks += 1;

    let suggestion = if metrics.window_tuning_checks == 1 {
        // First check: no baseline yet, probe downward.
        current.saturating_sub(current.saturating_sub(min) / 4)
    } else {
        let improving = accuracy >= metrics.last_checked_accuracy;
        let grew = current >= metrics.last_checked_window;
        if improving == grew {
            current + cap.saturating_sub(current) / 2
        } else {
            current.saturating_sub(current.saturating_sub(min) / 4)
        }
    };
    let suggestion = suggestion.clamp(min, cap);

    metrics.last_checked_window = current;
    metrics.last_checked_accuracy = accuracy;
    metrics.suggested_next_size = suggestion;
    debug!(
        accuracy = %accuracy,
        current,
        suggestion,
        "window tuner"
    );
    suggestion
}

/// Exponential decay-slope fit over the recent total-heat trajectory.
///
/// Consecutive sample pairs give lambda = ln(H0/H1)/dt; the pairwise
/// estimates are averaged and their spread (via the integer sqrt) becomes the
/// confidence score. The linear-decay knob is the lambda rescaled by the mean
/// heat so `slope * elapsed_ns` matches the fitted curve locally. Returns
/// None when the trajectory is flat or rising (nothing to fit).
pub fn infer_decay_slope(
    history: &VecDeque<CycleSample>,
    mean_entry_heat_q48: u64,
) -> Option<(u64, Q48)> {
    if history.len() < 3 {
        return None;
    }
    let mut lambdas: Vec<u64> = Vec::new();
    let samples: Vec<&CycleSample> = history.iter().collect();
    for pair in samples.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let dt = b.ns.saturating_sub(a.ns);
        if dt == 0 || a.total_heat_q48 == 0 || b.total_heat_q48 == 0 {
            continue;
        }
        if a.total_heat_q48 <= b.total_heat_q48 {
            continue; // heating up, not decaying
        }
        let ratio = Q48(a.total_heat_q48).div(Q48(b.total_heat_q48));
        // ln(ratio) / dt, kept per-millisecond so the Q48 fraction survives
        // integer division.
        let lam = (ratio.log_approx().0 as u128 * 1_000_000 / dt as u128) as u64;
        lambdas.push(lam);
    }
    if lambdas.is_empty() {
        return None;
    }
    let n = lambdas.len() as u64;
    let mean = lambdas.iter().sum::<u64>() / n;
    if mean == 0 {
        return None;
    }
    let var = lambdas
        .iter()
        .map(|l| {
            let d = l.abs_diff(mean);
            (d as u128 * d as u128).min(u64::MAX as u128) as u64
        })
        .sum::<u64>()
        / n;
    // Agreement score: 1 - stddev/mean, floored at zero.
    let spread = Q48(var).sqrt_approx();
    let confidence = Q48::ONE.saturating_sub(spread.div(Q48(mean)).min(Q48::ONE));

    // lambda (per-ms, per-heat-unit) scaled by mean per-entry heat and
    // brought back to per-nanosecond gives the linear heat/ns knob the decay
    // path consumes.
    let slope = (Q48(mean).mul(Q48(mean_entry_heat_q48)).0 / 1_000_000).max(1);
    Some((slope, confidence))
}

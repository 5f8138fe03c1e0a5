//! Range-vector functions computed over a selector window.

use parallax_core::Sample;
use parallax_logical::RangeFunc;

/// Apply a range function to the samples inside `[ts - range_ms, ts]`.
///
/// Returns `None` when the window does not hold enough samples for the
/// function (two for `rate`/`increase`/`delta`, one otherwise).
pub(crate) fn apply_range_func(
    func: RangeFunc,
    samples: &[Sample],
    ts: i64,
    range_ms: i64,
) -> Option<f64> {
    match func {
        RangeFunc::Rate => extrapolated_rate(samples, true, true, ts, range_ms),
        RangeFunc::Increase => extrapolated_rate(samples, true, false, ts, range_ms),
        RangeFunc::Delta => extrapolated_rate(samples, false, false, ts, range_ms),
        RangeFunc::SumOverTime => non_empty(samples).map(|s| s.iter().map(|v| v.v).sum()),
        RangeFunc::AvgOverTime => {
            non_empty(samples).map(|s| s.iter().map(|v| v.v).sum::<f64>() / s.len() as f64)
        }
        RangeFunc::CountOverTime => non_empty(samples).map(|s| s.len() as f64),
        RangeFunc::MinOverTime => non_empty(samples).map(|s| {
            s.iter()
                .map(|v| v.v)
                .fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
        }),
        RangeFunc::MaxOverTime => non_empty(samples).map(|s| {
            s.iter()
                .map(|v| v.v)
                .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
        }),
        RangeFunc::StddevOverTime => non_empty(samples).map(|s| variance(s).sqrt()),
        RangeFunc::StdvarOverTime => non_empty(samples).map(variance),
        RangeFunc::LastOverTime => samples.last().map(|s| s.v),
        RangeFunc::PresentOverTime => non_empty(samples).map(|_| 1.0),
    }
}

fn non_empty(samples: &[Sample]) -> Option<&[Sample]> {
    (!samples.is_empty()).then_some(samples)
}

/// Population variance via Welford's algorithm, avoiding the loss of
/// precision of the naive sum-of-squares formula.
fn variance(samples: &[Sample]) -> f64 {
    let mut count = 0.0;
    let mut mean = 0.0;
    let mut aux = 0.0;
    for sample in samples {
        count += 1.0;
        let delta = sample.v - mean;
        mean += delta / count;
        aux += delta * (sample.v - mean);
    }
    aux / count
}

/// `rate`/`increase`/`delta` with counter-reset correction and edge
/// extrapolation.
///
/// The accumulated delta is built pairwise: a sample below its predecessor is
/// a counter reset and contributes the pre-reset value, with the baseline
/// restarting at the post-reset sample. Extrapolation follows the Prometheus
/// convention: the value is scaled out to the window edges when the boundary
/// samples are within 1.1x the average sample interval of them, and by half
/// an interval otherwise; a counter is never extrapolated below zero.
fn extrapolated_rate(
    samples: &[Sample],
    is_counter: bool,
    is_rate: bool,
    ts: i64,
    range_ms: i64,
) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let first = samples[0];
    let last = samples[samples.len() - 1];

    let mut result_value = if is_counter {
        let mut delta = 0.0;
        let mut prev = first.v;
        for sample in &samples[1..] {
            if sample.v < prev {
                delta += prev;
            } else {
                delta += sample.v - prev;
            }
            prev = sample.v;
        }
        delta
    } else {
        last.v - first.v
    };

    let range_start = ts - range_ms;
    let mut duration_to_start = (first.t - range_start) as f64 / 1000.0;
    let duration_to_end = (ts - last.t) as f64 / 1000.0;
    let sampled_interval = (last.t - first.t) as f64 / 1000.0;
    let avg_duration_between_samples = sampled_interval / (samples.len() - 1) as f64;

    if is_counter && result_value > 0.0 && first.v >= 0.0 {
        // A counter cannot be extrapolated below zero.
        let duration_to_zero = sampled_interval * (first.v / result_value);
        if duration_to_zero < duration_to_start {
            duration_to_start = duration_to_zero;
        }
    }

    let extrapolation_threshold = avg_duration_between_samples * 1.1;
    let mut extrapolate_to_interval = sampled_interval;
    if duration_to_start < extrapolation_threshold {
        extrapolate_to_interval += duration_to_start;
    } else {
        extrapolate_to_interval += avg_duration_between_samples / 2.0;
    }
    if duration_to_end < extrapolation_threshold {
        extrapolate_to_interval += duration_to_end;
    } else {
        extrapolate_to_interval += avg_duration_between_samples / 2.0;
    }
    result_value *= extrapolate_to_interval / sampled_interval;

    if is_rate {
        result_value /= range_ms as f64 / 1000.0;
    }
    Some(result_value)
}

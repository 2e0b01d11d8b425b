use ndarray::ArrayView1;

/// Mean of a sample; 0 for an empty one.
pub fn mean(xs: &[f64]) -> f64 {
    ArrayView1::from(xs).mean().unwrap_or(0.0)
}

/// Population standard deviation (ddof 0).
pub fn std(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    ArrayView1::from(xs).std(0.0)
}

/// Sample standard deviation (ddof 1); 0 below two samples.
pub fn sample_std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    ArrayView1::from(xs).std(1.0)
}

/// Median by sorting; 0 for an empty sample.
pub fn median(xs: &[f64]) -> f64 {
    percentile(xs, 50.0)
}

/// Percentile with linear interpolation between ranks.
pub fn percentile(xs: &[f64], p: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = rank - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Fisher-Pearson skewness of the sample distribution; 0 when degenerate.
pub fn skewness(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let m2 = central_moment(xs, m, 2);
    let m3 = central_moment(xs, m, 3);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

/// Excess kurtosis (Fisher definition); 0 when degenerate.
pub fn kurtosis(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let m2 = central_moment(xs, m, 2);
    let m4 = central_moment(xs, m, 4);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    m4 / (m2 * m2) - 3.0
}

/// Shannon entropy of a probability vector, in bits.
pub fn entropy_bits(probs: &[f64]) -> f64 {
    probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

/// Shannon entropy of a probability vector, in nats, with the usual epsilon
/// guard for zero entries.
pub fn entropy_nats(probs: &[f64]) -> f64 {
    probs.iter().map(|p| -p * (p + 1e-10).ln()).sum()
}

fn central_moment(xs: &[f64], mean: f64, order: i32) -> f64 {
    xs.iter().map(|x| (x - mean).powi(order)).sum::<f64>() / xs.len() as f64
}

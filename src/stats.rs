use statrs::statistics::Statistics;

use crate::model::VolatilityLevel;

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

// Below this a standard deviation is treated as zero.
const STD_EPSILON: f64 = 1e-9;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Divides by N, not N - 1.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().population_std_dev()
}

pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let sd = population_std_dev(values);
    if sd < STD_EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - m) / sd).collect()
}

/// Drops values whose |z| exceeds `threshold`. A zero-spread set comes back unchanged.
pub fn filter_outliers(values: &[f64], threshold: f64) -> Vec<f64> {
    if population_std_dev(values) < STD_EPSILON {
        return values.to_vec();
    }
    values
        .iter()
        .zip(z_scores(values))
        .filter(|(_, z)| z.abs() <= threshold)
        .map(|(v, _)| *v)
        .collect()
}

/// Linear interpolation between closest ranks. `p` is 0..=100.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Least-squares slope over the sequence index.
pub fn trend(prices: &[f64]) -> f64 {
    let n = prices.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let x_mean = (n - 1.0) / 2.0;
    let y_mean = prices.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        let x_diff = i as f64 - x_mean;
        numerator += x_diff * (price - y_mean);
        denominator += x_diff * x_diff;
    }

    if denominator != 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Regression {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Least-squares line over the sequence index, with its goodness of fit.
/// A single point is a flat line through it; R² is 0 when the values do not vary.
pub fn linear_regression(values: &[f64]) -> Regression {
    if values.is_empty() {
        return Regression {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
        };
    }

    let x_mean = (values.len() as f64 - 1.0) / 2.0;
    let y_mean = mean(values);
    let slope = trend(values);
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }

    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    Regression {
        slope,
        intercept,
        r_squared,
    }
}

/// Std-dev over mean. Zero for an empty or zero-mean set.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.abs() < STD_EPSILON {
        return 0.0;
    }
    population_std_dev(values) / m.abs()
}

/// 0-100. Saturates with sample count and is damped by relative volatility:
/// `100 * (1 - e^(-n/10)) / (1 + cv)`.
pub fn confidence(sample_size: usize, cv: f64) -> f64 {
    let coverage = 1.0 - (-(sample_size as f64) / 10.0).exp();
    let damping = 1.0 / (1.0 + cv.max(0.0));
    (100.0 * coverage * damping).clamp(0.0, 100.0)
}

pub fn volatility_level(volatility_pct: f64) -> VolatilityLevel {
    if volatility_pct <= 30.0 {
        VolatilityLevel::Stable
    } else if volatility_pct <= 60.0 {
        VolatilityLevel::Moderate
    } else {
        VolatilityLevel::Volatile
    }
}

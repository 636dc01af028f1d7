//! Two-sample significance testing on accumulated measurements.
//!
//! The comparator decides whether two sample vectors plausibly come from the
//! same distribution. The significance level is deliberately small: sample
//! sets grow while a job runs and are re-tested every tick, so a loose
//! threshold would accumulate false positives.

const SIGNIFICANCE_LEVEL: f64 = 0.001;

/// Below this size on either side the exact null distribution of U is used
/// instead of the normal approximation.
const MIN_SAMPLES_FOR_NORMAL_APPROXIMATION: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleComparison {
    /// The samples are significantly different (p < 0.001).
    Different,
    /// No significant difference was detected. More samples may resolve it;
    /// "same" is only ever decided at a higher level, once the sample budget
    /// is exhausted.
    Unknown,
}

/// Compare two sample vectors with a two-sided Mann-Whitney U test.
///
/// Returns `Unknown` when either vector is empty or the test statistic is
/// undefined (zero variance across the pooled samples).
pub fn compare_samples(a: &[f64], b: &[f64]) -> SampleComparison {
    if a.is_empty() || b.is_empty() {
        return SampleComparison::Unknown;
    }
    match mann_whitney_u(a, b) {
        Some(p_value) if p_value < SIGNIFICANCE_LEVEL => SampleComparison::Different,
        _ => SampleComparison::Unknown,
    }
}

/// Two-sided Mann-Whitney U p-value, with ties broken by mid-rank.
///
/// With at least [`MIN_SAMPLES_FOR_NORMAL_APPROXIMATION`] samples on each
/// side, uses the normal approximation with tie and continuity corrections;
/// below that, the exact null distribution of U. Returns `None` when the
/// statistic is undefined.
pub fn mann_whitney_u(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    let m = ys.len();
    if n == 0 || m == 0 {
        return None;
    }

    let (rank_sum_x, tie_term) = mid_ranks(xs, ys);

    let u_x = rank_sum_x - (n * (n + 1)) as f64 / 2.0;
    let u_y = (n * m) as f64 - u_x;
    let u = u_x.min(u_y);

    if n >= MIN_SAMPLES_FOR_NORMAL_APPROXIMATION && m >= MIN_SAMPLES_FOR_NORMAL_APPROXIMATION {
        normal_p_value(u, n, m, tie_term)
    } else {
        Some(exact_p_value(u, n, m))
    }
}

/// Rank the pooled samples, returning the rank sum of `xs` and the tie
/// correction term `sum(t^3 - t)` over tie groups.
fn mid_ranks(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let mut pooled: Vec<(f64, bool)> = xs
        .iter()
        .map(|&v| (v, true))
        .chain(ys.iter().map(|&v| (v, false)))
        .collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_x = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < pooled.len() {
        let mut j = i;
        while j < pooled.len() && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        // Ranks are 1-based; everything in pooled[i..j] shares the mid-rank.
        let mid_rank = (i + 1 + j) as f64 / 2.0;
        let ties = (j - i) as f64;
        tie_term += ties * ties * ties - ties;
        for &(_, is_x) in &pooled[i..j] {
            if is_x {
                rank_sum_x += mid_rank;
            }
        }
        i = j;
    }
    (rank_sum_x, tie_term)
}

fn normal_p_value(u: f64, n: usize, m: usize, tie_term: f64) -> Option<f64> {
    let nm = (n * m) as f64;
    let total = (n + m) as f64;
    let mean = nm / 2.0;
    let variance = nm / 12.0 * ((total + 1.0) - tie_term / (total * (total - 1.0)));
    if variance <= 0.0 {
        return None;
    }
    // Continuity correction; u is the smaller statistic so u <= mean.
    let z = ((mean - u - 0.5) / variance.sqrt()).max(0.0);
    Some((2.0 * normal_sf(z)).min(1.0))
}

/// Exact two-sided p-value: `2 * P(U <= u)` under the null distribution.
///
/// The arrangement counts of U are the coefficients of the Gaussian binomial
/// `[n + m choose n]_q`, built up one factor `(1 - q^(m+i)) / (1 - q^i)` at
/// a time. Counts are carried in f64: only one side is guaranteed small, so
/// they can exceed u64 range, and the relative error stays far below the
/// significance threshold.
fn exact_p_value(u: f64, n: usize, m: usize) -> f64 {
    // The distribution of min(U, nm - U) is symmetric in the two sides; use
    // the smaller side to bound the factor count.
    let (n, m) = if n <= m { (n, m) } else { (m, n) };
    let max_u = n * m;
    let observed = (u.floor() as usize).min(max_u);

    let mut coefficients = vec![0.0f64; max_u + 1];
    coefficients[0] = 1.0;
    for i in 1..=n {
        // Multiply by (1 - q^(m + i)), in place, highest term first.
        for k in (m + i..=max_u).rev() {
            coefficients[k] -= coefficients[k - (m + i)];
        }
        // Divide by (1 - q^i), in place, lowest term first.
        for k in i..=max_u {
            coefficients[k] += coefficients[k - i];
        }
    }

    let total: f64 = coefficients.iter().sum();
    let at_most: f64 = coefficients[..=observed].iter().sum();
    (2.0 * at_most / total).min(1.0)
}

/// Survival function of the standard normal distribution via the
/// Abramowitz-Stegun 7.1.26 approximation of erfc (absolute error < 1.5e-7).
fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.3275911 * x.abs());
    let polynomial = t
        * (0.254829592
            + t * (-0.284496736
                + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let value = polynomial * (-x * x).exp();
    if x >= 0.0 { value } else { 2.0 - value }
}

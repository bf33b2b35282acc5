//! Direct implementations of the drift statistics. Everything here is
//! deterministic given the same inputs.

use std::collections::HashMap;

/// Two-sample Kolmogorov-Smirnov statistic D in [0,1]: the largest vertical
/// distance between the two empirical CDFs.
pub fn ks_statistic(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || ys.is_empty() {
        return 0.0;
    }
    let mut a = xs.to_vec();
    let mut b = ys.to_vec();
    a.sort_by(|p, q| p.partial_cmp(q).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|p, q| p.partial_cmp(q).unwrap_or(std::cmp::Ordering::Equal));

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let v = a[i].min(b[j]);
        while i < a.len() && a[i] <= v {
            i += 1;
        }
        while j < b.len() && b[j] <= v {
            j += 1;
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    d.min(1.0)
}

/// Shannon entropy of one text over its character histogram, natural log.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    let n = total as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Mean per-response entropy of a sample.
pub fn mean_entropy(texts: &[&str]) -> f64 {
    if texts.is_empty() {
        return 0.0;
    }
    texts.iter().map(|t| shannon_entropy(t)).sum::<f64>() / texts.len() as f64
}

/// Population Stability Index over aligned bucket counts. A bucket whose
/// fraction falls below `epsilon` on either side is treated as empty and
/// skipped, keeping the log-ratio finite.
pub fn psi(current_counts: &[u64], baseline_counts: &[u64], epsilon: f64) -> f64 {
    debug_assert_eq!(current_counts.len(), baseline_counts.len());
    let n_current: u64 = current_counts.iter().sum();
    let n_baseline: u64 = baseline_counts.iter().sum();
    if n_current == 0 || n_baseline == 0 {
        return 0.0;
    }

    let mut total = 0.0;
    for (&c, &b) in current_counts.iter().zip(baseline_counts) {
        let q = c as f64 / n_current as f64;
        let p = b as f64 / n_baseline as f64;
        if q < epsilon || p < epsilon {
            continue;
        }
        total += (q - p) * (q / p).ln();
    }
    total.abs()
}

/// Continuity pad for tool histograms so a count of zero on one side keeps
/// the chi-square finite and proportionate.
pub const CHI2_PAD: f64 = 0.5;

/// Chi-square statistic over the union of tool names, normalized into [0,1]
/// as `chi2 / (chi2 + n)` where n is the total number of calls on both sides.
pub fn tool_frequency_chi2(
    current: &HashMap<String, u64>,
    baseline: &HashMap<String, u64>,
) -> (f64, f64) {
    let mut tools: Vec<&String> = current.keys().chain(baseline.keys()).collect();
    tools.sort();
    tools.dedup();
    if tools.is_empty() {
        return (0.0, 0.0);
    }

    let mut chi2 = 0.0;
    for tool in &tools {
        let observed = current.get(*tool).copied().unwrap_or(0) as f64 + CHI2_PAD;
        let expected = baseline.get(*tool).copied().unwrap_or(0) as f64 + CHI2_PAD;
        chi2 += (observed - expected).powi(2) / expected;
    }

    let n: u64 = current.values().sum::<u64>() + baseline.values().sum::<u64>();
    if n == 0 {
        return (chi2, 0.0);
    }
    (chi2, (chi2 / (chi2 + n as f64)).min(1.0))
}

/// Multiset of consecutive `(tool_i, tool_i+1)` bigrams across the given
/// tool-name sequences.
pub fn sequence_bigrams(sequences: &[Vec<&str>]) -> HashMap<(String, String), u64> {
    let mut bigrams = HashMap::new();
    for seq in sequences {
        for pair in seq.windows(2) {
            *bigrams
                .entry((pair[0].to_string(), pair[1].to_string()))
                .or_insert(0) += 1;
        }
    }
    bigrams
}

/// Jaccard distance between two bigram multisets: `1 - |∩| / |∪|` with
/// multiset intersection (elementwise min) and union (elementwise max).
/// None when both multisets are empty.
pub fn bigram_jaccard_distance(
    a: &HashMap<(String, String), u64>,
    b: &HashMap<(String, String), u64>,
) -> Option<f64> {
    let mut intersection = 0u64;
    let mut union = 0u64;
    let keys: std::collections::HashSet<_> = a.keys().chain(b.keys()).collect();
    for key in keys {
        let ca = a.get(key).copied().unwrap_or(0);
        let cb = b.get(key).copied().unwrap_or(0);
        intersection += ca.min(cb);
        union += ca.max(cb);
    }
    if union == 0 {
        return None;
    }
    Some(1.0 - intersection as f64 / union as f64)
}

/// Longest run of consecutive repeats per tool in one sequence.
pub fn max_consecutive_runs(sequence: &[&str]) -> HashMap<String, u64> {
    let mut runs: HashMap<String, u64> = HashMap::new();
    let mut i = 0;
    while i < sequence.len() {
        let tool = sequence[i];
        let mut j = i + 1;
        while j < sequence.len() && sequence[j] == tool {
            j += 1;
        }
        let run = (j - i) as u64;
        let entry = runs.entry(tool.to_string()).or_insert(0);
        *entry = (*entry).max(run);
        i = j;
    }
    runs
}

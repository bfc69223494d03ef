//! Train/test evaluation of the matcher over a labeled embedding set.
//!
//! The split is stratified: the test quota is shared between labels in
//! proportion to their sample counts, every label keeps at least one train
//! sample, and labels with a single sample stay entirely in train.

use crate::error::MatchError;
use crate::gallery::{Gallery, GalleryEntry};
use crate::matcher::Matcher;
use crate::types::{Embedding, Threshold};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;

/// Seed used by the recognizer when none is given.
pub const DEFAULT_SEED: u64 = 42;
/// Test fraction used by the recognizer when none is given.
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Index sets of a stratified split, each in original sample order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Outcome of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Fraction of test items whose top-1 label equals their true label.
    pub accuracy: f64,
    /// Mean best similarity over the test items.
    pub mean_confidence: f64,
    pub train_size: usize,
    pub test_size: usize,
}

/// Split `labels` into train/test index sets.
///
/// The test size is `ceil(test_fraction * n)`. Fails with
/// [`MatchError::InsufficientSamples`] when that many items cannot be drawn
/// while leaving every label at least one train sample.
pub fn stratified_split(labels: &[&str], test_fraction: f64, seed: u64) -> Result<Split, MatchError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(MatchError::InvalidParameter(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }

    // Group sample indices by label, labels in first-occurrence order.
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, &label) in labels.iter().enumerate() {
        groups
            .entry(label)
            .or_insert_with(|| {
                order.push(label);
                Vec::new()
            })
            .push(i);
    }

    let n = labels.len();
    // Guard against 0.2 * 10 landing a hair above 2.0.
    let n_test = ((test_fraction * n as f64) - 1e-9).ceil().max(1.0) as usize;

    let eligible: Vec<&str> = order.iter().copied().filter(|l| groups[l].len() >= 2).collect();
    let capacity: usize = eligible.iter().map(|l| groups[l].len() - 1).sum();
    if eligible.is_empty() {
        return Err(MatchError::InsufficientSamples(
            "no label has at least 2 samples".into(),
        ));
    }
    if n_test > capacity {
        return Err(MatchError::InsufficientSamples(format!(
            "test size {n_test} exceeds the {capacity} samples that can leave train \
             while keeping one train sample per label"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let quotas = allocate_quotas(&eligible, &groups, n_test, &mut rng);

    let mut test = Vec::with_capacity(n_test);
    for (label, quota) in eligible.iter().zip(quotas) {
        let mut members = groups[label].clone();
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..quota]);
    }
    test.sort_unstable();

    let mut in_test = vec![false; n];
    for &i in &test {
        in_test[i] = true;
    }
    let train = (0..n).filter(|&i| !in_test[i]).collect();

    Ok(Split { train, test })
}

/// Largest-remainder apportionment of `n_test` over the eligible labels,
/// capped at `count - 1` per label. Equal remainders are ordered by a
/// seeded shuffle.
fn allocate_quotas(
    eligible: &[&str],
    groups: &HashMap<&str, Vec<usize>>,
    n_test: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let eligible_total: usize = eligible.iter().map(|l| groups[l].len()).sum();
    let caps: Vec<usize> = eligible.iter().map(|l| groups[l].len() - 1).collect();

    let ideal: Vec<f64> = eligible
        .iter()
        .map(|l| n_test as f64 * groups[l].len() as f64 / eligible_total as f64)
        .collect();
    let mut quotas: Vec<usize> = ideal
        .iter()
        .zip(&caps)
        .map(|(&q, &cap)| (q.floor() as usize).min(cap))
        .collect();

    let mut order: Vec<usize> = (0..eligible.len()).collect();
    order.shuffle(rng);
    order.sort_by(|&a, &b| {
        let ra = ideal[a] - quotas[a] as f64;
        let rb = ideal[b] - quotas[b] as f64;
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut remaining = n_test - quotas.iter().sum::<usize>();
    // Capacity was checked by the caller, so this terminates.
    while remaining > 0 {
        for &i in &order {
            if remaining == 0 {
                break;
            }
            if quotas[i] < caps[i] {
                quotas[i] += 1;
                remaining -= 1;
            }
        }
    }
    quotas
}

/// Split, build a gallery from the train partition and match every test item.
pub fn evaluate<M: Matcher>(
    matcher: &M,
    samples: &[(String, Embedding)],
    test_fraction: f64,
    seed: u64,
) -> Result<EvaluationReport, MatchError> {
    let labels: Vec<&str> = samples.iter().map(|(l, _)| l.as_str()).collect();
    let split = stratified_split(&labels, test_fraction, seed)?;

    let gallery = Gallery::build(
        split
            .train
            .iter()
            .map(|&i| GalleryEntry::new(samples[i].0.clone(), samples[i].1.clone())),
    )?;

    // Accuracy is raw top-1, so the threshold only fills `accepted`.
    let threshold = Threshold::similarity(0.0);
    let mut correct = 0usize;
    let mut confidence_sum = 0.0f64;
    for &i in &split.test {
        let (truth, probe) = &samples[i];
        let result = matcher.compare(probe, &gallery, threshold)?;
        if &result.best_label == truth {
            correct += 1;
        }
        confidence_sum += result.confidence as f64;
    }

    let test_size = split.test.len();
    let report = EvaluationReport {
        accuracy: correct as f64 / test_size as f64,
        mean_confidence: confidence_sum / test_size as f64,
        train_size: split.train.len(),
        test_size,
    };
    tracing::info!(
        train = report.train_size,
        test = report.test_size,
        accuracy = report.accuracy,
        mean_confidence = report.mean_confidence,
        "evaluation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::CosineMatcher;

    fn samples(spec: &[(&str, usize)]) -> Vec<(String, Embedding)> {
        let mut out = Vec::new();
        for (k, (label, count)) in spec.iter().enumerate() {
            for j in 0..*count {
                let mut v = vec![0.05; spec.len()];
                v[k] = 1.0 + j as f32 * 0.01;
                out.push((label.to_string(), Embedding::new(v)));
            }
        }
        out
    }

    #[test]
    fn test_five_pairs_yield_two_test_samples() {
        let data = samples(&[("a", 2), ("b", 2), ("c", 2), ("d", 2), ("e", 2)]);
        let report = evaluate(&CosineMatcher, &data, 0.2, 42).unwrap();
        assert_eq!(report.test_size, 2);
        assert_eq!(report.train_size, 8);
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert!((-1.0..=1.0).contains(&report.mean_confidence));
    }

    #[test]
    fn test_separable_clusters_are_fully_accurate() {
        let data = samples(&[("a", 5), ("b", 5), ("c", 5)]);
        let report = evaluate(&CosineMatcher, &data, 0.2, 7).unwrap();
        assert_eq!(report.test_size, 3);
        assert_eq!(report.accuracy, 1.0);
        assert!(report.mean_confidence > 0.9);
    }

    #[test]
    fn test_split_is_reproducible() {
        let labels: Vec<&str> = ["a", "a", "a", "b", "b", "b", "c", "c", "c", "c"].to_vec();
        let s1 = stratified_split(&labels, 0.3, 123).unwrap();
        let s2 = stratified_split(&labels, 0.3, 123).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_split_is_stratified() {
        let labels: Vec<&str> = std::iter::repeat("a")
            .take(10)
            .chain(std::iter::repeat("b").take(20))
            .collect();
        let split = stratified_split(&labels, 0.2, 1).unwrap();
        let test_a = split.test.iter().filter(|&&i| labels[i] == "a").count();
        let test_b = split.test.iter().filter(|&&i| labels[i] == "b").count();
        assert_eq!(test_a, 2);
        assert_eq!(test_b, 4);
        assert_eq!(split.train.len() + split.test.len(), 30);
    }

    #[test]
    fn test_singleton_labels_stay_in_train() {
        let labels = vec!["solo", "a", "a", "a", "b", "b", "b"];
        let split = stratified_split(&labels, 0.3, 5).unwrap();
        assert!(split.train.contains(&0));
        assert!(!split.test.contains(&0));
        for label in ["a", "b"] {
            assert!(split.train.iter().any(|&i| labels[i] == label));
        }
    }

    #[test]
    fn test_all_singletons_is_insufficient() {
        let labels = vec!["a", "b", "c"];
        let err = stratified_split(&labels, 0.3, 0).unwrap_err();
        assert!(matches!(err, MatchError::InsufficientSamples(_)));
    }

    #[test]
    fn test_fraction_too_large_is_insufficient() {
        let labels = vec!["a", "a", "b", "b"];
        let err = stratified_split(&labels, 0.9, 0).unwrap_err();
        assert!(matches!(err, MatchError::InsufficientSamples(_)));
    }

    #[test]
    fn test_invalid_fraction() {
        let labels = vec!["a", "a"];
        assert!(matches!(
            stratified_split(&labels, 0.0, 0),
            Err(MatchError::InvalidParameter(_))
        ));
        assert!(matches!(
            stratified_split(&labels, 1.0, 0),
            Err(MatchError::InvalidParameter(_))
        ));
    }
}

//! ラベル比率を保った学習/検証分割

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// 分割結果（元配列へのインデックス）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// クラスごとに `validation_fraction` の割合を検証側へ回す
///
/// 各クラスの検証件数は四捨五入で決め、学習側に最低1件は残す
pub fn stratified_split(labels: &[usize], validation_fraction: f32, seed: u64) -> SplitIndices {
    let fraction = validation_fraction.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(index);
    }

    let mut train = Vec::with_capacity(labels.len());
    let mut validation = Vec::new();

    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let n_val = ((n as f32 * fraction).round() as usize).min(n.saturating_sub(1));

        validation.extend_from_slice(&indices[..n_val]);
        train.extend_from_slice(&indices[n_val..]);
    }

    train.shuffle(&mut rng);
    validation.shuffle(&mut rng);

    SplitIndices { train, validation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(counts: &[usize]) -> Vec<usize> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(label, n)| std::iter::repeat(label).take(*n))
            .collect()
    }

    #[test]
    fn test_split_preserves_class_proportions() {
        let labels = labels(&[100, 50, 10]);
        let split = stratified_split(&labels, 0.2, 42);

        let count = |indices: &[usize], class: usize| {
            indices.iter().filter(|&&i| labels[i] == class).count()
        };
        assert_eq!(count(&split.validation, 0), 20);
        assert_eq!(count(&split.validation, 1), 10);
        assert_eq!(count(&split.validation, 2), 2);
        assert_eq!(split.train.len() + split.validation.len(), labels.len());
    }

    #[test]
    fn test_split_is_a_partition() {
        let labels = labels(&[7, 3, 1]);
        let split = stratified_split(&labels, 0.2, 42);

        let all: HashSet<usize> = split.train.iter().chain(&split.validation).copied().collect();
        assert_eq!(all.len(), labels.len());
        // 1件しかないクラスは学習側に残る
        assert!(split.train.iter().any(|&i| labels[i] == 2));
    }

    #[test]
    fn test_split_is_deterministic() {
        let labels = labels(&[30, 30]);
        assert_eq!(stratified_split(&labels, 0.2, 42), stratified_split(&labels, 0.2, 42));
    }
}

//! Leave-one-out ranking metrics.
use ndarray::s;
use rayon::prelude::*;

use crate::data::{Dataset, DatasetError};
use crate::models::ModelError;
use crate::serving::Device;
use crate::Scorer;

/// Errors raised while evaluating a model.
#[derive(Debug, Fail)]
pub enum EvaluationError {
    /// The test set is not a whole number of groups.
    #[fail(
        display = "{} rows cannot be split into groups of {}.",
        len, group_size
    )]
    UnevenGroups {
        /// Rows in the test set.
        len: usize,
        /// Rows per group.
        group_size: usize,
    },
    /// A group's first row is not a positive.
    #[fail(display = "Group {} does not start with a positive interaction.", group)]
    MissingPositive {
        /// Index of the group.
        group: usize,
    },
    /// The test set is unusable.
    #[fail(display = "{}", _0)]
    Data(#[cause] DatasetError),
    /// The model failed to score.
    #[fail(display = "{}", _0)]
    Model(#[cause] ModelError),
}

impl From<DatasetError> for EvaluationError {
    fn from(error: DatasetError) -> Self {
        EvaluationError::Data(error)
    }
}

impl From<ModelError> for EvaluationError {
    fn from(error: ModelError) -> Self {
        EvaluationError::Model(error)
    }
}

/// Mean hit ratio and NDCG at a cutoff.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Share of groups whose positive ranks within the cutoff.
    pub hit_ratio: f32,
    /// Mean normalized discounted cumulative gain.
    pub ndcg: f32,
}

/// Zero-based rank of the first score among `scores`.
///
/// Ties count against the positive.
fn rank_of_positive(scores: &[f32]) -> usize {
    let positive = scores[0];
    scores[1..].iter().filter(|&&score| score >= positive).count()
}

/// Compute HR@k and NDCG@k over `test`.
///
/// `test` must be laid out in groups of `group_size` rows sharing a user,
/// each group starting with its held-out positive followed by sampled
/// negatives, as produced by negative sampling with `group_size - 1`
/// negatives. Groups are scored in parallel on `device`.
pub fn hit_ratio_and_ndcg<T: Scorer + Sync>(
    model: &T,
    test: &Dataset,
    group_size: usize,
    k: usize,
    device: &Device,
) -> Result<Metrics, EvaluationError> {
    if group_size == 0 || test.is_empty() || test.len() % group_size != 0 {
        return Err(EvaluationError::UnevenGroups {
            len: test.len(),
            group_size,
        });
    }

    let examples = test.to_examples()?;
    let fields = examples.fields();
    let labels = examples.labels();
    let num_groups = examples.len() / group_size;

    let ranks = device.install(|| {
        (0..num_groups)
            .into_par_iter()
            .map(|group| {
                let start = group * group_size;
                if labels[start] <= 0.0 {
                    return Err(EvaluationError::MissingPositive { group });
                }

                let scores = model.score(fields.slice(s![start..start + group_size, ..]))?;
                Ok(rank_of_positive(&scores.to_vec()))
            })
            .collect::<Result<Vec<usize>, EvaluationError>>()
    })?;

    let hits = ranks.iter().filter(|&&rank| rank < k).count();
    let ndcg: f32 = ranks
        .iter()
        .filter(|&&rank| rank < k)
        .map(|&rank| 1.0 / ((rank + 2) as f32).log2())
        .sum();

    let metrics = Metrics {
        hit_ratio: hits as f32 / num_groups as f32,
        ndcg: ndcg / num_groups as f32,
    };

    debug!(
        groups = num_groups,
        k = k,
        hit_ratio = metrics.hit_ratio,
        ndcg = metrics.ndcg,
        "evaluated ranking"
    );

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, ArrayView2};

    use super::*;
    use crate::data::Interaction;
    use crate::FieldId;

    /// Scores a row by its second field.
    struct ItemScorer;

    impl Scorer for ItemScorer {
        fn field_dim(&self) -> usize {
            100
        }

        fn score(&self, rows: ArrayView2<FieldId>) -> Result<Array1<f32>, ModelError> {
            Ok(rows.column(1).mapv(|id| id as f32))
        }
    }

    fn grouped(groups: &[&[i64]]) -> Dataset {
        let mut interactions = Vec::new();
        for (user, items) in groups.iter().enumerate() {
            for (idx, &item) in items.iter().enumerate() {
                let label = if idx == 0 { 1.0 } else { 0.0 };
                interactions.push(Interaction::new(user as i64, item, label, 0));
            }
        }
        let mut dataset = Dataset::new(interactions);
        dataset.normalize_ids(None).unwrap();
        dataset
    }

    #[test]
    fn ranks_ties_against_the_positive() {
        assert_eq!(rank_of_positive(&[3.0, 1.0, 2.0]), 0);
        assert_eq!(rank_of_positive(&[3.0, 3.0, 2.0]), 1);
        assert_eq!(rank_of_positive(&[0.0, 1.0, 2.0]), 2);
    }

    #[test]
    fn metrics_follow_positive_ranks() {
        // Positive ranks first in group 0 and last in group 1.
        let test = grouped(&[&[9, 1, 2], &[0, 5, 6]]);
        let device = Device::new(2).unwrap();

        let at_one = hit_ratio_and_ndcg(&ItemScorer, &test, 3, 1, &device).unwrap();
        assert_eq!(at_one.hit_ratio, 0.5);
        assert!((at_one.ndcg - 0.5).abs() < 1e-6);

        let at_three = hit_ratio_and_ndcg(&ItemScorer, &test, 3, 3, &device).unwrap();
        assert_eq!(at_three.hit_ratio, 1.0);
        assert!((at_three.ndcg - (1.0 + 0.5) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn uneven_groups_are_rejected() {
        let test = grouped(&[&[1, 2, 3], &[4, 5, 6]]);
        let device = Device::new(1).unwrap();

        match hit_ratio_and_ndcg(&ItemScorer, &test, 4, 1, &device) {
            Err(EvaluationError::UnevenGroups { len, group_size }) => {
                assert_eq!(len, 6);
                assert_eq!(group_size, 4);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}

//! Negative sampling for positive-only interaction data.
use std::ops::Range;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::data::{DatasetError, Interaction};
use crate::matrix::AdjacencyMatrix;
use crate::{FieldId, RawId};

/// Draws made per negative before the exhaustion policy applies.
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// What to do when no non-interacting item turns up within the retry bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustionPolicy {
    /// Keep the last draw even though it is an observed interaction.
    AcceptCollision,
    /// Fail with [`DatasetError::SamplingExhaustion`].
    Fail,
}

/// Negative sampling configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegativeSampling {
    num_negatives: usize,
    max_attempts: usize,
    policy: ExhaustionPolicy,
}

impl NegativeSampling {
    /// Sample `num_negatives` negatives per positive row, accepting a collision after
    /// [`DEFAULT_MAX_ATTEMPTS`] draws.
    pub fn new(num_negatives: usize) -> Self {
        NegativeSampling {
            num_negatives,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: ExhaustionPolicy::AcceptCollision,
        }
    }

    /// Set the number of draws per negative. At least one draw is always made.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the exhaustion policy.
    pub fn policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Negatives drawn per positive row.
    pub fn num_negatives(&self) -> usize {
        self.num_negatives
    }
}

/// Outcome of drawing a single negative.
enum Draw {
    NonEdge(FieldId),
    Collision(FieldId),
}

fn draw_negative<R: Rng>(
    user_id: FieldId,
    matrix: &AdjacencyMatrix,
    item_range: &Uniform<FieldId>,
    max_attempts: usize,
    rng: &mut R,
) -> Draw {
    let mut item_id = item_range.sample(rng);

    for _ in 1..max_attempts {
        if !matrix.contains(user_id, item_id) {
            return Draw::NonEdge(item_id);
        }
        item_id = item_range.sample(rng);
    }

    if matrix.contains(user_id, item_id) {
        Draw::Collision(item_id)
    } else {
        Draw::NonEdge(item_id)
    }
}

/// Return `interactions` with every positive row followed by its sampled
/// negatives.
///
/// Rows with a label of zero or less are kept in place but get no negatives
/// of their own. Items are drawn uniformly from `items`. `matrix` is only
/// read.
pub fn interleave_negatives<R: Rng>(
    interactions: &[Interaction],
    matrix: &AdjacencyMatrix,
    items: Range<FieldId>,
    config: &NegativeSampling,
    rng: &mut R,
) -> Result<Vec<Interaction>, DatasetError> {
    if config.num_negatives == 0 {
        return Ok(interactions.to_vec());
    }
    if items.start >= items.end {
        return Err(DatasetError::Empty);
    }

    let item_range = Uniform::new(items.start, items.end);
    let max_attempts = config.max_attempts.max(1);

    let mut augmented = Vec::with_capacity(interactions.len() * (config.num_negatives + 1));
    let mut collisions = 0;

    for interaction in interactions {
        if interaction.user_id() < 0 {
            return Err(DatasetError::NotNormalized);
        }
        let user_id = interaction.user_id() as FieldId;

        augmented.push(*interaction);

        if interaction.label() <= 0.0 {
            continue;
        }

        for _ in 0..config.num_negatives {
            let item_id = match draw_negative(user_id, matrix, &item_range, max_attempts, rng) {
                Draw::NonEdge(item_id) => item_id,
                Draw::Collision(item_id) => match config.policy {
                    ExhaustionPolicy::AcceptCollision => {
                        collisions += 1;
                        item_id
                    }
                    ExhaustionPolicy::Fail => {
                        return Err(DatasetError::SamplingExhaustion {
                            user_id,
                            attempts: max_attempts,
                        })
                    }
                },
            };

            augmented.push(Interaction::new(
                interaction.user_id(),
                item_id as RawId,
                0.0,
                interaction.timestamp(),
            ));
        }
    }

    if collisions > 0 {
        warn!(
            collisions = collisions,
            max_attempts = max_attempts,
            "accepted negatives that collide with observed interactions"
        );
    }

    Ok(augmented)
}

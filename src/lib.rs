//! # fmrec
//!
//! `fmrec` implements factorization machine recommenders over user-item
//! interaction logs. The pairwise interaction term can be fed either by a
//! plain embedding table or by a single graph convolution over the
//! user-item interaction graph.
//!
//! The pipeline is:
//!
//! 1. read raw interactions and remap their ids into one contiguous id space
//!    ([`data::Dataset::normalize_ids`]);
//! 2. build the symmetric adjacency matrix of the interaction graph
//!    ([`matrix::AdjacencyMatrix`]);
//! 3. augment the positives with sampled negatives
//!    ([`data::Dataset::add_negative_sampling`]);
//! 4. fit a [`models::FactorizationMachine`];
//! 5. persist it in a [`bundle::ModelBundle`] together with the id range and
//!    the item catalog, and serve recommendations with
//!    [`serving::Recommender`].
//!
//! ## Example
//!
//! ```rust
//! # extern crate fmrec;
//! # extern crate rand;
//! # extern crate rand_xorshift;
//! # use rand::SeedableRng;
//! use fmrec::data::{Dataset, Interaction};
//! use fmrec::models::{EmbeddingKind, Hyperparameters};
//!
//! let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(42);
//!
//! let interactions = (0..40)
//!     .map(|idx| Interaction::new(idx % 8, (idx * 3) % 10, 1.0, idx))
//!     .collect();
//! let mut train = Dataset::new(interactions);
//!
//! train.normalize_ids(None).unwrap();
//! let matrix = train.create_adjacency_matrix().unwrap();
//! train.add_negative_sampling(&matrix, 2, &mut rng).unwrap();
//!
//! let field_dim = train.idrange().unwrap().total();
//! let mut model = Hyperparameters::new(8)
//!     .embedding(EmbeddingKind::Spectral)
//!     .learning_rate(0.05)
//!     .num_epochs(2)
//!     .from_seed(7)
//!     .build(field_dim, Some(&matrix))
//!     .unwrap();
//!
//! let loss = model.fit(&train).unwrap();
//! assert!(loss.is_finite());
//! ```
#![deny(missing_docs)]

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate tracing;

extern crate candle_core;
extern crate candle_nn;
extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rand_xorshift;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;

pub mod bundle;
pub mod catalog;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod matrix;
pub mod models;
pub mod sampling;
pub mod serving;

/// Alias for raw identifiers as they appear in interaction files.
///
/// After normalization every id is a non-negative global id.
pub type RawId = i64;
/// Alias for global ids once they index model parameters.
pub type FieldId = usize;
/// Alias for timestamps.
pub type Timestamp = i64;

/// Trait describing models that score rows of field ids.
pub trait Scorer {
    /// Number of distinct ids the model accepts.
    fn field_dim(&self) -> usize;
    /// Raw scores of `rows`, one per row.
    fn score(&self, rows: ndarray::ArrayView2<FieldId>) -> Result<ndarray::Array1<f32>, models::ModelError>;
}

impl Scorer for models::FactorizationMachine {
    fn field_dim(&self) -> usize {
        models::FactorizationMachine::field_dim(self)
    }

    fn score(&self, rows: ndarray::ArrayView2<FieldId>) -> Result<ndarray::Array1<f32>, models::ModelError> {
        models::FactorizationMachine::score(self, rows)
    }
}

//! Models module.
//!
//! Parameters are `candle` variables; gradients come from its autodiff.
use candle_core::{Device, Tensor};

use crate::data::DatasetError;
use crate::FieldId;

pub mod embedding;
pub mod factorization;
pub mod graph;
pub mod optim;

pub use self::embedding::{EmbeddingSource, PlainEmbedding};
pub use self::factorization::{FactorizationMachine, Hyperparameters};
pub use self::graph::{Convolution, GraphEmbedding};

/// Errors raised when building or querying a model.
#[derive(Debug, Fail)]
pub enum ModelError {
    /// The model cannot perform the request in its configuration.
    #[fail(display = "Unsupported operation: {}.", reason)]
    UnsupportedOperation {
        /// What was asked for.
        reason: String,
    },
    /// A field id is not below the model's `field_dim`.
    #[fail(
        display = "Field id {} is out of range for a model with {} fields.",
        id, field_dim
    )]
    IdOutOfRange {
        /// The offending id.
        id: FieldId,
        /// Number of ids the model accepts.
        field_dim: usize,
    },
    /// Hyperparameters that cannot produce a model.
    #[fail(display = "Invalid model configuration: {}.", reason)]
    InvalidConfiguration {
        /// What is wrong.
        reason: String,
    },
    /// A parameter or input does not have the expected shape.
    #[fail(
        display = "Shape mismatch for {}: expected {:?}, got {:?}.",
        name, expected, actual
    )]
    ShapeMismatch {
        /// Which parameter or input.
        name: String,
        /// Shape implied by the model.
        expected: (usize, usize),
        /// Shape found.
        actual: (usize, usize),
    },
    /// A tensor operation failed.
    #[fail(display = "{}", _0)]
    Tensor(#[cause] candle_core::Error),
}

impl From<candle_core::Error> for ModelError {
    fn from(error: candle_core::Error) -> Self {
        ModelError::Tensor(error)
    }
}

/// Errors raised while fitting a model.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// The model is in evaluation mode.
    #[fail(display = "Model is in evaluation mode; call train() before fitting.")]
    Frozen,
    /// There was nothing to fit on.
    #[fail(display = "No interactions to fit on.")]
    NoInteractions,
    /// The training data is unusable.
    #[fail(display = "{}", _0)]
    Data(#[cause] DatasetError),
    /// The model rejected the data or failed to step.
    #[fail(display = "{}", _0)]
    Model(#[cause] ModelError),
}

impl From<DatasetError> for FittingError {
    fn from(error: DatasetError) -> Self {
        FittingError::Data(error)
    }
}

impl From<ModelError> for FittingError {
    fn from(error: ModelError) -> Self {
        FittingError::Model(error)
    }
}

impl From<candle_core::Error> for FittingError {
    fn from(error: candle_core::Error) -> Self {
        FittingError::Model(ModelError::Tensor(error))
    }
}

/// The loss used for training the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Loss {
    /// Binary cross-entropy on the raw score.
    Logistic,
    /// Squared error against the label.
    Squared,
}

impl Loss {
    /// Mean loss of raw `scores` against `labels`, both of shape `(rows,)`.
    pub fn compute(self, scores: &Tensor, labels: &Tensor) -> Result<Tensor, candle_core::Error> {
        match self {
            // max(x, 0) - x * t + log(1 + exp(-|x|))
            Loss::Logistic => {
                let softplus = scores.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
                scores
                    .relu()?
                    .sub(&scores.mul(labels)?)?
                    .add(&softplus)?
                    .mean_all()
            }
            Loss::Squared => scores.sub(labels)?.sqr()?.mean_all(),
        }
    }
}

/// Optimizer used to train the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Plain stochastic gradient descent.
    Sgd,
    /// Adam, without weight decay.
    Adam,
}

/// Whether parameters may be updated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    /// Fitting is allowed and dropout is active while fitting.
    Training,
    /// Parameters are frozen.
    Evaluation,
}

/// How attention heads are combined into one embedding.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HeadMerge {
    /// Heads are concatenated; each head has `embed_dim / heads` dimensions.
    Concat,
    /// Heads are averaged; each head has `embed_dim` dimensions.
    Mean,
}

/// Graph attention settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AttentionConfig {
    /// Number of attention heads.
    pub heads: usize,
    /// Probability of dropping an attention coefficient while fitting.
    pub dropout: f32,
    /// Slope of the LeakyReLU applied to attention logits.
    pub negative_slope: f32,
    /// How heads are combined.
    pub merge: HeadMerge,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        AttentionConfig {
            heads: 8,
            dropout: 0.6,
            negative_slope: 0.2,
            merge: HeadMerge::Concat,
        }
    }
}

impl AttentionConfig {
    /// Set the number of heads.
    pub fn heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    /// Set the attention dropout.
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Set the LeakyReLU slope.
    pub fn negative_slope(mut self, negative_slope: f32) -> Self {
        self.negative_slope = negative_slope;
        self
    }

    /// Set how heads are merged.
    pub fn merge(mut self, merge: HeadMerge) -> Self {
        self.merge = merge;
        self
    }

    /// Dimensionality of a single head for the given embedding size.
    pub fn head_dim(&self, embed_dim: usize) -> Result<usize, ModelError> {
        if self.heads == 0 {
            return Err(ModelError::InvalidConfiguration {
                reason: "attention needs at least one head".to_owned(),
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfiguration {
                reason: format!("attention dropout {} is not in [0, 1)", self.dropout),
            });
        }

        match self.merge {
            HeadMerge::Mean => Ok(embed_dim),
            HeadMerge::Concat if embed_dim % self.heads == 0 => Ok(embed_dim / self.heads),
            HeadMerge::Concat => Err(ModelError::InvalidConfiguration {
                reason: format!(
                    "embedding dimension {} is not divisible by {} heads",
                    embed_dim, self.heads
                ),
            }),
        }
    }
}

/// Which embedding source feeds the pairwise interaction term.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum EmbeddingKind {
    /// A free lookup table.
    Plain,
    /// A graph convolution with symmetric degree normalization.
    Spectral,
    /// A graph attention convolution.
    Attention(AttentionConfig),
}

impl EmbeddingKind {
    /// Whether this kind needs an adjacency matrix.
    pub fn is_graph(&self) -> bool {
        match *self {
            EmbeddingKind::Plain => false,
            _ => true,
        }
    }
}

/// Ids as a `u32` index tensor.
pub(crate) fn id_tensor(ids: &[FieldId]) -> Result<Tensor, candle_core::Error> {
    let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
    let len = ids.len();
    Tensor::from_vec(ids, len, &Device::Cpu)
}

/// Glorot/Xavier uniform bound for a `fan_in × fan_out` weight.
pub(crate) fn glorot_bound(fan_in: usize, fan_out: usize) -> f32 {
    (6.0 / (fan_in + fan_out) as f32).sqrt()
}

//! Factorization machines over a single id space.
//!
//! A row of field ids `x` is scored as
//!
//! ```text
//! bias + sum_f w[x_f] + 0.5 * sum_d [(sum_f v[x_f, d])^2 - sum_f v[x_f, d]^2]
//! ```
//!
//! where the embeddings `v` come from an [`EmbeddingSource`]. The score is
//! built as a `candle` graph, so training backpropagates through the
//! embedding source, graph convolutions included.
use candle_core::{Device, Tensor};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use super::embedding::{EmbeddingSource, PlainEmbedding};
use super::graph::GraphEmbedding;
use super::optim::{Parameter, Trainer};
use super::{id_tensor, AttentionConfig, EmbeddingKind, FittingError, Loss, Mode, ModelError, Optimizer};
use crate::data::{Dataset, Examples};
use crate::matrix::AdjacencyMatrix;
use crate::FieldId;

/// Hyperparameters of a [`FactorizationMachine`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    embed_dim: usize,
    embedding: EmbeddingKind,
    learning_rate: f32,
    l2_penalty: f32,
    loss: Loss,
    optimizer: Optimizer,
    minibatch_size: usize,
    num_epochs: usize,
    rng: XorShiftRng,
}

impl Hyperparameters {
    /// Defaults for `embed_dim`-dimensional embeddings: a plain table,
    /// logistic loss and Adam at a learning rate of 0.001.
    pub fn new(embed_dim: usize) -> Self {
        Hyperparameters {
            embed_dim,
            embedding: EmbeddingKind::Plain,
            learning_rate: 0.001,
            l2_penalty: 0.0,
            loss: Loss::Logistic,
            optimizer: Optimizer::Adam,
            minibatch_size: 256,
            num_epochs: 10,
            rng: XorShiftRng::seed_from_u64(rand::thread_rng().gen()),
        }
    }

    /// Set the embedding source.
    pub fn embedding(mut self, embedding: EmbeddingKind) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the optimizer.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the minibatch size.
    pub fn minibatch_size(mut self, minibatch_size: usize) -> Self {
        self.minibatch_size = minibatch_size;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: u64) -> Self {
        self.rng = XorShiftRng::seed_from_u64(seed);
        self
    }

    /// Set hyperparameters randomly: useful for hyperparameter search.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let embed_dim = [8, 16, 32, 64][rng.gen_range(0..4)];
        let embedding = match rng.gen_range(0..3) {
            0 => EmbeddingKind::Plain,
            1 => EmbeddingKind::Spectral,
            _ => EmbeddingKind::Attention(
                AttentionConfig::default()
                    .heads([1, 2, 4][rng.gen_range(0..3)])
                    .dropout(rng.gen_range(0.0..0.7)),
            ),
        };
        let optimizer = if rng.gen::<bool>() {
            Optimizer::Adam
        } else {
            Optimizer::Sgd
        };

        Hyperparameters {
            embed_dim,
            embedding,
            learning_rate: 10.0_f32.powf(rng.gen_range(-4.0..-1.0)),
            l2_penalty: if rng.gen::<bool>() {
                0.0
            } else {
                10.0_f32.powf(rng.gen_range(-8.0..-3.0))
            },
            loss: Loss::Logistic,
            optimizer,
            minibatch_size: 1_usize << rng.gen_range(6_u32..11),
            num_epochs: rng.gen_range(1..20),
            rng: XorShiftRng::seed_from_u64(rng.gen()),
        }
    }

    /// Build a model over `field_dim` ids.
    ///
    /// Graph embeddings need the adjacency matrix of the training graph,
    /// which must span the same `field_dim` ids.
    pub fn build(
        mut self,
        field_dim: usize,
        matrix: Option<&AdjacencyMatrix>,
    ) -> Result<FactorizationMachine, ModelError> {
        if field_dim == 0 || self.embed_dim == 0 {
            return Err(ModelError::InvalidConfiguration {
                reason: format!(
                    "cannot build a model with {} fields and {} dimensions",
                    field_dim, self.embed_dim
                ),
            });
        }

        let embedding = match (self.embedding, matrix) {
            (EmbeddingKind::Plain, _) => EmbeddingSource::Plain(PlainEmbedding::new(
                field_dim,
                self.embed_dim,
                &mut self.rng,
            )?),
            (kind, Some(matrix)) => {
                if matrix.size() != field_dim {
                    return Err(ModelError::ShapeMismatch {
                        name: "adjacency matrix".to_owned(),
                        expected: (field_dim, field_dim),
                        actual: matrix.shape(),
                    });
                }
                EmbeddingSource::Graph(GraphEmbedding::new(
                    matrix,
                    self.embed_dim,
                    &kind,
                    &mut self.rng,
                )?)
            }
            (_, None) => {
                return Err(ModelError::InvalidConfiguration {
                    reason: "a graph embedding needs an adjacency matrix".to_owned(),
                })
            }
        };

        debug!(
            field_dim = field_dim,
            embed_dim = self.embed_dim,
            embedding = embedding.name(),
            "built factorization machine"
        );

        Ok(FactorizationMachine {
            field_dim,
            embed_dim: self.embed_dim,
            linear: Linear {
                weight: Parameter::zeros(field_dim, 1)?,
                bias: Parameter::zeros(1, 1)?,
            },
            embedding,
            loss: self.loss,
            optimizer: self.optimizer,
            learning_rate: self.learning_rate,
            l2_penalty: self.l2_penalty,
            minibatch_size: self.minibatch_size.max(1),
            num_epochs: self.num_epochs,
            mode: Mode::Training,
            rng: self.rng,
            trainer: None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Linear {
    weight: Parameter,
    bias: Parameter,
}

/// Tensors of a forward pass over `rows × fields` ids.
struct Forward {
    /// `(rows, fields, embed_dim)`.
    embeddings: Tensor,
    /// `(rows, fields)`.
    linear: Tensor,
    /// `(rows,)`.
    scores: Tensor,
}

/// A factorization machine scoring rows of field ids.
///
/// Optimizer state is created on the first fitted minibatch and is not
/// persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct FactorizationMachine {
    field_dim: usize,
    embed_dim: usize,
    linear: Linear,
    embedding: EmbeddingSource,
    loss: Loss,
    optimizer: Optimizer,
    learning_rate: f32,
    l2_penalty: f32,
    minibatch_size: usize,
    num_epochs: usize,
    mode: Mode,
    rng: XorShiftRng,
    #[serde(skip)]
    trainer: Option<Trainer>,
}

impl FactorizationMachine {
    /// Number of ids the model accepts.
    pub fn field_dim(&self) -> usize {
        self.field_dim
    }

    /// Width of the embeddings.
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Whether the model is training or frozen.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Allow parameters to be updated.
    pub fn train(&mut self) {
        self.mode = Mode::Training;
    }

    /// Freeze parameters.
    pub fn eval(&mut self) {
        self.mode = Mode::Evaluation;
    }

    /// The source of the pairwise embeddings.
    pub fn embedding(&self) -> &EmbeddingSource {
        &self.embedding
    }

    /// See [`EmbeddingSource::get_embedding_weight`].
    pub fn get_embedding_weight(&self) -> Result<Array2<f32>, ModelError> {
        self.embedding.get_embedding_weight()
    }

    /// Embedding of every id, as used in the pairwise term.
    pub fn node_embeddings(&self) -> Result<Array2<f32>, ModelError> {
        self.embedding.node_embeddings()
    }

    /// Per-id weights of the linear term.
    pub fn linear_weights(&self) -> Result<Array1<f32>, ModelError> {
        Ok(self.linear.weight.to_array()?.column(0).to_owned())
    }

    /// Global bias.
    pub fn bias(&self) -> Result<f32, ModelError> {
        Ok(self.linear.bias.to_array()?[(0, 0)])
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut parameters = vec![&self.linear.weight, &self.linear.bias];
        parameters.extend(self.embedding.parameters());
        parameters
    }

    /// Check that every parameter has the shape implied by `field_dim` and
    /// `embed_dim`.
    pub fn validate(&self) -> Result<(), ModelError> {
        let expected = [(self.field_dim, 1), (1, 1)];
        for (name, parameter, &shape) in izip!(
            &["linear weight", "linear bias"],
            &[&self.linear.weight, &self.linear.bias],
            &expected
        ) {
            if parameter.shape() != shape {
                return Err(ModelError::ShapeMismatch {
                    name: (*name).to_owned(),
                    expected: shape,
                    actual: parameter.shape(),
                });
            }
        }

        let source_shape = (self.embedding.field_dim(), self.embedding.embed_dim());
        if source_shape != (self.field_dim, self.embed_dim) {
            return Err(ModelError::ShapeMismatch {
                name: format!("{} embedding", self.embedding.name()),
                expected: (self.field_dim, self.embed_dim),
                actual: source_shape,
            });
        }

        match self.embedding {
            EmbeddingSource::Graph(ref graph) => graph.validate(),
            EmbeddingSource::Plain(_) => Ok(()),
        }
    }

    fn check_ids(&self, rows: ArrayView2<FieldId>) -> Result<(), ModelError> {
        match rows.iter().find(|&&id| id >= self.field_dim) {
            Some(&id) => Err(ModelError::IdOutOfRange {
                id,
                field_dim: self.field_dim,
            }),
            None => Ok(()),
        }
    }

    fn forward(
        &self,
        rows: ArrayView2<FieldId>,
        dropout: Option<&mut XorShiftRng>,
    ) -> Result<Forward, ModelError> {
        self.check_ids(rows)?;
        let (num_rows, num_fields) = rows.dim();

        // Embed each distinct id once, then gather per field.
        let ids: Vec<FieldId> = rows.iter().cloned().sorted().dedup().collect();
        let positions: Vec<FieldId> = rows
            .iter()
            .map(|id| ids.binary_search(id).unwrap_or_else(|idx| idx))
            .collect();

        let embeddings = self
            .embedding
            .forward(&ids, dropout)?
            .index_select(&id_tensor(&positions)?, 0)?
            .reshape((num_rows, num_fields, self.embed_dim))?;

        let sum = embeddings.sum(1)?;
        let pairwise = sum
            .sqr()?
            .sub(&embeddings.sqr()?.sum(1)?)?
            .sum(1)?
            .affine(0.5, 0.0)?;

        let flat: Vec<FieldId> = rows.iter().cloned().collect();
        let linear = self
            .linear
            .weight
            .as_tensor()
            .index_select(&id_tensor(&flat)?, 0)?
            .reshape((num_rows, num_fields))?;

        let scores = linear
            .sum(1)?
            .add(&pairwise)?
            .broadcast_add(&self.linear.bias.as_tensor().flatten_all()?)?;

        Ok(Forward {
            embeddings,
            linear,
            scores,
        })
    }

    /// Raw scores of `rows`, one per row of field ids.
    ///
    /// Scoring never applies dropout.
    pub fn score(&self, rows: ArrayView2<FieldId>) -> Result<Array1<f32>, ModelError> {
        if rows.is_empty() {
            self.check_ids(rows)?;
            return Ok(Array1::from_elem(rows.nrows(), self.bias()?));
        }

        Ok(Array1::from(self.forward(rows, None)?.scores.to_vec1::<f32>()?))
    }

    /// Mean loss of a minibatch and the objective to minimize, which adds
    /// the L2 penalty on the parameters the batch touched.
    fn batch_loss(
        &self,
        rows: ArrayView2<FieldId>,
        labels: ArrayView1<f32>,
        dropout: Option<&mut XorShiftRng>,
    ) -> Result<(Tensor, Tensor), ModelError> {
        let forward = self.forward(rows, dropout)?;
        let targets = Tensor::from_vec(labels.to_vec(), labels.len(), &Device::Cpu)?;
        let loss = self.loss.compute(&forward.scores, &targets)?;

        if self.l2_penalty <= 0.0 {
            return Ok((loss.clone(), loss));
        }

        let scale = f64::from(self.l2_penalty) / labels.len() as f64;
        let penalty = forward
            .embeddings
            .sqr()?
            .sum_all()?
            .add(&forward.linear.sqr()?.sum_all()?)?
            .affine(scale, 0.0)?;
        let objective = loss.add(&penalty)?;

        Ok((loss, objective))
    }

    /// Take one optimizer step on a minibatch and return its mean loss.
    pub fn fit_batch(
        &mut self,
        rows: ArrayView2<FieldId>,
        labels: ArrayView1<f32>,
    ) -> Result<f32, FittingError> {
        if self.mode == Mode::Evaluation {
            return Err(FittingError::Frozen);
        }
        if labels.is_empty() {
            return Err(FittingError::NoInteractions);
        }
        if rows.nrows() != labels.len() {
            return Err(ModelError::ShapeMismatch {
                name: "minibatch labels".to_owned(),
                expected: (rows.nrows(), 1),
                actual: (labels.len(), 1),
            }
            .into());
        }

        let mut rng = self.rng.clone();
        let result = self.batch_loss(rows, labels, Some(&mut rng));
        self.rng = rng;
        let (loss, objective) = result?;

        if self.trainer.is_none() {
            let vars = self.parameters().into_iter().map(|parameter| parameter.var().clone()).collect();
            self.trainer = Some(Trainer::new(self.optimizer, vars, self.learning_rate)?);
        }
        if let Some(ref mut trainer) = self.trainer {
            trainer.backward_step(&objective)?;
        }

        Ok(loss.to_scalar::<f32>()?)
    }

    /// Run one shuffled pass over `examples` and return the mean loss.
    pub fn fit_epoch(&mut self, examples: &mut Examples) -> Result<f32, FittingError> {
        if self.mode == Mode::Evaluation {
            return Err(FittingError::Frozen);
        }
        if examples.is_empty() {
            return Err(FittingError::NoInteractions);
        }
        if let Some(id) = examples.max_id() {
            if id >= self.field_dim {
                return Err(ModelError::IdOutOfRange {
                    id,
                    field_dim: self.field_dim,
                }
                .into());
            }
        }

        examples.shuffle(&mut self.rng);

        let mut loss = 0.0;
        for batch in examples.iter_minibatch(self.minibatch_size) {
            loss += self.fit_batch(batch.fields, batch.labels)? * batch.len() as f32;
        }

        Ok(loss / examples.len() as f32)
    }

    /// Fit the model on a normalized dataset, returning the mean loss of
    /// the last epoch.
    pub fn fit(&mut self, dataset: &Dataset) -> Result<f32, FittingError> {
        if self.mode == Mode::Evaluation {
            return Err(FittingError::Frozen);
        }

        let mut examples = dataset.to_examples()?;
        if examples.is_empty() {
            return Err(FittingError::NoInteractions);
        }

        let mut loss = 0.0;
        for epoch in 0..self.num_epochs {
            loss = self.fit_epoch(&mut examples)?;
            debug!(epoch = epoch, loss = loss, "finished epoch");
        }

        Ok(loss)
    }
}

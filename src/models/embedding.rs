//! Embedding sources feeding the pairwise interaction term.
use candle_core::Tensor;
use candle_nn::{Embedding, Module};
use ndarray::Array2;
use rand::Rng;
use rand_xorshift::XorShiftRng;

use super::graph::GraphEmbedding;
use super::optim::Parameter;
use super::{id_tensor, ModelError};
use crate::FieldId;

/// A `field_dim × embed_dim` lookup table.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlainEmbedding {
    table: Parameter,
}

impl PlainEmbedding {
    /// Glorot-uniform initialised table.
    pub fn new<R: Rng>(field_dim: usize, embed_dim: usize, rng: &mut R) -> Result<Self, ModelError> {
        Ok(PlainEmbedding {
            table: Parameter::glorot(field_dim, embed_dim, field_dim, embed_dim, rng)?,
        })
    }

    /// A table holding `table`.
    pub fn from_table(table: Array2<f32>) -> Result<Self, ModelError> {
        Ok(PlainEmbedding {
            table: Parameter::new(table)?,
        })
    }

    /// The underlying table.
    pub fn weight(&self) -> &Parameter {
        &self.table
    }

    /// Rows of the table for `ids`.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor, ModelError> {
        let (_, embed_dim) = self.table.shape();
        let lookup = Embedding::new(self.table.as_tensor().clone(), embed_dim);

        Ok(lookup.forward(ids)?)
    }

    /// The trainable table.
    pub fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.table]
    }

    /// The trainable table, mutably.
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.table]
    }
}

/// Where the embedding vectors of the factorization machine come from.
#[derive(Debug, Serialize, Deserialize)]
pub enum EmbeddingSource {
    /// A free lookup table.
    Plain(PlainEmbedding),
    /// One graph convolution over the interaction graph.
    Graph(GraphEmbedding),
}

impl EmbeddingSource {
    /// Number of ids with an embedding.
    pub fn field_dim(&self) -> usize {
        match *self {
            EmbeddingSource::Plain(ref plain) => plain.weight().shape().0,
            EmbeddingSource::Graph(ref graph) => graph.field_dim(),
        }
    }

    /// Width of an embedding.
    pub fn embed_dim(&self) -> usize {
        match *self {
            EmbeddingSource::Plain(ref plain) => plain.weight().shape().1,
            EmbeddingSource::Graph(ref graph) => graph.embed_dim(),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match *self {
            EmbeddingSource::Plain(_) => "plain",
            EmbeddingSource::Graph(ref graph) => graph.name(),
        }
    }

    /// The `field_dim × embed_dim` weight matrix behind the embeddings.
    pub fn get_embedding_weight(&self) -> Result<Array2<f32>, ModelError> {
        match *self {
            EmbeddingSource::Plain(ref plain) => plain.weight().to_array(),
            EmbeddingSource::Graph(ref graph) => graph.get_embedding_weight(),
        }
    }

    /// Embeddings of every id, without dropout.
    pub fn node_embeddings(&self) -> Result<Array2<f32>, ModelError> {
        let ids: Vec<FieldId> = (0..self.field_dim()).collect();
        let embeddings = self.forward(&ids, None)?;

        Array2::from_shape_vec(
            (ids.len(), self.embed_dim()),
            embeddings.flatten_all()?.to_vec1::<f32>()?,
        )
        .map_err(|_| ModelError::ShapeMismatch {
            name: "node embeddings".to_owned(),
            expected: (ids.len(), self.embed_dim()),
            actual: embeddings.dims2().unwrap_or((0, 0)),
        })
    }

    /// Embeddings of `ids` as a `(ids.len(), embed_dim)` tensor.
    ///
    /// Dropout is applied when an rng is given.
    pub fn forward(&self, ids: &[FieldId], dropout: Option<&mut XorShiftRng>) -> Result<Tensor, ModelError> {
        match *self {
            EmbeddingSource::Plain(ref plain) => plain.forward(&id_tensor(ids)?),
            EmbeddingSource::Graph(ref graph) => graph.forward(ids, dropout),
        }
    }

    /// Every trainable parameter.
    pub fn parameters(&self) -> Vec<&Parameter> {
        match *self {
            EmbeddingSource::Plain(ref plain) => plain.parameters(),
            EmbeddingSource::Graph(ref graph) => graph.parameters(),
        }
    }

    /// Every trainable parameter, mutably.
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        match *self {
            EmbeddingSource::Plain(ref mut plain) => plain.parameters_mut(),
            EmbeddingSource::Graph(ref mut graph) => graph.parameters_mut(),
        }
    }
}

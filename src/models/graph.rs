//! Graph convolution embeddings over the user-item interaction graph.
//!
//! Node features are the identity matrix, so the convolution input of node
//! `j` is simply row `j` of the weight matrix. A forward pass gathers the
//! edges ending in the requested nodes and sums their messages with
//! `index_add`.
use candle_core::{DType, Device, Tensor, D};
use ndarray::Array2;
use rand::Rng;
use rand_xorshift::XorShiftRng;

use super::optim::Parameter;
use super::{id_tensor, AttentionConfig, EmbeddingKind, HeadMerge, ModelError};
use crate::matrix::{AdjacencyMatrix, Propagation};
use crate::FieldId;

fn check_shape(name: &str, parameter: &Parameter, expected: (usize, usize)) -> Result<(), ModelError> {
    if parameter.shape() != expected {
        return Err(ModelError::ShapeMismatch {
            name: name.to_owned(),
            expected,
            actual: parameter.shape(),
        });
    }
    Ok(())
}

/// Edges of the propagation operator ending in a list of requested nodes.
struct Edges {
    nodes: usize,
    /// Position of the edge's target in the requested list.
    targets: Vec<FieldId>,
    /// Global id of the target.
    target_ids: Vec<FieldId>,
    /// Global id of the source.
    sources: Vec<FieldId>,
    weights: Vec<f32>,
}

impl Edges {
    fn gather(propagation: &Propagation, ids: &[FieldId]) -> Self {
        let mut edges = Edges {
            nodes: ids.len(),
            targets: Vec::new(),
            target_ids: Vec::new(),
            sources: Vec::new(),
            weights: Vec::new(),
        };

        for (position, &id) in ids.iter().enumerate() {
            let (neighbors, weights) = propagation.row(id);
            for (&neighbor, &weight) in neighbors.iter().zip(weights) {
                edges.targets.push(position);
                edges.target_ids.push(id);
                edges.sources.push(neighbor);
                edges.weights.push(weight);
            }
        }

        edges
    }

    fn len(&self) -> usize {
        self.sources.len()
    }

    /// Sum per-edge `messages` into one row per requested node.
    fn aggregate(&self, messages: &Tensor) -> Result<Tensor, candle_core::Error> {
        let (_, width) = messages.dims2()?;
        Tensor::zeros((self.nodes, width), DType::F32, &Device::Cpu)?.index_add(
            &id_tensor(&self.targets)?,
            &messages.contiguous()?,
            0,
        )
    }
}

/// One graph convolution producing a `field_dim × embed_dim` embedding.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphEmbedding {
    propagation: Propagation,
    convolution: Convolution,
}

/// The convolution operator applied over the graph.
#[derive(Debug, Serialize, Deserialize)]
pub enum Convolution {
    /// Degree-normalized propagation.
    Spectral(SpectralConvolution),
    /// Multi-head attention over neighbors.
    Attention(AttentionConvolution),
}

impl GraphEmbedding {
    /// Build the embedding over `matrix` for a graph `kind`.
    pub fn new<R: Rng>(
        matrix: &AdjacencyMatrix,
        embed_dim: usize,
        kind: &EmbeddingKind,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let field_dim = matrix.size();

        let convolution = match *kind {
            EmbeddingKind::Plain => {
                return Err(ModelError::InvalidConfiguration {
                    reason: "a plain embedding has no graph convolution".to_owned(),
                })
            }
            EmbeddingKind::Spectral => {
                Convolution::Spectral(SpectralConvolution::new(field_dim, embed_dim, rng)?)
            }
            EmbeddingKind::Attention(config) => {
                Convolution::Attention(AttentionConvolution::new(field_dim, embed_dim, config, rng)?)
            }
        };

        Ok(GraphEmbedding {
            propagation: matrix.propagation(),
            convolution,
        })
    }

    /// Number of nodes in the graph.
    pub fn field_dim(&self) -> usize {
        self.propagation.size()
    }

    /// Width of the output embeddings.
    pub fn embed_dim(&self) -> usize {
        match self.convolution {
            Convolution::Spectral(ref conv) => conv.weight.shape().1,
            Convolution::Attention(ref conv) => conv.bias.shape().1,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self.convolution {
            Convolution::Spectral(_) => "spectral",
            Convolution::Attention(_) => "attention",
        }
    }

    /// The convolution operator.
    pub fn convolution(&self) -> &Convolution {
        &self.convolution
    }

    /// Check that parameter shapes agree with the propagation operator.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.propagation.is_well_formed() {
            return Err(ModelError::InvalidConfiguration {
                reason: "malformed propagation operator".to_owned(),
            });
        }

        let field_dim = self.field_dim();

        match self.convolution {
            Convolution::Spectral(ref conv) => {
                let embed_dim = conv.bias.shape().1;
                check_shape("spectral weight", &conv.weight, (field_dim, embed_dim))?;
                check_shape("spectral bias", &conv.bias, (1, embed_dim))
            }
            Convolution::Attention(ref conv) => {
                let heads = conv.config.heads;
                let head_dim = conv.head_dim;
                let embed_dim = conv.bias.shape().1;

                if conv.config.head_dim(embed_dim)? != head_dim {
                    return Err(ModelError::InvalidConfiguration {
                        reason: format!("head dimension {} does not match embedding", head_dim),
                    });
                }

                check_shape("attention weight", &conv.weight, (field_dim, heads * head_dim))?;
                check_shape("attention source", &conv.att_src, (heads, head_dim))?;
                check_shape("attention target", &conv.att_dst, (heads, head_dim))?;
                check_shape("attention bias", &conv.bias, (1, embed_dim))
            }
        }
    }

    /// The weight matrix in `(field_dim, embed_dim)` orientation.
    pub fn get_embedding_weight(&self) -> Result<Array2<f32>, ModelError> {
        match self.convolution {
            Convolution::Spectral(ref conv) => conv.weight.to_array(),
            Convolution::Attention(ref conv) => {
                if conv.config.merge == HeadMerge::Mean && conv.config.heads > 1 {
                    return Err(ModelError::UnsupportedOperation {
                        reason: format!(
                            "averaged attention over {} heads has no single weight matrix",
                            conv.config.heads
                        ),
                    });
                }
                conv.weight.to_array()
            }
        }
    }

    /// Embeddings of `ids`, `(ids.len(), embed_dim)`.
    ///
    /// Attention dropout is applied when an rng is given.
    pub fn forward(&self, ids: &[FieldId], dropout: Option<&mut XorShiftRng>) -> Result<Tensor, ModelError> {
        if ids.is_empty() {
            return Ok(Tensor::zeros((0, self.embed_dim()), DType::F32, &Device::Cpu)?);
        }

        let edges = Edges::gather(&self.propagation, ids);

        match self.convolution {
            Convolution::Spectral(ref conv) => conv.forward(&edges),
            Convolution::Attention(ref conv) => conv.forward(&edges, dropout),
        }
    }

    /// Every trainable parameter.
    pub fn parameters(&self) -> Vec<&Parameter> {
        match self.convolution {
            Convolution::Spectral(ref conv) => vec![&conv.weight, &conv.bias],
            Convolution::Attention(ref conv) => vec![&conv.weight, &conv.att_src, &conv.att_dst, &conv.bias],
        }
    }

    /// Every trainable parameter, mutably.
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        match self.convolution {
            Convolution::Spectral(ref mut conv) => vec![&mut conv.weight, &mut conv.bias],
            Convolution::Attention(ref mut conv) => vec![
                &mut conv.weight,
                &mut conv.att_src,
                &mut conv.att_dst,
                &mut conv.bias,
            ],
        }
    }
}

/// `Â W + b` with `Â` the normalized adjacency with self-loops.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpectralConvolution {
    weight: Parameter,
    bias: Parameter,
}

impl SpectralConvolution {
    fn new<R: Rng>(field_dim: usize, embed_dim: usize, rng: &mut R) -> Result<Self, ModelError> {
        Ok(SpectralConvolution {
            weight: Parameter::glorot(field_dim, embed_dim, field_dim, embed_dim, rng)?,
            bias: Parameter::zeros(1, embed_dim)?,
        })
    }

    fn forward(&self, edges: &Edges) -> Result<Tensor, ModelError> {
        let weights = Tensor::from_vec(edges.weights.clone(), (edges.len(), 1), &Device::Cpu)?;
        let messages = self
            .weight
            .as_tensor()
            .index_select(&id_tensor(&edges.sources)?, 0)?
            .broadcast_mul(&weights)?;

        Ok(edges.aggregate(&messages)?.broadcast_add(self.bias.as_tensor())?)
    }
}

/// Multi-head graph attention.
///
/// Each node attends over its neighbors and itself with coefficients
/// `softmax_j(LeakyReLU(a_src · h_j + a_dst · h_i))`, where `h_j` is row `j`
/// of the projection split into heads. Coefficients are dropped out during
/// training.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttentionConvolution {
    config: AttentionConfig,
    head_dim: usize,
    /// Projection in `(field_dim, heads * head_dim)` orientation.
    weight: Parameter,
    att_src: Parameter,
    att_dst: Parameter,
    bias: Parameter,
}

impl AttentionConvolution {
    fn new<R: Rng>(
        field_dim: usize,
        embed_dim: usize,
        config: AttentionConfig,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let head_dim = config.head_dim(embed_dim)?;
        let heads = config.heads;
        let width = heads * head_dim;

        Ok(AttentionConvolution {
            config,
            head_dim,
            weight: Parameter::glorot(field_dim, width, field_dim, width, rng)?,
            att_src: Parameter::glorot(heads, head_dim, heads, head_dim, rng)?,
            att_dst: Parameter::glorot(heads, head_dim, heads, head_dim, rng)?,
            bias: Parameter::zeros(1, embed_dim)?,
        })
    }

    /// Attention settings.
    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Projected features of `ids`, `(ids.len(), heads, head_dim)`.
    fn project(&self, ids: &[FieldId]) -> Result<Tensor, candle_core::Error> {
        self.weight
            .as_tensor()
            .index_select(&id_tensor(ids)?, 0)?
            .reshape((ids.len(), self.config.heads, self.head_dim))
    }

    fn leaky_relu(&self, logits: &Tensor) -> Result<Tensor, candle_core::Error> {
        let slope = f64::from(self.config.negative_slope);
        logits.relu()?.sub(&logits.neg()?.relu()?.affine(slope, 0.0)?)
    }

    /// Attention coefficients of every edge, `(edges, heads)`.
    fn attend(
        &self,
        edges: &Edges,
        sources: &Tensor,
        dropout: Option<&mut XorShiftRng>,
    ) -> Result<Tensor, ModelError> {
        let heads = self.config.heads;
        let num_edges = edges.len();

        let att_src = self.att_src.as_tensor().reshape((1, heads, self.head_dim))?;
        let att_dst = self.att_dst.as_tensor().reshape((1, heads, self.head_dim))?;
        let logits = sources
            .broadcast_mul(&att_src)?
            .sum(D::Minus1)?
            .add(&self.project(&edges.target_ids)?.broadcast_mul(&att_dst)?.sum(D::Minus1)?)?;
        let logits = self.leaky_relu(&logits)?;

        // Shift every node's logits by their maximum before exponentiating.
        let mut maxima = vec![std::f32::NEG_INFINITY; edges.nodes * heads];
        for (&target, row) in edges.targets.iter().zip(logits.to_vec2::<f32>()?) {
            for (slot, value) in maxima[target * heads..(target + 1) * heads].iter_mut().zip(row) {
                *slot = slot.max(value);
            }
        }
        let shift: Vec<f32> = edges
            .targets
            .iter()
            .flat_map(|&target| maxima[target * heads..(target + 1) * heads].to_vec())
            .collect();
        let exp = logits
            .sub(&Tensor::from_vec(shift, (num_edges, heads), &Device::Cpu)?)?
            .exp()?;

        let targets = id_tensor(&edges.targets)?;
        let denominators = edges.aggregate(&exp)?.index_select(&targets, 0)?;
        let attention = exp.div(&denominators)?;

        match dropout {
            Some(rng) if self.config.dropout > 0.0 => {
                let dropout = self.config.dropout;
                let keep = 1.0 / (1.0 - dropout);
                let mask: Vec<f32> = (0..num_edges * heads)
                    .map(|_| if rng.gen::<f32>() < dropout { 0.0 } else { keep })
                    .collect();

                Ok(attention.mul(&Tensor::from_vec(mask, (num_edges, heads), &Device::Cpu)?)?)
            }
            _ => Ok(attention),
        }
    }

    fn forward(&self, edges: &Edges, dropout: Option<&mut XorShiftRng>) -> Result<Tensor, ModelError> {
        let sources = self.project(&edges.sources)?;
        let attention = self.attend(edges, &sources, dropout)?;

        let messages = sources.broadcast_mul(&attention.unsqueeze(2)?)?;
        let messages = match self.config.merge {
            HeadMerge::Concat => messages.reshape((edges.len(), self.config.heads * self.head_dim))?,
            HeadMerge::Mean => messages.mean(1)?,
        };

        Ok(edges.aggregate(&messages)?.broadcast_add(self.bias.as_tensor())?)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn matrix() -> AdjacencyMatrix {
        // Users 0 and 1, items 2, 3 and 4.
        AdjacencyMatrix::from_edges(5, vec![(0, 2), (0, 3), (1, 3), (1, 4)]).unwrap()
    }

    fn attention(merge: HeadMerge, heads: usize) -> EmbeddingKind {
        EmbeddingKind::Attention(
            AttentionConfig::default()
                .heads(heads)
                .dropout(0.5)
                .merge(merge),
        )
    }

    fn dense(propagation: &Propagation) -> Array2<f32> {
        let size = propagation.size();
        let mut dense = Array2::<f32>::zeros((size, size));
        for row in 0..size {
            let (indices, weights) = propagation.row(row);
            for (&col, &norm) in indices.iter().zip(weights) {
                dense[(row, col)] = norm;
            }
        }
        dense
    }

    #[test]
    fn spectral_matches_dense_propagation() {
        let matrix = matrix();
        let mut rng = XorShiftRng::seed_from_u64(1);
        let graph = GraphEmbedding::new(&matrix, 4, &EmbeddingKind::Spectral, &mut rng).unwrap();

        let weight = graph.get_embedding_weight().unwrap();
        assert_eq!(weight.dim(), (5, 4));

        let expected = dense(&matrix.propagation()).dot(&weight);
        let embeddings = graph.forward(&[0, 1, 2, 3, 4], None).unwrap().to_vec2::<f32>().unwrap();
        for (row, expected) in embeddings.iter().zip(expected.outer_iter()) {
            for (x, y) in row.iter().zip(expected.iter()) {
                assert!((x - y).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn spectral_gradient_follows_the_propagation_columns() -> Result<(), ModelError> {
        let matrix = matrix();
        let mut rng = XorShiftRng::seed_from_u64(2);
        let graph = GraphEmbedding::new(&matrix, 3, &EmbeddingKind::Spectral, &mut rng)?;
        let ids = [0, 3, 4];

        let gradients = graph.forward(&ids, None)?.sum_all()?.backward()?;
        let weight = gradients
            .get(graph.parameters()[0].as_tensor())
            .map(|gradient| gradient.to_vec2::<f32>())
            .transpose()?
            .unwrap_or_default();
        let bias = gradients
            .get(graph.parameters()[1].as_tensor())
            .map(|gradient| gradient.to_vec2::<f32>())
            .transpose()?
            .unwrap_or_default();

        // d/dW_j of the summed output is the sum of Â[i, j] over requested i.
        let dense = dense(&matrix.propagation());
        assert_eq!(weight.len(), 5);
        for (node, row) in weight.iter().enumerate() {
            let expected: f32 = ids.iter().map(|&id| dense[(id, node)]).sum();
            assert!(row.iter().all(|x| (x - expected).abs() < 1e-5));
        }
        assert_eq!(bias, vec![vec![3.0; 3]]);

        Ok(())
    }

    #[test]
    fn attention_coefficients_are_a_distribution() -> Result<(), ModelError> {
        let matrix = matrix();
        let mut rng = XorShiftRng::seed_from_u64(5);
        let graph = GraphEmbedding::new(&matrix, 4, &attention(HeadMerge::Concat, 2), &mut rng)?;
        let conv = match *graph.convolution() {
            Convolution::Attention(ref conv) => conv,
            Convolution::Spectral(_) => panic!("expected attention"),
        };

        let ids = [0, 1, 3];
        let edges = Edges::gather(&graph.propagation, &ids);
        let coefficients = conv.attend(&edges, &conv.project(&edges.sources)?, None)?.to_vec2::<f32>()?;

        let mut totals = vec![vec![0.0_f32; 2]; ids.len()];
        for (&target, row) in edges.targets.iter().zip(&coefficients) {
            assert!(row.iter().all(|&x| x > 0.0));
            for (total, x) in totals[target].iter_mut().zip(row) {
                *total += x;
            }
        }
        for total in totals.iter().flatten() {
            assert!((total - 1.0).abs() < 1e-5);
        }

        Ok(())
    }

    #[test]
    fn attention_gradients_reach_every_parameter() -> Result<(), ModelError> {
        for &merge in &[HeadMerge::Concat, HeadMerge::Mean] {
            let mut rng = XorShiftRng::seed_from_u64(4);
            let graph = GraphEmbedding::new(&matrix(), 4, &attention(merge, 2), &mut rng)?;

            let embeddings = graph.forward(&[0, 3, 4], None)?;
            let gradients = embeddings.sqr()?.sum_all()?.backward()?;

            for parameter in graph.parameters() {
                let gradient = gradients
                    .get(parameter.as_tensor())
                    .map(|gradient| gradient.abs().and_then(|x| x.sum_all()))
                    .transpose()?
                    .map(|total| total.to_scalar::<f32>())
                    .transpose()?;
                assert!(gradient.map_or(false, |total| total > 0.0), "{:?} {:?}", merge, parameter);
            }
        }

        Ok(())
    }

    #[test]
    fn dropout_only_applies_with_an_rng() {
        let matrix = matrix();
        let mut rng = XorShiftRng::seed_from_u64(6);
        let graph = GraphEmbedding::new(&matrix, 8, &attention(HeadMerge::Concat, 4), &mut rng).unwrap();
        let ids: Vec<FieldId> = (0..5).collect();

        let first = graph.forward(&ids, None).unwrap().to_vec2::<f32>().unwrap();
        let second = graph.forward(&ids, None).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(first, second);

        let dropped = graph.forward(&ids, Some(&mut rng)).unwrap().to_vec2::<f32>().unwrap();
        assert_ne!(first, dropped);
    }

    #[test]
    fn embedding_weight_shapes() {
        let matrix = matrix();
        let mut rng = XorShiftRng::seed_from_u64(7);
        let all: Vec<FieldId> = (0..5).collect();

        let concat = GraphEmbedding::new(&matrix, 8, &attention(HeadMerge::Concat, 4), &mut rng).unwrap();
        assert_eq!(concat.get_embedding_weight().unwrap().dim(), (5, 8));
        assert_eq!(concat.forward(&all, None).unwrap().dims2().unwrap(), (5, 8));

        let single = GraphEmbedding::new(&matrix, 8, &attention(HeadMerge::Mean, 1), &mut rng).unwrap();
        assert_eq!(single.get_embedding_weight().unwrap().dim(), (5, 8));

        let averaged = GraphEmbedding::new(&matrix, 8, &attention(HeadMerge::Mean, 4), &mut rng).unwrap();
        match averaged.get_embedding_weight() {
            Err(ModelError::UnsupportedOperation { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(averaged.forward(&all, None).unwrap().dims2().unwrap(), (5, 8));
    }

    #[test]
    fn plain_kind_is_rejected() {
        let mut rng = XorShiftRng::seed_from_u64(8);
        assert!(GraphEmbedding::new(&matrix(), 4, &EmbeddingKind::Plain, &mut rng).is_err());
    }

    #[test]
    fn validation_checks_shapes() {
        let mut rng = XorShiftRng::seed_from_u64(9);
        let mut graph = GraphEmbedding::new(&matrix(), 4, &EmbeddingKind::Spectral, &mut rng).unwrap();
        assert!(graph.validate().is_ok());

        *graph.parameters_mut()[0] = Parameter::zeros(4, 4).unwrap();
        match graph.validate() {
            Err(ModelError::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, (5, 4));
                assert_eq!(actual, (4, 4));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}

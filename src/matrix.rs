//! Sparse adjacency matrices of the user-item interaction graph.
use crate::data::{Dataset, DatasetError, USER_COLUMN};
use crate::{FieldId, RawId};

/// Square, symmetric, binary matrix in compressed sparse row form.
///
/// Entry `(i, j)` is one iff some interaction links global ids `i` and `j`.
/// Built once from a dataset snapshot and never mutated afterwards: build a
/// new matrix if the dataset changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyMatrix {
    size: usize,
    indptr: Vec<usize>,
    indices: Vec<FieldId>,
}

fn check_id(id: RawId, column: usize, size: usize) -> Result<FieldId, DatasetError> {
    if id < 0 || id as usize >= size {
        Err(DatasetError::IdOutOfRange {
            column,
            id,
            bound: size,
        })
    } else {
        Ok(id as FieldId)
    }
}

impl AdjacencyMatrix {
    /// Build the `total × total` matrix of a normalized dataset, where
    /// `total` is the size of its id range.
    pub fn build(dataset: &Dataset) -> Result<Self, DatasetError> {
        let size = dataset
            .idrange()
            .ok_or(DatasetError::NotNormalized)?
            .total();

        let matrix = Self::from_edges(
            size,
            dataset.data().iter().map(|x| (x.user_id(), x.item_id())),
        )?;

        debug!(size = size, nnz = matrix.nnz(), "built adjacency matrix");

        Ok(matrix)
    }

    /// Build a `size × size` matrix with both `(a, b)` and `(b, a)` set for
    /// every edge.
    pub fn from_edges<I>(size: usize, edges: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = (RawId, RawId)>,
    {
        let mut pairs = Vec::new();

        for (source, target) in edges {
            let source = check_id(source, USER_COLUMN, size)?;
            let target = check_id(target, USER_COLUMN + 1, size)?;
            pairs.push((source, target));
            pairs.push((target, source));
        }

        let mut indptr = vec![0; size + 1];
        for &(row, _) in &pairs {
            indptr[row + 1] += 1;
        }
        for idx in 1..indptr.len() {
            indptr[idx] += indptr[idx - 1];
        }

        let mut cursor = indptr.clone();
        let mut indices = vec![0; pairs.len()];
        for &(row, col) in &pairs {
            indices[cursor[row]] = col;
            cursor[row] += 1;
        }

        // Sort each row and drop repeated interactions.
        let mut compacted_indptr = Vec::with_capacity(size + 1);
        let mut compacted = Vec::with_capacity(indices.len());
        compacted_indptr.push(0);
        for row in 0..size {
            let neighbors = &mut indices[indptr[row]..indptr[row + 1]];
            neighbors.sort_unstable();

            let mut previous = None;
            for &col in neighbors.iter() {
                if previous != Some(col) {
                    compacted.push(col);
                    previous = Some(col);
                }
            }
            compacted_indptr.push(compacted.len());
        }

        Ok(AdjacencyMatrix {
            size,
            indptr: compacted_indptr,
            indices: compacted,
        })
    }

    /// Number of rows (and columns).
    pub fn size(&self) -> usize {
        self.size
    }

    /// `(size, size)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Sorted ids adjacent to `row`; empty for ids outside the matrix.
    pub fn neighbors(&self, row: FieldId) -> &[FieldId] {
        if row >= self.size {
            return &[];
        }

        &self.indices[self.indptr[row]..self.indptr[row + 1]]
    }

    /// Number of neighbors of `row`.
    pub fn degree(&self, row: FieldId) -> usize {
        self.neighbors(row).len()
    }

    /// Whether `(row, col)` is an edge.
    pub fn contains(&self, row: FieldId, col: FieldId) -> bool {
        self.neighbors(row).binary_search(&col).is_ok()
    }

    /// `1.0` for an edge, `0.0` otherwise.
    pub fn get(&self, row: FieldId, col: FieldId) -> f32 {
        if self.contains(row, col) {
            1.0
        } else {
            0.0
        }
    }

    /// Whether every edge has its reverse.
    pub fn is_symmetric(&self) -> bool {
        (0..self.size).all(|row| {
            self.neighbors(row)
                .iter()
                .all(|&col| self.contains(col, row))
        })
    }

    /// The symmetrically normalized operator `D^-1/2 (A + I) D^-1/2` used
    /// to propagate node features.
    pub fn propagation(&self) -> Propagation {
        let degrees: Vec<f32> = (0..self.size)
            .map(|row| (self.degree(row) + 1) as f32)
            .collect();

        let mut indptr = Vec::with_capacity(self.size + 1);
        let mut indices = Vec::with_capacity(self.nnz() + self.size);
        let mut weights = Vec::with_capacity(self.nnz() + self.size);
        indptr.push(0);

        for row in 0..self.size {
            let neighbors = self.neighbors(row);
            let split = neighbors.binary_search(&row).unwrap_or_else(|idx| idx);
            let with_loop = neighbors[..split]
                .iter()
                .chain(Some(&row))
                .chain(neighbors[split..].iter().skip_while(|&&col| col == row));

            for &col in with_loop {
                indices.push(col);
                weights.push(1.0 / (degrees[row] * degrees[col]).sqrt());
            }
            indptr.push(indices.len());
        }

        Propagation {
            size: self.size,
            indptr,
            indices,
            weights,
        }
    }
}

/// A weighted sparse operator over the id space, with self-loops.
///
/// The operator is symmetric, so it is its own transpose when gradients are
/// propagated back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Propagation {
    size: usize,
    indptr: Vec<usize>,
    indices: Vec<FieldId>,
    weights: Vec<f32>,
}

impl Propagation {
    /// Number of rows.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored weights, self-loops included.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Neighbors of `row` (itself included) and their weights.
    pub fn row(&self, row: FieldId) -> (&[FieldId], &[f32]) {
        let span = self.indptr[row]..self.indptr[row + 1];
        (&self.indices[span.clone()], &self.weights[span])
    }

    /// Whether the compressed layout is internally consistent.
    pub fn is_well_formed(&self) -> bool {
        self.indptr.len() == self.size + 1
            && self.indices.len() == self.weights.len()
            && self.indptr.last() == Some(&self.indices.len())
            && self.indptr.windows(2).all(|pair| pair[0] <= pair[1])
            && self.indices.iter().all(|&col| col < self.size)
    }
}

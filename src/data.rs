//! Interaction datasets and the id space they live in.
use std::hash::Hasher;
use std::ops::{Index, Range};

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::Rng;

use siphasher::sip::SipHasher;

use crate::matrix::AdjacencyMatrix;
use crate::sampling::{self, NegativeSampling};
use crate::{FieldId, RawId, Timestamp};

/// Number of id columns in an interaction: user and item.
pub const NUM_COLUMNS: usize = 2;
/// Column holding user ids.
pub const USER_COLUMN: usize = 0;
/// Column holding item ids.
pub const ITEM_COLUMN: usize = 1;
/// Timestamp stored for rows whose source had none.
pub const MISSING_TIMESTAMP: Timestamp = -1;

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// A raw id is negative or not an integer.
    #[fail(
        display = "Invalid id {:?} in column {}: ids must be non-negative integers.",
        value, column
    )]
    InvalidId {
        /// Column of the offending id.
        column: usize,
        /// The id as it was read.
        value: String,
    },
    /// An id lands outside the interval reserved for its column.
    #[fail(
        display = "Id {} in column {} lies outside its id interval (must be below {}).",
        id, column, bound
    )]
    IdOutOfRange {
        /// Column of the offending id.
        column: usize,
        /// The shifted id.
        id: RawId,
        /// Exclusive upper bound of the column's interval.
        bound: usize,
    },
    /// A row of a raw interaction file could not be parsed.
    #[fail(display = "Malformed interaction on line {}: {}.", line, reason)]
    MalformedRow {
        /// One-based line number.
        line: u64,
        /// What was wrong with it.
        reason: String,
    },
    /// Offsets were supplied for a different number of columns.
    #[fail(
        display = "Id offsets cover {} columns but interactions have {}.",
        expected, actual
    )]
    ColumnMismatch {
        /// Number of columns the offsets describe.
        expected: usize,
        /// Number of id columns in the data.
        actual: usize,
    },
    /// The operation needs normalized ids.
    #[fail(display = "Dataset ids have not been normalized.")]
    NotNormalized,
    /// The dataset has no interactions.
    #[fail(display = "Dataset contains no interactions.")]
    Empty,
    /// No non-interacting item was found within the retry bound.
    #[fail(
        display = "No non-interacting item found for user {} after {} attempts.",
        user_id, attempts
    )]
    SamplingExhaustion {
        /// The user being sampled for.
        user_id: FieldId,
        /// Number of draws made.
        attempts: usize,
    },
}

/// A single (user, item, label, timestamp) row.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    user_id: RawId,
    item_id: RawId,
    label: f32,
    timestamp: Timestamp,
}

impl Interaction {
    /// An interaction between raw user and item ids.
    pub fn new(user_id: RawId, item_id: RawId, label: f32, timestamp: Timestamp) -> Self {
        Interaction {
            user_id,
            item_id,
            label,
            timestamp,
        }
    }

    /// Raw, or once normalized global, user id.
    pub fn user_id(&self) -> RawId {
        self.user_id
    }

    /// Raw, or once normalized global, item id.
    pub fn item_id(&self) -> RawId {
        self.item_id
    }

    /// `1.0` for an observed interaction, `0.0` for a sampled negative.
    pub fn label(&self) -> f32 {
        self.label
    }

    /// When the interaction happened, or [`MISSING_TIMESTAMP`].
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The id columns in order: `[user_id, item_id]`.
    pub fn fields(&self) -> [RawId; NUM_COLUMNS] {
        [self.user_id, self.item_id]
    }

    fn field_mut(&mut self, column: usize) -> &mut RawId {
        match column {
            USER_COLUMN => &mut self.user_id,
            _ => &mut self.item_id,
        }
    }
}

/// Number of ids reserved for each entity type.
///
/// Entity type `k` occupies `[sum(sizes[..k]), sum(sizes[..k + 1]))` of the
/// global id space. Intervals are contiguous and cover `[0, total())`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    sizes: Vec<usize>,
}

impl IdRange {
    /// An id range from the number of ids in each column.
    pub fn new(sizes: Vec<usize>) -> Self {
        IdRange { sizes }
    }

    /// Number of ids in each column.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Number of entity types.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Whether no column is present.
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// First global id of `column`.
    pub fn start(&self, column: usize) -> usize {
        self.sizes[..column].iter().sum()
    }

    /// One past the last global id of `column`.
    pub fn end(&self, column: usize) -> usize {
        self.sizes[..=column].iter().sum()
    }

    /// The half-open interval of global ids owned by `column`.
    pub fn interval(&self, column: usize) -> Range<usize> {
        self.start(column)..self.end(column)
    }

    /// Cumulative upper bounds of the intervals, e.g. `[943, 2625]` for
    /// 943 users and 1682 items.
    pub fn ends(&self) -> Vec<usize> {
        self.sizes
            .iter()
            .scan(0, |acc, size| {
                *acc += size;
                Some(*acc)
            })
            .collect()
    }

    /// Size of the whole id space.
    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }

    /// The entity type owning a global id.
    pub fn column_of(&self, id: FieldId) -> Option<usize> {
        self.ends().iter().position(|&end| id < end)
    }

    /// Offsets that map raw ids of each column into this range.
    pub fn id_diff(&self) -> IdDiff {
        IdDiff::new(
            (0..self.len()).map(|column| self.start(column)).collect(),
            self.total(),
        )
    }
}

/// Per-column offsets added to raw ids to place them in a shared id space
/// of `total` ids.
///
/// Column `k` may hold shifted ids in `[offset(k), bound(k))`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDiff {
    offsets: Vec<usize>,
    total: usize,
}

impl IdDiff {
    /// Offsets for each column of a space holding `total` ids.
    pub fn new(offsets: Vec<usize>, total: usize) -> Self {
        IdDiff { offsets, total }
    }

    /// The per-column offsets, in column order.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Offset added to raw ids of `column`.
    pub fn offset(&self, column: usize) -> usize {
        self.offsets[column]
    }

    /// Size of the shared id space.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Exclusive upper bound of shifted ids in `column`: the next column's
    /// offset, or the size of the space for the last column.
    pub fn bound(&self, column: usize) -> usize {
        self.offsets
            .get(column + 1)
            .cloned()
            .unwrap_or(self.total)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether there are no columns.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn column_maxima(interactions: &[Interaction]) -> [RawId; NUM_COLUMNS] {
    interactions
        .iter()
        .fold([RawId::min_value(); NUM_COLUMNS], |mut maxima, x| {
            for (max, &id) in maxima.iter_mut().zip(x.fields().iter()) {
                *max = (*max).max(id);
            }
            maxima
        })
}

/// Shift the ids of `interactions` into a shared, contiguous id space.
///
/// Without `id_diff` the space is derived from the data: each column gets
/// `max(raw id) + 1` slots, stacked in column order. With `id_diff` the given
/// offsets are applied as they are and the returned range ends one past the
/// largest id actually present in each column, so a test split can reuse the
/// space of its train split even when it holds fewer ids. Every shifted id
/// must stay inside its column's interval of that space, including the last
/// column, which ends at the space's total.
///
/// Must be called exactly once on any set of rows: a second call shifts the
/// ids again.
pub fn normalize(
    interactions: &mut [Interaction],
    id_diff: Option<&IdDiff>,
) -> Result<(IdDiff, IdRange), DatasetError> {
    if interactions.is_empty() {
        return Err(DatasetError::Empty);
    }

    for interaction in interactions.iter() {
        for (column, &id) in interaction.fields().iter().enumerate() {
            if id < 0 {
                return Err(DatasetError::InvalidId {
                    column,
                    value: id.to_string(),
                });
            }
        }
    }

    let id_diff = match id_diff {
        Some(id_diff) => {
            if id_diff.len() != NUM_COLUMNS {
                return Err(DatasetError::ColumnMismatch {
                    expected: id_diff.len(),
                    actual: NUM_COLUMNS,
                });
            }
            id_diff.clone()
        }
        None => {
            let mut offset = 0;
            let offsets = column_maxima(interactions)
                .iter()
                .map(|&max| {
                    let start = offset;
                    offset += max as usize + 1;
                    start
                })
                .collect();
            IdDiff::new(offsets, offset)
        }
    };

    // Reject ids outside the space before touching any row.
    for interaction in interactions.iter() {
        for (column, &id) in interaction.fields().iter().enumerate() {
            let shifted = id + id_diff.offset(column) as RawId;
            let bound = id_diff.bound(column);
            if shifted >= bound as RawId {
                return Err(DatasetError::IdOutOfRange {
                    column,
                    id: shifted,
                    bound,
                });
            }
        }
    }

    for interaction in interactions.iter_mut() {
        for column in 0..NUM_COLUMNS {
            *interaction.field_mut(column) += id_diff.offset(column) as RawId;
        }
    }

    // Each column ends one past its largest shifted id; sizes are the gaps
    // between consecutive ends, so every id stays below the total.
    let mut previous_end = 0;
    let sizes = column_maxima(interactions)
        .iter()
        .map(|&max| {
            let end = max as usize + 1;
            let size = end.saturating_sub(previous_end);
            previous_end = previous_end.max(end);
            size
        })
        .collect();

    Ok((id_diff, IdRange::new(sizes)))
}

/// Split so that every user ends up entirely in either the train or the
/// test part.
pub fn user_based_split<R: Rng>(
    interactions: &mut Dataset,
    rng: &mut R,
    test_fraction: f32,
) -> (Dataset, Dataset) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let range = Uniform::new_inclusive(0, u64::max_value());
    let (key_0, key_1) = (range.sample(rng), range.sample(rng));

    let is_train = |x: &Interaction| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_i64(x.user_id());
        hasher.finish() % denominator > train_cutoff
    };

    interactions.split_by(is_train)
}

/// An ordered collection of interactions and, once normalized, their id range.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    interactions: Vec<Interaction>,
    idrange: Option<IdRange>,
    id_diff: Option<IdDiff>,
}

impl Dataset {
    /// A dataset of raw, not yet normalized, interactions.
    pub fn new(interactions: Vec<Interaction>) -> Self {
        Dataset {
            interactions,
            idrange: None,
            id_diff: None,
        }
    }

    /// The interactions, in order.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// The interaction at `idx`.
    pub fn get(&self, idx: usize) -> Option<&Interaction> {
        self.interactions.get(idx)
    }

    /// The id range established by [`Dataset::normalize_ids`].
    pub fn idrange(&self) -> Option<&IdRange> {
        self.idrange.as_ref()
    }

    /// The offsets applied by [`Dataset::normalize_ids`].
    pub fn id_diff(&self) -> Option<&IdDiff> {
        self.id_diff.as_ref()
    }

    /// Global ids that items of this dataset may take: from the item offset
    /// up to one past the largest item id present.
    pub fn item_interval(&self) -> Result<Range<usize>, DatasetError> {
        match (&self.id_diff, &self.idrange) {
            (&Some(ref id_diff), &Some(ref idrange)) => {
                Ok(id_diff.offset(ITEM_COLUMN)..idrange.end(ITEM_COLUMN))
            }
            _ => Err(DatasetError::NotNormalized),
        }
    }

    /// Remap raw ids into the global id space in place.
    ///
    /// Returns the offsets used; pass them to the `normalize_ids` call of
    /// every other dataset that must share this id space. See [`normalize`]
    /// for the exact rules. Call exactly once per dataset.
    pub fn normalize_ids(&mut self, id_diff: Option<&IdDiff>) -> Result<IdDiff, DatasetError> {
        let (id_diff, idrange) = normalize(&mut self.interactions, id_diff)?;

        debug!(
            sizes = ?idrange.sizes(),
            offsets = ?id_diff.offsets(),
            "normalized interaction ids"
        );

        self.idrange = Some(idrange);
        self.id_diff = Some(id_diff.clone());

        Ok(id_diff)
    }

    /// Build the symmetric adjacency matrix of the current rows.
    ///
    /// The matrix is a snapshot: rows added afterwards are not reflected.
    pub fn create_adjacency_matrix(&self) -> Result<AdjacencyMatrix, DatasetError> {
        AdjacencyMatrix::build(self)
    }

    /// Follow every positive row with `num_negatives` sampled non-interacting
    /// items.
    ///
    /// See [`Dataset::add_negative_sampling_with`].
    pub fn add_negative_sampling<R: Rng>(
        &mut self,
        matrix: &AdjacencyMatrix,
        num_negatives: usize,
        rng: &mut R,
    ) -> Result<(), DatasetError> {
        self.add_negative_sampling_with(matrix, &NegativeSampling::new(num_negatives), rng)
    }

    /// Augment the dataset with negatives drawn from its item interval.
    ///
    /// Each positive row (label above zero) is immediately followed by its
    /// negatives, so for all-positive data row `p * (num_negatives + 1)` is
    /// the `p`-th original row. Rows with label zero are kept but get no
    /// negatives. Negatives carry label 0 and the timestamp of their source
    /// row. Calling it again adds another `num_negatives` per positive row.
    pub fn add_negative_sampling_with<R: Rng>(
        &mut self,
        matrix: &AdjacencyMatrix,
        config: &NegativeSampling,
        rng: &mut R,
    ) -> Result<(), DatasetError> {
        let items = self.item_interval()?;

        let augmented =
            sampling::interleave_negatives(&self.interactions, matrix, items, config, rng)?;

        debug!(
            before = self.interactions.len(),
            after = augmented.len(),
            "added negative samples"
        );

        self.interactions = augmented;

        Ok(())
    }

    /// Shuffle the interactions in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.interactions.shuffle(rng);
    }

    /// Partition into the interactions matching `func` and the rest, keeping the id space.
    pub fn split_by<F: Fn(&Interaction) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<Interaction>, Vec<Interaction>) =
            self.interactions.iter().partition(|x| func(x));

        (
            Dataset {
                interactions: head,
                idrange: self.idrange.clone(),
                id_diff: self.id_diff.clone(),
            },
            Dataset {
                interactions: tail,
                idrange: self.idrange.clone(),
                id_diff: self.id_diff.clone(),
            },
        )
    }

    /// Convert normalized rows into model inputs.
    pub fn to_examples(&self) -> Result<Examples, DatasetError> {
        if self.idrange.is_none() {
            return Err(DatasetError::NotNormalized);
        }

        Examples::from_interactions(&self.interactions)
    }
}

impl Index<usize> for Dataset {
    type Output = Interaction;

    fn index(&self, idx: usize) -> &Interaction {
        &self.interactions[idx]
    }
}

impl From<Vec<Interaction>> for Dataset {
    fn from(data: Vec<Interaction>) -> Dataset {
        Dataset::new(data)
    }
}

/// Field ids of `interactions` as a `(rows, NUM_COLUMNS)` array.
pub fn field_ids(interactions: &[Interaction]) -> Result<Array2<FieldId>, DatasetError> {
    let mut fields = Array2::zeros((interactions.len(), NUM_COLUMNS));

    for (mut row, interaction) in fields.outer_iter_mut().zip(interactions) {
        for (column, (slot, &id)) in row.iter_mut().zip(interaction.fields().iter()).enumerate() {
            if id < 0 {
                return Err(DatasetError::InvalidId {
                    column,
                    value: id.to_string(),
                });
            }
            *slot = id as FieldId;
        }
    }

    Ok(fields)
}

/// Field ids and labels laid out for minibatch training.
#[derive(Clone, Debug)]
pub struct Examples {
    fields: Array2<FieldId>,
    labels: Array1<f32>,
}

impl Examples {
    /// Examples built from normalized interactions.
    pub fn from_interactions(interactions: &[Interaction]) -> Result<Self, DatasetError> {
        Ok(Examples {
            fields: field_ids(interactions)?,
            labels: interactions.iter().map(|x| x.label()).collect(),
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(rows, NUM_COLUMNS)` field ids.
    pub fn fields(&self) -> ArrayView2<FieldId> {
        self.fields.view()
    }

    /// One label per row.
    pub fn labels(&self) -> ArrayView1<f32> {
        self.labels.view()
    }

    /// Largest field id, if any.
    pub fn max_id(&self) -> Option<FieldId> {
        self.fields.iter().cloned().max()
    }

    /// Shuffle rows, keeping each row with its label.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        self.fields = self.fields.select(Axis(0), &order);
        self.labels = self.labels.select(Axis(0), &order);
    }

    /// Iterate over consecutive minibatches; the last one may be shorter.
    pub fn iter_minibatch(&self, minibatch_size: usize) -> MinibatchIterator {
        MinibatchIterator {
            examples: self,
            idx: 0,
            stop_idx: self.len(),
            minibatch_size: minibatch_size.max(1),
        }
    }
}

#[derive(Clone, Debug)]
/// Iterator over the minibatches of [`Examples`].
pub struct MinibatchIterator<'a> {
    examples: &'a Examples,
    idx: usize,
    stop_idx: usize,
    minibatch_size: usize,
}

#[derive(Debug)]
/// A view over consecutive rows of [`Examples`].
pub struct Minibatch<'a> {
    /// Field ids of the rows.
    pub fields: ArrayView2<'a, FieldId>,
    /// Labels of the rows.
    pub labels: ArrayView1<'a, f32>,
}

impl<'a> Minibatch<'a> {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the minibatch has no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<'a> Iterator for MinibatchIterator<'a> {
    type Item = Minibatch<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.stop_idx {
            return None;
        }

        let start = self.idx;
        let stop = (self.idx + self.minibatch_size).min(self.stop_idx);

        self.idx = stop;

        Some(Minibatch {
            fields: self.examples.fields.slice(s![start..stop, ..]),
            labels: self.examples.labels.slice(s![start..stop]),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn raw(rows: &[(RawId, RawId)]) -> Vec<Interaction> {
        rows.iter()
            .enumerate()
            .map(|(idx, &(user_id, item_id))| Interaction::new(user_id, item_id, 1.0, idx as Timestamp))
            .collect()
    }

    #[test]
    fn normalize_without_offsets_stacks_columns() {
        let mut dataset = Dataset::new(raw(&[(0, 3), (2, 0), (1, 5)]));

        let id_diff = dataset.normalize_ids(None).unwrap();
        let idrange = dataset.idrange().unwrap();

        assert_eq!(id_diff.offsets(), &[0, 3]);
        assert_eq!(idrange.sizes(), &[3, 6]);
        assert_eq!(idrange.ends(), vec![3, 9]);
        assert_eq!(idrange.total(), 9);

        for column in 0..NUM_COLUMNS {
            let ids: Vec<RawId> = dataset.data().iter().map(|x| x.fields()[column]).collect();
            let interval = idrange.interval(column);
            assert_eq!(*ids.iter().min().unwrap() as usize, interval.start);
            assert_eq!(*ids.iter().max().unwrap() as usize, interval.end - 1);
        }
    }

    #[test]
    fn normalize_with_offsets_reuses_space() {
        let mut train = Dataset::new(raw(&[(0, 3), (4, 0), (1, 7)]));
        let id_diff = train.normalize_ids(None).unwrap();
        let total = train.idrange().unwrap().total();

        let mut test = Dataset::new(raw(&[(0, 2), (3, 1)]));
        test.normalize_ids(Some(&id_diff)).unwrap();

        assert_eq!(test.idrange().unwrap().ends(), vec![4, 8]);
        assert_eq!(test.idrange().unwrap().total(), 8);
        assert_eq!(test.item_interval().unwrap(), 5..8);

        for interaction in test.data() {
            assert!(interaction.user_id() < id_diff.offset(ITEM_COLUMN) as RawId);
            assert!(interaction.item_id() >= id_diff.offset(ITEM_COLUMN) as RawId);
            assert!((interaction.item_id() as usize) < total);
        }
        assert_eq!(test[0], Interaction::new(0, 7, 1.0, 0));
    }

    #[test]
    fn normalize_rejects_negative_ids() {
        let mut dataset = Dataset::new(raw(&[(0, 3), (-1, 0)]));

        match dataset.normalize_ids(None) {
            Err(DatasetError::InvalidId { column, .. }) => assert_eq!(column, USER_COLUMN),
            other => panic!("unexpected result {:?}", other),
        }
        // Nothing was shifted.
        assert_eq!(dataset[0], Interaction::new(0, 3, 1.0, 0));
    }

    #[test]
    fn normalize_rejects_colliding_ids() {
        let mut train = Dataset::new(raw(&[(0, 0), (1, 1)]));
        let id_diff = train.normalize_ids(None).unwrap();

        let mut test = Dataset::new(raw(&[(5, 0)]));

        match test.normalize_ids(Some(&id_diff)) {
            Err(DatasetError::IdOutOfRange { column, bound, .. }) => {
                assert_eq!(column, USER_COLUMN);
                assert_eq!(bound, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn normalize_rejects_items_past_the_space() {
        let mut train = Dataset::new(raw(&[(0, 0), (1, 1)]));
        let id_diff = train.normalize_ids(None).unwrap();
        assert_eq!(id_diff.total(), 4);
        assert_eq!(train.idrange().unwrap().id_diff(), id_diff);

        let mut test = Dataset::new(raw(&[(0, 1), (1, 50)]));

        match test.normalize_ids(Some(&id_diff)) {
            Err(DatasetError::IdOutOfRange { column, id, bound }) => {
                assert_eq!(column, ITEM_COLUMN);
                assert_eq!(id, 52);
                assert_eq!(bound, 4);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(test[1], Interaction::new(1, 50, 1.0, 1));
        assert!(test.idrange().is_none());
    }

    #[test]
    fn normalize_rejects_empty() {
        let mut dataset = Dataset::new(Vec::new());
        assert!(dataset.normalize_ids(None).is_err());
    }

    #[test]
    fn minibatches_cover_all_examples() {
        let mut dataset = Dataset::new(raw(&[(0, 0), (1, 1), (2, 2), (3, 0), (1, 2)]));
        dataset.normalize_ids(None).unwrap();

        let mut examples = dataset.to_examples().unwrap();
        examples.shuffle(&mut XorShiftRng::seed_from_u64(3));

        let sizes: Vec<usize> = examples.iter_minibatch(2).map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let mut seen: Vec<FieldId> = examples
            .iter_minibatch(2)
            .flat_map(|batch| batch.fields.column(0).to_vec())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 1, 2, 3]);
    }

    #[test]
    fn examples_require_normalization() {
        let dataset = Dataset::new(raw(&[(0, 0)]));
        assert!(dataset.to_examples().is_err());
    }

    #[test]
    fn user_based_split_keeps_users_together() {
        let mut dataset = Dataset::new(
            (0..200)
                .map(|idx| Interaction::new(idx % 20, idx % 7, 1.0, idx))
                .collect(),
        );
        let mut rng = XorShiftRng::seed_from_u64(11);

        let (train, test) = user_based_split(&mut dataset, &mut rng, 0.3);

        assert_eq!(train.len() + test.len(), 200);
        for interaction in test.data() {
            assert!(train.data().iter().all(|x| x.user_id() != interaction.user_id()));
        }
    }
}

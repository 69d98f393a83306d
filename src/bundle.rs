//! Persisted models together with their id space and item catalog.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use crate::catalog::Catalog;
use crate::data::{IdRange, ITEM_COLUMN};
use crate::models::FactorizationMachine;
use crate::FieldId;

/// Bundle error types.
#[derive(Debug, Fail)]
pub enum BundleError {
    /// The bundle is unreadable, incomplete or inconsistent.
    #[fail(display = "Cannot load model bundle: {}.", reason)]
    Load {
        /// What went wrong.
        reason: String,
    },
}

fn load_error<T: ToString>(reason: T) -> BundleError {
    BundleError::Load {
        reason: reason.to_string(),
    }
}

/// Everything needed to serve recommendations from a trained model.
#[derive(Debug, Serialize)]
pub struct ModelBundle {
    model: FactorizationMachine,
    idrange: IdRange,
    items: Catalog,
}

/// A bundle as read from disk, before checking that it is complete.
#[derive(Deserialize)]
struct PartialBundle {
    model: Option<FactorizationMachine>,
    idrange: Option<IdRange>,
    items: Option<Catalog>,
}

impl ModelBundle {
    /// Bundle a model with the id range it was trained on and its catalog.
    pub fn new(
        model: FactorizationMachine,
        idrange: IdRange,
        items: Catalog,
    ) -> Result<Self, BundleError> {
        let bundle = ModelBundle {
            model,
            idrange,
            items,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    fn validate(&self) -> Result<(), BundleError> {
        self.model.validate().map_err(load_error)?;

        if self.idrange.len() <= ITEM_COLUMN {
            return Err(load_error(format!(
                "id range {:?} has no item interval",
                self.idrange.ends()
            )));
        }
        if self.model.field_dim() != self.idrange.total() {
            return Err(load_error(format!(
                "model has {} fields but the id range covers {}",
                self.model.field_dim(),
                self.idrange.total()
            )));
        }

        let interval = self.item_interval();
        if let Some(item) = self.items.items().iter().find(|x| !interval.contains(&x.id())) {
            return Err(load_error(format!(
                "catalog item {} lies outside the item interval {:?}",
                item.id(),
                interval
            )));
        }

        Ok(())
    }

    /// The trained model.
    pub fn model(&self) -> &FactorizationMachine {
        &self.model
    }

    /// Per-column sizes of the id space the model was trained on.
    pub fn idrange(&self) -> &IdRange {
        &self.idrange
    }

    /// Items that can be recommended.
    pub fn items(&self) -> &Catalog {
        &self.items
    }

    /// Items that can be recommended, mutably.
    pub fn items_mut(&mut self) -> &mut Catalog {
        &mut self.items
    }

    /// Global ids that belong to items.
    pub fn item_interval(&self) -> Range<FieldId> {
        self.idrange.interval(ITEM_COLUMN)
    }

    /// Split the bundle back into its components.
    pub fn into_parts(self) -> (FactorizationMachine, IdRange, Catalog) {
        (self.model, self.idrange, self.items)
    }

    /// Write the bundle as JSON.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), failure::Error> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Write the bundle to a JSON file at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.to_writer(&mut writer)?;
        writer.flush()?;

        info!(path = %path.as_ref().display(), "saved model bundle");

        Ok(())
    }

    /// Read a bundle; the model comes back in evaluation mode.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BundleError> {
        let partial: PartialBundle = serde_json::from_reader(reader).map_err(load_error)?;

        let mut model = partial.model.ok_or_else(|| load_error("missing model"))?;
        let idrange = partial.idrange.ok_or_else(|| load_error("missing id range"))?;
        let items = partial.items.ok_or_else(|| load_error("missing item catalog"))?;

        model.eval();

        ModelBundle::new(model, idrange, items)
    }

    /// Read a bundle from the JSON file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BundleError> {
        let file = File::open(path.as_ref())
            .map_err(|error| load_error(format!("{}: {}", path.as_ref().display(), error)))?;
        let bundle = Self::from_reader(BufReader::new(file))?;

        info!(
            path = %path.as_ref().display(),
            embedding = bundle.model.embedding().name(),
            items = bundle.items.len(),
            "loaded model bundle"
        );

        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;
    use crate::data::{Dataset, Interaction};
    use crate::models::{AttentionConfig, EmbeddingKind, Hyperparameters, Mode};

    fn trained(kind: EmbeddingKind) -> (FactorizationMachine, IdRange) {
        let interactions = (0..30)
            .map(|idx| Interaction::new(idx % 5, (idx * 7) % 9, 1.0, idx))
            .collect();
        let mut dataset = Dataset::new(interactions);
        dataset.normalize_ids(None).unwrap();
        let matrix = dataset.create_adjacency_matrix().unwrap();
        dataset
            .add_negative_sampling(&matrix, 1, &mut XorShiftRng::seed_from_u64(1))
            .unwrap();

        let idrange = dataset.idrange().unwrap().clone();
        let mut model = Hyperparameters::new(4)
            .embedding(kind)
            .num_epochs(2)
            .from_seed(2)
            .build(idrange.total(), Some(&matrix))
            .unwrap();
        model.fit(&dataset).unwrap();

        (model, idrange)
    }

    #[test]
    fn round_trip_preserves_scores() {
        for &kind in &[
            EmbeddingKind::Plain,
            EmbeddingKind::Spectral,
            EmbeddingKind::Attention(AttentionConfig::default().heads(2)),
        ] {
            let (model, idrange) = trained(kind);
            let items = Catalog::from_ids(idrange.interval(ITEM_COLUMN));
            let rows = arr2(&[[0, 5], [4, 13]]);
            let expected = model.score(rows.view()).unwrap();

            let bundle = ModelBundle::new(model, idrange, items).unwrap();
            let mut buffer = Vec::new();
            bundle.to_writer(&mut buffer).unwrap();

            let loaded = ModelBundle::from_reader(buffer.as_slice()).unwrap();
            assert_eq!(loaded.model().mode(), Mode::Evaluation);
            assert_eq!(loaded.idrange(), bundle.idrange());
            assert_eq!(loaded.items(), bundle.items());
            let scores = loaded.model().score(rows.view()).unwrap();
            for (score, expected) in scores.iter().zip(expected.iter()) {
                assert!((score - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn missing_components_fail_to_load() {
        let (model, idrange) = trained(EmbeddingKind::Plain);
        let mut document = serde_json::to_value(
            &ModelBundle::new(model, idrange.clone(), Catalog::from_ids(idrange.interval(ITEM_COLUMN)))
                .unwrap(),
        )
        .unwrap();
        document.as_object_mut().unwrap().remove("items");

        match ModelBundle::from_reader(document.to_string().as_bytes()) {
            Err(BundleError::Load { reason }) => assert!(reason.contains("catalog")),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }

        assert!(ModelBundle::from_reader("not json".as_bytes()).is_err());
        assert!(ModelBundle::load("/nonexistent/bundle.json").is_err());
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let (model, idrange) = trained(EmbeddingKind::Plain);
        let (other, _) = trained(EmbeddingKind::Plain);

        let wider = IdRange::new(vec![idrange.sizes()[0], idrange.sizes()[1] + 1]);
        assert!(ModelBundle::new(other, wider, Catalog::from_ids(0..0)).is_err());

        // User ids are not items.
        let users = Catalog::from_ids(0..2);
        assert!(ModelBundle::new(model, idrange, users).is_err());
    }
}

use ndarray::Array2;
use rayon::prelude::*;
use tracing::Span;

use super::{Device, ServingError};
use crate::bundle::ModelBundle;
use crate::catalog::CatalogItem;
use crate::data::{ITEM_COLUMN, NUM_COLUMNS, USER_COLUMN};
use crate::models::ModelError;
use crate::FieldId;

/// Exhaustive top-k recommendation over a bundle's catalog.
///
/// Every catalog item in the item interval is scored against the liked id, so
/// each query costs one model evaluation per catalog item.
pub struct Recommender<'a> {
    bundle: &'a ModelBundle,
    device: Device,
    candidates: Vec<&'a CatalogItem>,
    span: Span,
}

impl<'a> Recommender<'a> {
    /// A recommender over the catalog of `bundle`, scoring on `device`.
    pub fn new(bundle: &'a ModelBundle, device: &Device, span: Span) -> Self {
        let interval = bundle.item_interval();
        let candidates: Vec<&CatalogItem> = bundle
            .items()
            .items()
            .iter()
            .filter(|item| interval.contains(&item.id()))
            .collect();

        debug!(parent: &span, candidates = candidates.len(), "prepared recommender");

        Recommender {
            bundle,
            device: device.clone(),
            candidates,
            span,
        }
    }

    /// The `top_k` best scoring items for someone who liked `liked_id`, by
    /// descending score with ties broken by ascending id.
    pub fn recommend(
        &self,
        liked_id: FieldId,
        top_k: usize,
    ) -> Result<Vec<(&'a CatalogItem, f32)>, ServingError> {
        let _enter = self.span.enter();
        let model = self.bundle.model();

        if liked_id >= model.field_dim() {
            return Err(ServingError::UnknownId { id: liked_id });
        }

        let candidates: Vec<&'a CatalogItem> = self
            .candidates
            .iter()
            .filter(|item| item.id() != liked_id)
            .cloned()
            .collect();
        let batch_size = self.device.get_batch_size();

        let batches = self.device.install(|| {
            candidates
                .par_chunks(batch_size)
                .map(|chunk| {
                    let rows = Array2::from_shape_fn((chunk.len(), NUM_COLUMNS), |(row, column)| {
                        match column {
                            USER_COLUMN => liked_id,
                            ITEM_COLUMN => chunk[row].id(),
                            _ => unreachable!(),
                        }
                    });
                    model.score(rows.view()).map(|scores| scores.to_vec())
                })
                .collect::<Result<Vec<Vec<f32>>, ModelError>>()
        })?;

        let mut scored: Vec<(&'a CatalogItem, f32)> = candidates
            .into_iter()
            .zip(batches.into_iter().flatten())
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id().cmp(&b.0.id())));
        scored.truncate(top_k);

        debug!(
            liked_id = liked_id,
            top_k = top_k,
            returned = scored.len(),
            "scored recommendations"
        );

        Ok(scored)
    }
}

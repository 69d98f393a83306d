//! Looking up catalog items and recommending similar ones.
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::models::ModelError;
use crate::FieldId;

mod finder;
mod recommender;

pub use self::finder::Finder;
pub use self::recommender::Recommender;

/// Rows scored per task unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Serving error types.
#[derive(Debug, Fail)]
pub enum ServingError {
    /// No item matched a text query.
    #[fail(display = "No catalog item matches {:?}.", query)]
    NotFound {
        /// The query.
        query: String,
    },
    /// A requested search field is not a catalog column.
    #[fail(display = "Catalog has no field named {:?}.", field)]
    UnknownField {
        /// The requested field.
        field: String,
    },
    /// A liked id lies outside the model's id space.
    #[fail(display = "Id {} is unknown to the model.", id)]
    UnknownId {
        /// The liked id.
        id: FieldId,
    },
    /// The model failed to score.
    #[fail(display = "{}", _0)]
    Model(#[cause] ModelError),
}

impl From<ModelError> for ServingError {
    fn from(error: ModelError) -> Self {
        ServingError::Model(error)
    }
}

/// The thread pool numeric work runs on, and how it is batched.
#[derive(Clone, Debug)]
pub struct Device {
    pool: Arc<ThreadPool>,
    batch_size: usize,
}

impl Device {
    /// A pool of `num_threads` threads; zero picks one per CPU.
    pub fn new(num_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;

        Ok(Device {
            pool: Arc::new(pool),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Set the number of rows scored per task.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Rows scored per task.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// Threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

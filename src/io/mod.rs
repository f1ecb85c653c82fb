//! External collaborators: persistence store, classifier and batch files.

mod classifier;
mod input;
mod memory;
mod store;

pub use classifier::{CategoryClassifier, Classifier};
pub use input::read_batch_file;
pub use memory::{InMemoryStore, WriteMode};
pub use store::{BulkInsertOutcome, ProductStore, RejectedItem};

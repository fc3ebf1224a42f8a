mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        // Unique-index violations carry game semantics (taken code, repeated
        // submission) and must stay distinguishable from outages.
        if let Some(what) = err.duplicate_subject() {
            return StorageError::duplicate(what);
        }
        StorageError::unavailable(err.to_string(), err)
    }
}

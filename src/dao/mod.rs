/// Per-session change feed shared by the storage backends.
pub mod changes;
/// Database model definitions.
pub mod models;
/// Session state storage and retrieval operations.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;

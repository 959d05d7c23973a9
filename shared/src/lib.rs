pub mod db;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod utils;

pub use db::error::DatabaseError;
pub use db::pool::DatabasePool;
pub use db::repositories::{InMemoryMediaRecordStore, MediaRecordStore, PgMediaRecordRepository};
pub use models::{MediaRecord, MediaVariant, NewMediaRecord};
pub use storage::{FallbackStorage, LocalStorage, ObjectStorage, StorageError, StoredObject};

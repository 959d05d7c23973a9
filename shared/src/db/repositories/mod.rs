pub mod media_record;
pub mod memory;

pub use media_record::{MediaRecordStore, PgMediaRecordRepository};
pub use memory::InMemoryMediaRecordStore;

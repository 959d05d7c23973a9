pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue_processor;
pub mod scheduler;
pub mod sweeper;
pub mod validator;
pub mod variants;

pub use config::{ConfigError, MediaConfig, TargetSize};
pub use error::{PipelineError, ValidationError};
pub use pipeline::{IngestOutcome, MediaPipeline, ProcessOutcome};
pub use queue_processor::{ProcessingJob, ProcessingQueue, ProcessingWorker};
pub use scheduler::SweepScheduler;
pub use sweeper::{ReconciliationSweeper, SweepReport};
pub use validator::{ImageValidator, UploadedFile};
pub use variants::{fit_within, VariantGenerator};

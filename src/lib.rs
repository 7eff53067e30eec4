pub mod config;
pub mod course;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod queue;
pub mod testing;

pub use error::SyllabusError;
pub use extract::{Extraction, ExtractionRequest, OutputSchema, StructuredExtractor, UserContent};
pub use queue::{Pending, RatePolicy, RequestSerializer};

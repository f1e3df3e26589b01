pub mod engine;
pub mod records;
pub mod schema;


pub use engine::{EngineSettings, ExtractionEngine};
pub use records::{DetailRecord, SearchResultRecord};

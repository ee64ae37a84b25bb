//! Structural knowledge graph of Python repositories, used to detect
//! hallucinated imports, calls and attributes in generated code.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod index;
pub mod indexer;
pub mod query;
pub mod validator;

pub use config::Config;
pub use error::{HalgraphError, HalgraphResult};
pub use indexer::{IngestionSummary, Indexer, SourceFile};
pub use validator::report::ValidationReport;
pub use validator::Validator;

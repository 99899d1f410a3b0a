pub mod api;
pub mod config;
pub mod error;
pub mod ids;
pub mod schema;

pub use error::{Result, ToolRelayError};
pub use ids::*;
pub use schema::{ObjectSchema, ToolContract, ValidatedInput, ValidatedOutput, ValidationError};

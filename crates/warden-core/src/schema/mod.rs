mod parser;
pub mod registry;
pub mod types;
pub mod validation;

pub use parser::{ParseError, parse_schema};
pub use registry::{ActiveSchema, LoadOutcome, SchemaError, SchemaRegistry};
pub use validation::{
    BreakingChange, SchemaLimits, ValidationError, detect_breaking_changes, validate_schema,
    validate_schema_limits,
};

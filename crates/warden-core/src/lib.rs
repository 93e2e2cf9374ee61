pub mod cache;
pub mod engine;
pub mod schema;
pub mod tuple;

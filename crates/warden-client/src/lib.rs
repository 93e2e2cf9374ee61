pub mod client;
pub mod config;
pub mod error;
pub mod wire;

pub use client::{
    CheckRequest, CheckResponse, LookupPage, RelationshipPage, RelationshipQuery,
    RelationshipUpdate, SchemaVersion, UpdateOperation, WardenClient, WriteResponse,
};
pub use config::ClientOptions;
pub use error::ClientError;

pub mod keys;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    MAX_PAGE_SIZE, Page, RelationshipStore, SchemaStore, StorageError, StoredSchema, TuplePage,
    WriteSummary,
};

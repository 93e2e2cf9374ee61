use std::sync::Arc;

use parking_lot::RwLock;

use super::parser::{ParseError, parse_schema};
use super::types::Schema;
use super::validation::{
    BreakingChange, SchemaLimits, ValidationError, detect_breaking_changes, validate_schema,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An immutable, fully validated schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSchema {
    pub version: u64,
    pub source: String,
    pub schema: Schema,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub active: Arc<ActiveSchema>,
    pub breaking_changes: Vec<BreakingChange>,
}

/// Holds the active schema. Readers clone the `Arc` under a read lock held
/// only for that clone. A reader can wait behind the pointer swap in
/// `activate`, never behind parsing or validation, which run before the lock
/// is taken. Readers never see a partially built schema; a failed load leaves
/// the previous version in place.
pub struct SchemaRegistry {
    active: RwLock<Option<Arc<ActiveSchema>>>,
    limits: SchemaLimits,
}

impl SchemaRegistry {
    pub fn new(limits: SchemaLimits) -> Self {
        Self {
            active: RwLock::new(None),
            limits,
        }
    }

    pub fn active(&self) -> Option<Arc<ActiveSchema>> {
        self.active.read().clone()
    }

    /// Parses and validates without touching the active schema.
    pub fn compile(&self, source: &str) -> Result<Schema, SchemaError> {
        let schema = parse_schema(source)?;
        validate_schema(&schema, &self.limits).map_err(SchemaError::Invalid)?;
        Ok(schema)
    }

    /// Swaps in an already compiled schema.
    pub fn activate(&self, version: u64, source: String, schema: Schema) -> LoadOutcome {
        let next = Arc::new(ActiveSchema {
            version,
            source,
            schema,
        });

        let previous = {
            let mut guard = self.active.write();
            guard.replace(Arc::clone(&next))
        };

        let breaking_changes = previous
            .map(|prev| detect_breaking_changes(&prev.schema, &next.schema))
            .unwrap_or_default();
        for change in &breaking_changes {
            tracing::warn!(version, %change, "breaking schema change");
        }
        tracing::info!(version, types = next.schema.types.len(), "schema activated");

        LoadOutcome {
            active: next,
            breaking_changes,
        }
    }

    pub fn load(&self, version: u64, source: &str) -> Result<LoadOutcome, SchemaError> {
        let schema = self.compile(source)?;
        Ok(self.activate(version, source.to_string(), schema))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(SchemaLimits::default())
    }
}

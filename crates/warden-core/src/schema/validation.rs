use std::collections::HashMap;
use std::fmt;

use super::types::{RewriteRule, Schema, TypeDefinition};
use crate::tuple::is_valid_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLimits {
    pub max_types: usize,
    pub max_relations_per_type: usize,
    pub max_permissions_per_type: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_types: 50,
            max_relations_per_type: 30,
            max_permissions_per_type: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("too many types: {count} exceeds limit of {limit}")]
    TooManyTypes { count: usize, limit: usize },
    #[error("too many relations in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyRelations {
        type_name: String,
        count: usize,
        limit: usize,
    },
    #[error("too many permissions in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyPermissions {
        type_name: String,
        count: usize,
        limit: usize,
    },
    #[error("name '{0}' is longer than 64 characters")]
    NameTooLong(String),
    #[error("relation '{type_name}#{relation}' allows unknown subject type '{subject_type}'")]
    UnknownSubjectType {
        type_name: String,
        relation: String,
        subject_type: String,
    },
    #[error(
        "relation '{type_name}#{relation}' allows '{subject_type}#{subject_relation}', which is not defined"
    )]
    UnknownSubjectRelation {
        type_name: String,
        relation: String,
        subject_type: String,
        subject_relation: String,
    },
    #[error("permission '{type_name}#{permission}' references undefined '{name}'")]
    UnknownReference {
        type_name: String,
        permission: String,
        name: String,
    },
    #[error("permission '{type_name}#{permission}' follows '{tupleset}', which is not a relation")]
    ArrowOverPermission {
        type_name: String,
        permission: String,
        tupleset: String,
    },
    #[error(
        "permission '{type_name}#{permission}' follows '{tupleset}' to '{target_type}', which has no '{computed}'"
    )]
    ArrowTargetMissing {
        type_name: String,
        permission: String,
        tupleset: String,
        target_type: String,
        computed: String,
    },
    #[error("permission cycle: {0}")]
    Cycle(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakingChange {
    TypeRemoved { type_name: String },
    RelationRemoved { type_name: String, relation: String },
    SubjectTypesChanged { type_name: String, relation: String },
}

impl fmt::Display for BreakingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeRemoved { type_name } => write!(f, "type '{type_name}' removed"),
            Self::RelationRemoved {
                type_name,
                relation,
            } => write!(f, "relation '{type_name}#{relation}' removed"),
            Self::SubjectTypesChanged {
                type_name,
                relation,
            } => write!(f, "subject types of '{type_name}#{relation}' changed"),
        }
    }
}

/// Runs every structural check. Errors are collected rather than stopping at
/// the first one; cycle detection only runs once references resolve.
pub fn validate_schema(schema: &Schema, limits: &SchemaLimits) -> Result<(), Vec<ValidationError>> {
    let mut errors = match validate_schema_limits(schema, limits) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };
    check_name_lengths(schema, &mut errors);
    check_references(schema, &mut errors);
    if errors.is_empty()
        && let Some(cycle) = find_cycle(schema)
    {
        errors.push(ValidationError::Cycle(cycle));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_schema_limits(
    schema: &Schema,
    limits: &SchemaLimits,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if schema.types.len() > limits.max_types {
        errors.push(ValidationError::TooManyTypes {
            count: schema.types.len(),
            limit: limits.max_types,
        });
    }

    for type_def in &schema.types {
        if type_def.relations.len() > limits.max_relations_per_type {
            errors.push(ValidationError::TooManyRelations {
                type_name: type_def.name.clone(),
                count: type_def.relations.len(),
                limit: limits.max_relations_per_type,
            });
        }
        if type_def.permissions.len() > limits.max_permissions_per_type {
            errors.push(ValidationError::TooManyPermissions {
                type_name: type_def.name.clone(),
                count: type_def.permissions.len(),
                limit: limits.max_permissions_per_type,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_name_lengths(schema: &Schema, errors: &mut Vec<ValidationError>) {
    let names = schema.types.iter().flat_map(|t| {
        std::iter::once(&t.name)
            .chain(t.relations.iter().map(|r| &r.name))
            .chain(t.permissions.iter().map(|p| &p.name))
    });
    for name in names {
        if !is_valid_name(name) {
            errors.push(ValidationError::NameTooLong(name.clone()));
        }
    }
}

fn check_references(schema: &Schema, errors: &mut Vec<ValidationError>) {
    for type_def in &schema.types {
        for rel in &type_def.relations {
            for st in &rel.subject_types {
                let Some(subject_def) = schema.get_type(&st.type_name) else {
                    errors.push(ValidationError::UnknownSubjectType {
                        type_name: type_def.name.clone(),
                        relation: rel.name.clone(),
                        subject_type: st.type_name.clone(),
                    });
                    continue;
                };
                if let Some(ref subject_relation) = st.relation
                    && !subject_def.has_member(subject_relation)
                {
                    errors.push(ValidationError::UnknownSubjectRelation {
                        type_name: type_def.name.clone(),
                        relation: rel.name.clone(),
                        subject_type: st.type_name.clone(),
                        subject_relation: subject_relation.clone(),
                    });
                }
            }
        }
        for perm in &type_def.permissions {
            check_rule(schema, type_def, &perm.name, &perm.rule, errors);
        }
    }
}

fn check_rule(
    schema: &Schema,
    type_def: &TypeDefinition,
    permission: &str,
    rule: &RewriteRule,
    errors: &mut Vec<ValidationError>,
) {
    match rule {
        RewriteRule::Ref(name) => {
            if !type_def.has_member(name) {
                errors.push(ValidationError::UnknownReference {
                    type_name: type_def.name.clone(),
                    permission: permission.to_string(),
                    name: name.clone(),
                });
            }
        }
        RewriteRule::Union(children) | RewriteRule::Intersection(children) => {
            for child in children {
                check_rule(schema, type_def, permission, child, errors);
            }
        }
        RewriteRule::Arrow(tupleset, computed) => {
            let Some(rel) = type_def.relation(tupleset) else {
                let err = if type_def.permission(tupleset).is_some() {
                    ValidationError::ArrowOverPermission {
                        type_name: type_def.name.clone(),
                        permission: permission.to_string(),
                        tupleset: tupleset.clone(),
                    }
                } else {
                    ValidationError::UnknownReference {
                        type_name: type_def.name.clone(),
                        permission: permission.to_string(),
                        name: tupleset.clone(),
                    }
                };
                errors.push(err);
                return;
            };
            for st in &rel.subject_types {
                // Unknown subject types are reported by the relation pass.
                if let Some(target) = schema.get_type(&st.type_name)
                    && !target.has_member(computed)
                {
                    errors.push(ValidationError::ArrowTargetMissing {
                        type_name: type_def.name.clone(),
                        permission: permission.to_string(),
                        tupleset: tupleset.clone(),
                        target_type: st.type_name.clone(),
                        computed: computed.clone(),
                    });
                }
            }
        }
    }
}

type Node<'a> = (&'a str, &'a str);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over `(type, permission)` nodes. Edges are same-type
/// permission references and arrow hops; relations are leaves.
fn find_cycle(schema: &Schema) -> Option<String> {
    let mut marks: HashMap<Node<'_>, Mark> = HashMap::new();
    let mut stack: Vec<Node<'_>> = Vec::new();

    for type_def in &schema.types {
        for perm in &type_def.permissions {
            let node = (type_def.name.as_str(), perm.name.as_str());
            if let Some(cycle) = visit(schema, node, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    schema: &'a Schema,
    node: Node<'a>,
    marks: &mut HashMap<Node<'a>, Mark>,
    stack: &mut Vec<Node<'a>>,
) -> Option<String> {
    match marks.get(&node) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let path = stack[start..]
                .iter()
                .chain(std::iter::once(&node))
                .map(|(t, p)| format!("{t}#{p}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Some(path);
        }
        None => {}
    }

    marks.insert(node, Mark::Visiting);
    stack.push(node);

    let mut edges = Vec::new();
    if let Some(perm) = schema.get_permission(node.0, node.1) {
        collect_edges(schema, node.0, &perm.rule, &mut edges);
    }
    for next in edges {
        if let Some(cycle) = visit(schema, next, marks, stack) {
            return Some(cycle);
        }
    }

    stack.pop();
    marks.insert(node, Mark::Done);
    None
}

fn collect_edges<'a>(
    schema: &'a Schema,
    type_name: &'a str,
    rule: &'a RewriteRule,
    edges: &mut Vec<Node<'a>>,
) {
    match rule {
        RewriteRule::Ref(name) => {
            if schema.get_permission(type_name, name).is_some() {
                edges.push((type_name, name.as_str()));
            }
        }
        RewriteRule::Union(children) | RewriteRule::Intersection(children) => {
            for child in children {
                collect_edges(schema, type_name, child, edges);
            }
        }
        RewriteRule::Arrow(tupleset, computed) => {
            let Some(rel) = schema.get_relation(type_name, tupleset) else {
                return;
            };
            for st in &rel.subject_types {
                if schema.get_permission(&st.type_name, computed).is_some() {
                    edges.push((st.type_name.as_str(), computed.as_str()));
                }
            }
        }
    }
}

pub fn detect_breaking_changes(old: &Schema, new: &Schema) -> Vec<BreakingChange> {
    let mut changes = Vec::new();

    for old_type in &old.types {
        match new.get_type(&old_type.name) {
            None => {
                changes.push(BreakingChange::TypeRemoved {
                    type_name: old_type.name.clone(),
                });
            }
            Some(new_type) => {
                for old_rel in &old_type.relations {
                    match new_type.relation(&old_rel.name) {
                        None => {
                            changes.push(BreakingChange::RelationRemoved {
                                type_name: old_type.name.clone(),
                                relation: old_rel.name.clone(),
                            });
                        }
                        Some(new_rel) => {
                            if old_rel.subject_types != new_rel.subject_types {
                                changes.push(BreakingChange::SubjectTypesChanged {
                                    type_name: old_type.name.clone(),
                                    relation: old_rel.name.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    changes
}

use std::borrow::Cow;

use crate::tuple::Tuple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub types: Vec<TypeDefinition>,
}

impl Schema {
    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn get_relation(&self, type_name: &str, relation: &str) -> Option<&RelationDef> {
        self.get_type(type_name)?.relation(relation)
    }

    pub fn get_permission(&self, type_name: &str, permission: &str) -> Option<&PermissionDef> {
        self.get_type(type_name)?.permission(permission)
    }

    /// Looks up `name` on `type_name`, preferring permissions over relations.
    pub fn resolve(&self, type_name: &str, name: &str) -> Result<Member<'_>, ResolveError> {
        let type_def = self
            .get_type(type_name)
            .ok_or_else(|| ResolveError::UnknownType(type_name.to_string()))?;
        type_def
            .member(name)
            .ok_or_else(|| ResolveError::UnknownMember {
                type_name: type_name.to_string(),
                name: name.to_string(),
            })
    }

    /// The expression a check of `name` on `type_name` evaluates. A relation
    /// resolves to a reference to itself.
    pub fn resolve_permission_expr(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<Cow<'_, RewriteRule>, ResolveError> {
        match self.resolve(type_name, name)? {
            Member::Permission(perm) => Ok(Cow::Borrowed(&perm.rule)),
            Member::Relation(rel) => Ok(Cow::Owned(RewriteRule::Ref(rel.name.clone()))),
        }
    }

    /// Checks a tuple against the declared relations before it is stored.
    pub fn validate_tuple(&self, tuple: &Tuple) -> Result<(), TupleSchemaError> {
        let object_type = &tuple.object.object_type;
        let type_def = self
            .get_type(object_type)
            .ok_or_else(|| TupleSchemaError::UnknownType(object_type.clone()))?;

        let Some(relation) = type_def.relation(&tuple.relation) else {
            if type_def.permission(&tuple.relation).is_some() {
                return Err(TupleSchemaError::PermissionNotWritable {
                    type_name: object_type.clone(),
                    permission: tuple.relation.clone(),
                });
            }
            return Err(TupleSchemaError::UnknownRelation {
                type_name: object_type.clone(),
                relation: tuple.relation.clone(),
            });
        };

        if !relation.allows(tuple.subject.subject_type(), tuple.subject.relation()) {
            return Err(TupleSchemaError::SubjectNotAllowed {
                type_name: object_type.clone(),
                relation: tuple.relation.clone(),
                subject: match tuple.subject.relation() {
                    Some(rel) => format!("{}#{rel}", tuple.subject.subject_type()),
                    None => tuple.subject.subject_type().to_string(),
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub relations: Vec<RelationDef>,
    pub permissions: Vec<PermissionDef>,
}

impl TypeDefinition {
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDef> {
        self.permissions.iter().find(|p| p.name == name)
    }

    pub fn member(&self, name: &str) -> Option<Member<'_>> {
        self.permission(name)
            .map(Member::Permission)
            .or_else(|| self.relation(name).map(Member::Relation))
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.member(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub subject_types: Vec<SubjectTypeRef>,
}

impl RelationDef {
    pub fn allows(&self, subject_type: &str, subject_relation: Option<&str>) -> bool {
        self.subject_types
            .iter()
            .any(|st| st.type_name == subject_type && st.relation.as_deref() == subject_relation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTypeRef {
    pub type_name: String,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDef {
    pub name: String,
    pub rule: RewriteRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteRule {
    /// A relation or permission on the same type.
    Ref(String),
    Union(Vec<RewriteRule>),
    Intersection(Vec<RewriteRule>),
    /// `tupleset->computed`: follow `tupleset` to related objects and
    /// evaluate `computed` there.
    Arrow(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member<'a> {
    Relation(&'a RelationDef),
    Permission(&'a PermissionDef),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("'{name}' is not a relation or permission of type '{type_name}'")]
    UnknownMember { type_name: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleSchemaError {
    #[error("unknown object type '{0}'")]
    UnknownType(String),
    #[error("type '{type_name}' has no relation '{relation}'")]
    UnknownRelation { type_name: String, relation: String },
    #[error("'{permission}' is a permission of type '{type_name}' and cannot be written")]
    PermissionNotWritable {
        type_name: String,
        permission: String,
    },
    #[error("relation '{type_name}#{relation}' does not allow subjects of type '{subject}'")]
    SubjectNotAllowed {
        type_name: String,
        relation: String,
        subject: String,
    },
}

use std::collections::HashSet;

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use super::types::{
    PermissionDef, RelationDef, RewriteRule, Schema, SubjectTypeRef, TypeDefinition,
};

#[derive(Parser)]
#[grammar = "schema/grammar.pest"]
struct SchemaParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("mixed operators in permission expression: use parentheses to combine + and &")]
    MixedOperators,
    #[error("duplicate type: {0}")]
    DuplicateType(String),
    #[error("duplicate relation '{relation}' in type '{type_name}'")]
    DuplicateRelation { type_name: String, relation: String },
    #[error("duplicate permission '{permission}' in type '{type_name}'")]
    DuplicatePermission {
        type_name: String,
        permission: String,
    },
    #[error("'{name}' is declared as both a relation and a permission in type '{type_name}'")]
    NameClash { type_name: String, name: String },
}

pub fn parse_schema(input: &str) -> Result<Schema, ParseError> {
    let pairs =
        SchemaParser::parse(Rule::schema, input).map_err(|e| ParseError::Syntax(e.to_string()))?;

    let mut types = Vec::new();
    let mut seen_types = HashSet::new();

    for pair in pairs {
        if pair.as_rule() != Rule::schema {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::definition {
                let type_def = parse_definition(inner)?;
                if !seen_types.insert(type_def.name.clone()) {
                    return Err(ParseError::DuplicateType(type_def.name));
                }
                types.push(type_def);
            }
        }
    }

    Ok(Schema { types })
}

fn unexpected_rule(rule: Rule) -> ParseError {
    ParseError::Syntax(format!("unexpected rule: {rule:?}"))
}

fn missing_token(context: &str) -> ParseError {
    ParseError::Syntax(format!("missing token: {context}"))
}

fn next_str(inner: &mut Pairs<'_, Rule>, context: &str) -> Result<String, ParseError> {
    inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| missing_token(context))
}

fn parse_definition(pair: Pair<'_, Rule>) -> Result<TypeDefinition, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "definition name")?;
    let body = inner
        .next()
        .ok_or_else(|| missing_token("definition body"))?;

    let mut relations: Vec<RelationDef> = Vec::new();
    let mut permissions: Vec<PermissionDef> = Vec::new();

    for item in body.into_inner() {
        match item.as_rule() {
            Rule::relation_def => {
                let rel = parse_relation_def(item)?;
                if relations.iter().any(|r| r.name == rel.name) {
                    return Err(ParseError::DuplicateRelation {
                        type_name: name,
                        relation: rel.name,
                    });
                }
                if permissions.iter().any(|p| p.name == rel.name) {
                    return Err(ParseError::NameClash {
                        type_name: name,
                        name: rel.name,
                    });
                }
                relations.push(rel);
            }
            Rule::permission_def => {
                let perm = parse_permission_def(item)?;
                if permissions.iter().any(|p| p.name == perm.name) {
                    return Err(ParseError::DuplicatePermission {
                        type_name: name,
                        permission: perm.name,
                    });
                }
                if relations.iter().any(|r| r.name == perm.name) {
                    return Err(ParseError::NameClash {
                        type_name: name,
                        name: perm.name,
                    });
                }
                permissions.push(perm);
            }
            other => return Err(unexpected_rule(other)),
        }
    }

    Ok(TypeDefinition {
        name,
        relations,
        permissions,
    })
}

fn parse_relation_def(pair: Pair<'_, Rule>) -> Result<RelationDef, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "relation name")?;
    let subject_type_list = inner
        .next()
        .ok_or_else(|| missing_token("subject type list"))?;

    let subject_types = subject_type_list
        .into_inner()
        .map(parse_subject_type_ref)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RelationDef {
        name,
        subject_types,
    })
}

fn parse_subject_type_ref(pair: Pair<'_, Rule>) -> Result<SubjectTypeRef, ParseError> {
    let mut inner = pair.into_inner();
    let type_name = next_str(&mut inner, "subject type name")?;
    let relation = inner.next().map(|p| p.as_str().to_string());

    Ok(SubjectTypeRef {
        type_name,
        relation,
    })
}

fn parse_permission_def(pair: Pair<'_, Rule>) -> Result<PermissionDef, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "permission name")?;
    let expr = inner
        .next()
        .ok_or_else(|| missing_token("permission expression"))?;
    let rule = parse_permission_expr(expr)?;

    Ok(PermissionDef { name, rule })
}

fn parse_permission_expr(pair: Pair<'_, Rule>) -> Result<RewriteRule, ParseError> {
    let mut inner = pair.into_inner();
    let first = parse_permission_term(
        inner
            .next()
            .ok_or_else(|| missing_token("permission term"))?,
    )?;

    let mut op = None;
    let mut children = vec![first];

    while let Some(next_op) = inner.next() {
        let rule = next_op.as_rule();
        if *op.get_or_insert(rule) != rule {
            return Err(ParseError::MixedOperators);
        }
        children.push(parse_permission_term(
            inner
                .next()
                .ok_or_else(|| missing_token("permission term after operator"))?,
        )?);
    }

    match op {
        None => Ok(children.remove(0)),
        Some(Rule::union_op) => Ok(RewriteRule::Union(children)),
        Some(Rule::intersection_op) => Ok(RewriteRule::Intersection(children)),
        Some(other) => Err(unexpected_rule(other)),
    }
}

fn parse_permission_term(pair: Pair<'_, Rule>) -> Result<RewriteRule, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing_token("permission term content"))?;
    match inner.as_rule() {
        Rule::arrow_expr => {
            let mut parts = inner.into_inner();
            let tupleset = next_str(&mut parts, "arrow tupleset")?;
            let computed = next_str(&mut parts, "arrow computed")?;
            Ok(RewriteRule::Arrow(tupleset, computed))
        }
        Rule::identifier => Ok(RewriteRule::Ref(inner.as_str().to_string())),
        Rule::permission_expr => parse_permission_expr(inner),
        other => Err(unexpected_rule(other)),
    }
}

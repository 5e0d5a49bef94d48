// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::error::Error;
use crate::query::{
    Directive, PreparedFragment, PreparedQuery, PreparedSelection, PreparedSelectionSet, Query,
    QueryKind, SelectionSet, TYPENAME,
};
use crate::schema::{Object, Schema, Type, Union};

///
/// Validates a parsed query against the schema and returns its immutable prepared form.
///
/// The walk checks selection shapes against type kinds, parses every selection's arguments once
/// via the field's argument parser, recurses through fragments, and applies `@skip`/`@include`.
/// All failures are client errors, surfaced verbatim.
///
pub fn prepare_query(schema: &Schema, query: &Query) -> Result<PreparedQuery, Error> {
    let root = match query.kind {
        QueryKind::Query => schema.query.clone(),
        QueryKind::Mutation => schema
            .mutation
            .clone()
            .ok_or_else(|| Error::client("schema has no mutation type"))?,
        QueryKind::Subscription => {
            return Err(Error::client("subscriptions are not supported"));
        }
    };
    let mut preparer = Preparer::default();
    let selection_set = preparer.prepare_object(&root, Some(&query.selection_set))?;
    Ok(PreparedQuery {
        name: query.name.clone(),
        kind: query.kind,
        selection_set,
    })
}

///
/// One preparation pass. Results are memoized by (type, raw selection set) identity, so a
/// selection set shared between fragments prepares once and the prepared tree shares nodes the
/// way the query did.
///
#[derive(Default)]
struct Preparer {
    memo: HashMap<(usize, usize), Arc<PreparedSelectionSet>>,
}

impl Preparer {
    fn prepare_type(
        &mut self,
        field_type: &Type,
        selection_set: Option<&Arc<SelectionSet>>,
    ) -> Result<Option<Arc<PreparedSelectionSet>>, Error> {
        match field_type {
            Type::Scalar(scalar) => {
                if has_selections(selection_set) {
                    Err(Error::client(format!(
                        "scalar {} must have no selections",
                        scalar.name
                    )))
                } else {
                    Ok(None)
                }
            }
            Type::Enum(enum_type) => {
                if has_selections(selection_set) {
                    Err(Error::client(format!(
                        "scalar {} must have no selections",
                        enum_type.name
                    )))
                } else {
                    Ok(None)
                }
            }
            Type::Object(object) => Ok(Some(self.prepare_object(object, selection_set)?)),
            Type::Union(union_type) => Ok(Some(self.prepare_union(union_type, selection_set)?)),
            Type::List(inner) | Type::NonNull(inner) => self.prepare_type(inner, selection_set),
        }
    }

    fn prepare_object(
        &mut self,
        object: &Arc<Object>,
        selection_set: Option<&Arc<SelectionSet>>,
    ) -> Result<Arc<PreparedSelectionSet>, Error> {
        let selection_set = match selection_set {
            Some(selection_set) if !selection_set.is_empty() => selection_set,
            _ => {
                return Err(Error::client(format!(
                    "object {} must have selections",
                    object.name
                )));
            }
        };
        let memo_key = (
            Arc::as_ptr(object) as usize,
            Arc::as_ptr(selection_set) as usize,
        );
        if let Some(prepared) = self.memo.get(&memo_key) {
            return Ok(prepared.clone());
        }

        let mut selections = Vec::with_capacity(selection_set.selections.len());
        for selection in &selection_set.selections {
            if !should_include(&selection.directives)? {
                continue;
            }
            if selection.name == TYPENAME {
                if !selection.args.is_empty() {
                    return Err(Error::client("__typename takes no arguments"));
                }
                if has_selections(selection.selection_set.as_ref()) {
                    return Err(Error::client("__typename must have no selections"));
                }
                selections.push(Arc::new(PreparedSelection {
                    name: TYPENAME.to_string(),
                    alias: selection.alias.clone(),
                    args: Arc::new(Json::Null),
                    field: None,
                    selection_set: None,
                }));
                continue;
            }

            let field = object
                .fields
                .get(&selection.name)
                .cloned()
                .ok_or_else(|| Error::client(format!("unknown field {}", selection.name)))?;
            let args = match &field.parse_arguments {
                Some(parse) => parse(&selection.args).map_err(|err| {
                    Error::client(format!("error parsing args for {}: {}", selection.name, err))
                })?,
                None => {
                    if !selection.args.is_empty() {
                        return Err(Error::client(format!(
                            "error parsing args for {}: no arguments expected",
                            selection.name
                        )));
                    }
                    Json::Null
                }
            };
            let sub_selection = self.prepare_type(&field.field_type, selection.selection_set.as_ref())?;
            selections.push(Arc::new(PreparedSelection {
                name: selection.name.clone(),
                alias: selection.alias.clone(),
                args: Arc::new(args),
                field: Some(field),
                selection_set: sub_selection,
            }));
        }

        let mut fragments = Vec::with_capacity(selection_set.fragments.len());
        for fragment in &selection_set.fragments {
            if !should_include(&fragment.directives)? {
                continue;
            }
            if fragment.on != object.name {
                return Err(Error::client(format!(
                    "fragment on {} does not match object {}",
                    fragment.on, object.name
                )));
            }
            fragments.push(Arc::new(PreparedFragment {
                on: fragment.on.clone(),
                selection_set: self.prepare_object(object, Some(&fragment.selection_set))?,
            }));
        }

        let prepared = Arc::new(PreparedSelectionSet {
            selections,
            fragments,
        });
        self.memo.insert(memo_key, prepared.clone());
        Ok(prepared)
    }

    fn prepare_union(
        &mut self,
        union_type: &Arc<Union>,
        selection_set: Option<&Arc<SelectionSet>>,
    ) -> Result<Arc<PreparedSelectionSet>, Error> {
        let selection_set = match selection_set {
            Some(selection_set) if !selection_set.is_empty() => selection_set,
            _ => {
                return Err(Error::client(format!(
                    "union {} must have selections",
                    union_type.name
                )));
            }
        };
        let memo_key = (
            Arc::as_ptr(union_type) as usize,
            Arc::as_ptr(selection_set) as usize,
        );
        if let Some(prepared) = self.memo.get(&memo_key) {
            return Ok(prepared.clone());
        }

        let mut selections = Vec::new();
        for selection in &selection_set.selections {
            if !should_include(&selection.directives)? {
                continue;
            }
            if selection.name != TYPENAME {
                return Err(Error::client(format!(
                    "unions may only contain __typename and fragments, not {}",
                    selection.name
                )));
            }
            selections.push(Arc::new(PreparedSelection {
                name: TYPENAME.to_string(),
                alias: selection.alias.clone(),
                args: Arc::new(Json::Null),
                field: None,
                selection_set: None,
            }));
        }

        let mut fragments = Vec::with_capacity(selection_set.fragments.len());
        for fragment in &selection_set.fragments {
            if !should_include(&fragment.directives)? {
                continue;
            }
            let variant = union_type.variants.get(&fragment.on).ok_or_else(|| {
                Error::client(format!("unknown union variant {}", fragment.on))
            })?;
            fragments.push(Arc::new(PreparedFragment {
                on: fragment.on.clone(),
                selection_set: self.prepare_object(variant, Some(&fragment.selection_set))?,
            }));
        }

        let prepared = Arc::new(PreparedSelectionSet {
            selections,
            fragments,
        });
        self.memo.insert(memo_key, prepared.clone());
        Ok(prepared)
    }
}

fn has_selections(selection_set: Option<&Arc<SelectionSet>>) -> bool {
    selection_set.is_some_and(|selection_set| !selection_set.is_empty())
}

///
/// Evaluates `@skip`/`@include` on one selection or fragment spread. Both require a Boolean
/// `if` argument with no default.
///
fn should_include(directives: &[Directive]) -> Result<bool, Error> {
    let mut include = true;
    for directive in directives {
        match directive.name.as_str() {
            "skip" => {
                if required_condition(directive)? {
                    include = false;
                }
            }
            "include" => {
                if !required_condition(directive)? {
                    include = false;
                }
            }
            other => {
                return Err(Error::client(format!("unknown directive @{other}")));
            }
        }
    }
    Ok(include)
}

fn required_condition(directive: &Directive) -> Result<bool, Error> {
    match directive.args.get("if") {
        Some(Json::Bool(condition)) => Ok(*condition),
        Some(other) => Err(Error::client(format!(
            "argument \"if\" of directive @{} must be a Boolean, got {}",
            directive.name, other
        ))),
        None => Err(Error::client(format!(
            "required argument \"if\" missing for directive @{}",
            directive.name
        ))),
    }
}

// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::Arc;

use serde_json::Value as Json;

use crate::schema::{Args, Field};

/// The reserved introspection selection, resolved synchronously to the object's type name.
pub const TYPENAME: &str = "__typename";

/// The reserved alias under which a keyed object resolves its key field.
pub const KEY_ALIAS: &str = "__key";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Query,
    Mutation,
    Subscription,
}

///
/// A parsed query, as delivered by a parser. The engine takes the selection set opaquely and
/// type-checks it against a schema during preparation.
///
#[derive(Clone, Debug)]
pub struct Query {
    pub name: String,
    pub kind: QueryKind,
    pub selection_set: Arc<SelectionSet>,
}

#[derive(Clone, Debug, Default)]
pub struct SelectionSet {
    pub selections: Vec<Arc<Selection>>,
    pub fragments: Vec<Arc<Fragment>>,
}

#[derive(Clone, Debug)]
pub struct Selection {
    pub name: String,
    pub alias: String,
    pub args: serde_json::Map<String, Json>,
    pub selection_set: Option<Arc<SelectionSet>>,
    pub directives: Vec<Directive>,
}

#[derive(Clone, Debug)]
pub struct Fragment {
    pub on: String,
    pub selection_set: Arc<SelectionSet>,
    pub directives: Vec<Directive>,
}

#[derive(Clone, Debug)]
pub struct Directive {
    pub name: String,
    pub args: serde_json::Map<String, Json>,
}

impl SelectionSet {
    pub fn new() -> SelectionSet {
        SelectionSet::default()
    }

    pub fn select(mut self, selection: Selection) -> SelectionSet {
        self.selections.push(Arc::new(selection));
        self
    }

    pub fn fragment(mut self, fragment: Fragment) -> SelectionSet {
        self.fragments.push(Arc::new(fragment));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.fragments.is_empty()
    }
}

impl Selection {
    pub fn new(name: impl Into<String>) -> Selection {
        let name = name.into();
        Selection {
            alias: name.clone(),
            name,
            args: serde_json::Map::new(),
            selection_set: None,
            directives: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Selection {
        self.alias = alias.into();
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Json>) -> Selection {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn subselect(mut self, selection_set: SelectionSet) -> Selection {
        self.selection_set = Some(Arc::new(selection_set));
        self
    }

    pub fn directive(mut self, directive: Directive) -> Selection {
        self.directives.push(directive);
        self
    }
}

impl Fragment {
    pub fn on(type_name: impl Into<String>, selection_set: SelectionSet) -> Fragment {
        Fragment {
            on: type_name.into(),
            selection_set: Arc::new(selection_set),
            directives: Vec::new(),
        }
    }

    pub fn directive(mut self, directive: Directive) -> Fragment {
        self.directives.push(directive);
        self
    }
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Directive {
        Directive {
            name: name.into(),
            args: serde_json::Map::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Json>) -> Directive {
        self.args.insert(name.into(), value.into());
        self
    }
}

///
/// The immutable, type-checked form of a query: every selection matched to its field, every
/// argument parsed, every directive applied. Preparation guarantees the shapes execution relies
/// on (objects have selections, scalars have none, union members are reached via fragments).
///
pub struct PreparedQuery {
    pub name: String,
    pub kind: QueryKind,
    pub selection_set: Arc<PreparedSelectionSet>,
}

impl std::fmt::Debug for PreparedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedQuery")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("selection_set", &self.selection_set)
            .finish()
    }
}

#[derive(Default)]
pub struct PreparedSelectionSet {
    pub selections: Vec<Arc<PreparedSelection>>,
    pub fragments: Vec<Arc<PreparedFragment>>,
}

impl std::fmt::Debug for PreparedSelectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedSelectionSet")
            .field("selections", &self.selections)
            .field("fragments", &self.fragments)
            .finish()
    }
}

pub struct PreparedSelection {
    pub name: String,
    pub alias: String,
    pub args: Args,
    /// None only for `__typename`.
    pub field: Option<Arc<Field>>,
    pub selection_set: Option<Arc<PreparedSelectionSet>>,
}

impl std::fmt::Debug for PreparedSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedSelection")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("args", &self.args)
            .field("has_field", &self.field.is_some())
            .field("selection_set", &self.selection_set)
            .finish()
    }
}

pub struct PreparedFragment {
    pub on: String,
    pub selection_set: Arc<PreparedSelectionSet>,
}

impl std::fmt::Debug for PreparedFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedFragment")
            .field("on", &self.on)
            .field("selection_set", &self.selection_set)
            .finish()
    }
}

///
/// Inlines the fragments applying to `type_name` into one ordered selection list.
///
pub fn flatten(
    selection_set: &PreparedSelectionSet,
    type_name: &str,
) -> Vec<Arc<PreparedSelection>> {
    let mut flattened = Vec::with_capacity(selection_set.selections.len());
    flatten_into(selection_set, type_name, &mut flattened);
    flattened
}

fn flatten_into(
    selection_set: &PreparedSelectionSet,
    type_name: &str,
    out: &mut Vec<Arc<PreparedSelection>>,
) {
    out.extend(selection_set.selections.iter().cloned());
    for fragment in &selection_set.fragments {
        if fragment.on == type_name {
            flatten_into(&fragment.selection_set, type_name, out);
        }
    }
}

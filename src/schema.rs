// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::Error;
use crate::execute::ExecContext;
use crate::query::PreparedSelectionSet;

///
/// The schema consumer interface: everything the executor needs from the schema layer.
///
/// The engine never introspects user values. Sources and results are opaque JSON values, and
/// every behavior attached to a type or field is an explicit function object with one fixed
/// shape. How those functions are built (reflection, code generation, hand-wiring) is the
/// schema builder's concern.
///

/// Arguments of one selection, parsed once during preparation.
pub type Args = Arc<Json>;

pub type ResolverResult = BoxFuture<'static, Result<Json, Error>>;
pub type BatchResolverResult = BoxFuture<'static, Result<Vec<Json>, Error>>;

/// Resolves a field for a single source.
pub type ResolveFn =
    Arc<dyn Fn(ExecContext, Json, Args, Arc<PreparedSelectionSet>) -> ResolverResult + Send + Sync>;

/// Resolves a field for every source of a batch in one invocation. Must return exactly one
/// value per source, in order.
pub type BatchResolveFn = Arc<
    dyn Fn(ExecContext, Vec<Json>, Args, Arc<PreparedSelectionSet>) -> BatchResolverResult
        + Send
        + Sync,
>;

/// Validates and transforms a raw argument map into the field's parsed argument value.
pub type ArgumentParserFn =
    Arc<dyn Fn(&serde_json::Map<String, Json>) -> Result<Json, Error> + Send + Sync>;

/// Converts a resolved scalar into its wire form.
pub type UnwrapFn = Arc<dyn Fn(&Json) -> Result<Json, Error> + Send + Sync>;

/// Dynamic veto over batching for one execution.
pub type UseBatchFn = Arc<dyn Fn(&ExecContext) -> bool + Send + Sync>;

/// Given the batch size, the number of partitions to split the batch across.
pub type PartitionFn = Arc<dyn Fn(&ExecContext, usize) -> usize + Send + Sync>;

///
/// The sum of schema types the executor dispatches on.
///
#[derive(Clone)]
pub enum Type {
    Scalar(Arc<Scalar>),
    Enum(Arc<Enum>),
    Object(Arc<Object>),
    List(Arc<Type>),
    Union(Arc<Union>),
    NonNull(Arc<Type>),
}

impl Type {
    pub fn list(inner: Type) -> Type {
        Type::List(Arc::new(inner))
    }

    pub fn non_null(inner: Type) -> Type {
        Type::NonNull(Arc::new(inner))
    }
}

///
/// A named leaf type, with an optional unwrap function applied to resolved values.
///
pub struct Scalar {
    pub name: String,
    pub unwrap: Option<UnwrapFn>,
}

impl Scalar {
    pub fn new(name: impl Into<String>) -> Scalar {
        Scalar {
            name: name.into(),
            unwrap: None,
        }
    }

    pub fn with_unwrap<F>(mut self, unwrap: F) -> Scalar
    where
        F: Fn(&Json) -> Result<Json, Error> + Send + Sync + 'static,
    {
        self.unwrap = Some(Arc::new(unwrap));
        self
    }
}

///
/// A bidirectional value-to-label map. `values` maps labels to the internal values resolvers
/// produce; `label_for` is the reverse direction used when materializing results.
///
pub struct Enum {
    pub name: String,
    pub values: IndexMap<String, Json>,
}

impl Enum {
    pub fn new(name: impl Into<String>) -> Enum {
        Enum {
            name: name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn value(mut self, label: impl Into<String>, value: impl Into<Json>) -> Enum {
        self.values.insert(label.into(), value.into());
        self
    }

    pub fn label_for(&self, value: &Json) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, candidate)| *candidate == value)
            .map(|(label, _)| label.as_str())
    }
}

///
/// A named object type. When `key_field` is set, every resolved instance also resolves that
/// field under the reserved `__key` alias, giving the object an identity the diff layer can
/// match list elements by.
///
pub struct Object {
    pub name: String,
    pub key_field: Option<String>,
    pub fields: IndexMap<String, Arc<Field>>,
}

impl Object {
    pub fn new(name: impl Into<String>) -> Object {
        Object {
            name: name.into(),
            key_field: None,
            fields: IndexMap::new(),
        }
    }

    pub fn key(mut self, field_name: impl Into<String>) -> Object {
        self.key_field = Some(field_name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Object {
        self.fields.insert(name.into(), Arc::new(field));
        self
    }
}

///
/// A union of object types. A resolved union value is an object with at most one non-null
/// entry, named after the active variant.
///
pub struct Union {
    pub name: String,
    pub variants: IndexMap<String, Arc<Object>>,
}

impl Union {
    pub fn new(name: impl Into<String>) -> Union {
        Union {
            name: name.into(),
            variants: IndexMap::new(),
        }
    }

    pub fn variant(mut self, object: Arc<Object>) -> Union {
        self.variants.insert(object.name.clone(), object);
        self
    }
}

///
/// One declared field: its type, argument parser, resolvers, and execution policy flags.
///
/// Dispatch priority during execution: a batch resolver (unless vetoed by `use_batch`), then
/// `expensive` (scheduled per source and reactively cached), then `external` (scheduled as one
/// combined unit), and otherwise inline in the calling task.
///
pub struct Field {
    pub field_type: Type,
    pub parse_arguments: Option<ArgumentParserFn>,
    pub resolve: Option<ResolveFn>,
    pub batch_resolve: Option<BatchResolveFn>,
    /// The batch resolver is preferred over the single-source resolver.
    pub batch: bool,
    /// Invocations must be scheduled individually and cached reactively.
    pub expensive: bool,
    /// Cheap but potentially blocking: run asynchronously, without individual caching.
    pub external: bool,
    pub use_batch: Option<UseBatchFn>,
    pub num_parallel_invocations: Option<PartitionFn>,
}

impl Field {
    pub fn new(field_type: Type) -> Field {
        Field {
            field_type,
            parse_arguments: None,
            resolve: None,
            batch_resolve: None,
            batch: false,
            expensive: false,
            external: false,
            use_batch: None,
            num_parallel_invocations: None,
        }
    }

    pub fn resolver<F>(mut self, resolve: F) -> Field
    where
        F: Fn(ExecContext, Json, Args, Arc<PreparedSelectionSet>) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.resolve = Some(Arc::new(resolve));
        self
    }

    pub fn batch_resolver<F>(mut self, resolve: F) -> Field
    where
        F: Fn(ExecContext, Vec<Json>, Args, Arc<PreparedSelectionSet>) -> BatchResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.batch_resolve = Some(Arc::new(resolve));
        self.batch = true;
        self
    }

    pub fn expensive(mut self) -> Field {
        self.expensive = true;
        self
    }

    pub fn external(mut self) -> Field {
        self.external = true;
        self
    }

    pub fn use_batch_when<F>(mut self, predicate: F) -> Field
    where
        F: Fn(&ExecContext) -> bool + Send + Sync + 'static,
    {
        self.use_batch = Some(Arc::new(predicate));
        self
    }

    pub fn parallel_invocations<F>(mut self, partitions: F) -> Field
    where
        F: Fn(&ExecContext, usize) -> usize + Send + Sync + 'static,
    {
        self.num_parallel_invocations = Some(Arc::new(partitions));
        self
    }

    pub fn argument_parser<F>(mut self, parse: F) -> Field
    where
        F: Fn(&serde_json::Map<String, Json>) -> Result<Json, Error> + Send + Sync + 'static,
    {
        self.parse_arguments = Some(Arc::new(parse));
        self
    }
}

///
/// The root types a query is prepared against.
///
pub struct Schema {
    pub query: Arc<Object>,
    pub mutation: Option<Arc<Object>>,
}

impl Schema {
    pub fn new(query: Object) -> Schema {
        Schema {
            query: Arc::new(query),
            mutation: None,
        }
    }

    pub fn with_mutation(mut self, mutation: Object) -> Schema {
        self.mutation = Some(Arc::new(mutation));
        self
    }
}

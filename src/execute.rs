// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value as Json;

use scheduler::{BoundedScheduler, SpawningScheduler, WorkScheduler};

use crate::error::Error;
use crate::output::{FirstError, OutputNode, OutputValue, PathSegment};
use crate::query::{flatten, PreparedQuery, PreparedSelection, PreparedSelectionSet, KEY_ALIAS, TYPENAME};
use crate::schema::{Field, Object, Type, Union};

/// The reactive cache for expensive fields, keyed by (field, source, selection).
pub type ExpensiveCache = reactive::Cache<ExpensiveKey, diff::Value, Error>;

///
/// The caller context threaded through every resolver: cancellation, and, when executing under
/// a rerunner, the current reactive computation and the expensive-field cache.
///
#[derive(Clone)]
pub struct ExecContext {
    canceled: reactive::Latch,
    reactive: Option<reactive::Context>,
    cache: Option<Arc<ExpensiveCache>>,
}

impl ExecContext {
    ///
    /// A context for one-shot execution: nothing is cached and nothing is invalidatable.
    ///
    pub fn new() -> ExecContext {
        ExecContext {
            canceled: reactive::Latch::new(),
            reactive: None,
            cache: None,
        }
    }

    ///
    /// A context executing under a rerunner's computation, with the per-runner cache injected.
    ///
    pub fn live(ctx: reactive::Context, cache: Arc<ExpensiveCache>) -> ExecContext {
        ExecContext {
            canceled: ctx.canceled().clone(),
            reactive: Some(ctx),
            cache: Some(cache),
        }
    }

    pub fn canceled(&self) -> &reactive::Latch {
        &self.canceled
    }

    pub fn reactive(&self) -> Option<&reactive::Context> {
        self.reactive.as_ref()
    }

    ///
    /// Registers a dependency of the current computation, when one is running. Resolvers call
    /// this for every resource whose change should rerun the query.
    ///
    pub fn add_dependency(&self, resource: &reactive::Resource) {
        if let Some(reactive) = &self.reactive {
            reactive.add_dependency(resource);
        }
    }

    fn with_reactive(&self, ctx: reactive::Context) -> ExecContext {
        ExecContext {
            canceled: self.canceled.clone(),
            reactive: Some(ctx),
            cache: self.cache.clone(),
        }
    }
}

///
/// Cache key of one expensive field invocation. Sources that cannot be used as map keys are
/// keyed under a fresh sentinel, meaning they never hit the cache.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExpensiveKey {
    Keyed {
        field: usize,
        selection: usize,
        source: SourceKey,
    },
    Sentinel(u64),
}

static SENTINEL: AtomicU64 = AtomicU64::new(0);

impl ExpensiveKey {
    fn new(field: &Arc<Field>, selection: &Arc<PreparedSelection>, source: &Json) -> ExpensiveKey {
        match SourceKey::try_from_json(source) {
            Some(source) => ExpensiveKey::Keyed {
                field: Arc::as_ptr(field) as usize,
                selection: Arc::as_ptr(selection) as usize,
                source,
            },
            None => ExpensiveKey::Sentinel(SENTINEL.fetch_add(1, Ordering::Relaxed)),
        }
    }
}

///
/// A hashable mirror of a source value. Floats have no total equality, so any value containing
/// one has no SourceKey.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    List(Vec<SourceKey>),
    Map(Vec<(String, SourceKey)>),
}

impl SourceKey {
    fn try_from_json(value: &Json) -> Option<SourceKey> {
        match value {
            Json::Null => Some(SourceKey::Null),
            Json::Bool(value) => Some(SourceKey::Bool(*value)),
            Json::Number(value) => value
                .as_i64()
                .map(SourceKey::Int)
                .or_else(|| value.as_u64().map(SourceKey::UInt)),
            Json::String(value) => Some(SourceKey::Str(value.clone())),
            Json::Array(elements) => elements
                .iter()
                .map(SourceKey::try_from_json)
                .collect::<Option<Vec<_>>>()
                .map(SourceKey::List),
            Json::Object(fields) => fields
                .iter()
                .map(|(name, value)| {
                    SourceKey::try_from_json(value).map(|value| (name.clone(), value))
                })
                .collect::<Option<Vec<_>>>()
                .map(SourceKey::Map),
        }
    }
}

///
/// Invokes a resolver future, converting a panic into an error carrying the panic payload and a
/// captured backtrace. Work units report the resulting error to their output nodes and return
/// normally, so a panicking resolver never takes the process down.
///
pub async fn invoke_safely<T>(future: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "non-string panic payload".to_string()
            };
            let backtrace = std::backtrace::Backtrace::force_capture().to_string();
            Err(Error::panic(message, backtrace))
        }
    }
}

type SchedulerFactory = Arc<dyn Fn() -> Arc<dyn WorkScheduler> + Send + Sync>;

///
/// Per-execution state shared by every work unit of one top-level call: the scheduler the units
/// drain through, and the first-error recorder.
///
#[derive(Clone)]
struct ExecState {
    scheduler: Arc<dyn WorkScheduler>,
    errors: Arc<FirstError>,
    make_scheduler: SchedulerFactory,
}

///
/// One scheduler task: a field resolved for a batch of sources into their destinations.
///
pub struct WorkUnit {
    ctx: ExecContext,
    state: ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
    kind: UnitKind,
}

#[derive(Clone, Copy, Debug)]
enum UnitKind {
    /// Resolve all sources with one batch-resolver call.
    Batch,
    /// Resolve one source under the reactive cache.
    Expensive,
    /// Resolve each source with the single-source resolver.
    Single,
}

///
/// The batch executor. Execution walks the prepared selection tree over the source values,
/// batching and forking field resolution according to each field's policy, and writes results
/// into an output-node tree that materializes once the scheduler drains.
///
pub struct Executor {
    make_scheduler: SchedulerFactory,
}

impl Executor {
    ///
    /// An executor forking one task per scheduled work unit.
    ///
    pub fn new() -> Executor {
        Executor::with_scheduler(|| {
            Arc::new(SpawningScheduler::new(scheduler::Executor::new())) as Arc<dyn WorkScheduler>
        })
    }

    ///
    /// An executor bounding the number of work units running at once.
    ///
    pub fn with_bounded_parallelism(bound: usize) -> Executor {
        Executor::with_scheduler(move || {
            Arc::new(BoundedScheduler::new(scheduler::Executor::new(), bound))
                as Arc<dyn WorkScheduler>
        })
    }

    pub fn with_scheduler<F>(make_scheduler: F) -> Executor
    where
        F: Fn() -> Arc<dyn WorkScheduler> + Send + Sync + 'static,
    {
        Executor {
            make_scheduler: Arc::new(make_scheduler),
        }
    }

    ///
    /// Executes a prepared query against the given root object and source, returning the
    /// materialized result tree. The first error recorded during execution is returned in place
    /// of a value; the response is never partial.
    ///
    pub async fn execute(
        &self,
        ctx: &ExecContext,
        root: &Arc<Object>,
        source: Json,
        query: &PreparedQuery,
    ) -> Result<diff::Value, Error> {
        let errors = Arc::new(FirstError::new());
        let output = OutputNode::root(errors.clone());
        let scheduler = (self.make_scheduler)();
        let state = ExecState {
            scheduler: scheduler.clone(),
            errors: errors.clone(),
            make_scheduler: self.make_scheduler.clone(),
        };
        log::trace!("Executing query {} against {}", query.name, root.name);
        resolve_object_batch(
            ctx.clone(),
            state,
            root.clone(),
            query.selection_set.clone(),
            vec![source],
            vec![output.clone()],
        )
        .await;
        scheduler.run().await;
        match errors.get() {
            Some(error) => Err(error),
            None => Ok(output.materialize()),
        }
    }
}

fn subselection_of(selection: &PreparedSelection) -> Arc<PreparedSelectionSet> {
    selection
        .selection_set
        .clone()
        .unwrap_or_else(|| Arc::new(PreparedSelectionSet::default()))
}

fn fail_all(destinations: &[Arc<OutputNode>], error: Error) {
    for destination in destinations {
        destination.fail(error.clone());
    }
}

fn schedule_unit(state: &ExecState, unit: WorkUnit) {
    state
        .scheduler
        .schedule(Box::pin(async move { execute_work_unit(unit).await }));
}

///
/// Resolves one object-typed level of the tree for a batch of sources.
///
/// Null sources short-circuit to null. For every flattened selection, one child output node per
/// live source is allocated under the selection's alias, and the field is dispatched by its
/// policy: batched, expensive (per-source, cached), external (combined, asynchronous), or
/// inline. A keyed object also resolves its key field under the reserved `__key` alias.
///
fn resolve_object_batch(
    ctx: ExecContext,
    state: ExecState,
    object: Arc<Object>,
    selection_set: Arc<PreparedSelectionSet>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) -> BoxFuture<'static, ()> {
    async move {
        if ctx.canceled().poll_triggered() {
            state.errors.record(Error::Canceled);
            return;
        }

        let mut live: Vec<(Json, Arc<OutputNode>)> = Vec::with_capacity(sources.len());
        for (source, destination) in sources.into_iter().zip(destinations) {
            if source.is_null() {
                destination.fill(OutputValue::Null);
            } else {
                live.push((source, destination));
            }
        }
        if live.is_empty() {
            return;
        }

        let mut field_maps: Vec<IndexMap<String, Arc<OutputNode>>> =
            vec![IndexMap::new(); live.len()];

        for selection in flatten(&selection_set, &object.name) {
            if selection.name == TYPENAME {
                for ((_, destination), map) in live.iter().zip(field_maps.iter_mut()) {
                    let child = destination.child(PathSegment::Field(selection.alias.clone()));
                    child.fill(OutputValue::Scalar(Json::String(object.name.clone())));
                    map.insert(selection.alias.clone(), child);
                }
                continue;
            }
            let field = match &selection.field {
                Some(field) => field.clone(),
                None => {
                    state.errors.record(Error::internal(format!(
                        "selection {} has no matched field",
                        selection.name
                    )));
                    continue;
                }
            };

            let mut unit_sources = Vec::with_capacity(live.len());
            let mut unit_destinations = Vec::with_capacity(live.len());
            for ((source, destination), map) in live.iter().zip(field_maps.iter_mut()) {
                let child = destination.child(PathSegment::Field(selection.alias.clone()));
                map.insert(selection.alias.clone(), child.clone());
                unit_sources.push(source.clone());
                unit_destinations.push(child);
            }
            dispatch_field(
                &ctx,
                &state,
                field,
                selection.clone(),
                unit_sources,
                unit_destinations,
            )
            .await;
        }

        if let Some(key_field_name) = &object.key_field {
            match object.fields.get(key_field_name) {
                Some(field) => {
                    let selection = Arc::new(PreparedSelection {
                        name: key_field_name.clone(),
                        alias: KEY_ALIAS.to_string(),
                        args: Arc::new(Json::Null),
                        field: Some(field.clone()),
                        selection_set: None,
                    });
                    let mut unit_sources = Vec::with_capacity(live.len());
                    let mut unit_destinations = Vec::with_capacity(live.len());
                    for ((source, destination), map) in live.iter().zip(field_maps.iter_mut()) {
                        let child = destination.child(PathSegment::Field(KEY_ALIAS.to_string()));
                        map.insert(KEY_ALIAS.to_string(), child.clone());
                        unit_sources.push(source.clone());
                        unit_destinations.push(child);
                    }
                    // The key is always resolved inline.
                    execute_single(
                        ctx.clone(),
                        state.clone(),
                        field.clone(),
                        selection,
                        unit_sources,
                        unit_destinations,
                    )
                    .await;
                }
                None => {
                    state.errors.record(Error::internal(format!(
                        "object {} declares unknown key field {}",
                        object.name, key_field_name
                    )));
                }
            }
        }

        for ((_, destination), map) in live.iter().zip(field_maps) {
            destination.fill(OutputValue::Object(map));
        }
    }
    .boxed()
}

///
/// Routes one field of one object level to its execution strategy, in policy priority order.
///
async fn dispatch_field(
    ctx: &ExecContext,
    state: &ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) {
    let use_batch = field.batch
        && field
            .use_batch
            .as_ref()
            .map_or(true, |predicate| predicate(ctx));
    if use_batch {
        for (part_sources, part_destinations) in partition(ctx, &field, sources, destinations) {
            schedule_unit(
                state,
                WorkUnit {
                    ctx: ctx.clone(),
                    state: state.clone(),
                    field: field.clone(),
                    selection: selection.clone(),
                    sources: part_sources,
                    destinations: part_destinations,
                    kind: UnitKind::Batch,
                },
            );
        }
    } else if field.expensive {
        for (source, destination) in sources.into_iter().zip(destinations) {
            schedule_unit(
                state,
                WorkUnit {
                    ctx: ctx.clone(),
                    state: state.clone(),
                    field: field.clone(),
                    selection: selection.clone(),
                    sources: vec![source],
                    destinations: vec![destination],
                    kind: UnitKind::Expensive,
                },
            );
        }
    } else if field.external {
        for (part_sources, part_destinations) in partition(ctx, &field, sources, destinations) {
            schedule_unit(
                state,
                WorkUnit {
                    ctx: ctx.clone(),
                    state: state.clone(),
                    field: field.clone(),
                    selection: selection.clone(),
                    sources: part_sources,
                    destinations: part_destinations,
                    kind: UnitKind::Single,
                },
            );
        }
    } else {
        execute_single(
            ctx.clone(),
            state.clone(),
            field,
            selection,
            sources,
            destinations,
        )
        .await;
    }
}

///
/// Splits a batch into the number of partitions the field requests, or leaves it whole.
///
fn partition(
    ctx: &ExecContext,
    field: &Field,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) -> Vec<(Vec<Json>, Vec<Arc<OutputNode>>)> {
    let requested = field
        .num_parallel_invocations
        .as_ref()
        .map_or(1, |partitions| partitions(ctx, sources.len()));
    let parts = requested.clamp(1, sources.len().max(1));
    if parts <= 1 {
        return vec![(sources, destinations)];
    }
    let chunk = (sources.len() + parts - 1) / parts;
    let mut pairs: Vec<(Json, Arc<OutputNode>)> = sources.into_iter().zip(destinations).collect();
    let mut out = Vec::with_capacity(parts);
    while !pairs.is_empty() {
        let rest = pairs.split_off(chunk.min(pairs.len()));
        out.push(pairs.into_iter().unzip());
        pairs = rest;
    }
    out
}

async fn execute_work_unit(unit: WorkUnit) {
    let WorkUnit {
        ctx,
        state,
        field,
        selection,
        sources,
        destinations,
        kind,
    } = unit;
    if ctx.canceled().poll_triggered() {
        state.errors.record(Error::Canceled);
        return;
    }
    match kind {
        UnitKind::Batch => execute_batch(ctx, state, field, selection, sources, destinations).await,
        UnitKind::Expensive => {
            execute_expensive(ctx, state, field, selection, sources, destinations).await;
        }
        UnitKind::Single => {
            execute_single(ctx, state, field, selection, sources, destinations).await;
        }
    }
}

///
/// The batch path: one batch-resolver call covering every source, then recursion into the
/// field's type with the returned values.
///
async fn execute_batch(
    ctx: ExecContext,
    state: ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) {
    let resolve = match &field.batch_resolve {
        Some(resolve) => resolve.clone(),
        None => {
            fail_all(
                &destinations,
                Error::internal(format!(
                    "field {} prefers batching but has no batch resolver",
                    selection.name
                )),
            );
            return;
        }
    };
    let subselection = subselection_of(&selection);
    match invoke_safely(resolve(
        ctx.clone(),
        sources.clone(),
        selection.args.clone(),
        subselection,
    ))
    .await
    {
        Err(error) => fail_all(&destinations, error),
        Ok(values) => {
            if values.len() != sources.len() {
                fail_all(
                    &destinations,
                    Error::internal(format!(
                        "batch resolver returned {} values for {} sources",
                        values.len(),
                        sources.len()
                    )),
                );
                return;
            }
            resolve_batch(
                ctx,
                state,
                field.field_type.clone(),
                selection,
                values,
                destinations,
            )
            .await;
        }
    }
}

///
/// The inline and external path: the single-source resolver runs once per source, results are
/// collected, and recursion continues into the field's type. A failed source fails only its own
/// sub-tree; the remaining sources still resolve.
///
async fn execute_single(
    ctx: ExecContext,
    state: ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) {
    let resolve = match &field.resolve {
        Some(resolve) => resolve.clone(),
        None => {
            fail_all(
                &destinations,
                Error::internal(format!("field {} has no resolver", selection.name)),
            );
            return;
        }
    };
    let subselection = subselection_of(&selection);
    let mut values = Vec::with_capacity(sources.len());
    let mut value_destinations = Vec::with_capacity(sources.len());
    for (source, destination) in sources.into_iter().zip(destinations) {
        if ctx.canceled().poll_triggered() {
            state.errors.record(Error::Canceled);
            return;
        }
        match invoke_safely(resolve(
            ctx.clone(),
            source,
            selection.args.clone(),
            subselection.clone(),
        ))
        .await
        {
            Ok(value) => {
                values.push(value);
                value_destinations.push(destination);
            }
            Err(error) => destination.fail(error),
        }
    }
    if !values.is_empty() {
        resolve_batch(
            ctx,
            state,
            field.field_type.clone(),
            selection,
            values,
            value_destinations,
        )
        .await;
    }
}

///
/// The expensive path: the single source resolves under the reactive cache, keyed by
/// (field, source, selection). The cached function resolves the source and runs the executor
/// over the sub-tree to completion, returning the materialized result; later runs with the same
/// key replay the cached sub-tree, and the cached computation's invalidation propagates to the
/// run that consumed it.
///
async fn execute_expensive(
    ctx: ExecContext,
    state: ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    mut sources: Vec<Json>,
    mut destinations: Vec<Arc<OutputNode>>,
) {
    let (source, destination) = match (sources.pop(), destinations.pop()) {
        (Some(source), Some(destination)) if sources.is_empty() => (source, destination),
        _ => {
            state
                .errors
                .record(Error::internal("expensive unit must cover exactly one source"));
            return;
        }
    };
    let (reactive_ctx, cache) = match (ctx.reactive(), &ctx.cache) {
        (Some(reactive_ctx), Some(cache)) => (reactive_ctx.clone(), cache.clone()),
        _ => {
            // No rerunner is active: there is nothing to cache against, so resolve directly.
            execute_single(ctx, state, field, selection, vec![source], vec![destination]).await;
            return;
        }
    };

    let key = ExpensiveKey::new(&field, &selection, &source);
    let result = {
        let ctx = ctx.clone();
        let state = state.clone();
        let field = field.clone();
        let selection = selection.clone();
        let destination = destination.clone();
        cache
            .get_or_compute(&reactive_ctx, key, move |child| {
                let ctx = ctx.with_reactive(child);
                Box::pin(async move {
                    resolve_expensive_subtree(ctx, state, field, selection, source, destination)
                        .await
                })
            })
            .await
    };
    match result {
        Ok(subtree) => destination.fill(OutputValue::Complete(subtree)),
        Err(error) => destination.fail(error),
    }
}

///
/// Resolves one expensive invocation to completion: the resolver runs, the sub-tree beneath it
/// executes on a scheduler of its own under a private error recorder, and the materialized
/// result (or the sub-tree's first error) becomes the cached value.
///
async fn resolve_expensive_subtree(
    ctx: ExecContext,
    state: ExecState,
    field: Arc<Field>,
    selection: Arc<PreparedSelection>,
    source: Json,
    destination: Arc<OutputNode>,
) -> Result<diff::Value, Error> {
    let resolve = field
        .resolve
        .clone()
        .ok_or_else(|| Error::internal(format!("field {} has no resolver", selection.name)))?;
    let subselection = subselection_of(&selection);
    let value = invoke_safely(resolve(
        ctx.clone(),
        source,
        selection.args.clone(),
        subselection,
    ))
    .await?;

    let errors = Arc::new(FirstError::new());
    let root = OutputNode::mirror(&destination, errors.clone());
    let scheduler = (state.make_scheduler)();
    let sub_state = ExecState {
        scheduler: scheduler.clone(),
        errors: errors.clone(),
        make_scheduler: state.make_scheduler.clone(),
    };
    resolve_batch(
        ctx,
        sub_state,
        field.field_type.clone(),
        selection,
        vec![value],
        vec![root.clone()],
    )
    .await;
    scheduler.run().await;
    match errors.get() {
        Some(error) => Err(error),
        None => Ok(root.materialize()),
    }
}

///
/// Type dispatch for resolved values: scalars unwrap, enums reverse-map, lists flatten into
/// per-element recursion, unions select their active variant, objects recurse into
/// `resolve_object_batch`, and non-null wrappers reject null results.
///
fn resolve_batch(
    ctx: ExecContext,
    state: ExecState,
    field_type: Type,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) -> BoxFuture<'static, ()> {
    async move {
        if ctx.canceled().poll_triggered() {
            state.errors.record(Error::Canceled);
            return;
        }
        match field_type {
            Type::Scalar(scalar) => {
                for (source, destination) in sources.into_iter().zip(destinations) {
                    if source.is_null() {
                        destination.fill(OutputValue::Null);
                        continue;
                    }
                    match &scalar.unwrap {
                        Some(unwrap) => match unwrap(&source) {
                            Ok(value) => destination.fill(OutputValue::Scalar(value)),
                            Err(error) => destination.fail(error),
                        },
                        None => destination.fill(OutputValue::Scalar(source)),
                    }
                }
            }
            Type::Enum(enum_type) => {
                for (source, destination) in sources.into_iter().zip(destinations) {
                    if source.is_null() {
                        destination.fill(OutputValue::Null);
                        continue;
                    }
                    match enum_type.label_for(&source) {
                        Some(label) => {
                            destination.fill(OutputValue::Scalar(Json::String(label.to_string())));
                        }
                        None => destination.fail(Error::internal(format!(
                            "enum {} has no value {}",
                            enum_type.name, source
                        ))),
                    }
                }
            }
            Type::List(inner) => {
                let mut element_sources = Vec::new();
                let mut element_destinations = Vec::new();
                for (source, destination) in sources.into_iter().zip(destinations) {
                    match source {
                        Json::Null => destination.fill(OutputValue::Null),
                        Json::Array(elements) => {
                            let mut children = Vec::with_capacity(elements.len());
                            for (index, element) in elements.into_iter().enumerate() {
                                let child = destination.child(PathSegment::Index(index));
                                children.push(child.clone());
                                element_sources.push(element);
                                element_destinations.push(child);
                            }
                            destination.fill(OutputValue::List(children));
                        }
                        other => destination.fail(Error::internal(format!(
                            "list field resolved to non-list value {other}"
                        ))),
                    }
                }
                if !element_sources.is_empty() {
                    resolve_batch(
                        ctx,
                        state,
                        (*inner).clone(),
                        selection,
                        element_sources,
                        element_destinations,
                    )
                    .await;
                }
            }
            Type::Union(union_type) => {
                resolve_union_batch(ctx, state, union_type, selection, sources, destinations)
                    .await;
            }
            Type::Object(object) => match &selection.selection_set {
                Some(selection_set) => {
                    resolve_object_batch(
                        ctx,
                        state,
                        object,
                        selection_set.clone(),
                        sources,
                        destinations,
                    )
                    .await;
                }
                None => {
                    state.errors.record(Error::internal(format!(
                        "object selection {} has no selection set",
                        selection.name
                    )));
                }
            },
            Type::NonNull(inner) => {
                let mut live_sources = Vec::with_capacity(sources.len());
                let mut live_destinations = Vec::with_capacity(sources.len());
                for (source, destination) in sources.into_iter().zip(destinations) {
                    if source.is_null() {
                        destination.fail(Error::internal(format!(
                            "field {} was marked non-nullable but returned a null value",
                            selection.alias
                        )));
                    } else {
                        live_sources.push(source);
                        live_destinations.push(destination);
                    }
                }
                if !live_sources.is_empty() {
                    resolve_batch(
                        ctx,
                        state,
                        (*inner).clone(),
                        selection,
                        live_sources,
                        live_destinations,
                    )
                    .await;
                }
            }
        }
    }
    .boxed()
}

///
/// Selects each union source's active variant by the presence of a single non-null field,
/// groups sources by variant, and recurses into each variant's object type with the union's
/// selection set (whose fragments pick out the variant's fields).
///
async fn resolve_union_batch(
    ctx: ExecContext,
    state: ExecState,
    union_type: Arc<Union>,
    selection: Arc<PreparedSelection>,
    sources: Vec<Json>,
    destinations: Vec<Arc<OutputNode>>,
) {
    let selection_set = match &selection.selection_set {
        Some(selection_set) => selection_set.clone(),
        None => {
            state.errors.record(Error::internal(format!(
                "union selection {} has no selection set",
                selection.name
            )));
            return;
        }
    };

    let mut groups: IndexMap<String, (Vec<Json>, Vec<Arc<OutputNode>>)> = IndexMap::new();
    for (source, destination) in sources.into_iter().zip(destinations) {
        if source.is_null() {
            destination.fill(OutputValue::Null);
            continue;
        }
        let fields = match source {
            Json::Object(fields) => fields,
            other => {
                destination.fail(Error::internal(format!(
                    "union {} resolved to non-object value {other}",
                    union_type.name
                )));
                continue;
            }
        };

        let mut active: Option<(String, Json)> = None;
        let mut too_many = false;
        for variant_name in union_type.variants.keys() {
            if let Some(value) = fields.get(variant_name) {
                if !value.is_null() {
                    if active.is_some() {
                        too_many = true;
                        break;
                    }
                    active = Some((variant_name.clone(), value.clone()));
                }
            }
        }
        if too_many {
            destination.fail(Error::internal(
                "union type field should only return one value",
            ));
            continue;
        }
        match active {
            None => destination.fill(OutputValue::Null),
            Some((variant_name, value)) => {
                let group = groups.entry(variant_name).or_default();
                group.0.push(value);
                group.1.push(destination);
            }
        }
    }

    for (variant_name, (variant_sources, variant_destinations)) in groups {
        let object = match union_type.variants.get(&variant_name) {
            Some(object) => object.clone(),
            None => continue,
        };
        resolve_object_batch(
            ctx.clone(),
            state.clone(),
            object,
            selection_set.clone(),
            variant_sources,
            variant_destinations,
        )
        .await;
    }
}

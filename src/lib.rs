// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.

// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//!
//! A reactive GraphQL execution engine.
//!
//! The engine walks a prepared selection tree over a user-supplied object graph, resolving
//! fields in batches where the schema allows, forking expensive fields onto a work scheduler
//! and caching their sub-trees reactively, and writing results into an output tree that
//! materializes to plain values. Under a [`LiveQuery`], dependency invalidation reruns the
//! computation and only the structural difference between consecutive results is delivered.
//!
//! The schema layer (reflection, transports, parsing) sits outside this crate: the engine
//! consumes [`Schema`]/[`Field`] values whose resolvers are opaque function objects, and parsed
//! [`Query`] values whose selection sets it type-checks in [`prepare_query`].
//!

mod error;
mod execute;
mod live;
mod output;
mod prepare;
mod query;
mod schema;

pub use crate::error::Error;
pub use crate::execute::{
    invoke_safely, ExecContext, Executor, ExpensiveCache, ExpensiveKey, SourceKey, WorkUnit,
};
pub use crate::live::{LiveQuery, LiveUpdate};
pub use crate::output::{FirstError, OutputNode, OutputValue, PathSegment};
pub use crate::prepare::prepare_query;
pub use crate::query::{
    flatten, Directive, Fragment, PreparedFragment, PreparedQuery, PreparedSelection,
    PreparedSelectionSet, Query, QueryKind, Selection, SelectionSet, KEY_ALIAS, TYPENAME,
};
pub use crate::schema::{
    Args, ArgumentParserFn, BatchResolveFn, Enum, Field, Object, PartitionFn, ResolveFn, Scalar,
    Schema, Type, Union, UnwrapFn, UseBatchFn,
};

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
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//!
//! Dependency tracking for live computations.
//!
//! A [`Node`] is a vertex in a graph of "depends on" edges: leaf [`Resource`]s stand for external
//! state, and non-leaf computation nodes stand for one execution scope each. Invalidating or
//! strobing a node notifies everything computed from it; releasing a node refcounts away its hold
//! on its providers. A [`Cache`] memoizes computations keyed by arbitrary comparable keys, and a
//! [`Rerunner`] drives one top-level computation, rerunning it whenever the dependencies of its
//! previous run are invalidated.
//!

mod cache;
mod latch;
mod node;
mod rerunner;

pub use crate::cache::{Cache, InvalidationSweep};
pub use crate::latch::Latch;
pub use crate::node::{Node, Resource};
pub use crate::rerunner::{ComputeError, Context, Rerunner, RerunnerOptions};

#[cfg(test)]
mod tests;

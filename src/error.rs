// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::Arc;

use thiserror::Error;

///
/// The error taxonomy of the engine.
///
/// Client and sanitized errors are surfaced to clients verbatim; any other failure observed
/// while executing is nested under the output path where it happened, so that a deep resolver
/// failure reads `users.2.address.city: <inner>`. The retry sentinel and cancellation pass
/// through unwrapped, because the rerunner inspects them.
///
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    /// A problem with the query itself, from preparation. Carries no path.
    #[error("{0}")]
    Client(Arc<str>),

    /// A resolver-declared safe message, passed through without path nesting.
    #[error("{0}")]
    Sanitized(Arc<str>),

    /// Any other execution failure, qualified by the output path where it was observed.
    #[error("{path}: {inner}")]
    Path { path: Arc<str>, inner: Arc<Error> },

    /// A resolver panicked. Carries the panic payload and a captured backtrace.
    #[error("resolver panicked: {message}\nstack:\n{backtrace}")]
    Panic {
        message: Arc<str>,
        backtrace: Arc<str>,
    },

    /// Asks the rerunner to run the computation again with backoff.
    #[error("retry requested")]
    Retry,

    #[error("context canceled")]
    Canceled,

    /// An engine-internal failure, such as a violated resolver contract.
    #[error("{0}")]
    Internal(Arc<str>),
}

impl Error {
    pub fn client(message: impl Into<String>) -> Error {
        Error::Client(message.into().into())
    }

    pub fn sanitized(message: impl Into<String>) -> Error {
        Error::Sanitized(message.into().into())
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error::Internal(message.into().into())
    }

    pub(crate) fn panic(message: String, backtrace: String) -> Error {
        Error::Panic {
            message: message.into(),
            backtrace: backtrace.into(),
        }
    }

    pub fn is_sanitized(&self) -> bool {
        matches!(self, Error::Sanitized(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Error::Client(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    ///
    /// True for errors that must never be nested under an output path: client and sanitized
    /// messages are shown verbatim, already-qualified errors keep their original path, and the
    /// rerunner's control-flow errors must stay recognizable.
    ///
    pub(crate) fn bypasses_paths(&self) -> bool {
        matches!(
            self,
            Error::Client(_)
                | Error::Sanitized(_)
                | Error::Path { .. }
                | Error::Retry
                | Error::Canceled
        )
    }

    pub(crate) fn at_path(self, path: String) -> Error {
        Error::Path {
            path: path.into(),
            inner: Arc::new(self),
        }
    }
}

impl reactive::ComputeError for Error {
    fn canceled() -> Self {
        Error::Canceled
    }

    fn is_retry_sentinel(&self) -> bool {
        matches!(self, Error::Retry)
    }
}

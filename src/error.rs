//! Error taxonomy (spec §7) layered on the `stacked_errors` idiom.
//!
//! Every fallible operation in this crate returns [`Result<T>`], a type
//! alias for `stacked_errors::Result<T>`. Constructors below wrap a
//! [`LivepushErrorKind`] with [`stacked_errors::Error::from_kind_locationless`]
//! so callers get a matchable kind (`error.downcast_ref::<LivepushErrorKind>()`)
//! as well as the usual call-stack trace that `.stack_err(..)` accumulates as
//! the error is propagated.

pub use stacked_errors::{Error, Result, StackableErr};
use thiserror::Error;

/// The kinds of errors this crate's own logic can produce, per spec §7.
///
/// Remote-API errors (network failures, 4xx/5xx from the container runtime)
/// are not represented here: they are wrapped directly by `.stack_err(..)`
/// at the call site and propagate as opaque `stacked_errors::Error`s, since
/// from this crate's point of view they are just runtime failures with no
/// further structure to expose.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LivepushErrorKind {
    /// Malformed `FROM`, unresolved stage name, object-form `RUN`, duplicate
    /// live-cmd, unterminated line continuation, and similar.
    #[error("recipe parse error at line {line}: {message}")]
    RecipeParse { line: usize, message: String },

    /// `ADD` encountered anywhere in the recipe.
    #[error("unsupported instruction `{instruction}` at line {line}")]
    UnsupportedInstruction { instruction: String, line: usize },

    /// The executor's precondition ("the container must be running") failed.
    #[error("container for stage {stage} is not running")]
    ContainerNotRunning { stage: usize },

    /// The stage-image list's length did not match `stages - 1`, or some
    /// other caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A state that should be unreachable if the rest of the crate is
    /// correct: a stage-copy into a missing stage container, a copy of a
    /// directory into a file destination, etc.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Ambiguous `COPY` (multiple sources into a non-directory destination)
    /// and other post-parse, pre-exec validation failures.
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub fn recipe_parse_err(line: usize, message: impl Into<String>) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::RecipeParse {
        line,
        message: message.into(),
    })
}

pub fn unsupported_instruction_err(instruction: impl Into<String>, line: usize) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::UnsupportedInstruction {
        instruction: instruction.into(),
        line,
    })
}

pub fn container_not_running_err(stage: usize) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::ContainerNotRunning { stage })
}

pub fn invalid_argument_err(message: impl Into<String>) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::InvalidArgument(message.into()))
}

pub fn internal_inconsistency_err(message: impl Into<String>) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::InternalInconsistency(message.into()))
}

pub fn runtime_err(message: impl Into<String>) -> Error {
    Error::from_kind_locationless(LivepushErrorKind::Runtime(message.into()))
}

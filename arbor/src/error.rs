use thiserror::Error;

use crate::key::InjectKey;
use crate::scope::ScopeId;

/// Type alias for boxed errors that can be sent across threads.
///
/// This is the boundary error type for external capabilities: blueprints,
/// providers, and release hooks all report failures through it.
pub type StdError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while declaring bindings or mutating the scope tree.
///
/// Configuration errors always surface at declaration or install time, never
/// deferred to the first resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The tag passed to `with_name` is not a well-formed qualifier.
    #[error("`{0}` is not a valid qualifier tag")]
    InvalidQualifier(String),
    /// The key is already bound in the target scope and the scope was not
    /// opened in override mode.
    #[error("duplicate binding for {key} in scope `{scope}`")]
    DuplicateBinding { key: InjectKey, scope: ScopeId },
    /// The module declares the same key twice.
    #[error("duplicate binding for {key} within module `{module}`")]
    DuplicateInModule { key: InjectKey, module: String },
    /// A scope with this identity is already open.
    #[error("scope `{0}` is already open")]
    ScopeAlreadyOpen(ScopeId),
}

/// Errors surfaced by scope operations and by `resolve`.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// No binding was found walking from the start scope to the root.
    #[error("no binding found for {key}")]
    Unbound { key: InjectKey },
    /// The key is already under construction on this resolution call.
    #[error("cyclic dependency while constructing {key}")]
    Cycle { key: InjectKey },
    /// The target scope has been closed.
    #[error("scope `{identity}` is closed")]
    ScopeClosed { identity: ScopeId },
    /// Constructing or providing a value for the key failed.
    #[error("provider for {key} failed: {source}")]
    Provider {
        key: InjectKey,
        #[source]
        source: StdError,
    },
}

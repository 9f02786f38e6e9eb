//! Teardown of releasable singletons on scope close.

use crate::blueprint::{AnyHandle, Svc};
use crate::error::StdError;
use crate::key::InjectKey;
use crate::scope::{CachedInstance, ScopeId};

/// Teardown hook exposed by cached singletons holding resources that must be
/// torn down when their owning scope closes.
pub trait Release: Send + Sync {
    /// Invoked exactly once by the owning scope's close.
    fn release(&self) -> Result<(), StdError>;
}

/// Invokes a cached value's release hook. Pre-bound at cache-fill time so
/// close never needs to recover the value's type.
pub(crate) type Releaser = Box<dyn Fn() -> Result<(), StdError> + Send + Sync>;

/// Captures the typed release call for a cached handle.
pub(crate) type ReleaseBinder = fn(&AnyHandle) -> Option<Releaser>;

pub(crate) fn bind_releaser<S>(handle: &AnyHandle) -> Option<Releaser>
where
    S: ?Sized + Release + 'static,
{
    let svc = handle.downcast_ref::<Svc<S>>()?.clone();
    Some(Box::new(move || svc.release()))
}

/// Releases every releasable entry drained from a closing scope. A failing
/// hook is recorded and does not prevent releasing the remaining entries.
pub(crate) fn release_all(identity: &ScopeId, entries: Vec<(InjectKey, CachedInstance)>) {
    for (key, entry) in entries {
        let Some(releaser) = entry.releaser else {
            continue;
        };
        if let Err(error) = releaser() {
            tracing::error!(scope = %identity, key = %key, %error, "release hook failed");
        }
    }
}

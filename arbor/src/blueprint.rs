//! Constructor resolution for bound types.
//!
//! The resolver does not inspect types itself. It asks a [`BlueprintSource`]
//! for the recipe of a target type: the ordered keys of its dependencies and
//! an assembly step over the resolved values. [`BlueprintRegistry`] is the
//! in-crate registration-table implementation, fed by the [`Constructs`]
//! trait; build-time analysis or code generation can supply another source
//! without touching the resolver.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StdError;
use crate::key::{InjectKey, TypeToken};

/// Shared handle to a resolved value.
pub type Svc<T> = Arc<T>;

/// Type-erased shared handle. Always wraps the [`Svc`] of the key's type.
pub type AnyHandle = Arc<dyn Any + Send + Sync>;

/// Declares that `Self` can stand behind a binding key of type `T`.
///
/// Every sized type implements `Implements<Self>`. For trait-object keys the
/// implementation is a one-line upcast:
///
/// ```rust
/// use arbor::{Implements, Svc};
///
/// trait Engine: Send + Sync {}
///
/// struct V8Engine;
///
/// impl Engine for V8Engine {}
///
/// impl Implements<dyn Engine> for V8Engine {
///     fn as_handle(this: Svc<Self>) -> Svc<dyn Engine> {
///         this
///     }
/// }
/// ```
pub trait Implements<T: ?Sized + Send + Sync + 'static>: Send + Sync + Sized + 'static {
    /// Upcasts a handle to the concrete type into a handle to the key type.
    fn as_handle(this: Svc<Self>) -> Svc<T>;
}

impl<T: Send + Sync + 'static> Implements<T> for T {
    fn as_handle(this: Svc<Self>) -> Svc<T> {
        this
    }
}

/// Ordered, resolved dependency values handed to a constructor.
pub struct Assembled {
    values: std::vec::IntoIter<(InjectKey, AnyHandle)>,
}

impl Assembled {
    pub(crate) fn new(values: Vec<(InjectKey, AnyHandle)>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Takes the next dependency in declared order, downcast to the requested
    /// key type.
    pub fn next<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Svc<T>, StdError> {
        let (key, handle) = self
            .values
            .next()
            .ok_or("constructor requested more dependencies than declared")?;
        handle
            .downcast_ref::<Svc<T>>()
            .cloned()
            .ok_or_else(|| format!("dependency {key} does not match the requested type").into())
    }
}

/// Recipe for one concrete type: its ordered dependency keys and an assembly
/// step over the resolved values.
pub trait Blueprint: Send + Sync {
    /// Ordered dependency keys, resolved by the caller before [`assemble`].
    ///
    /// [`assemble`]: Blueprint::assemble
    fn dependencies(&self) -> Vec<InjectKey>;

    /// Builds the value from its resolved dependencies. The returned handle
    /// must wrap an [`Svc`] of the blueprint's own type.
    fn assemble(&self, deps: &mut Assembled) -> Result<AnyHandle, StdError>;
}

/// Source of blueprints, keyed by target type.
///
/// This is the constructor-resolution capability consumed by the resolver;
/// how blueprints come to exist is outside the core's concern.
pub trait BlueprintSource: Send + Sync {
    fn blueprint(&self, target: TypeToken) -> Option<Arc<dyn Blueprint>>;
}

/// Constructor description for types registered in a [`BlueprintRegistry`].
pub trait Constructs: Send + Sync + Sized + 'static {
    /// Ordered keys of the values [`construct`] consumes. Defaults to none.
    ///
    /// [`construct`]: Constructs::construct
    fn dependencies() -> Vec<InjectKey> {
        Vec::new()
    }

    /// Builds the value from its resolved dependencies, in declared order.
    fn construct(deps: &mut Assembled) -> Result<Self, StdError>;
}

struct TypedBlueprint<C>(PhantomData<fn() -> C>);

impl<C: Constructs> Blueprint for TypedBlueprint<C> {
    fn dependencies(&self) -> Vec<InjectKey> {
        C::dependencies()
    }

    fn assemble(&self, deps: &mut Assembled) -> Result<AnyHandle, StdError> {
        let svc: Svc<C> = Arc::new(C::construct(deps)?);
        Ok(Arc::new(svc))
    }
}

/// Registration-table implementation of [`BlueprintSource`].
///
/// ```rust
/// use arbor::{Assembled, BlueprintRegistry, Constructs, StdError};
///
/// struct Clock;
///
/// impl Constructs for Clock {
///     fn construct(_deps: &mut Assembled) -> Result<Self, StdError> {
///         Ok(Clock)
///     }
/// }
///
/// let mut registry = BlueprintRegistry::new();
/// registry.register::<Clock>();
/// ```
#[derive(Default)]
pub struct BlueprintRegistry {
    blueprints: HashMap<TypeId, Arc<dyn Blueprint>>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the blueprint of `C`. Re-registering a type replaces the
    /// earlier entry.
    pub fn register<C: Constructs>(&mut self) -> &mut Self {
        self.blueprints
            .insert(TypeId::of::<C>(), Arc::new(TypedBlueprint::<C>(PhantomData)));
        self
    }

    pub fn has<C: Constructs>(&self) -> bool {
        self.blueprints.contains_key(&TypeId::of::<C>())
    }
}

impl BlueprintSource for BlueprintRegistry {
    fn blueprint(&self, target: TypeToken) -> Option<Arc<dyn Blueprint>> {
        self.blueprints.get(&target.id()).cloned()
    }
}

/// A value factory invoked on demand.
///
/// Providers bound via `to_provider` are themselves resolved through the
/// scope tree, so a provider can have injected dependencies of its own.
pub trait Provide<T: ?Sized + Send + Sync + 'static>: Send + Sync {
    fn provide(&self) -> Result<Svc<T>, StdError>;
}

/// Wraps a closure as a [`Provide`] implementation.
pub fn provide_fn<T, F>(produce: F) -> ProvideFn<F>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn() -> Result<Svc<T>, StdError> + Send + Sync,
{
    ProvideFn(produce)
}

pub struct ProvideFn<F>(F);

impl<T, F> Provide<T> for ProvideFn<F>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn() -> Result<Svc<T>, StdError> + Send + Sync,
{
    fn provide(&self) -> Result<Svc<T>, StdError> {
        (self.0)()
    }
}

//! Binding declarations and the staged configuration DSL.
//!
//! A [`Module`] collects binding declarations. [`Module::bind`] starts a
//! chain of state values, each exposing only the operations legal at that
//! point, so an illegal combination of binding options does not compile:
//! a binding cannot be re-targeted, lifecycle flags only ever turn on, and
//! `releasable` is reachable only behind `singleton_in_scope`.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::blueprint::{AnyHandle, Implements, Provide, Svc};
use crate::error::{ConfigError, StdError};
use crate::key::{InjectKey, IntoQualifier, TypeToken};
use crate::release::{Release, ReleaseBinder, bind_releaser};

pub(crate) type AdaptFn = fn(&AnyHandle) -> Option<AnyHandle>;
pub(crate) type ProvideViaFn = fn(&AnyHandle) -> Result<AnyHandle, StdError>;
pub(crate) type ProviderFn = Arc<dyn Fn() -> Result<AnyHandle, StdError> + Send + Sync>;

/// How a binding produces values. Set exactly once; the DSL states make a
/// second target-setting call inexpressible.
#[derive(Clone)]
pub(crate) enum Strategy {
    /// The key's own type, built from its blueprint.
    Simple,
    /// A concrete implementation type, built from its blueprint and upcast
    /// to the key type.
    Class { target: TypeToken, adapt: AdaptFn },
    /// A stored value, returned as-is on every resolution.
    Instance(AnyHandle),
    /// A stored provider, invoked per resolution.
    ProviderInstance(ProviderFn),
    /// A provider type, itself resolved through the scope tree, then
    /// invoked.
    ProviderClass {
        target: TypeToken,
        provide: ProvideViaFn,
    },
}

#[derive(Clone)]
pub(crate) struct BindingSpec {
    pub(crate) key: InjectKey,
    pub(crate) strategy: Strategy,
    pub(crate) scoped: bool,
    pub(crate) singleton: bool,
    pub(crate) provider_singleton: bool,
    pub(crate) release: Option<ReleaseBinder>,
    pub(crate) provided_release: Option<ReleaseBinder>,
}

impl BindingSpec {
    fn new(key: InjectKey) -> Self {
        Self {
            key,
            strategy: Strategy::Simple,
            scoped: false,
            singleton: false,
            provider_singleton: false,
            release: None,
            provided_release: None,
        }
    }
}

/// A named bundle of bindings installed together into a scope.
///
/// Keys are unique within a module; the check runs at install time, after
/// qualifiers are final.
///
/// ```rust
/// use arbor::Module;
///
/// struct Tls;
///
/// let mut module = Module::new("net");
/// module.bind::<Tls>().to_instance(Tls);
/// ```
pub struct Module {
    name: Cow<'static, str>,
    bindings: Vec<BindingSpec>,
}

impl Module {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bindings(&self) -> &[BindingSpec] {
        &self.bindings
    }

    /// Starts a binding declaration for the key type `T`. With no further
    /// calls the declaration stays a transient binding of `T` to itself.
    pub fn bind<T: ?Sized + Send + Sync + 'static>(&mut self) -> Binding<'_, T> {
        self.bindings.push(BindingSpec::new(InjectKey::of::<T>()));
        let index = self.bindings.len() - 1;
        Binding {
            spec: &mut self.bindings[index],
            _key: PhantomData,
        }
    }
}

fn adapt_handle<T, I>(raw: &AnyHandle) -> Option<AnyHandle>
where
    T: ?Sized + Send + Sync + 'static,
    I: Implements<T>,
{
    let concrete = raw.downcast_ref::<Svc<I>>()?.clone();
    let handle: Svc<T> = I::as_handle(concrete);
    Some(Arc::new(handle))
}

fn provide_via<T, P>(provider: &AnyHandle) -> Result<AnyHandle, StdError>
where
    T: ?Sized + Send + Sync + 'static,
    P: Provide<T> + Send + Sync + 'static,
{
    let provider = provider
        .downcast_ref::<Svc<P>>()
        .ok_or("cached provider does not match its declared type")?;
    let value = provider.provide()?;
    Ok(Arc::new(value))
}

fn set_qualifier(spec: &mut BindingSpec, tag: impl IntoQualifier) -> Result<(), ConfigError> {
    spec.key.set_qualifier(tag.into_qualifier()?);
    Ok(())
}

/// Start state of a binding declaration.
pub struct Binding<'m, T: ?Sized> {
    spec: &'m mut BindingSpec,
    _key: PhantomData<*const T>,
}

impl<'m, T: ?Sized + Send + Sync + 'static> Binding<'m, T> {
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Binds the key to a concrete implementation type, built from its
    /// blueprint.
    pub fn to<I: Implements<T>>(self) -> ClassBinding<'m, T, I> {
        self.spec.strategy = Strategy::Class {
            target: TypeToken::of::<I>(),
            adapt: adapt_handle::<T, I>,
        };
        ClassBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }

    /// Binds the key to a fixed value, returned as-is on every resolution.
    pub fn to_instance(self, value: T)
    where
        T: Sized,
    {
        let handle: Svc<T> = Arc::new(value);
        self.spec.strategy = Strategy::Instance(Arc::new(handle));
    }

    /// Binds the key to a provider type, itself resolved through the scope
    /// tree before producing values.
    pub fn to_provider<P>(self) -> ProviderClassBinding<'m, T, P>
    where
        P: Provide<T> + Send + Sync + 'static,
    {
        self.spec.strategy = Strategy::ProviderClass {
            target: TypeToken::of::<P>(),
            provide: provide_via::<T, P>,
        };
        ProviderClassBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }

    /// Binds the key to a provider value, invoked on each resolution.
    pub fn to_provider_instance<P>(self, provider: P) -> ProviderInstanceBinding<'m, T>
    where
        P: Provide<T> + Send + Sync + 'static,
    {
        let produce: ProviderFn = Arc::new(move || {
            let value = provider.provide()?;
            Ok(Arc::new(value) as AnyHandle)
        });
        self.spec.strategy = Strategy::ProviderInstance(produce);
        ProviderInstanceBinding {
            spec: self.spec,
            _key: PhantomData,
        }
    }

    /// Creates a fresh instance inside the owning scope on every resolution.
    pub fn instances_in_scope(self) {
        self.spec.scoped = true;
    }

    /// Creates one instance per owning scope and reuses it.
    pub fn singleton_in_scope(self) -> SingletonBinding<'m, T, T> {
        self.spec.scoped = true;
        self.spec.singleton = true;
        SingletonBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }
}

/// State after `to`: a class binding awaiting lifecycle flags.
pub struct ClassBinding<'m, T: ?Sized, I> {
    spec: &'m mut BindingSpec,
    _types: PhantomData<(*const T, *const I)>,
}

impl<'m, T, I> ClassBinding<'m, T, I>
where
    T: ?Sized + Send + Sync + 'static,
    I: Implements<T>,
{
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Creates a fresh instance inside the owning scope on every resolution.
    pub fn instances_in_scope(self) {
        self.spec.scoped = true;
    }

    /// Creates one instance per owning scope and reuses it.
    pub fn singleton_in_scope(self) -> SingletonBinding<'m, T, I> {
        self.spec.scoped = true;
        self.spec.singleton = true;
        SingletonBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }
}

/// State after `to_provider`: a provider-class binding awaiting lifecycle
/// flags for the provider and for the values it produces.
pub struct ProviderClassBinding<'m, T: ?Sized, P> {
    spec: &'m mut BindingSpec,
    _types: PhantomData<(*const T, *const P)>,
}

impl<'m, T, P> ProviderClassBinding<'m, T, P>
where
    T: ?Sized + Send + Sync + 'static,
    P: Provide<T> + Send + Sync + 'static,
{
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Creates a fresh provider inside the owning scope on every resolution.
    pub fn instances_in_scope(self) {
        self.spec.scoped = true;
    }

    /// Creates one provider per owning scope and reuses it; values are still
    /// produced per resolution.
    pub fn singleton_in_scope(self) -> SingletonBinding<'m, T, P> {
        self.spec.scoped = true;
        self.spec.singleton = true;
        SingletonBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }

    /// Caches both the provider and the first value it produces in the
    /// owning scope.
    pub fn provides_singleton_in_scope(self) -> ProvidedSingletonBinding<'m, T, P> {
        self.spec.scoped = true;
        self.spec.singleton = true;
        self.spec.provider_singleton = true;
        ProvidedSingletonBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }
}

/// State after `to_provider_instance`.
pub struct ProviderInstanceBinding<'m, T: ?Sized> {
    spec: &'m mut BindingSpec,
    _key: PhantomData<*const T>,
}

impl<'m, T: ?Sized + Send + Sync + 'static> ProviderInstanceBinding<'m, T> {
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Caches the first produced value in the owning scope and reuses it.
    pub fn provides_singleton_in_scope(self) {
        self.spec.provider_singleton = true;
    }
}

/// State after `singleton_in_scope`: the object cached in the scope may be
/// marked releasable.
pub struct SingletonBinding<'m, T: ?Sized, I: ?Sized> {
    spec: &'m mut BindingSpec,
    _types: PhantomData<(*const T, *const I)>,
}

impl<'m, T, I> SingletonBinding<'m, T, I>
where
    T: ?Sized + Send + Sync + 'static,
    I: ?Sized + Send + Sync + 'static,
{
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Releases the cached object when its owning scope closes.
    pub fn releasable(self)
    where
        I: Release,
    {
        self.spec.release = Some(bind_releaser::<I>);
    }
}

/// State after `provides_singleton_in_scope`: the produced value and the
/// provider itself may each be marked releasable.
pub struct ProvidedSingletonBinding<'m, T: ?Sized, P> {
    spec: &'m mut BindingSpec,
    _types: PhantomData<(*const T, *const P)>,
}

impl<'m, T, P> ProvidedSingletonBinding<'m, T, P>
where
    T: ?Sized + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Qualifies the binding. Fails immediately on an ill-formed tag.
    pub fn with_name(self, tag: impl IntoQualifier) -> Result<Self, ConfigError> {
        set_qualifier(self.spec, tag)?;
        Ok(self)
    }

    /// Releases the cached produced value when its owning scope closes.
    pub fn provides_releasable(self) -> SingletonBinding<'m, T, P>
    where
        T: Release,
    {
        self.spec.provided_release = Some(bind_releaser::<T>);
        SingletonBinding {
            spec: self.spec,
            _types: PhantomData,
        }
    }

    /// Releases the cached provider when its owning scope closes.
    pub fn releasable(self)
    where
        P: Release,
    {
        self.spec.release = Some(bind_releaser::<P>);
    }
}

//! Binding keys: type identity plus an optional qualifier tag.

use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;

use crate::error::ConfigError;

/// Marker for unit types usable as binding qualifiers.
///
/// The trait bound plays the role of an annotation check: only types
/// explicitly marked as tags can qualify a binding, and misuse is a compile
/// error rather than a runtime one.
pub trait Tag: 'static {}

/// An opaque tag distinguishing multiple bindings for the same type.
///
/// Built through [`Qualifier::name`] or [`Qualifier::tag`] only, so every
/// value in circulation is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Qualifier(Repr);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Repr {
    Name(Cow<'static, str>),
    Marker { id: TypeId, name: &'static str },
}

impl Qualifier {
    /// Builds a name qualifier. Well-formed names are non-empty and carry no
    /// surrounding whitespace; anything else fails immediately.
    pub fn name(name: impl Into<Cow<'static, str>>) -> Result<Self, ConfigError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.len() != name.len() {
            return Err(ConfigError::InvalidQualifier(name.into_owned()));
        }
        Ok(Self(Repr::Name(name)))
    }

    /// Builds a qualifier from a marker type.
    pub fn tag<T: Tag>() -> Self {
        Self(Repr::Marker {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        })
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Name(name) => write!(f, "{name}"),
            Repr::Marker { name, .. } => write!(f, "{name}"),
        }
    }
}

/// Conversion into a validated [`Qualifier`], failing fast on ill-formed
/// tags.
pub trait IntoQualifier {
    fn into_qualifier(self) -> Result<Qualifier, ConfigError>;
}

impl IntoQualifier for Qualifier {
    fn into_qualifier(self) -> Result<Qualifier, ConfigError> {
        Ok(self)
    }
}

impl IntoQualifier for &'static str {
    fn into_qualifier(self) -> Result<Qualifier, ConfigError> {
        Qualifier::name(self)
    }
}

impl IntoQualifier for String {
    fn into_qualifier(self) -> Result<Qualifier, ConfigError> {
        Qualifier::name(self)
    }
}

/// Identity of a Rust type, trait objects included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Keys live in one of two spaces: user-visible values, and provider
/// instances cached internally so they can never collide with a user binding
/// for the provider type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeySpace {
    Value,
    Provider,
}

/// Lookup key for a binding: a type plus an optional qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectKey {
    token: TypeToken,
    qualifier: Option<Qualifier>,
    space: KeySpace,
}

impl InjectKey {
    /// Key for the unqualified binding of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            token: TypeToken::of::<T>(),
            qualifier: None,
            space: KeySpace::Value,
        }
    }

    /// Key for a qualified binding of `T`.
    pub fn qualified<T: ?Sized + 'static>(qualifier: Qualifier) -> Self {
        Self {
            token: TypeToken::of::<T>(),
            qualifier: Some(qualifier),
            space: KeySpace::Value,
        }
    }

    pub(crate) fn provider_of(token: TypeToken) -> Self {
        Self {
            token,
            qualifier: None,
            space: KeySpace::Provider,
        }
    }

    pub(crate) fn token(&self) -> TypeToken {
        self.token
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub(crate) fn set_qualifier(&mut self, qualifier: Qualifier) {
        self.qualifier = Some(qualifier);
    }
}

impl fmt::Display for InjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let KeySpace::Provider = self.space {
            write!(f, "provider of ")?;
        }
        write!(f, "`{}`", self.token.name)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, " named `{qualifier}`")?;
        }
        Ok(())
    }
}

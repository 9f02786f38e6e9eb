//! The scope tree: an arena of nodes addressed by opaque handles, plus the
//! process-wide registry mapping identities to open scopes.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem::take;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};

use crate::binding::{BindingSpec, Module};
use crate::blueprint::{AnyHandle, BlueprintRegistry, BlueprintSource, Svc};
use crate::error::{ConfigError, InjectError};
use crate::key::{InjectKey, IntoQualifier};
use crate::release::{Releaser, release_all};
use crate::resolve::ResolutionStack;

/// Identity of a scope, unique among open scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(Cow<'static, str>);

impl From<&'static str> for ScopeId {
    fn from(value: &'static str) -> Self {
        Self(value.into())
    }
}

impl From<String> for ScopeId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behavior of `install` when a module key is already bound in the node.
/// Chosen when the scope is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallPolicy {
    /// Duplicate keys are a configuration error.
    #[default]
    Strict,
    /// A later binding replaces the earlier one. Intended for tests swapping
    /// production bindings for fakes.
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u64);

pub(crate) struct CachedInstance {
    pub(crate) handle: AnyHandle,
    pub(crate) releaser: Option<Releaser>,
}

#[derive(Default)]
pub(crate) struct NodeState {
    pub(crate) table: HashMap<InjectKey, BindingSpec>,
    pub(crate) cache: HashMap<InjectKey, CachedInstance>,
    pub(crate) in_flight: HashSet<InjectKey>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) closed: bool,
}

/// One node of the tree. The mutex covers both the binding table and the
/// singleton cache, so structural mutation and cache access exclude each
/// other; the condvar signals completion of in-flight constructions.
pub(crate) struct ScopeNode {
    pub(crate) id: NodeId,
    pub(crate) identity: ScopeId,
    pub(crate) parent: Option<Arc<ScopeNode>>,
    pub(crate) policy: InstallPolicy,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) done: Condvar,
}

pub(crate) struct Shared {
    pub(crate) nodes: DashMap<NodeId, Arc<ScopeNode>>,
    pub(crate) identities: DashMap<ScopeId, NodeId>,
    pub(crate) blueprints: Arc<dyn BlueprintSource>,
    next_node: AtomicU64,
}

/// The scope-tree container: owns the node arena, the identity registry, and
/// the constructor-resolution capability.
///
/// Registry lifecycle: an identity entry is created by `open_scope`, removed
/// by `close`, and queryable via [`is_scope_open`]. There is no other global
/// state.
///
/// [`is_scope_open`]: Injector::is_scope_open
pub struct Injector {
    shared: Arc<Shared>,
}

impl Injector {
    pub fn builder() -> InjectorBuilder {
        InjectorBuilder::default()
    }

    /// Opens a root scope in strict install mode.
    pub fn open_scope(&self, identity: impl Into<ScopeId>) -> Result<ScopeHandle, InjectError> {
        Shared::open_node(&self.shared, None, identity.into(), InstallPolicy::Strict)
    }

    /// Opens a root scope with an explicit install policy.
    pub fn open_scope_with(
        &self,
        identity: impl Into<ScopeId>,
        policy: InstallPolicy,
    ) -> Result<ScopeHandle, InjectError> {
        Shared::open_node(&self.shared, None, identity.into(), policy)
    }

    /// Whether a scope with this identity is currently open.
    pub fn is_scope_open(&self, identity: impl Into<ScopeId>) -> bool {
        let identity = identity.into();
        let Some(id) = self.shared.identities.get(&identity).map(|entry| *entry) else {
            return false;
        };
        let Some(node) = self.shared.nodes.get(&id).map(|entry| entry.value().clone()) else {
            return false;
        };
        !node.state.lock().closed
    }

    /// Looks up the open scope with this identity, if any.
    pub fn scope(&self, identity: impl Into<ScopeId>) -> Option<ScopeHandle> {
        let identity = identity.into();
        let id = self.shared.identities.get(&identity).map(|entry| *entry)?;
        Some(ScopeHandle {
            shared: self.shared.clone(),
            node: id,
            identity,
        })
    }
}

#[derive(Default)]
pub struct InjectorBuilder {
    blueprints: Option<Arc<dyn BlueprintSource>>,
}

impl InjectorBuilder {
    /// Sets the constructor-resolution capability. Defaults to an empty
    /// [`BlueprintRegistry`].
    pub fn blueprints(mut self, source: impl BlueprintSource + 'static) -> Self {
        self.blueprints = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> Injector {
        let blueprints = self
            .blueprints
            .unwrap_or_else(|| Arc::new(BlueprintRegistry::new()));
        Injector {
            shared: Arc::new(Shared {
                nodes: DashMap::new(),
                identities: DashMap::new(),
                blueprints,
                next_node: AtomicU64::new(0),
            }),
        }
    }
}

/// Handle to an open scope. Cloneable and shareable across threads; every
/// operation goes through the arena, so a handle to a closed scope fails
/// rather than resurrecting it.
#[derive(Clone)]
pub struct ScopeHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) node: NodeId,
    identity: ScopeId,
}

impl ScopeHandle {
    pub fn identity(&self) -> &ScopeId {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        match self.shared.live_node(self.node, &self.identity) {
            Ok(node) => !node.state.lock().closed,
            Err(_) => false,
        }
    }

    /// Opens a child scope in strict install mode.
    pub fn open_child(&self, identity: impl Into<ScopeId>) -> Result<ScopeHandle, InjectError> {
        Shared::open_node(&self.shared, Some(self), identity.into(), InstallPolicy::Strict)
    }

    /// Opens a child scope with an explicit install policy.
    pub fn open_child_with(
        &self,
        identity: impl Into<ScopeId>,
        policy: InstallPolicy,
    ) -> Result<ScopeHandle, InjectError> {
        Shared::open_node(&self.shared, Some(self), identity.into(), policy)
    }

    /// Copies the module's bindings into this scope's table.
    pub fn install(&self, module: &Module) -> Result<(), InjectError> {
        self.shared.install(self, module)
    }

    /// Resolves the unqualified binding for `T`, walking from this scope to
    /// the root.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Svc<T>, InjectError> {
        self.resolve_handle::<T>(InjectKey::of::<T>())
    }

    /// Resolves the binding for `T` qualified by `tag`.
    pub fn resolve_named<T: ?Sized + Send + Sync + 'static>(
        &self,
        tag: impl IntoQualifier,
    ) -> Result<Svc<T>, InjectError> {
        let qualifier = tag.into_qualifier()?;
        self.resolve_handle::<T>(InjectKey::qualified::<T>(qualifier))
    }

    fn resolve_handle<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: InjectKey,
    ) -> Result<Svc<T>, InjectError> {
        let node = self.shared.live_node(self.node, &self.identity)?;
        let mut stack = ResolutionStack::new();
        let handle = self.shared.resolve_from(&node, &key, &mut stack)?;
        match handle.downcast_ref::<Svc<T>>() {
            Some(svc) => Ok(svc.clone()),
            None => Err(InjectError::Provider {
                key,
                source: "resolved value does not match the requested type".into(),
            }),
        }
    }

    /// Closes this scope: children are closed first, then every releasable
    /// cached entry is released exactly once, then the scope is discarded.
    pub fn close(&self) -> Result<(), InjectError> {
        self.shared.close_node(self.node, &self.identity)
    }
}

impl Shared {
    pub(crate) fn live_node(
        &self,
        id: NodeId,
        identity: &ScopeId,
    ) -> Result<Arc<ScopeNode>, InjectError> {
        self.nodes
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| InjectError::ScopeClosed {
                identity: identity.clone(),
            })
    }

    fn open_node(
        shared: &Arc<Shared>,
        parent: Option<&ScopeHandle>,
        identity: ScopeId,
        policy: InstallPolicy,
    ) -> Result<ScopeHandle, InjectError> {
        let parent_node = match parent {
            Some(handle) => Some(shared.live_node(handle.node, &handle.identity)?),
            None => None,
        };
        let id = NodeId(shared.next_node.fetch_add(1, Ordering::Relaxed));
        match shared.identities.entry(identity.clone()) {
            Entry::Occupied(_) => {
                return Err(ConfigError::ScopeAlreadyOpen(identity).into());
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        let node = Arc::new(ScopeNode {
            id,
            identity: identity.clone(),
            parent: parent_node.clone(),
            policy,
            state: Mutex::new(NodeState::default()),
            done: Condvar::new(),
        });
        // The node enters the arena before it is linked to its parent, so a
        // concurrent close of the parent either sees the link and cascades,
        // or the link fails here and the node is rolled back.
        shared.nodes.insert(id, node);
        if let Some(parent_node) = &parent_node {
            let mut state = parent_node.state.lock();
            if state.closed {
                drop(state);
                shared.nodes.remove(&id);
                shared.identities.remove(&identity);
                return Err(InjectError::ScopeClosed {
                    identity: parent_node.identity.clone(),
                });
            }
            state.children.push(id);
        }
        tracing::debug!(scope = %identity, "scope opened");
        Ok(ScopeHandle {
            shared: shared.clone(),
            node: id,
            identity,
        })
    }

    fn install(&self, handle: &ScopeHandle, module: &Module) -> Result<(), InjectError> {
        let node = self.live_node(handle.node, &handle.identity)?;
        let mut state = node.state.lock();
        if state.closed {
            return Err(InjectError::ScopeClosed {
                identity: node.identity.clone(),
            });
        }
        // Validate the whole module before touching the table, so a failed
        // install leaves the scope unchanged.
        let mut seen: HashSet<&InjectKey> = HashSet::new();
        for spec in module.bindings() {
            if !seen.insert(&spec.key) {
                return Err(ConfigError::DuplicateInModule {
                    key: spec.key.clone(),
                    module: module.name().to_string(),
                }
                .into());
            }
            if node.policy == InstallPolicy::Strict && state.table.contains_key(&spec.key) {
                return Err(ConfigError::DuplicateBinding {
                    key: spec.key.clone(),
                    scope: node.identity.clone(),
                }
                .into());
            }
        }
        for spec in module.bindings() {
            state.table.insert(spec.key.clone(), spec.clone());
        }
        tracing::debug!(
            scope = %node.identity,
            module = module.name(),
            bindings = module.bindings().len(),
            "module installed"
        );
        Ok(())
    }

    fn close_node(&self, id: NodeId, identity: &ScopeId) -> Result<(), InjectError> {
        let node = self.live_node(id, identity)?;
        let children = {
            let mut state = node.state.lock();
            if state.closed {
                return Err(InjectError::ScopeClosed {
                    identity: node.identity.clone(),
                });
            }
            state.closed = true;
            take(&mut state.children)
        };
        for child in children {
            let Some(child_node) = self.nodes.get(&child).map(|entry| entry.value().clone())
            else {
                continue;
            };
            let child_identity = child_node.identity.clone();
            if let Err(error) = self.close_node(child, &child_identity) {
                // Lost the race against a direct close of the child.
                tracing::debug!(scope = %child_identity, %error, "child closed during cascade");
            }
        }
        let cache = {
            let mut state = node.state.lock();
            state.table.clear();
            state.cache.drain().collect::<Vec<_>>()
        };
        release_all(&node.identity, cache);
        self.nodes.remove(&id);
        self.identities.remove(&node.identity);
        if let Some(parent) = &node.parent {
            parent.state.lock().children.retain(|child| *child != id);
        }
        tracing::debug!(scope = %node.identity, "scope closed");
        Ok(())
    }
}

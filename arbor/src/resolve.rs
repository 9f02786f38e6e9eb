//! Resolution engine: chain walk, strategy dispatch, singleton memoization,
//! cycle detection.

use std::mem::forget;
use std::sync::Arc;

use crate::binding::{AdaptFn, BindingSpec, ProvideViaFn, ProviderFn, Strategy};
use crate::blueprint::{AnyHandle, Assembled};
use crate::error::InjectError;
use crate::key::{InjectKey, TypeToken};
use crate::release::{ReleaseBinder, Releaser};
use crate::scope::{CachedInstance, NodeId, ScopeNode, Shared};

/// Keys currently under construction on this resolution call. Hitting a
/// frame already on the stack is a cycle.
pub(crate) struct ResolutionStack {
    frames: Vec<(NodeId, InjectKey)>,
}

impl ResolutionStack {
    pub(crate) fn new() -> Self {
        Self { frames: Vec::new() }
    }

    fn contains(&self, node: NodeId, key: &InjectKey) -> bool {
        self.frames
            .iter()
            .any(|(frame_node, frame_key)| *frame_node == node && frame_key == key)
    }

    fn enter(&mut self, node: NodeId, key: &InjectKey) -> Result<(), InjectError> {
        if self.contains(node, key) {
            return Err(InjectError::Cycle { key: key.clone() });
        }
        self.frames.push((node, key.clone()));
        Ok(())
    }

    fn exit(&mut self) {
        self.frames.pop();
    }
}

/// Removes the in-flight marker if a construction unwinds, so waiting
/// threads are not blocked forever.
struct InFlight<'a> {
    node: &'a ScopeNode,
    key: &'a InjectKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.node.state.lock();
        state.in_flight.remove(self.key);
        self.node.done.notify_all();
    }
}

impl Shared {
    /// Walks from `start` up the parent chain to the node whose own table
    /// binds `key`.
    fn find_binding(
        &self,
        start: &Arc<ScopeNode>,
        key: &InjectKey,
    ) -> Result<(Arc<ScopeNode>, BindingSpec), InjectError> {
        let mut cursor = start.clone();
        loop {
            let found = {
                let state = cursor.state.lock();
                if state.closed {
                    return Err(InjectError::ScopeClosed {
                        identity: cursor.identity.clone(),
                    });
                }
                state.table.get(key).cloned()
            };
            if let Some(spec) = found {
                return Ok((cursor, spec));
            }
            match cursor.parent.clone() {
                Some(parent) => cursor = parent,
                None => return Err(InjectError::Unbound { key: key.clone() }),
            }
        }
    }

    pub(crate) fn resolve_from(
        &self,
        start: &Arc<ScopeNode>,
        key: &InjectKey,
        stack: &mut ResolutionStack,
    ) -> Result<AnyHandle, InjectError> {
        let (owner, spec) = self.find_binding(start, key)?;
        match spec.strategy.clone() {
            Strategy::Instance(handle) => Ok(handle),
            Strategy::Simple => {
                self.resolve_constructed(start, &owner, key, &spec, key.token(), None, stack)
            }
            Strategy::Class { target, adapt } => {
                self.resolve_constructed(start, &owner, key, &spec, target, Some(adapt), stack)
            }
            Strategy::ProviderInstance(produce) => {
                if spec.provider_singleton {
                    self.memoize(&owner, key, stack, |_| {
                        invoke_producer(key, &produce, spec.provided_release)
                    })
                } else {
                    produce().map_err(|source| InjectError::Provider {
                        key: key.clone(),
                        source,
                    })
                }
            }
            Strategy::ProviderClass { target, provide } => {
                let provider_key = InjectKey::provider_of(target);
                let provider = if spec.singleton {
                    self.memoize(&owner, &provider_key, stack, |stack| {
                        self.construct(start, &owner, &provider_key, &spec, target, None, stack)
                    })?
                } else {
                    self.construct(start, &owner, &provider_key, &spec, target, None, stack)?
                        .0
                };
                if spec.provider_singleton {
                    self.memoize(&owner, key, stack, |_| {
                        invoke_provider(key, provide, &provider, spec.provided_release)
                    })
                } else {
                    provide(&provider).map_err(|source| InjectError::Provider {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_constructed(
        &self,
        start: &Arc<ScopeNode>,
        owner: &Arc<ScopeNode>,
        key: &InjectKey,
        spec: &BindingSpec,
        target: TypeToken,
        adapt: Option<AdaptFn>,
        stack: &mut ResolutionStack,
    ) -> Result<AnyHandle, InjectError> {
        if spec.singleton {
            self.memoize(owner, key, stack, |stack| {
                self.construct(start, owner, key, spec, target, adapt, stack)
            })
        } else {
            Ok(self
                .construct(start, owner, key, spec, target, adapt, stack)?
                .0)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn construct(
        &self,
        start: &Arc<ScopeNode>,
        owner: &Arc<ScopeNode>,
        key: &InjectKey,
        spec: &BindingSpec,
        target: TypeToken,
        adapt: Option<AdaptFn>,
        stack: &mut ResolutionStack,
    ) -> Result<(AnyHandle, Option<Releaser>), InjectError> {
        stack.enter(owner.id, key)?;
        let built = self.build_target(start, owner, key, spec, target, adapt, stack);
        stack.exit();
        built
    }

    #[allow(clippy::too_many_arguments)]
    fn build_target(
        &self,
        start: &Arc<ScopeNode>,
        owner: &Arc<ScopeNode>,
        key: &InjectKey,
        spec: &BindingSpec,
        target: TypeToken,
        adapt: Option<AdaptFn>,
        stack: &mut ResolutionStack,
    ) -> Result<(AnyHandle, Option<Releaser>), InjectError> {
        let blueprint =
            self.blueprints
                .blueprint(target)
                .ok_or_else(|| InjectError::Provider {
                    key: key.clone(),
                    source: format!("no blueprint registered for `{}`", target.name()).into(),
                })?;
        // Unscoped bindings build transient values rooted at the scope that
        // asked; scoped ones are rooted at the scope owning the binding.
        let dep_root = if spec.scoped { owner } else { start };
        let dep_keys = blueprint.dependencies();
        let mut values = Vec::with_capacity(dep_keys.len());
        for dep_key in dep_keys {
            let value = self.resolve_from(dep_root, &dep_key, stack)?;
            values.push((dep_key, value));
        }
        tracing::trace!(key = %key, scope = %owner.identity, "constructing");
        let mut deps = Assembled::new(values);
        let raw = blueprint
            .assemble(&mut deps)
            .map_err(|source| InjectError::Provider {
                key: key.clone(),
                source,
            })?;
        let releaser = spec.release.and_then(|bind| bind(&raw));
        let handle = match adapt {
            Some(adapt) => adapt(&raw).ok_or_else(|| InjectError::Provider {
                key: key.clone(),
                source: format!(
                    "blueprint for `{}` produced a value of an unexpected type",
                    target.name()
                )
                .into(),
            })?,
            None => raw,
        };
        Ok((handle, releaser))
    }

    /// At-most-once construction per (node, key). The guard is dropped while
    /// building so dependency resolution may re-enter this node; an in-flight
    /// marker keeps concurrent callers waiting for exactly the duration of
    /// the one construction.
    fn memoize(
        &self,
        node: &Arc<ScopeNode>,
        key: &InjectKey,
        stack: &mut ResolutionStack,
        build: impl FnOnce(&mut ResolutionStack) -> Result<(AnyHandle, Option<Releaser>), InjectError>,
    ) -> Result<AnyHandle, InjectError> {
        {
            let mut state = node.state.lock();
            loop {
                if state.closed {
                    return Err(InjectError::ScopeClosed {
                        identity: node.identity.clone(),
                    });
                }
                if let Some(entry) = state.cache.get(key) {
                    return Ok(entry.handle.clone());
                }
                if state.in_flight.contains(key) {
                    if stack.contains(node.id, key) {
                        return Err(InjectError::Cycle { key: key.clone() });
                    }
                    node.done.wait(&mut state);
                    continue;
                }
                state.in_flight.insert(key.clone());
                break;
            }
        }
        let guard = InFlight {
            node: node.as_ref(),
            key,
        };
        let built = build(stack);
        forget(guard);
        let mut state = node.state.lock();
        state.in_flight.remove(key);
        node.done.notify_all();
        let (handle, releaser) = built?;
        if state.closed {
            // The scope closed mid-construction; the value never entered the
            // cache and is dropped here.
            return Err(InjectError::ScopeClosed {
                identity: node.identity.clone(),
            });
        }
        state.cache.insert(
            key.clone(),
            CachedInstance {
                handle: handle.clone(),
                releaser,
            },
        );
        Ok(handle)
    }
}

fn invoke_producer(
    key: &InjectKey,
    produce: &ProviderFn,
    binder: Option<ReleaseBinder>,
) -> Result<(AnyHandle, Option<Releaser>), InjectError> {
    let handle = produce().map_err(|source| InjectError::Provider {
        key: key.clone(),
        source,
    })?;
    let releaser = binder.and_then(|bind| bind(&handle));
    Ok((handle, releaser))
}

fn invoke_provider(
    key: &InjectKey,
    provide: ProvideViaFn,
    provider: &AnyHandle,
    binder: Option<ReleaseBinder>,
) -> Result<(AnyHandle, Option<Releaser>), InjectError> {
    let handle = provide(provider).map_err(|source| InjectError::Provider {
        key: key.clone(),
        source,
    })?;
    let releaser = binder.and_then(|bind| bind(&handle));
    Ok((handle, releaser))
}

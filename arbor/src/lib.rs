//! # arbor
//!
//! Hierarchical scoped dependency injection for Rust applications: declare
//! how abstract keys map to concrete creation strategies, organize the
//! declarations into a tree of scopes, and resolve object graphs lazily with
//! managed lifetimes (transient, scoped, singleton, releasable).
//!
//! ## Core Concepts
//!
//! - **Injector**: the container owning the scope tree and the identity
//!   registry of open scopes
//! - **Module**: a named bundle of bindings installed together into a scope
//! - **Binding DSL**: staged declaration states; each state exposes only the
//!   operations legal at that point, so illegal combinations do not compile
//! - **Blueprint**: the pluggable capability describing how a concrete type
//!   is constructed and what it depends on
//! - **Release**: a teardown hook invoked exactly once when the scope owning
//!   a releasable singleton closes
//!
//! ## Basic Usage
//!
//! Bind a trait key to a singleton implementation, and a concrete type to
//! per-resolution instances:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arbor::{
//!     Assembled, BlueprintRegistry, Constructs, Implements, InjectKey, Injector, Module,
//!     StdError, Svc,
//! };
//!
//! trait Engine: Send + Sync {
//!     fn cylinders(&self) -> u8;
//! }
//!
//! struct V8Engine;
//!
//! impl Engine for V8Engine {
//!     fn cylinders(&self) -> u8 {
//!         8
//!     }
//! }
//!
//! impl Implements<dyn Engine> for V8Engine {
//!     fn as_handle(this: Svc<Self>) -> Svc<dyn Engine> {
//!         this
//!     }
//! }
//!
//! impl Constructs for V8Engine {
//!     fn construct(_deps: &mut Assembled) -> Result<Self, StdError> {
//!         Ok(V8Engine)
//!     }
//! }
//!
//! struct Car {
//!     engine: Svc<dyn Engine>,
//! }
//!
//! impl Constructs for Car {
//!     fn dependencies() -> Vec<InjectKey> {
//!         vec![InjectKey::of::<dyn Engine>()]
//!     }
//!
//!     fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
//!         Ok(Car {
//!             engine: deps.next::<dyn Engine>()?,
//!         })
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut blueprints = BlueprintRegistry::new();
//!     blueprints.register::<V8Engine>();
//!     blueprints.register::<Car>();
//!
//!     let injector = Injector::builder().blueprints(blueprints).build();
//!     let app = injector.open_scope("app")?;
//!
//!     let mut module = Module::new("drivetrain");
//!     module.bind::<dyn Engine>().to::<V8Engine>().singleton_in_scope();
//!     module.bind::<Car>().instances_in_scope();
//!     app.install(&module)?;
//!
//!     let first = app.resolve::<Car>()?;
//!     let second = app.resolve::<Car>()?;
//!     assert!(!Arc::ptr_eq(&first, &second));
//!     assert!(Arc::ptr_eq(&first.engine, &second.engine));
//!     assert_eq!(first.engine.cylinders(), 8);
//!     Ok(())
//! }
//! ```
//!
//! ## Scopes and Lifecycle
//!
//! Scopes nest; a singleton caches at the scope owning its binding, and a
//! releasable singleton gets a teardown call when that scope closes:
//!
//! ```rust
//! use arbor::{Assembled, BlueprintRegistry, Constructs, Injector, Module, Release, StdError};
//!
//! struct ConnectionPool;
//!
//! impl Constructs for ConnectionPool {
//!     fn construct(_deps: &mut Assembled) -> Result<Self, StdError> {
//!         Ok(ConnectionPool)
//!     }
//! }
//!
//! impl Release for ConnectionPool {
//!     fn release(&self) -> Result<(), StdError> {
//!         // drain connections
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut blueprints = BlueprintRegistry::new();
//!     blueprints.register::<ConnectionPool>();
//!     let injector = Injector::builder().blueprints(blueprints).build();
//!
//!     let app = injector.open_scope("app")?;
//!     let mut module = Module::new("storage");
//!     module.bind::<ConnectionPool>().singleton_in_scope().releasable();
//!     app.install(&module)?;
//!
//!     let session = app.open_child("session")?;
//!     let pool = session.resolve::<ConnectionPool>()?;
//!     let again = app.resolve::<ConnectionPool>()?;
//!     assert!(std::sync::Arc::ptr_eq(&pool, &again));
//!     assert!(injector.is_scope_open("session"));
//!
//!     app.close()?;
//!     assert!(!injector.is_scope_open("session"));
//!     assert!(!injector.is_scope_open("app"));
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! `resolve`, `install`, and `close` may be called from any thread against
//! the same tree. First-time singleton construction happens at most once per
//! (scope, key); concurrent callers for the same key block for the duration
//! of that one construction and then share the cached handle.

mod binding;
mod blueprint;
mod error;
mod key;
mod release;
mod resolve;
mod scope;

pub use binding::*;
pub use blueprint::*;
pub use error::*;
pub use key::*;
pub use release::*;
pub use scope::*;

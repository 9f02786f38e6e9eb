use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor::{
    Assembled, BlueprintRegistry, Constructs, Implements, InjectError, InjectKey, Injector,
    Module, Qualifier, StdError, Svc, Tag, provide_fn,
};

// Counts constructions without global state: bound as an instance and pulled
// in as a dependency by the types under test.
#[derive(Default)]
struct BuildCounter(AtomicUsize);

trait Engine: Send + Sync {
    fn label(&self) -> &'static str;
}

struct V8Engine;

impl Engine for V8Engine {
    fn label(&self) -> &'static str {
        "v8"
    }
}

impl Implements<dyn Engine> for V8Engine {
    fn as_handle(this: Svc<Self>) -> Svc<dyn Engine> {
        this
    }
}

impl Constructs for V8Engine {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<BuildCounter>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        deps.next::<BuildCounter>()?.0.fetch_add(1, Ordering::SeqCst);
        Ok(V8Engine)
    }
}

struct ElectricEngine;

impl Engine for ElectricEngine {
    fn label(&self) -> &'static str {
        "electric"
    }
}

impl Implements<dyn Engine> for ElectricEngine {
    fn as_handle(this: Svc<Self>) -> Svc<dyn Engine> {
        this
    }
}

impl Constructs for ElectricEngine {
    fn construct(_deps: &mut Assembled) -> Result<Self, StdError> {
        Ok(ElectricEngine)
    }
}

struct Car {
    engine: Svc<dyn Engine>,
}

impl Constructs for Car {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<dyn Engine>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        Ok(Car {
            engine: deps.next::<dyn Engine>()?,
        })
    }
}

struct Settings {
    retries: u32,
}

fn registry() -> BlueprintRegistry {
    let mut registry = BlueprintRegistry::new();
    registry.register::<V8Engine>();
    registry.register::<ElectricEngine>();
    registry.register::<Car>();
    registry
}

fn engine_module() -> Module {
    let mut module = Module::new("engines");
    module
        .bind::<BuildCounter>()
        .to_instance(BuildCounter::default());
    module
        .bind::<dyn Engine>()
        .to::<V8Engine>()
        .singleton_in_scope();
    module
}

#[test]
fn singleton_resolves_to_the_same_reference() {
    let injector = Injector::builder().blueprints(registry()).build();
    let app = injector.open_scope("app").unwrap();
    app.install(&engine_module()).unwrap();

    let first = app.resolve::<dyn Engine>().unwrap();
    let second = app.resolve::<dyn Engine>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let counter = app.resolve::<BuildCounter>().unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}

#[test]
fn transient_cars_share_the_parent_engine() {
    let injector = Injector::builder().blueprints(registry()).build();
    let app = injector.open_scope("app").unwrap();
    app.install(&engine_module()).unwrap();

    let activity = app.open_child("activity").unwrap();
    let mut module = Module::new("cars");
    module.bind::<Car>().instances_in_scope();
    activity.install(&module).unwrap();

    let first = activity.resolve::<Car>().unwrap();
    let second = activity.resolve::<Car>().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.engine, &second.engine));

    let counter = app.resolve::<BuildCounter>().unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}

#[test]
fn singleton_caches_at_the_owning_ancestor() {
    let injector = Injector::builder().blueprints(registry()).build();
    let app = injector.open_scope("app").unwrap();
    app.install(&engine_module()).unwrap();

    let activity = app.open_child("activity").unwrap();
    let via_child = activity.resolve::<dyn Engine>().unwrap();
    activity.close().unwrap();

    // The cache entry lives at "app", so it survives the child's close.
    let via_app = app.resolve::<dyn Engine>().unwrap();
    assert!(Arc::ptr_eq(&via_child, &via_app));
    let counter = app.resolve::<BuildCounter>().unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}

#[test]
fn instance_binding_returns_the_stored_value() {
    let injector = Injector::builder().build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("settings");
    module.bind::<Settings>().to_instance(Settings { retries: 3 });
    app.install(&module).unwrap();

    let first = app.resolve::<Settings>().unwrap();
    let second = app.resolve::<Settings>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.retries, 3);

    let child = app.open_child("child").unwrap();
    let via_child = child.resolve::<Settings>().unwrap();
    assert!(Arc::ptr_eq(&first, &via_child));
}

#[test]
fn unbound_key_is_reported() {
    let injector = Injector::builder().blueprints(registry()).build();
    let app = injector.open_scope("app").unwrap();
    assert!(matches!(
        app.resolve::<Car>(),
        Err(InjectError::Unbound { .. })
    ));
}

struct Turbo;

impl Tag for Turbo {}

#[test]
fn qualified_bindings_resolve_independently() {
    let injector = Injector::builder().blueprints(registry()).build();
    let app = injector.open_scope("app").unwrap();
    let mut module = engine_module();
    module
        .bind::<dyn Engine>()
        .with_name(Qualifier::tag::<Turbo>())
        .unwrap()
        .to::<ElectricEngine>()
        .singleton_in_scope();
    app.install(&module).unwrap();

    let plain = app.resolve::<dyn Engine>().unwrap();
    let tagged = app
        .resolve_named::<dyn Engine>(Qualifier::tag::<Turbo>())
        .unwrap();
    assert_eq!(plain.label(), "v8");
    assert_eq!(tagged.label(), "electric");

    assert!(matches!(
        app.resolve_named::<dyn Engine>("missing"),
        Err(InjectError::Unbound { .. })
    ));
}

struct Region(&'static str);

struct Locale {
    region: Svc<Region>,
}

impl Constructs for Locale {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<Region>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        Ok(Locale {
            region: deps.next::<Region>()?,
        })
    }
}

#[test]
fn dependency_root_follows_the_binding_scope() {
    let mut registry = BlueprintRegistry::new();
    registry.register::<Locale>();
    let injector = Injector::builder().blueprints(registry).build();
    let app = injector.open_scope("app").unwrap();
    let mut base = Module::new("locales");
    base.bind::<Region>().to_instance(Region("us"));
    base.bind::<Locale>();
    base.bind::<Locale>()
        .with_name("pinned")
        .unwrap()
        .instances_in_scope();
    app.install(&base).unwrap();

    let activity = app.open_child("activity").unwrap();
    let mut overlay = Module::new("overlay");
    overlay.bind::<Region>().to_instance(Region("eu"));
    activity.install(&overlay).unwrap();

    // An unscoped binding roots its dependencies at the requesting scope, so
    // the child's overlay binding of Region wins there.
    assert_eq!(activity.resolve::<Locale>().unwrap().region.0, "eu");
    assert_eq!(app.resolve::<Locale>().unwrap().region.0, "us");
    // A scoped binding roots them at the scope owning the binding.
    assert_eq!(
        activity.resolve_named::<Locale>("pinned").unwrap().region.0,
        "us"
    );
}

struct Ouroboros;

impl Constructs for Ouroboros {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<Ouroboros>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        deps.next::<Ouroboros>()?;
        Ok(Ouroboros)
    }
}

#[test]
fn self_referential_construction_is_a_cycle() {
    let mut registry = BlueprintRegistry::new();
    registry.register::<Ouroboros>();
    let injector = Injector::builder().blueprints(registry).build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("cycles");
    module.bind::<Ouroboros>();
    app.install(&module).unwrap();

    assert!(matches!(
        app.resolve::<Ouroboros>(),
        Err(InjectError::Cycle { .. })
    ));
}

struct Chicken;

impl Constructs for Chicken {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<Egg>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        deps.next::<Egg>()?;
        Ok(Chicken)
    }
}

struct Egg;

impl Constructs for Egg {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<Chicken>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        deps.next::<Chicken>()?;
        Ok(Egg)
    }
}

#[test]
fn mutual_singletons_are_a_cycle() {
    let mut registry = BlueprintRegistry::new();
    registry.register::<Chicken>();
    registry.register::<Egg>();
    let injector = Injector::builder().blueprints(registry).build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("cycles");
    module.bind::<Chicken>().singleton_in_scope();
    module.bind::<Egg>().singleton_in_scope();
    app.install(&module).unwrap();

    assert!(matches!(
        app.resolve::<Chicken>(),
        Err(InjectError::Cycle { .. })
    ));
}

#[test]
fn provider_failure_carries_the_key() {
    let injector = Injector::builder().build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("settings");
    module
        .bind::<Settings>()
        .to_provider_instance(provide_fn(|| -> Result<Svc<Settings>, StdError> {
            Err("backing store offline".into())
        }));
    app.install(&module).unwrap();

    match app.resolve::<Settings>() {
        Err(InjectError::Provider { key, source }) => {
            assert!(key.to_string().contains("Settings"));
            assert!(source.to_string().contains("offline"));
        }
        Err(other) => panic!("expected a provider failure, got {other}"),
        Ok(_) => panic!("expected a provider failure"),
    }
}

#[test]
fn missing_blueprint_is_a_provider_failure() {
    let injector = Injector::builder().build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("cars");
    module.bind::<Car>();
    app.install(&module).unwrap();

    assert!(matches!(
        app.resolve::<Car>(),
        Err(InjectError::Provider { .. })
    ));
}

#[test]
fn provider_instance_singleton_caches_the_produced_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let injector = Injector::builder().build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("settings");
    module
        .bind::<Settings>()
        .to_provider_instance(provide_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Settings { retries: 1 }))
        }))
        .provides_singleton_in_scope();
    app.install(&module).unwrap();

    let first = app.resolve::<Settings>().unwrap();
    let second = app.resolve::<Settings>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn provider_instance_produces_fresh_values_by_default() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let injector = Injector::builder().build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("settings");
    module
        .bind::<Settings>()
        .to_provider_instance(provide_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Settings { retries: 1 }))
        }));
    app.install(&module).unwrap();

    let first = app.resolve::<Settings>().unwrap();
    let second = app.resolve::<Settings>().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

struct DbUrl(String);

struct Database {
    url: String,
}

struct DatabaseProvider {
    url: Svc<DbUrl>,
}

impl Constructs for DatabaseProvider {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<DbUrl>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        Ok(DatabaseProvider {
            url: deps.next::<DbUrl>()?,
        })
    }
}

impl arbor::Provide<Database> for DatabaseProvider {
    fn provide(&self) -> Result<Svc<Database>, StdError> {
        Ok(Arc::new(Database {
            url: self.url.0.clone(),
        }))
    }
}

#[test]
fn provider_class_resolves_its_own_dependencies() {
    let mut registry = BlueprintRegistry::new();
    registry.register::<DatabaseProvider>();
    let injector = Injector::builder().blueprints(registry).build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("storage");
    module
        .bind::<DbUrl>()
        .to_instance(DbUrl("sqlite::memory:".to_string()));
    module
        .bind::<Database>()
        .to_provider::<DatabaseProvider>()
        .provides_singleton_in_scope();
    app.install(&module).unwrap();

    let first = app.resolve::<Database>().unwrap();
    let second = app.resolve::<Database>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.url, "sqlite::memory:");
}

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use arbor::{
    Assembled, BlueprintRegistry, Constructs, InjectKey, Injector, Module, StdError, Svc,
};

#[derive(Default)]
struct BuildCounter(AtomicUsize);

// Sleeps during construction to widen the race window.
struct SlowService;

impl Constructs for SlowService {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<BuildCounter>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        let counter = deps.next::<BuildCounter>()?;
        thread::sleep(Duration::from_millis(25));
        counter.0.fetch_add(1, Ordering::SeqCst);
        Ok(SlowService)
    }
}

struct Branch {
    service: Svc<SlowService>,
}

impl Constructs for Branch {
    fn dependencies() -> Vec<InjectKey> {
        vec![InjectKey::of::<SlowService>()]
    }

    fn construct(deps: &mut Assembled) -> Result<Self, StdError> {
        Ok(Branch {
            service: deps.next::<SlowService>()?,
        })
    }
}

fn fixture() -> (Injector, arbor::ScopeHandle) {
    let mut registry = BlueprintRegistry::new();
    registry.register::<SlowService>();
    registry.register::<Branch>();
    let injector = Injector::builder().blueprints(registry).build();
    let app = injector.open_scope("app").unwrap();
    let mut module = Module::new("services");
    module
        .bind::<BuildCounter>()
        .to_instance(BuildCounter::default());
    module.bind::<SlowService>().singleton_in_scope();
    module.bind::<Branch>();
    app.install(&module).unwrap();
    (injector, app)
}

#[test]
fn concurrent_first_resolves_construct_once() {
    let (_injector, app) = fixture();

    let handles: Vec<Svc<SlowService>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| app.resolve::<SlowService>().unwrap()))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    let first = &handles[0];
    assert!(handles.iter().all(|handle| Arc::ptr_eq(first, handle)));
    let counter = app.resolve::<BuildCounter>().unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}

#[test]
fn transient_graphs_share_one_singleton_under_contention() {
    let (_injector, app) = fixture();

    let branches: Vec<Svc<Branch>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..4)
                        .map(|_| app.resolve::<Branch>().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });

    assert_eq!(branches.len(), 32);
    let shared = &branches[0].service;
    for branch in &branches {
        assert!(Arc::ptr_eq(shared, &branch.service));
    }
    // Branches themselves are transient.
    assert!(!Arc::ptr_eq(&branches[0], &branches[1]));
    let counter = app.resolve::<BuildCounter>().unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}

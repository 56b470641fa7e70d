use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use graft_host_api::inprocess::{
    HostDispatchDelegate, InProcessHost, StaticCodeLoader, StaticCodeSources,
    StaticResourceSources, StaticResourceView,
};
use graft_host_api::{
    BroadcastMessage, CodeLoader, ComponentInstance, Context, DescriptorProvider,
    FatalErrorHandler, HostRuntime, MessageListener, ModuleDelegate, ModuleDescriptor,
    ProviderDecl, ResourceView,
};

use super::ModuleRuntimeService;
use crate::error::Error;
use crate::events::ModuleSignal;
use crate::model::{StepStatus, TeardownStep};
use crate::state::{ResourceFailurePolicy, RuntimeOptions};

struct NopComponent {
    class_name: String,
}

impl NopComponent {
    fn boxed(class_name: &str) -> Box<dyn ComponentInstance> {
        Box::new(Self {
            class_name: class_name.to_string(),
        })
    }
}

impl ComponentInstance for NopComponent {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn on_create(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NullListener;

impl MessageListener for NullListener {
    fn on_message(&self, _message: &BroadcastMessage) {}
}

#[derive(Default)]
struct DelegateProbe {
    created: AtomicUsize,
    created_in: Mutex<Option<String>>,
    saw_host_helper: AtomicBool,
}

struct TestDelegate {
    probe: Arc<DelegateProbe>,
    subscribe_channel: Option<String>,
    fail: bool,
}

impl ModuleDelegate for TestDelegate {
    fn on_create(&mut self, context: Arc<dyn Context>) -> anyhow::Result<()> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        *self.probe.created_in.lock() = Some(context.package_id().to_string());
        self.probe.saw_host_helper.store(
            context.code_loader().contains_class("host.Helper"),
            Ordering::SeqCst,
        );
        if let Some(channel) = &self.subscribe_channel {
            context.subscribe(channel, Arc::new(NullListener));
        }
        if self.fail {
            anyhow::bail!("delegate refused to start");
        }
        Ok(())
    }
}

struct ReentrantDelegate {
    service: Arc<ModuleRuntimeService>,
    observed_running: Arc<AtomicBool>,
}

impl ModuleDelegate for ReentrantDelegate {
    fn on_create(&mut self, context: Arc<dyn Context>) -> anyhow::Result<()> {
        self.observed_running.store(
            self.service.is_running(context.package_id()),
            Ordering::SeqCst,
        );
        Ok(())
    }
}

struct RecordingFatalHandler {
    calls: Mutex<Vec<String>>,
}

impl FatalErrorHandler for RecordingFatalHandler {
    fn on_fatal(&self, origin: &str, details: &str) {
        self.calls.lock().push(format!("{origin}: {details}"));
    }
}

struct SwallowingHandler;

impl FatalErrorHandler for SwallowingHandler {
    fn on_fatal(&self, _origin: &str, _details: &str) {}
}

/// Delegate that hijacks the host fatal slot during construction, the way
/// a crash-reporting module would.
struct HandlerSwappingDelegate {
    host: Arc<InProcessHost>,
    fail: bool,
}

impl ModuleDelegate for HandlerSwappingDelegate {
    fn on_create(&mut self, _context: Arc<dyn Context>) -> anyhow::Result<()> {
        self.host.install_fatal_handler(Arc::new(SwallowingHandler));
        if self.fail {
            anyhow::bail!("delegate died after swapping the handler");
        }
        Ok(())
    }
}

#[derive(Default)]
struct MapDescriptors {
    entries: Mutex<HashMap<String, ModuleDescriptor>>,
}

impl MapDescriptors {
    fn insert(&self, descriptor: ModuleDescriptor) {
        self.entries
            .lock()
            .insert(descriptor.package_id.clone(), descriptor);
    }
}

impl DescriptorProvider for MapDescriptors {
    fn descriptor(&self, package_id: &str) -> Option<ModuleDescriptor> {
        self.entries.lock().get(package_id).cloned()
    }
}

struct Fixture {
    host: Arc<InProcessHost>,
    descriptors: Arc<MapDescriptors>,
    resource_sources: Arc<StaticResourceSources>,
    code_sources: Arc<StaticCodeSources>,
}

impl Fixture {
    fn new() -> Self {
        let host_loader = Arc::new(
            StaticCodeLoader::new("host")
                .with_component("host.Helper", || NopComponent::boxed("host.Helper")),
        );
        let host_resources = Arc::new(StaticResourceView::new().with_entry(11, "host-value"));
        Self {
            host: Arc::new(InProcessHost::new(host_loader, host_resources)),
            descriptors: Arc::new(MapDescriptors::default()),
            resource_sources: Arc::new(StaticResourceSources::new()),
            code_sources: Arc::new(StaticCodeSources::new()),
        }
    }

    fn service(&self) -> Arc<ModuleRuntimeService> {
        self.service_with(RuntimeOptions::default())
    }

    fn service_with(&self, options: RuntimeOptions) -> Arc<ModuleRuntimeService> {
        ModuleRuntimeService::with_options(
            self.host.clone(),
            self.descriptors.clone(),
            self.resource_sources.clone(),
            self.code_sources.clone(),
            options,
        )
    }

    fn register(&self, descriptor: &ModuleDescriptor, loader: Arc<dyn CodeLoader>) {
        self.code_sources.register(&descriptor.installed_path, loader);
        self.resource_sources
            .register(&descriptor.installed_path, Arc::new(StaticResourceView::new()));
        self.descriptors.insert(descriptor.clone());
    }
}

fn module_descriptor(package_id: &str) -> ModuleDescriptor {
    let mut descriptor =
        ModuleDescriptor::new(package_id, format!("/modules/{package_id}/code.gar"));
    descriptor.version = "1.0.0".to_string();
    descriptor
}

fn delegate_loader(probe: &Arc<DelegateProbe>) -> Arc<dyn CodeLoader> {
    let probe = probe.clone();
    Arc::new(
        StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
            Box::new(TestDelegate {
                probe: probe.clone(),
                subscribe_channel: None,
                fail: false,
            })
        }),
    )
}

#[test]
fn start_constructs_the_delegate_once() {
    let fixture = Fixture::new();
    let probe = Arc::new(DelegateProbe::default());
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Delegate".to_string());
    fixture.register(&descriptor, delegate_loader(&probe));
    let service = fixture.service();

    let module = service.start_module(&descriptor).expect("module must start");
    assert!(module.has_delegate());
    assert_eq!(probe.created.load(Ordering::SeqCst), 1);
    assert_eq!(probe.created_in.lock().as_deref(), Some("dev.test.module"));
    // embedded module: host classes are visible without any widening
    assert!(probe.saw_host_helper.load(Ordering::SeqCst));

    let again = service
        .start_module(&descriptor)
        .expect("second start must be a no-op");
    assert!(Arc::ptr_eq(&module, &again));
    assert_eq!(probe.created.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_starts_collapse_to_one_module() {
    let fixture = Fixture::new();
    let probe = Arc::new(DelegateProbe::default());
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Delegate".to_string());
    fixture.register(&descriptor, delegate_loader(&probe));
    let service = fixture.service();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            let descriptor = descriptor.clone();
            std::thread::spawn(move || {
                service
                    .start_module(&descriptor)
                    .expect("start must succeed")
            })
        })
        .collect();
    let modules: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("start thread must finish"))
        .collect();

    assert_eq!(probe.created.load(Ordering::SeqCst), 1);
    for module in &modules[1..] {
        assert!(Arc::ptr_eq(&modules[0], module));
    }
    assert_eq!(service.running_ids(), vec!["dev.test.module"]);
}

#[test]
fn startup_hook_observes_its_own_module_as_running() {
    let fixture = Fixture::new();
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Delegate".to_string());
    let service = fixture.service();
    let observed_running = Arc::new(AtomicBool::new(false));
    let reentrant_service = service.clone();
    let reentrant_flag = observed_running.clone();
    fixture.register(
        &descriptor,
        Arc::new(
            StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
                Box::new(ReentrantDelegate {
                    service: reentrant_service.clone(),
                    observed_running: reentrant_flag.clone(),
                })
            }),
        ),
    );

    service.start_module(&descriptor).expect("module must start");
    assert!(observed_running.load(Ordering::SeqCst));
}

#[test]
fn module_without_delegate_starts_clean() {
    let fixture = Fixture::new();
    let descriptor = module_descriptor("dev.test.module");
    fixture.register(&descriptor, Arc::new(StaticCodeLoader::new("boot")));
    let service = fixture.service();

    let module = service.start_module(&descriptor).expect("module must start");
    assert!(!module.has_delegate());
    assert!(service.is_running("dev.test.module"));
}

#[test]
fn start_by_id_resolves_through_the_provider() {
    let fixture = Fixture::new();
    let descriptor = module_descriptor("dev.test.module");
    fixture.register(&descriptor, Arc::new(StaticCodeLoader::new("boot")));
    let service = fixture.service();

    service
        .start_module_by_id("dev.test.module")
        .expect("registered package must start");
    assert!(service.is_running("dev.test.module"));

    assert!(matches!(
        service.start_module_by_id("dev.test.unknown"),
        Err(Error::DescriptorMissing { package_id }) if package_id == "dev.test.unknown"
    ));
}

#[test]
fn blank_package_id_is_rejected() {
    let fixture = Fixture::new();
    let service = fixture.service();
    assert!(matches!(
        service.start_module(&module_descriptor("  ")),
        Err(Error::InvalidInput { .. })
    ));
}

#[test]
fn failed_delegate_unwinds_the_registration() {
    let fixture = Fixture::new();
    let probe = Arc::new(DelegateProbe::default());
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Delegate".to_string());
    descriptor.providers.push(ProviderDecl {
        class_name: "module.Provider".to_string(),
        authority: "dev.test.module.data".to_string(),
        exported: false,
    });
    let factory_probe = probe.clone();
    fixture.register(
        &descriptor,
        Arc::new(
            StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
                Box::new(TestDelegate {
                    probe: factory_probe.clone(),
                    subscribe_channel: None,
                    fail: true,
                })
            }),
        ),
    );
    let service = fixture.service();

    match service.start_module(&descriptor) {
        Err(Error::DelegateConstruction {
            package_id,
            class_name,
            reason,
        }) => {
            assert_eq!(package_id, "dev.test.module");
            assert_eq!(class_name, "module.Delegate");
            assert!(reason.to_string().contains("refused"));
        }
        _ => panic!("start must fail in delegate construction"),
    }
    assert_eq!(probe.created.load(Ordering::SeqCst), 1);
    assert!(!service.is_running("dev.test.module"));
    // providers registered ahead of construction are unwound with it
    assert!(service.resolve_provider("dev.test.module.data").is_none());
}

#[test]
fn delegate_class_missing_from_loader_fails_start() {
    let fixture = Fixture::new();
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Absent".to_string());
    fixture.register(&descriptor, Arc::new(StaticCodeLoader::new("boot")));
    let service = fixture.service();

    assert!(matches!(
        service.start_module(&descriptor),
        Err(Error::CodeLoad { package_id, .. }) if package_id == "dev.test.module"
    ));
    assert!(!service.is_running("dev.test.module"));
}

#[test]
fn standalone_lookup_widens_only_during_construction() {
    let fixture = Fixture::new();
    let probe = Arc::new(DelegateProbe::default());
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.standalone = true;
    descriptor.delegate_class = Some("module.Delegate".to_string());
    fixture.register(&descriptor, delegate_loader(&probe));
    let service = fixture.service();

    let module = service.start_module(&descriptor).expect("module must start");
    // construction ran inside the privileged window and saw the host chain
    assert!(probe.saw_host_helper.load(Ordering::SeqCst));
    // afterwards the standalone chain is scoped again
    assert!(!module.context().code_loader().contains_class("host.Helper"));
    assert!(module.context().code_loader().contains_class("module.Delegate"));
}

#[test]
fn teardown_releases_facilities_in_order() {
    let fixture = Fixture::new();
    let probe = Arc::new(DelegateProbe::default());
    let mut descriptor = module_descriptor("dev.test.module");
    descriptor.delegate_class = Some("module.Delegate".to_string());
    descriptor
        .components
        .insert("module.Main".to_string(), Default::default());
    descriptor.providers.push(ProviderDecl {
        class_name: "module.Provider".to_string(),
        authority: "dev.test.module.data".to_string(),
        exported: false,
    });
    let factory_probe = probe.clone();
    fixture.register(
        &descriptor,
        Arc::new(
            StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
                Box::new(TestDelegate {
                    probe: factory_probe.clone(),
                    subscribe_channel: Some("module.events".to_string()),
                    fail: false,
                })
            }),
        ),
    );
    let service = fixture.service();
    service.start_module(&descriptor).expect("module must start");

    fixture
        .host
        .tasks()
        .declare("dev.test.module", "module.Worker");
    fixture.host.tasks().spawn("module.Worker", "dev.test.module");
    fixture.host.views().claim_for_module();
    let signals = service.subscribe_teardown("dev.test.module");

    let report = service
        .stop_module("dev.test.module")
        .expect("stop must succeed");
    assert_eq!(report.package_id, "dev.test.module");
    assert_eq!(report.steps.len(), 7);
    assert_eq!(report.failed_steps(), 0);
    let released = |step| report.step(step).expect("step must be recorded").released;
    assert_eq!(released(TeardownStep::DeregisterTaskDeclarations), 1);
    assert_eq!(released(TeardownStep::BroadcastUnloading), 1);
    assert_eq!(released(TeardownStep::DropHubSubscriptions), 1);
    assert_eq!(released(TeardownStep::StopOwnedTasks), 1);
    // the hub sweep already removed what the context had tracked
    assert_eq!(released(TeardownStep::ReleaseContextSubscriptions), 0);
    assert_eq!(released(TeardownStep::Deregister), 2);

    assert_eq!(
        signals.try_recv(),
        Ok(ModuleSignal::Unloading {
            package_id: "dev.test.module".to_string()
        })
    );
    assert!(fixture.host.views().is_host_owned());
    assert_eq!(fixture.host.hub().subscription_count(), 0);
    assert!(fixture.host.tasks().running_tasks().is_empty());
    assert!(!service.is_running("dev.test.module"));
    assert!(service.resolve_provider("dev.test.module.data").is_none());

    assert!(matches!(
        service.stop_module("dev.test.module"),
        Err(Error::ModuleNotRunning { .. })
    ));
}

#[test]
fn failed_step_is_recorded_without_stopping_teardown() {
    let fixture = Fixture::new();
    let descriptor = module_descriptor("dev.test.module");
    fixture.register(&descriptor, Arc::new(StaticCodeLoader::new("boot")));
    let service = fixture.service();
    service.start_module(&descriptor).expect("module must start");
    fixture.host.tasks().fail_stop_sweeps(true);

    let report = service
        .stop_module("dev.test.module")
        .expect("stop must still complete");
    assert_eq!(report.failed_steps(), 1);
    let stopped = report
        .step(TeardownStep::StopOwnedTasks)
        .expect("step must be recorded");
    assert!(matches!(
        &stopped.status,
        StepStatus::Failed(details) if details.contains("offline")
    ));
    let deregistered = report
        .step(TeardownStep::Deregister)
        .expect("step must be recorded");
    assert!(matches!(deregistered.status, StepStatus::Done));
    assert!(!service.is_running("dev.test.module"));
}

#[test]
fn fatal_handler_is_restored_after_construction() {
    let fixture = Fixture::new();
    let recorder = Arc::new(RecordingFatalHandler {
        calls: Mutex::new(Vec::new()),
    });
    fixture.host.install_fatal_handler(recorder.clone());

    let mut primary = module_descriptor("dev.test.module");
    primary.delegate_class = Some("module.Delegate".to_string());
    let host = fixture.host.clone();
    fixture.register(
        &primary,
        Arc::new(
            StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
                Box::new(HandlerSwappingDelegate {
                    host: host.clone(),
                    fail: false,
                })
            }),
        ),
    );
    let service = fixture.service();
    service.start_module(&primary).expect("module must start");

    fixture.host.fatal_handler().on_fatal("module.Worker", "uncaught");
    assert_eq!(recorder.calls.lock().len(), 1);

    // the restore also runs when construction unwinds
    let mut broken = module_descriptor("dev.test.broken");
    broken.delegate_class = Some("module.Delegate".to_string());
    let host = fixture.host.clone();
    fixture.register(
        &broken,
        Arc::new(
            StaticCodeLoader::new("boot").with_delegate("module.Delegate", move || {
                Box::new(HandlerSwappingDelegate {
                    host: host.clone(),
                    fail: true,
                })
            }),
        ),
    );
    assert!(service.start_module(&broken).is_err());
    fixture
        .host
        .fatal_handler()
        .on_fatal("module.Worker", "uncaught again");
    assert_eq!(recorder.calls.lock().len(), 2);
}

#[test]
fn resource_policy_controls_start() {
    let fixture = Fixture::new();
    let descriptor = module_descriptor("dev.test.module");
    // code registered, resource bundle deliberately absent
    fixture
        .code_sources
        .register(&descriptor.installed_path, Arc::new(StaticCodeLoader::new("boot")));
    fixture.descriptors.insert(descriptor.clone());
    let service = fixture.service();

    assert!(matches!(
        service.start_module(&descriptor),
        Err(Error::ResourceLoad { .. })
    ));
    assert!(!service.is_running("dev.test.module"));

    let degraded = fixture.service_with(RuntimeOptions {
        resource_policy: ResourceFailurePolicy::Degrade,
        ..RuntimeOptions::default()
    });
    let module = degraded
        .start_module(&descriptor)
        .expect("degraded start must succeed");
    assert_eq!(module.resources().lookup(11).as_deref(), Some("host-value"));
}

#[test]
fn verify_interception_reports_reverts() {
    let fixture = Fixture::new();
    let service = fixture.service();
    service
        .verify_interception()
        .expect("fresh install must verify");

    fixture
        .host
        .install_dispatch_delegate(Arc::new(HostDispatchDelegate));
    let error = service
        .verify_interception()
        .err()
        .expect("revert must be detected");
    assert!(matches!(error, Error::InterceptionLost { slot } if slot.contains("dispatch")));
}

#[test]
fn module_infos_snapshot_is_sorted() {
    let fixture = Fixture::new();
    let beta = module_descriptor("dev.test.beta");
    let alpha = module_descriptor("dev.test.alpha");
    fixture.register(&beta, Arc::new(StaticCodeLoader::new("boot")));
    fixture.register(&alpha, Arc::new(StaticCodeLoader::new("boot")));
    let service = fixture.service();
    service.start_module(&beta).expect("module must start");
    service.start_module(&alpha).expect("module must start");

    assert_eq!(service.running_ids(), vec!["dev.test.alpha", "dev.test.beta"]);
    let infos = service.module_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].package_id, "dev.test.alpha");
    assert_eq!(infos[0].version, "1.0.0");
    assert!(!infos[0].has_delegate);
}

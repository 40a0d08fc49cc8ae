//! Integration tests for adapter orchestration.
//!
//! Adapters are mocked with mockall except where a real ZeroMQ endpoint is
//! needed to observe dispatch.

use mockall::mock;
use polyport::adapters::{AdapterCatalog, AdapterConfig, Availability, ProtocolAdapter, Registration};
use polyport::registry::{ClientRegistry, ServiceRegistry};
use polyport::runtime::ShutdownReason;
use polyport::{ClientDefinition, Config, Error, Orchestrator, Protocol, ServiceDefinition, ServiceFunction};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_test::traced_test;

mock! {
    pub Adapter {}

    impl ProtocolAdapter for Adapter {
        fn protocol(&self) -> Protocol;
        fn setup(&mut self, config: AdapterConfig) -> polyport::Result<()>;
        fn register_function(&mut self, registration: Registration) -> polyport::Result<()>;
        fn start(&mut self) -> polyport::Result<()>;
        fn stop(&mut self) -> polyport::Result<()>;
        fn bound_ports(&self) -> BTreeMap<String, u16>;
    }
}

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// A mock that records every lifecycle call and accepts everything.
fn recording_adapter(protocol: Protocol, journal: &Journal) -> MockAdapter {
    let mut adapter = MockAdapter::new();
    adapter.expect_protocol().return_const(protocol);
    let j = Arc::clone(journal);
    adapter.expect_setup().returning(move |_| {
        note(&j, format!("{}:setup", protocol));
        Ok(())
    });
    let j = Arc::clone(journal);
    adapter.expect_register_function().returning(move |registration| {
        note(&j, format!("{}:register:{}", protocol, registration.name()));
        Ok(())
    });
    let j = Arc::clone(journal);
    adapter.expect_start().returning(move || {
        note(&j, format!("{}:start", protocol));
        Ok(())
    });
    let j = Arc::clone(journal);
    adapter.expect_stop().returning(move || {
        note(&j, format!("{}:stop", protocol));
        Ok(())
    });
    adapter.expect_bound_ports().returning(BTreeMap::new);
    adapter
}

fn echo(name: &str) -> ServiceDefinition {
    ServiceDefinition::new(name, ServiceFunction::sync(|args| Ok(Value::Object(args))))
}

fn set(protocols: &[Protocol]) -> BTreeSet<Protocol> {
    protocols.iter().copied().collect()
}

#[test]
fn allow_list_limits_instantiated_adapters() {
    let journal: Journal = Arc::default();
    let zmq_builds = Arc::new(AtomicUsize::new(0));

    let j = Arc::clone(&journal);
    let counter = Arc::clone(&zmq_builds);
    let catalog = AdapterCatalog::empty()
        .provide(Protocol::Http, move || {
            Ok(Box::new(recording_adapter(Protocol::Http, &j)) as Box<dyn ProtocolAdapter>)
        })
        .provide(Protocol::Zeromq, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::configuration("zeromq must not be built"))
        });

    let mut services = ServiceRegistry::new();
    services
        .register(
            echo("add")
                .protocol(Protocol::Http, json!({ "path": "/add" }))
                .protocol(Protocol::Zeromq, json!({})),
        )
        .unwrap();

    let config = Config::default().with_protocols_override("http");
    let mut orchestrator = Orchestrator::new(config, catalog);
    let mut running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();

    assert_eq!(running.protocols(), set(&[Protocol::Http]));
    assert_eq!(zmq_builds.load(Ordering::SeqCst), 0);
    running.stop();
    assert_eq!(
        entries(&journal),
        vec!["http:setup", "http:register:add", "http:start", "http:stop"]
    );
}

#[test]
fn union_of_requested_and_used_protocols() {
    let journal: Journal = Arc::default();
    let catalog = [Protocol::Http, Protocol::Grpc, Protocol::Mqtt]
        .into_iter()
        .fold(AdapterCatalog::empty(), |catalog, protocol| {
            let j = Arc::clone(&journal);
            catalog.provide(protocol, move || {
                Ok(Box::new(recording_adapter(protocol, &j)) as Box<dyn ProtocolAdapter>)
            })
        });

    let mut services = ServiceRegistry::new();
    services
        .register(echo("status").protocol(Protocol::Grpc, json!({})))
        .unwrap();

    let config = Config::default().with_adapter(Protocol::Http, json!({ "port": 8080 }));
    let mut orchestrator = Orchestrator::new(config, catalog);
    let running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();

    assert_eq!(running.protocols(), set(&[Protocol::Http, Protocol::Grpc]));
    let log = entries(&journal);
    assert!(log.contains(&"grpc:register:status".to_string()));
    assert!(!log.iter().any(|e| e.starts_with("http:register")));
}

#[test]
#[traced_test]
fn failures_are_isolated_per_adapter_and_function() {
    let journal: Journal = Arc::default();

    let j = Arc::clone(&journal);
    let picky_http = move || {
        let mut adapter = MockAdapter::new();
        adapter.expect_protocol().return_const(Protocol::Http);
        adapter.expect_setup().returning(|_| Ok(()));
        let jr = Arc::clone(&j);
        adapter.expect_register_function().returning(move |registration| {
            if registration.name() == "bad" {
                return Err(Error::registration(Protocol::Http, "bad", "route clash"));
            }
            note(&jr, format!("http:register:{}", registration.name()));
            Ok(())
        });
        let js = Arc::clone(&j);
        adapter.expect_start().returning(move || {
            note(&js, "http:start".to_string());
            Ok(())
        });
        adapter.expect_stop().returning(|| Ok(()));
        Ok(Box::new(adapter) as Box<dyn ProtocolAdapter>)
    };

    let broken_grpc = || {
        let mut adapter = MockAdapter::new();
        adapter.expect_protocol().return_const(Protocol::Grpc);
        adapter.expect_setup().returning(|_| Ok(()));
        adapter.expect_register_function().returning(|_| Ok(()));
        adapter
            .expect_start()
            .returning(|| Err(Error::adapter_start(Protocol::Grpc, "port in use")));
        adapter.expect_stop().times(1).returning(|| Ok(()));
        Ok(Box::new(adapter) as Box<dyn ProtocolAdapter>)
    };

    let unconfigurable_amqp = || {
        let mut adapter = MockAdapter::new();
        adapter.expect_protocol().return_const(Protocol::Amqp);
        adapter
            .expect_setup()
            .returning(|_| Err(Error::configuration("broker url missing")));
        adapter.expect_register_function().never();
        adapter.expect_start().never();
        adapter.expect_stop().never();
        Ok(Box::new(adapter) as Box<dyn ProtocolAdapter>)
    };

    let catalog = AdapterCatalog::empty()
        .provide(Protocol::Http, picky_http)
        .provide(Protocol::Grpc, broken_grpc)
        .provide(Protocol::Amqp, unconfigurable_amqp)
        .provide(Protocol::Mqtt, || Err(Error::configuration("mqtt client library missing")));

    let mut services = ServiceRegistry::new();
    for name in ["bad", "good"] {
        services
            .register(
                echo(name)
                    .protocol(Protocol::Http, json!({}))
                    .protocol(Protocol::Grpc, json!({}))
                    .protocol(Protocol::Amqp, json!({}))
                    .protocol(Protocol::Mqtt, json!({})),
            )
            .unwrap();
    }

    let mut orchestrator = Orchestrator::new(Config::default(), catalog);
    let mut running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();

    assert_eq!(running.protocols(), set(&[Protocol::Http, Protocol::Grpc]));
    assert_eq!(entries(&journal), vec!["http:register:good", "http:start"]);
    assert!(matches!(
        orchestrator.capabilities().get(&Protocol::Mqtt),
        Some(Availability::Unavailable(_))
    ));
    assert!(logs_contain("registration failed"));
    assert!(logs_contain("adapter failed to start"));
    assert!(logs_contain("adapter setup failed"));

    running.stop();
    running.stop();
}

#[test]
fn cron_receives_client_table_and_client_functions() {
    let journal: Journal = Arc::default();
    let seen_clients: Arc<Mutex<BTreeSet<Protocol>>> = Arc::default();

    let j = Arc::clone(&journal);
    let seen = Arc::clone(&seen_clients);
    let cron = move || {
        let mut adapter = MockAdapter::new();
        adapter.expect_protocol().return_const(Protocol::Cron);
        let seen = Arc::clone(&seen);
        adapter.expect_setup().returning(move |config: AdapterConfig| {
            let clients = config.clients.expect("cron gets a client table");
            *seen.lock().unwrap() = clients.protocols();
            Ok(())
        });
        let jr = Arc::clone(&j);
        adapter.expect_register_function().returning(move |registration| {
            let kind = match registration {
                Registration::Service(_) => "service",
                Registration::Client(_) => "client",
            };
            note(&jr, format!("cron:{}:{}", kind, registration.name()));
            Ok(())
        });
        adapter.expect_start().returning(|| Ok(()));
        adapter.expect_stop().returning(|| Ok(()));
        Ok(Box::new(adapter) as Box<dyn ProtocolAdapter>)
    };
    let j = Arc::clone(&journal);
    let http = move || Ok(Box::new(recording_adapter(Protocol::Http, &j)) as Box<dyn ProtocolAdapter>);

    let catalog = AdapterCatalog::empty()
        .provide(Protocol::Cron, cron)
        .provide(Protocol::Http, http);

    let mut services = ServiceRegistry::new();
    services
        .register(echo("create_product").protocol(Protocol::Http, json!({ "path": "/api/products", "method": "POST" })))
        .unwrap();
    services
        .register(echo("report").protocol(Protocol::Cron, json!({ "interval": "1m" })))
        .unwrap();
    let mut clients = ClientRegistry::new();
    clients
        .register(
            ClientDefinition::new("generate_product", ServiceFunction::sync(|_| Ok(json!({ "id": 1 }))))
                .protocol(Protocol::Http, json!({ "service": "create_product", "interval": "1m" })),
        )
        .unwrap();

    let mut orchestrator = Orchestrator::new(Config::default(), catalog);
    let running = orchestrator.launch(&services, &clients).unwrap();

    assert_eq!(running.protocols(), set(&[Protocol::Http, Protocol::Cron]));
    assert_eq!(*seen_clients.lock().unwrap(), set(&[Protocol::Http]));
    let log = entries(&journal);
    assert!(log.contains(&"cron:service:report".to_string()));
    assert!(log.contains(&"cron:client:generate_product".to_string()));
    assert!(!log.contains(&"http:register:generate_product".to_string()));
}

#[test]
fn unscheduled_services_are_not_sent_to_cron() {
    let journal: Journal = Arc::default();
    let catalog = [Protocol::Http, Protocol::Cron]
        .into_iter()
        .fold(AdapterCatalog::empty(), |catalog, protocol| {
            let j = Arc::clone(&journal);
            catalog.provide(protocol, move || {
                Ok(Box::new(recording_adapter(protocol, &j)) as Box<dyn ProtocolAdapter>)
            })
        });

    let mut services = ServiceRegistry::new();
    services.register(echo("bare")).unwrap();
    services
        .register(echo("tick").protocol(Protocol::Cron, json!({ "interval": "5s" })))
        .unwrap();

    let config = Config::default().with_protocols_override("http,cron");
    let mut orchestrator = Orchestrator::new(config, catalog);
    let _running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();

    let log = entries(&journal);
    assert!(log.contains(&"http:register:bare".to_string()));
    assert!(log.contains(&"cron:register:tick".to_string()));
    assert!(!log.contains(&"cron:register:bare".to_string()));
}

#[test]
fn allow_list_of_unknown_names_starts_nothing() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let catalog = AdapterCatalog::empty().provide(Protocol::Zeromq, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::configuration("zeromq must not be built"))
    });

    let mut services = ServiceRegistry::new();
    services
        .register(echo("add").protocol(Protocol::Zeromq, json!({})))
        .unwrap();

    let config = Config::default()
        .with_adapter(Protocol::Zeromq, json!({}))
        .with_protocols_override("htp");
    let mut orchestrator = Orchestrator::new(config, catalog);
    assert!(orchestrator.live_protocols(&services).is_empty());

    let running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();
    assert!(running.protocols().is_empty());
    assert_eq!(builds.load(Ordering::SeqCst), 0);
}

#[test]
fn last_registration_wins_on_the_wire() {
    let mut services = ServiceRegistry::new();
    for version in ["v1", "v2"] {
        services
            .register(
                ServiceDefinition::new("calc", ServiceFunction::sync(move |_| Ok(json!(version))))
                    .protocol(Protocol::Zeromq, json!({})),
            )
            .unwrap();
    }

    let config = Config::default().with_adapter(Protocol::Zeromq, json!({ "bind_address": "tcp://127.0.0.1" }));
    let mut orchestrator = Orchestrator::new(config, AdapterCatalog::builtin());
    let mut running = orchestrator.launch(&services, &ClientRegistry::new()).unwrap();

    let port = running
        .adapter(Protocol::Zeromq)
        .and_then(|adapter| adapter.bound_ports().get("calc").copied())
        .unwrap();
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::REQ).unwrap();
    socket.set_linger(0).unwrap();
    socket.set_rcvtimeo(5000).unwrap();
    socket.connect(&format!("tcp://127.0.0.1:{}", port)).unwrap();
    socket.send(&b"{}"[..], 0).unwrap();
    let reply: Value = serde_json::from_slice(&socket.recv_bytes(0).unwrap()).unwrap();
    assert_eq!(reply["result"], "v2");

    running.stop();
}

#[test]
fn shutdown_request_ends_the_wait() {
    let mut orchestrator = Orchestrator::new(Config::default(), AdapterCatalog::empty());
    let mut running = orchestrator
        .launch(&ServiceRegistry::new(), &ClientRegistry::new())
        .unwrap();
    assert!(running.protocols().is_empty());

    let trigger = running.shutdown_trigger();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        trigger.request(ShutdownReason::Requested);
    });
    assert_eq!(running.wait_for_shutdown().unwrap(), ShutdownReason::Requested);
    handle.join().unwrap();
    running.stop();
}

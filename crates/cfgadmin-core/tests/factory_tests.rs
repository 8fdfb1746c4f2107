use cfgadmin_core::factory::{factory_id, Factory, FACTORY_PID_LIST};
use cfgadmin_core::{
    ConfigurationManager, MemoryPersistence, PersistenceManager, Properties, Value,
    SERVICE_FACTORY_PID, SERVICE_PID,
};
use cfgadmin_test_utils::{
    init_tracing, int_props, setup_manager, FactoryCall, FailingPersistence, MemoryDirectory,
    RecordingConsumer, RecordingFactoryConsumer,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[test]
fn test_member_joins_factory_on_first_update() {
    let directory = MemoryDirectory::new();
    let (manager, backend) = setup_manager(&directory);
    let consumer = RecordingFactoryConsumer::new();
    directory.register_factory("bundle.f", &["svc.F"], 0, consumer.clone());

    let member = manager.create_factory_member("svc.F", None).unwrap();
    let pid = member.pid().to_string();
    assert!(pid.starts_with("svc.F."));
    assert_eq!(member.factory_pid(), Some("svc.F"));
    assert!(!backend.exists(&pid));
    assert!(manager.factory_members("svc.F").unwrap().is_empty());

    manager.update(&pid, int_props(&[("port", 8080)])).unwrap();
    manager.flush();

    assert!(backend.exists(&pid));
    assert_eq!(manager.factory_members("svc.F").unwrap(), vec![pid.clone()]);
    let calls = consumer.calls();
    assert_eq!(calls.len(), 1);
    let FactoryCall::Updated(called_pid, properties) = &calls[0] else {
        panic!("expected an update, got {:?}", calls[0]);
    };
    assert_eq!(called_pid, &pid);
    assert_eq!(properties.get_str(SERVICE_PID), Some(pid.as_str()));
    assert_eq!(properties.get_str(SERVICE_FACTORY_PID), Some("svc.F"));
}

#[test]
fn test_delete_removes_member_everywhere() {
    let directory = MemoryDirectory::new();
    let (manager, backend) = setup_manager(&directory);
    let consumer = RecordingFactoryConsumer::new();
    directory.register_factory("bundle.f", &["svc.F"], 0, consumer.clone());

    let kept = manager.create_factory_member("svc.F", None).unwrap();
    let dropped = manager.create_factory_member("svc.F", None).unwrap();
    manager.update(kept.pid(), int_props(&[("n", 1)])).unwrap();
    manager.update(dropped.pid(), int_props(&[("n", 2)])).unwrap();
    manager.flush();

    manager.delete(dropped.pid()).unwrap();
    manager.flush();

    assert_eq!(consumer.deleted_pids(), vec![dropped.pid().to_string()]);
    assert_eq!(manager.factory_members("svc.F").unwrap(), vec![kept.pid().to_string()]);
    assert!(!backend.exists(dropped.pid()));

    let persisted = Factory::load("svc.F", backend.clone()).unwrap();
    assert_eq!(persisted.members(), vec![kept.pid().to_string()]);
}

#[test]
fn test_attach_delivers_updated_members_only() {
    let directory = MemoryDirectory::new();
    let (manager, _backend) = setup_manager(&directory);

    let first = manager.create_factory_member("svc.F", None).unwrap();
    let second = manager.create_factory_member("svc.F", None).unwrap();
    let never_updated = manager.create_factory_member("svc.F", None).unwrap();
    manager.update(first.pid(), int_props(&[("n", 1)])).unwrap();
    manager.update(second.pid(), int_props(&[("n", 2)])).unwrap();
    manager.flush();

    let consumer = RecordingFactoryConsumer::new();
    let registered = directory.register_factory("bundle.f", &["svc.F"], 0, consumer.clone());
    manager.on_consumer_registered(&registered);
    manager.flush();

    let mut delivered = consumer.updated_pids();
    delivered.sort();
    let mut expected = vec![first.pid().to_string(), second.pid().to_string()];
    expected.sort();
    assert_eq!(delivered, expected);
    assert!(!delivered.contains(&never_updated.pid().to_string()));
}

#[test]
fn test_attach_prunes_members_without_configuration() {
    init_tracing();
    let directory = MemoryDirectory::new();
    let backend = Arc::new(MemoryPersistence::new());
    backend
        .store(
            "svc.F.real",
            &Properties::new()
                .with(SERVICE_PID, "svc.F.real")
                .with(SERVICE_FACTORY_PID, "svc.F")
                .with("n", 1),
        )
        .unwrap();
    backend
        .store(
            &factory_id("svc.F"),
            &Properties::new().with(
                FACTORY_PID_LIST,
                Value::List(vec!["svc.F.ghost".into(), "svc.F.real".into()]),
            ),
        )
        .unwrap();

    let manager = ConfigurationManager::builder(directory.clone())
        .persistence(0, backend.clone())
        .start()
        .unwrap();
    let consumer = RecordingFactoryConsumer::new();
    let registered = directory.register_factory("bundle.f", &["svc.F"], 0, consumer.clone());
    manager.on_consumer_registered(&registered);
    manager.flush();

    assert_eq!(consumer.updated_pids(), vec!["svc.F.real".to_string()]);
    assert_eq!(manager.factory_members("svc.F").unwrap(), vec!["svc.F.real".to_string()]);
    let persisted = Factory::load("svc.F", backend.clone()).unwrap();
    assert_eq!(persisted.members(), vec!["svc.F.real".to_string()]);
}

#[test]
fn test_single_consumer_is_not_a_factory_target() {
    let directory = MemoryDirectory::new();
    let (manager, _backend) = setup_manager(&directory);
    let single = RecordingConsumer::new();
    directory.register_consumer("bundle.f", &["svc.F"], 0, single.clone());

    let member = manager.create_factory_member("svc.F", None).unwrap();
    manager.update(member.pid(), int_props(&[("n", 1)])).unwrap();
    manager.flush();

    assert!(single.calls().is_empty());
}

#[test]
fn test_delete_survives_factory_store_failure() {
    init_tracing();
    let directory = MemoryDirectory::new();
    let backend = FailingPersistence::new();
    let manager = ConfigurationManager::builder(directory.clone())
        .persistence(0, backend.clone())
        .start()
        .unwrap();
    let factory_consumer = RecordingFactoryConsumer::new();
    directory.register_factory("bundle.f", &["svc.F"], 0, factory_consumer.clone());
    let single = RecordingConsumer::new();
    directory.register_consumer("bundle.a", &["svc.A"], 0, single.clone());

    let member = manager.create_factory_member("svc.F", None).unwrap();
    let pid = member.pid().to_string();
    manager.update(&pid, int_props(&[("n", 1)])).unwrap();
    manager.flush();

    backend.fail_writes_for(&factory_id("svc.F"));
    manager.delete(&pid).unwrap();
    manager.flush();

    assert_eq!(factory_consumer.deleted_pids(), vec![pid.clone()]);
    assert!(manager.get_existing(&pid).unwrap().is_none());
    assert!(manager.factory_members("svc.F").unwrap().is_empty());
    // the persisted list still names the member
    let persisted = Factory::load("svc.F", backend.clone()).unwrap();
    assert_eq!(persisted.members(), vec![pid]);

    manager.get_or_create("svc.A", None).unwrap();
    manager.update("svc.A", int_props(&[("level", 1)])).unwrap();
    manager.flush();
    assert_eq!(single.updates().len(), 1);
}

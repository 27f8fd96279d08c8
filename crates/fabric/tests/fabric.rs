//! End-to-end behavior of the messaging fabric over the in-process broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tree::{tree, Tree};

use fabric::{
    header, Broker, Error, Exchange, Instance, InstanceConfig, MemoryBroker, Topology,
};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn signals_reach_subscribers_in_emission_order() {
    let broker = MemoryBroker::new("T");
    let device = Instance::start(InstanceConfig::new("motor/1"), broker.clone())
        .await
        .unwrap();
    device.register_signal("signalChanged");

    let mut sub = broker
        .subscribe(Exchange::Signals, "motor/1.signalChanged")
        .await
        .unwrap();

    for i in 0..20i32 {
        device
            .emit("signalChanged", tree! { "a1" => i })
            .await
            .unwrap();
    }
    for i in 0..20i32 {
        let delivery = sub.next().await.unwrap();
        assert_eq!(*delivery.message.body.get::<i32>("a1").unwrap(), i);
        assert_eq!(delivery.message.sender(), Some("motor/1"));
        assert!(delivery.message.header.has(header::TS));
    }
}

#[tokio::test]
async fn emitting_an_undeclared_signal_is_refused() {
    let broker = MemoryBroker::new("T");
    let device = Instance::start(InstanceConfig::new("motor/2"), broker)
        .await
        .unwrap();
    let err = device.emit("signalTypo", Tree::new()).await.unwrap_err();
    assert!(matches!(err, Error::Logic(_)));
}

#[tokio::test]
async fn calls_return_typed_replies() {
    let broker = MemoryBroker::new("T");
    let server = Instance::start(InstanceConfig::new("calc/1"), broker.clone())
        .await
        .unwrap();
    server.register_slot2("slotAdd", |a: i32, b: i32| Ok(a + b));

    let client = Instance::start(InstanceConfig::new("client/1"), broker)
        .await
        .unwrap();
    let reply = client
        .call(
            "calc/1",
            "slotAdd",
            tree! { "a1" => 19i32, "a2" => 23i32 },
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(*reply.get::<i32>("a1").unwrap(), 42);
}

#[tokio::test]
async fn slot_failures_come_back_as_remote_errors() {
    let broker = MemoryBroker::new("T");
    let server = Instance::start(InstanceConfig::new("grumpy/1"), broker.clone())
        .await
        .unwrap();
    server.register_slot("slotFail", |_| {
        Err(Error::Logic("refusing on principle".into()))
    });

    let client = Instance::start(InstanceConfig::new("client/2"), broker)
        .await
        .unwrap();
    let err = client
        .call("grumpy/1", "slotFail", Tree::new(), CALL_TIMEOUT)
        .await
        .unwrap_err();
    match err {
        Error::Remote(detail) => assert!(detail.contains("refusing on principle")),
        other => panic!("expected a remote failure, got {other}"),
    }

    // An unknown slot on a live instance also fails, without killing it.
    let err = client
        .call("grumpy/1", "slotMissing", Tree::new(), CALL_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
}

#[tokio::test]
async fn calls_to_nobody_time_out() {
    let broker = MemoryBroker::new("T");
    let client = Instance::start(InstanceConfig::new("client/3"), broker)
        .await
        .unwrap();
    let err = client
        .call(
            "ghost/1",
            "slotAnything",
            Tree::new(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn global_slots_reach_every_registrant() {
    let broker = MemoryBroker::new("T");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let mut instances = Vec::new();
    for id in ["a/1", "b/1"] {
        let instance = Instance::start(InstanceConfig::new(id), broker.clone())
            .await
            .unwrap();
        let tx = tx.clone();
        let me = id.to_string();
        instance.register_global_slot("slotPing", move |_| {
            let _ = tx.send(me.clone());
            Ok(Tree::new())
        });
        instances.push(instance);
    }
    // An instance without the global slot stays silent.
    let bystander = Instance::start(InstanceConfig::new("c/1"), broker.clone())
        .await
        .unwrap();

    let caller = Instance::start(InstanceConfig::new("caller/1"), broker)
        .await
        .unwrap();
    caller.broadcast("slotPing", Tree::new()).await.unwrap();

    let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["a/1", "b/1"]);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
    drop(bystander);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slots_of_one_instance_run_serialized() {
    let broker = MemoryBroker::new("T");
    let server = Instance::start(InstanceConfig::new("serial/1"), broker.clone())
        .await
        .unwrap();

    // The handler tracks overlapping entries through a try-lock: a second
    // concurrent execution would see the lock taken.
    let gate = Arc::new(Mutex::new(()));
    let overlaps = Arc::new(Mutex::new(0u32));
    {
        let gate = gate.clone();
        let overlaps = overlaps.clone();
        server.register_slot("slotSlow", move |_| {
            match gate.try_lock() {
                Ok(_guard) => std::thread::sleep(Duration::from_millis(20)),
                Err(_) => *overlaps.lock().unwrap() += 1,
            }
            Ok(Tree::new())
        });
    }

    let client = Instance::start(InstanceConfig::new("client/4"), broker)
        .await
        .unwrap();
    let calls = (0..5).map(|_| client.call("serial/1", "slotSlow", Tree::new(), CALL_TIMEOUT));
    for outcome in futures::future::join_all(calls).await {
        outcome.unwrap();
    }
    assert_eq!(*overlaps.lock().unwrap(), 0);
}

#[tokio::test]
async fn topology_tracks_lifecycle_and_silence() {
    let broker = MemoryBroker::new("T");
    let topology = Topology::track(broker.clone()).await.unwrap();

    let device = Instance::start(
        InstanceConfig::new("flaky/1")
            .heartbeat_interval(Duration::from_millis(50))
            .info(tree! { "serverId" => "server/A" }),
        broker.clone(),
    )
    .await
    .unwrap();

    // The announcement arrives promptly.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(topology.is_alive("flaky/1"));
    assert_eq!(
        topology
            .info("flaky/1")
            .unwrap()
            .get::<String>("serverId")
            .unwrap(),
        "server/A"
    );

    // A graceful shutdown removes the instance.
    device.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!topology.is_alive("flaky/1"));

    // A silent instance is marked gone after missing enough beats, and a
    // later beat resurrects it.
    let quiet = Instance::start(
        InstanceConfig::new("quiet/1").heartbeat_interval(Duration::from_millis(50)),
        broker.clone(),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(topology.is_alive("quiet/1"));

    // Stopping the tasks silences the heartbeat without the gone signal.
    quiet.stop_tasks();
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!topology.is_alive("quiet/1"));

    let revived = Instance::start(
        InstanceConfig::new("quiet/1").heartbeat_interval(Duration::from_millis(50)),
        broker,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(topology.is_alive("quiet/1"));
    drop(revived);
    topology.stop();
}

//! Delivery failures, echo suppression and overlapping fan-out passes.

use serde_json::Value;
use syncobj_client::ClientError;
use syncobj_testkit::prelude::*;

fn rows(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn push(row: &str) -> ArrayCommand<String> {
    ArrayCommand::push(row.to_string())
}

fn last_actions(harness: &Harness<ArrayApplicator<String>>, connection: ConnectionId) -> Vec<Value> {
    let delivered = harness.network().delivered_to(connection);
    let last: Value = serde_json::from_str(delivered.last().unwrap()).unwrap();
    last["actions"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn own_actions_come_back_without_command() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let bob = harness.connect("bob");
    alice.init("doc", true).await.unwrap();
    bob.init("doc", true).await.unwrap();

    alice.command("doc", push("hello"));
    alice.update().await.unwrap();
    harness.pump().await;

    let to_alice = last_actions(&harness, alice.transport().connection());
    let to_bob = last_actions(&harness, bob.transport().connection());
    assert_eq!(to_alice[0]["command"], Value::Null);
    assert_eq!(to_alice[0]["version"], 1);
    assert_eq!(to_bob[0]["command"]["payload"], "hello");
    assert_eq!(to_bob[0]["clientId"], "alice");

    assert_eq!(alice.value("doc"), Some(rows(&["hello"])));
    assert_eq!(bob.value("doc"), Some(rows(&["hello"])));
}

#[tokio::test]
async fn failed_flush_keeps_commands_and_aborts_init() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let connection = alice.transport().connection();
    harness.network().set_offline(connection, true);

    alice.command("doc", push("kept"));
    let err = alice.init("doc", true).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport { retryable: true, .. }));
    assert_eq!(alice.buffered_count(), 2);
    assert_eq!(alice.value_temp("doc"), Some(rows(&["kept"])));
    assert!(harness.server().object_ids().is_empty());

    harness.network().set_offline(connection, false);
    alice.update().await.unwrap();
    harness.settle(&[&alice]).await.unwrap();

    // the init in the same batch creates the object before updates commit
    assert_eq!(harness.server().version("doc"), Some(1));
    assert_eq!(alice.value("doc"), Some(rows(&["kept"])));
    assert_eq!(alice.value_temp("doc"), Some(rows(&["kept"])));
    assert_eq!(alice.pending_count(), 0);
}

#[tokio::test]
async fn server_send_failure_is_retried_on_next_pass() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let bob = harness.connect("bob");
    alice.init("doc", true).await.unwrap();
    bob.init("doc", true).await.unwrap();

    let bob_connection = bob.transport().connection();
    harness.network().fail_next(bob_connection, 1);
    alice.command("doc", push("x"));
    alice.update().await.unwrap();

    let first = harness.pump().await;
    assert_eq!((first.slices, first.failures), (1, 1));
    assert_eq!(bob.value("doc"), Some(Vec::new()));

    let second = harness.pump().await;
    assert_eq!((second.slices, second.failures), (1, 0));
    assert_eq!(bob.value("doc"), Some(rows(&["x"])));
    assert_eq!(harness.server().stats().send_failures, 1);
}

#[tokio::test]
async fn overlapping_pass_skips_listener_with_send_outstanding() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let bob = harness.connect("bob");
    alice.init("doc", true).await.unwrap();
    bob.init("doc", true).await.unwrap();
    let bob_connection = bob.transport().connection();

    alice.command("doc", push("v1"));
    alice.update().await.unwrap();
    harness.network().hold(bob_connection);

    let first = harness.pump();
    let second = async {
        while harness.network().waiting() == 0 {
            tokio::task::yield_now().await;
        }
        alice.command("doc", push("v2"));
        alice.update().await.unwrap();
        let report = harness.pump().await;
        harness.network().release(bob_connection);
        report
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.slices, 2);
    // only alice was served; bob's first send was still outstanding
    assert_eq!(second.slices, 1);

    harness.pump().await;
    let versions: Vec<Vec<u64>> = harness
        .network()
        .delivered_to(bob_connection)
        .iter()
        .skip(1)
        .map(|raw| {
            let message: Value = serde_json::from_str(raw).unwrap();
            message["actions"]
                .as_array()
                .unwrap()
                .iter()
                .map(|a| a["version"].as_u64().unwrap())
                .collect()
        })
        .collect();
    assert_eq!(versions, vec![vec![1], vec![2]]);
    assert_eq!(bob.value("doc"), Some(rows(&["v1", "v2"])));
}

#[tokio::test]
async fn failed_outstanding_send_rolls_back_to_its_own_start() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let bob = harness.connect("bob");
    alice.init("doc", true).await.unwrap();
    bob.init("doc", true).await.unwrap();
    let bob_connection = bob.transport().connection();

    alice.command("doc", push("v1"));
    alice.update().await.unwrap();
    harness.network().hold(bob_connection);
    harness.network().fail_next(bob_connection, 1);

    let first = harness.pump();
    let second = async {
        while harness.network().waiting() == 0 {
            tokio::task::yield_now().await;
        }
        alice.command("doc", push("v2"));
        alice.update().await.unwrap();
        let report = harness.pump().await;
        harness.network().release(bob_connection);
        report
    };
    let (first, _) = tokio::join!(first, second);
    assert_eq!(first.failures, 1);

    let listeners = harness.server().listener_versions("doc").unwrap();
    assert!(listeners.contains(&(bob_connection, 0)));

    harness.pump().await;
    assert_eq!(bob.value("doc"), Some(rows(&["v1", "v2"])));
    assert_eq!(bob.version("doc"), Some(2));
}

#[tokio::test]
async fn init_reply_leaves_outstanding_fan_out_in_charge() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    let bob = harness.connect("bob");
    alice.init("doc", true).await.unwrap();
    bob.init("doc", true).await.unwrap();
    let bob_connection = bob.transport().connection();

    alice.command("doc", push("v1"));
    alice.update().await.unwrap();
    harness.network().hold_next(bob_connection);

    let first = harness.pump();
    let second = async {
        while harness.network().waiting() == 0 {
            tokio::task::yield_now().await;
        }
        // bob re-inits while the v1 slice to him is still outstanding
        bob.init("doc", true).await.unwrap();
        assert_eq!(bob.version("doc"), Some(1));

        alice.command("doc", push("v2"));
        alice.update().await.unwrap();
        let report = harness.pump().await;

        harness.network().fail_next(bob_connection, 1);
        harness.network().release(bob_connection);
        report
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.failures, 1);
    // bob was still owned by the outstanding send, so only alice was served
    assert_eq!(second.slices, 1);
    let listeners = harness.server().listener_versions("doc").unwrap();
    assert!(listeners.contains(&(bob_connection, 0)));

    harness.pump().await;
    assert_eq!(bob.value("doc"), Some(rows(&["v1", "v2"])));
    assert_eq!(bob.version("doc"), Some(2));
    assert!(harness.network().inbox_errors().is_empty());
}

#[tokio::test]
async fn malformed_items_do_not_poison_the_batch() {
    init_tracing();
    let harness = Harness::new(ArrayApplicator::<String>::new());
    let alice = harness.connect("alice");
    alice.init("doc", true).await.unwrap();

    let raw = r#"[
        {"type":"c:update","idObj":"doc","action":{"clientId":"mallory","counter":0,"command":{"type":"explode"}}},
        {"type":"c:update","idObj":"doc","action":{"clientId":"mallory","counter":1,"command":{"type":"add","payload":"ok"}}},
        {"type":"c:update","idObj":"nowhere","action":{"clientId":"mallory","counter":2,"command":{"type":"add","payload":"lost"}}}
    ]"#;
    let report = harness.server().receive(raw, &999).await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.errors.len(), 2);

    harness.pump().await;
    assert_eq!(alice.value("doc"), Some(rows(&["ok"])));
    assert!(harness.server().receive("{}", &999).await.is_err());
}

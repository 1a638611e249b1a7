//! Frame-level tests: routing, session takeover, vetoes and protocol errors.

use std::sync::Arc;

use hookbroker::broker::{ClientFrame, ServerFrame};
use hookbroker::hooks::{
    Access, AllowHook, ClientInfo, DisconnectReason, EventKind, Hook, HookOptions, KindSet,
    Message, StatsHook, Subscription, Veto,
};
use hookbroker::lifecycle::{Orchestrator, Running};

mod common;
use common::{eventually, memory_audit, RecordingHook, Seen, TestClient};

async fn start_with(extra: Vec<Arc<dyn Hook>>) -> (Running, common::MemorySink, Arc<RecordingHook>) {
    let mut orchestrator = Orchestrator::new(common::test_config());
    let (audit, sink) = memory_audit();
    let recorder = RecordingHook::new("recorder");
    orchestrator.add_hook(Arc::new(AllowHook), HookOptions::new()).unwrap();
    for hook in extra {
        orchestrator.add_hook(hook, HookOptions::new()).unwrap();
    }
    orchestrator.add_hook(audit, HookOptions::new()).unwrap();
    orchestrator.add_hook(recorder.clone(), HookOptions::new()).unwrap();
    orchestrator
        .add_listener(common::test_config().listeners[0].binding())
        .unwrap();
    (orchestrator.start().await.unwrap(), sink, recorder)
}

fn subscribe(filter: &str, qos: u8) -> ClientFrame {
    ClientFrame::Subscribe {
        filters: vec![Subscription {
            filter: filter.into(),
            qos,
        }],
    }
}

fn publish(topic: &str, payload: &str) -> ClientFrame {
    ClientFrame::Publish {
        topic: topic.into(),
        payload: payload.into(),
        qos: 1,
        retain: false,
    }
}

/// Refuses writes under `locked/` and publishes carrying "forbidden".
struct Gatekeeper;

impl Hook for Gatekeeper {
    fn id(&self) -> &str {
        "gatekeeper"
    }

    fn provides(&self) -> KindSet {
        KindSet::of(&[EventKind::AclCheck, EventKind::Publish])
    }

    fn on_acl_check(&self, _client: &ClientInfo, topic: &str, access: Access) -> Result<(), Veto> {
        if access == Access::Write && topic.starts_with("locked/") {
            return Err(Veto::new("topic is locked"));
        }
        Ok(())
    }

    fn on_publish(&self, _client: &ClientInfo, message: &Message) -> Result<(), Veto> {
        if message.payload == b"forbidden" {
            return Err(Veto::new("payload refused"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_publish_reaches_matching_subscribers() {
    let (running, sink, recorder) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (mut subscriber, _) = TestClient::connect(&addr, "sub").await;
    let (mut other, _) = TestClient::connect(&addr, "other").await;
    let (mut publisher, _) = TestClient::connect(&addr, "pub").await;

    subscriber.send(&subscribe("sensors/+", 0)).await;
    assert_eq!(subscriber.recv().await, ServerFrame::Suback { reason_codes: vec![0] });
    other.send(&subscribe("alerts/#", 2)).await;
    assert_eq!(other.recv().await, ServerFrame::Suback { reason_codes: vec![2] });

    publisher.send(&publish("sensors/a", "21.5")).await;
    assert_eq!(
        publisher.recv().await,
        ServerFrame::Puback {
            accepted: true,
            reason: None
        }
    );
    assert_eq!(
        subscriber.recv().await,
        ServerFrame::Message {
            topic: "sensors/a".into(),
            payload: "21.5".into(),
            qos: 0,
            retain: false,
        }
    );

    other.send(&ClientFrame::Ping).await;
    assert_eq!(other.recv().await, ServerFrame::Pong);

    eventually(|| recorder.seen().contains(&Seen::Published("pub".into(), "sensors/a".into()))).await;
    let published = sink.with_prefix("[PUBLISH]");
    assert_eq!(published.len(), 1);
    assert!(published[0].contains("size=4"));
    assert!(published[0].contains("payload=\"21.5\""));

    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (running, sink, _) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (mut client, _) = TestClient::connect(&addr, "dev-1").await;
    client.send(&subscribe("a/b", 0)).await;
    client.recv().await;
    client
        .send(&ClientFrame::Unsubscribe {
            filters: vec!["a/b".into()],
        })
        .await;
    assert_eq!(client.recv().await, ServerFrame::Unsuback);

    client.send(&publish("a/b", "x")).await;
    assert!(matches!(client.recv().await, ServerFrame::Puback { accepted: true, .. }));
    client.send(&ClientFrame::Ping).await;
    assert_eq!(client.recv().await, ServerFrame::Pong);

    eventually(|| sink.with_prefix("[UNSUBSCRIBE]").len() == 1).await;
    assert!(sink.with_prefix("[UNSUBSCRIBE]")[0].contains("filter=a/b"));
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_filter_is_refused_per_filter() {
    let (running, sink, recorder) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (mut client, _) = TestClient::connect(&addr, "dev-1").await;
    client
        .send(&ClientFrame::Subscribe {
            filters: vec![
                Subscription {
                    filter: "a/#/b".into(),
                    qos: 0,
                },
                Subscription {
                    filter: "c/d".into(),
                    qos: 7,
                },
            ],
        })
        .await;
    assert_eq!(
        client.recv().await,
        ServerFrame::Suback {
            reason_codes: vec![0x80, 2]
        }
    );

    eventually(|| recorder.seen().contains(&Seen::Subscribed("dev-1".into(), vec![0x80, 2]))).await;
    let lines = sink.with_prefix("[SUBSCRIBE]");
    assert!(lines[0].ends_with("code=0x80"));
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_vetoed_publish_is_not_routed() {
    let (running, sink, _) = start_with(vec![Arc::new(Gatekeeper) as Arc<dyn Hook>]).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (mut subscriber, _) = TestClient::connect(&addr, "sub").await;
    let (mut publisher, _) = TestClient::connect(&addr, "pub").await;
    subscriber.send(&subscribe("#", 0)).await;
    subscriber.recv().await;

    publisher.send(&publish("locked/door", "open")).await;
    assert_eq!(
        publisher.recv().await,
        ServerFrame::Puback {
            accepted: false,
            reason: Some("topic is locked".into())
        }
    );
    publisher.send(&publish("open/door", "forbidden")).await;
    assert_eq!(
        publisher.recv().await,
        ServerFrame::Puback {
            accepted: false,
            reason: Some("payload refused".into())
        }
    );
    publisher.send(&publish("open/door", "ok")).await;
    assert!(matches!(publisher.recv().await, ServerFrame::Puback { accepted: true, .. }));

    match subscriber.recv().await {
        ServerFrame::Message { topic, payload, .. } => {
            assert_eq!(topic, "open/door");
            assert_eq!(payload, "ok");
        }
        other => panic!("unexpected frame: {:?}", other),
    }
    eventually(|| sink.with_prefix("[PUBLISH]").len() == 1).await;
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_session_takeover_disconnects_previous_connection() {
    let (running, _, recorder) = start_with(Vec::new()).await;
    let broker = Arc::clone(running.broker());
    let addr = broker.listener_addr("t1").unwrap();

    let (mut first, _) = TestClient::connect(&addr, "dev-1").await;
    let (_second, connack) = TestClient::connect(&addr, "dev-1").await;
    assert!(matches!(connack, ServerFrame::Connack { accepted: true, .. }));
    first.closed().await;

    assert_eq!(
        recorder.disconnects(),
        vec![Seen::Disconnect {
            client: "dev-1".into(),
            reason: DisconnectReason::SessionTakenOver,
            expire: false,
        }]
    );
    assert_eq!(broker.client_count(), 1);

    broker.close().await.unwrap();
    assert_eq!(recorder.disconnects().len(), 2);
}

#[tokio::test]
async fn test_empty_client_id_is_assigned() {
    let (running, _, _) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (_client, connack) = TestClient::connect(&addr, "").await;
    match connack {
        ServerFrame::Connack {
            accepted, client_id, ..
        } => {
            assert!(accepted);
            assert!(client_id.starts_with("auto-"));
        }
        other => panic!("unexpected frame: {:?}", other),
    }
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_first_frame_must_be_connect() {
    let (running, sink, _) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let mut client = TestClient::open(&addr).await;
    client.send(&ClientFrame::Ping).await;
    assert!(matches!(client.recv().await, ServerFrame::Error { .. }));
    client.closed().await;
    assert!(sink.lines().is_empty());
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_ends_session_with_protocol_error() {
    let (running, _, recorder) = start_with(Vec::new()).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    let (mut client, _) = TestClient::connect(&addr, "dev-1").await;
    client.send_raw("{not json}\n").await;
    assert!(matches!(client.recv().await, ServerFrame::Error { .. }));
    client.closed().await;

    eventually(|| recorder.disconnects().len() == 1).await;
    match &recorder.disconnects()[0] {
        Seen::Disconnect { reason, expire, .. } => {
            assert!(matches!(reason, DisconnectReason::ProtocolError(_)));
            assert!(!expire);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    running.broker().close().await.unwrap();
}

#[tokio::test]
async fn test_subscription_count_follows_disconnects_and_unsubscribes() {
    let stats = Arc::new(StatsHook::new());
    let (running, _, recorder) = start_with(vec![stats.clone() as Arc<dyn Hook>]).await;
    let addr = running.broker().listener_addr("t1").unwrap();

    for _ in 0..3 {
        let (mut client, _) = TestClient::connect(&addr, "cycle").await;
        client.send(&subscribe("a", 0)).await;
        client.recv().await;
        eventually(|| stats.snapshot().subscriptions == 1).await;
        client.send(&ClientFrame::Disconnect).await;
        client.closed().await;
        eventually(|| stats.snapshot().active_clients == 0).await;
    }
    assert_eq!(stats.snapshot().subscriptions, 0);

    let (mut client, _) = TestClient::connect(&addr, "live").await;
    client
        .send(&ClientFrame::Subscribe {
            filters: vec![
                Subscription {
                    filter: "a".into(),
                    qos: 0,
                },
                Subscription {
                    filter: "b".into(),
                    qos: 0,
                },
            ],
        })
        .await;
    client.recv().await;
    client
        .send(&ClientFrame::Unsubscribe {
            filters: vec!["never".into()],
        })
        .await;
    assert_eq!(client.recv().await, ServerFrame::Unsuback);
    client.send(&ClientFrame::Ping).await;
    assert_eq!(client.recv().await, ServerFrame::Pong);

    assert_eq!(stats.snapshot().subscriptions, 2);
    assert!(!recorder
        .seen()
        .iter()
        .any(|seen| matches!(seen, Seen::Unsubscribed(..))));

    running.broker().close().await.unwrap();
    assert_eq!(stats.snapshot().subscriptions, 0);
}


use std::sync::{Arc, Mutex};
use std::time::Duration;

use hub::{ConnectionManager, ConnectionOptions, MemoryHub, MemoryLink, MemoryTransport, SessionHandle};
use proto::{Credential, HubFrame, InvokeError, SessionError, SessionToken, TransportError};
use serde_json::json;
use session::{ConnectionState, NotificationKind, NotificationSink, SessionUpdate};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(600);

#[derive(Default)]
struct RecordingSink {
    kinds: Mutex<Vec<NotificationKind>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, kind: NotificationKind) {
        self.kinds.lock().expect("sink lock").push(kind);
    }
}

async fn connect_with(
    hub: &mut MemoryHub,
    transport: MemoryTransport,
    sink: Arc<dyn NotificationSink>,
) -> (SessionHandle, MemoryLink) {
    let manager =
        ConnectionManager::new(transport, ConnectionOptions::default()).with_notifications(sink);
    let connecting = tokio::spawn(manager.connect(
        Credential::new("alice", "secret"),
        SessionToken::new("tok-alice"),
    ));
    let mut link = hub.accept().await.expect("client link");
    assert_eq!(link.token, "tok-alice");
    link.accept_login().await.expect("agent login");
    let handle = connecting
        .await
        .expect("connect task")
        .expect("session should go live");
    (handle, link)
}

async fn connect(hub: &mut MemoryHub, transport: MemoryTransport) -> (SessionHandle, MemoryLink) {
    connect_with(hub, transport, Arc::new(RecordingSink::default())).await
}

async fn wait_for(updates: &mut broadcast::Receiver<SessionUpdate>, wanted: SessionUpdate) {
    timeout(WAIT, async {
        loop {
            if updates.recv().await.expect("update stream open") == wanted {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for session update");
}

async fn wait_for_request(updates: &mut broadcast::Receiver<SessionUpdate>) {
    timeout(WAIT, async {
        loop {
            if let SessionUpdate::ChatRequested(_) = updates.recv().await.expect("update stream open") {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for chat request");
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_and_logs_in_again() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    link.push_event("ChatRequest", vec![json!("bob911"), json!("support")]);
    wait_for_request(&mut updates).await;

    drop(link);
    wait_for(
        &mut updates,
        SessionUpdate::Connection(ConnectionState::Reconnecting { attempt: 1 }),
    )
    .await;

    let mut link = hub.accept().await.expect("second link");
    let arguments = link.accept_login().await.expect("agent login again");
    assert_eq!(
        arguments,
        vec![json!("alice"), json!("secret"), json!(["general", "support"])]
    );
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;

    // The cached pending set survives the reconnect.
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.connection, ConnectionState::Live);
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.pending[0].requester.as_str(), "bob911");
}

#[tokio::test(start_paused = true)]
async fn in_flight_call_fails_when_connection_drops() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, mut link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    link.push_event("ChatRequest", vec![json!("bob911"), json!("support")]);
    wait_for_request(&mut updates).await;

    let pickup = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.pickup("bob911").await })
    };
    let (_, target, _) = link.next_invocation().await.expect("pickup invocation");
    assert_eq!(target, "PickupChat");
    drop(link);

    let err = pickup
        .await
        .expect("pickup task")
        .expect_err("call interrupted by the drop");
    assert_eq!(
        err,
        SessionError::Invoke(InvokeError::Interrupted {
            target: "PickupChat".to_string(),
            source: TransportError::Closed(None),
        })
    );

    let mut link = hub.accept().await.expect("second link");
    link.accept_login().await.expect("agent login again");
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;
    let snapshot = handle.snapshot();
    assert!(snapshot.active.is_none());
    assert_eq!(snapshot.pending.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn commands_are_rejected_while_reconnecting() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    hub.set_online(false);
    drop(link);
    wait_for(
        &mut updates,
        SessionUpdate::Connection(ConnectionState::Reconnecting { attempt: 2 }),
    )
    .await;

    assert_eq!(
        handle.send_message("anyone?").await,
        Err(SessionError::NotConnected("reconnecting (attempt 2)".to_string()))
    );
    assert_eq!(
        handle.pickup("bob911").await,
        Err(SessionError::NotConnected("reconnecting (attempt 2)".to_string()))
    );

    hub.set_online(true);
    let mut link = hub.accept().await.expect("link after outage");
    link.accept_login().await.expect("agent login again");
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;
}

#[tokio::test(start_paused = true)]
async fn commands_during_re_login_are_rejected_not_replayed() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    link.push_event("ChatRequest", vec![json!("bob911"), json!("support")]);
    wait_for_request(&mut updates).await;

    drop(link);
    let mut link = hub.accept().await.expect("second link");
    let (login_id, target, _) = link.next_invocation().await.expect("agent login again");
    assert_eq!(target, "AgentLogin");
    assert_eq!(
        handle.snapshot().connection,
        ConnectionState::Reconnecting { attempt: 1 }
    );

    let not_connected = SessionError::NotConnected("reconnecting (attempt 1)".to_string());
    let pickup = timeout(WAIT, handle.pickup("bob911"))
        .await
        .expect("pickup answered while logging in");
    assert_eq!(pickup, Err(not_connected.clone()));
    let sent = timeout(WAIT, handle.send_message("still there?"))
        .await
        .expect("send answered while logging in");
    assert_eq!(sent, Err(not_connected));

    link.complete(&login_id, None);
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;

    // Nothing rejected above may reach the hub once live.
    assert!(
        timeout(Duration::from_secs(1), link.next_frame())
            .await
            .is_err()
    );
    let snapshot = handle.snapshot();
    assert!(snapshot.active.is_none());
    assert_eq!(snapshot.pending.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_the_last_reconnect_delay() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    link.push_event("ChatRequest", vec![json!("bob911"), json!("general")]);
    wait_for_request(&mut updates).await;

    let started = Instant::now();
    hub.set_online(false);
    drop(link);
    timeout(WAIT, handle.closed())
        .await
        .expect("session should end");

    assert!(started.elapsed() >= Duration::from_secs(42));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    assert!(snapshot.pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_server_is_treated_as_lost() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, mut link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    // Pings keep flowing from the client while the server stays quiet.
    let reconnected = tokio::spawn(async move {
        let second = hub.accept().await;
        (hub, second)
    });
    wait_for(
        &mut updates,
        SessionUpdate::Connection(ConnectionState::Reconnecting { attempt: 1 }),
    )
    .await;
    assert!(link.next_frame().await.is_none());

    let (_hub, second) = reconnected.await.expect("accept task");
    let mut second = second.expect("second link");
    second.accept_login().await.expect("agent login again");
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;
}

#[tokio::test(start_paused = true)]
async fn close_frame_honours_allow_reconnect() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;
    let mut updates = handle.subscribe();

    link.push(HubFrame::Close {
        error: Some("Server restarting".to_string()),
        allow_reconnect: true,
    });
    let mut link = hub.accept().await.expect("reconnect after close");
    link.accept_login().await.expect("agent login again");
    wait_for(&mut updates, SessionUpdate::Connection(ConnectionState::Live)).await;

    link.push(HubFrame::Close {
        error: None,
        allow_reconnect: false,
    });
    timeout(WAIT, handle.closed())
        .await
        .expect("terminal close ends the session");
}

#[tokio::test(start_paused = true)]
async fn refused_re_authentication_ends_session() {
    let (mut hub, transport) = MemoryHub::pair();
    let (handle, link) = connect(&mut hub, transport).await;

    drop(link);
    let mut link = hub.accept().await.expect("second link");
    let (id, target, _) = link.next_invocation().await.expect("agent login again");
    assert_eq!(target, "AgentLogin");
    link.complete(&id, Some("Agent disabled"));

    timeout(WAIT, handle.closed())
        .await
        .expect("session should end");
    assert_eq!(handle.snapshot().connection, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn events_before_login_completion_are_not_lost() {
    let (mut hub, transport) = MemoryHub::pair();
    let manager = ConnectionManager::new(transport, ConnectionOptions::default());
    let connecting = tokio::spawn(manager.connect(
        Credential::new("alice", "secret"),
        SessionToken::new("tok-alice"),
    ));

    let mut link = hub.accept().await.expect("client link");
    let (id, _, _) = link.next_invocation().await.expect("agent login");
    link.push_event("ChatRequest", vec![json!("bob911"), json!("support")]);
    link.complete(&id, None);

    let handle = connecting
        .await
        .expect("connect task")
        .expect("session should go live");
    let picked = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.pickup("bob911").await })
    };
    let (id, target, _) = link.next_invocation().await.expect("pickup");
    assert_eq!(target, "PickupChat");
    link.complete(&id, None);
    let active = picked.await.expect("pickup task").expect("pickup");
    assert_eq!(active.requester.as_str(), "bob911");
}

#[tokio::test(start_paused = true)]
async fn offline_hub_fails_initial_connect() {
    let (hub, transport) = MemoryHub::pair();
    hub.set_online(false);
    let err = ConnectionManager::new(transport, ConnectionOptions::default())
        .connect(Credential::new("alice", "secret"), SessionToken::new("tok"))
        .await
        .err()
        .expect("offline hub");
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::ConnectionFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn notifications_fire_for_requests_and_messages() {
    let (mut hub, transport) = MemoryHub::pair();
    let sink = Arc::new(RecordingSink::default());
    let (handle, link) = connect_with(&mut hub, transport, sink.clone()).await;
    let mut updates = handle.subscribe();

    link.push_event("ChatRequest", vec![json!("bob911"), json!("support")]);
    link.push_event("IncomingMessage", vec![json!("Hello"), json!("bob911")]);
    timeout(WAIT, async {
        loop {
            if let SessionUpdate::Message(_) = updates.recv().await.expect("update stream open") {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for message");

    assert_eq!(
        *sink.kinds.lock().expect("sink lock"),
        vec![NotificationKind::ChatRequest, NotificationKind::Message]
    );
}

//! Integration test: start the HTTP server on a free port with an in-memory
//! transport, then drive the conversation endpoints with a real client.

use bridgebot::api::{ApiState, start_http_server};
use bridgebot::conversation::{ActivityLedger, ReplyCorrelator};
use bridgebot::gateway::ConversationGateway;
use bridgebot::transport::{ChatTransport, ChatTransportDyn, EventStream};
use bridgebot::{ChannelInfo, ConnectionState, MessageEvent};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const RESPONDER: u64 = 4242;

/// In-memory transport. Channels live in a Vec and every relayed message is
/// answered by the scripted responder with an "echo:" prefix, unless muted.
struct EchoTransport {
    state_tx: watch::Sender<ConnectionState>,
    channels: Mutex<Vec<ChannelInfo>>,
    next_channel_id: AtomicU64,
    muted: AtomicBool,
    event_tx: mpsc::Sender<MessageEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<MessageEvent>>>,
}

impl EchoTransport {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            state_tx,
            channels: Mutex::new(Vec::new()),
            next_channel_id: AtomicU64::new(1),
            muted: AtomicBool::new(false),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    fn set_ready(&self) {
        self.state_tx.send_replace(ConnectionState::Ready);
    }

    /// Stop answering relayed messages, leaving their requests in flight.
    fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }

    fn channel_names(&self) -> Vec<String> {
        self.channels
            .lock()
            .expect("channels lock")
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

impl ChatTransport for EchoTransport {
    fn name(&self) -> &str {
        "echo"
    }

    async fn start(&self) -> bridgebot::Result<EventStream> {
        let rx = self
            .event_rx
            .lock()
            .expect("event_rx lock")
            .take()
            .expect("start called twice");
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn list_channels(&self) -> bridgebot::Result<Vec<ChannelInfo>> {
        Ok(self.channels.lock().expect("channels lock").clone())
    }

    async fn create_channel(&self, name: &str) -> bridgebot::Result<ChannelInfo> {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let info = ChannelInfo {
            id,
            name: name.to_string(),
        };
        self.channels
            .lock()
            .expect("channels lock")
            .push(info.clone());
        Ok(info)
    }

    async fn delete_channel(&self, channel_id: u64) -> bridgebot::Result<()> {
        self.channels
            .lock()
            .expect("channels lock")
            .retain(|c| c.id != channel_id);
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> bridgebot::Result<()> {
        if self.muted.load(Ordering::Relaxed) {
            return Ok(());
        }
        let event = MessageEvent {
            channel_id,
            author_id: RESPONDER,
            content: format!("echo: {text}"),
        };
        let _ = self.event_tx.send(event).await;
        Ok(())
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Everything a test needs to talk to one running bridge instance, plus the
/// handles the process shutdown sequence works with.
struct Bridge {
    base_url: String,
    transport: Arc<EchoTransport>,
    correlator: Arc<ReplyCorrelator>,
    dispatcher: tokio::task::JoinHandle<()>,
    server: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

async fn start_bridge(ratelimit_max_rps: Option<u32>) -> Bridge {
    let transport = Arc::new(EchoTransport::new());
    let dyn_transport: Arc<dyn ChatTransportDyn> = transport.clone();

    let events = dyn_transport.start().await.expect("start transport");
    let ledger = Arc::new(ActivityLedger::new());
    let correlator = Arc::new(ReplyCorrelator::new());
    let dispatcher = correlator.run(events, ledger.clone());

    let gateway = Arc::new(ConversationGateway::new(
        dyn_transport.clone(),
        correlator.clone(),
        ledger,
        RESPONDER,
        Some(Duration::from_secs(5)),
    ));

    let state = Arc::new(ApiState::new(
        gateway,
        dyn_transport.state(),
        ratelimit_max_rps,
    ));

    let port = free_port();
    let bind: SocketAddr = format!("127.0.0.1:{port}").parse().expect("bind addr");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = start_http_server(bind, state, None, shutdown_rx)
        .await
        .expect("start http server");

    Bridge {
        base_url: format!("http://127.0.0.1:{port}"),
        transport,
        correlator,
        dispatcher,
        server,
        shutdown_tx,
    }
}

async fn get_json(client: &reqwest::Client, url: &str) -> serde_json::Value {
    client
        .get(url)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("parse JSON")
}

#[tokio::test]
async fn healthcheck_reflects_transport_state() {
    let bridge = start_bridge(None).await;
    let client = reqwest::Client::new();
    let url = format!("{}/healthcheck", bridge.base_url);

    let body = get_json(&client, &url).await;
    assert_eq!(body["status"], "not ready");

    // Conversations are refused until the transport reports ready.
    let refused = get_json(
        &client,
        &format!("{}/?message=hi&conversationID=early", bridge.base_url),
    )
    .await;
    assert_eq!(refused["error"], "Discord is not ready yet");

    bridge.transport.set_ready();
    let body = get_json(&client, &url).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn conversation_round_trip_returns_the_reply() {
    let bridge = start_bridge(None).await;
    bridge.transport.set_ready();
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/", bridge.base_url))
        .query(&[("message", "hello"), ("conversationID", "Trip1")])
        .send()
        .await
        .expect("request")
        .json::<serde_json::Value>()
        .await
        .expect("parse JSON");

    // The relayed message carries the responder mention, and the channel is
    // named after the lowercased identifier.
    assert_eq!(body["response"], format!("echo: <@{RESPONDER}> hello"));
    assert_eq!(bridge.transport.channel_names(), vec!["trip1".to_string()]);
}

#[tokio::test]
async fn invalid_requests_come_back_as_error_bodies() {
    let bridge = start_bridge(None).await;
    bridge.transport.set_ready();
    let client = reqwest::Client::new();

    let body = get_json(&client, &format!("{}/", bridge.base_url)).await;
    assert_eq!(body["error"], "Please provide a message and conversationID");

    let body = get_json(
        &client,
        &format!("{}/?message=hi&conversationID=bad%20id", bridge.base_url),
    )
    .await;
    assert_eq!(
        body["error"],
        "Invalid conversationID. Must be a string with only letters and numbers, no spaces and no more than 32 characters"
    );
}

#[tokio::test]
async fn delete_tears_down_the_conversation() {
    let bridge = start_bridge(None).await;
    bridge.transport.set_ready();
    let client = reqwest::Client::new();

    let body = get_json(
        &client,
        &format!("{}/?message=hi&conversationID=gone1", bridge.base_url),
    )
    .await;
    assert!(body["response"].is_string());

    let body = client
        .delete(format!("{}/", bridge.base_url))
        .query(&[("conversationID", "gone1")])
        .send()
        .await
        .expect("request")
        .json::<serde_json::Value>()
        .await
        .expect("parse JSON");
    assert_eq!(body["response"], "Conversation deleted");
    assert_eq!(body["success"], true);
    assert!(bridge.transport.channel_names().is_empty());

    let body = client
        .delete(format!("{}/", bridge.base_url))
        .query(&[("conversationID", "gone1")])
        .send()
        .await
        .expect("request")
        .json::<serde_json::Value>()
        .await
        .expect("parse JSON");
    assert_eq!(body["error"], "Conversation does not exist");
}

#[tokio::test]
async fn rate_limit_rejects_with_429() {
    let bridge = start_bridge(Some(1)).await;
    bridge.transport.set_ready();
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..5 {
        let status = client
            .get(format!("{}/", bridge.base_url))
            .query(&[("message", "hi"), ("conversationID", "limited")])
            .send()
            .await
            .expect("request")
            .status();
        statuses.push(status.as_u16());
    }
    assert!(statuses.contains(&429), "expected a 429 in {statuses:?}");

    // The healthcheck is never rate limited.
    let health = client
        .get(format!("{}/healthcheck", bridge.base_url))
        .send()
        .await
        .expect("request")
        .status();
    assert!(health.is_success());
}

#[tokio::test]
async fn shutdown_drains_a_request_stuck_awaiting_a_reply() {
    let bridge = start_bridge(None).await;
    bridge.transport.set_ready();
    bridge.transport.mute();

    let client = reqwest::Client::new();
    let url = format!("{}/?message=hi&conversationID=parked1", bridge.base_url);
    let inflight = tokio::spawn(async move { get_json(&client, &url).await });

    // The request is parked once its waiter shows up in the table.
    for _ in 0..100 {
        if bridge.correlator.pending_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bridge.correlator.pending_count(), 1);

    // The process shutdown sequence: drain HTTP, stop the dispatcher, fail
    // the leftover waiters. Without the close the drain waits on the parked
    // request and never finishes.
    let _ = bridge.shutdown_tx.send(true);
    bridge.dispatcher.abort();
    bridge.correlator.close();

    tokio::time::timeout(Duration::from_secs(2), bridge.server)
        .await
        .expect("server drained after close")
        .expect("server task");

    let body = inflight.await.expect("inflight request task");
    assert_eq!(body["error"], "reply dispatcher stopped");
}

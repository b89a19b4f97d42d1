//! Connection manager and session dispatcher.
//!
//! A single task owns the transport and the [`SessionState`]. It multiplexes
//! agent requests, inbound frames and the keep-alive timer, applies each
//! input to the state machine and carries out the resulting effects.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proto::{
    AuthError, Credential, DEFAULT_QUEUES, HubCall, HubEvent, HubFrame, InvokeError, SessionError,
    SessionToken, TransportError,
};
use session::{
    ConnectionState, Effect, Input, NotificationSink, NullSink, SessionSnapshot, SessionState,
    SessionUpdate,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::handle::{ReplySender, Request, SessionHandle};
use crate::transport::HubTransport;

const REQUEST_BUFFER: usize = 64;
const UPDATE_BUFFER: usize = 256;
/// Shortest accepted ping period; tokio intervals cannot tick at zero.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Delays before successive reconnect attempts. Running out ends the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before the 1-based `attempt`, `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let index = usize::try_from(attempt.checked_sub(1)?).ok()?;
        self.delays.get(index).copied()
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            [0, 2, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}

/// Tunables for a hub session.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Queues passed to `AgentLogin`.
    pub queues: Vec<String>,
    pub reconnect: ReconnectPolicy,
    /// Interval between client pings.
    pub keep_alive: Duration,
    /// Silence after which the connection counts as lost. Also bounds the
    /// wait for the `AgentLogin` completion.
    pub server_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            queues: DEFAULT_QUEUES.iter().map(|q| q.to_string()).collect(),
            reconnect: ReconnectPolicy::default(),
            keep_alive: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

/// Establishes hub sessions over a transport.
pub struct ConnectionManager<T> {
    transport: T,
    options: ConnectionOptions,
    sink: Arc<dyn NotificationSink>,
}

impl<T: HubTransport + 'static> ConnectionManager<T> {
    pub fn new(transport: T, mut options: ConnectionOptions) -> Self {
        if options.keep_alive < MIN_KEEP_ALIVE {
            warn!(
                requested_ms = options.keep_alive.as_millis() as u64,
                "Keep-alive period too short, using {}s",
                MIN_KEEP_ALIVE.as_secs()
            );
            options.keep_alive = MIN_KEEP_ALIVE;
        }
        Self {
            transport,
            options,
            sink: Arc::new(NullSink),
        }
    }

    /// Routes notifications to `sink` instead of dropping them.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Opens the hub connection, logs the agent in and starts the dispatcher.
    ///
    /// Returns once the session is live. Transport failures and a refused
    /// `AgentLogin` are returned as-is and leave nothing running.
    pub async fn connect(
        self,
        credential: Credential,
        token: SessionToken,
    ) -> Result<SessionHandle, SessionError> {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let (updates_tx, _) = broadcast::channel(UPDATE_BUFFER);
        let state = SessionState::new(credential.username.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let agent = credential.username.clone();

        let mut dispatcher = Dispatcher {
            transport: self.transport,
            options: self.options,
            sink: self.sink,
            credential,
            token,
            state,
            in_flight: HashMap::new(),
            next_invocation: 0,
            early: VecDeque::new(),
            requests: requests_rx,
            snapshot: snapshot_tx,
            updates: updates_tx.clone(),
        };
        dispatcher.establish().await?;

        tokio::spawn(dispatcher.run());
        Ok(SessionHandle::new(agent, requests_tx, snapshot_rx, updates_tx))
    }
}

struct InFlight {
    call: HubCall,
    reply: Option<ReplySender>,
}

enum Flow {
    Continue,
    Lost(TransportError),
    Stop,
}

fn after(lost: Option<TransportError>) -> Flow {
    lost.map_or(Flow::Continue, Flow::Lost)
}

struct Dispatcher<T> {
    transport: T,
    options: ConnectionOptions,
    sink: Arc<dyn NotificationSink>,
    credential: Credential,
    token: SessionToken,
    state: SessionState,
    in_flight: HashMap<String, InFlight>,
    next_invocation: u64,
    /// Frames that arrived while waiting for the `AgentLogin` completion.
    early: VecDeque<HubFrame>,
    requests: mpsc::Receiver<Request>,
    snapshot: watch::Sender<SessionSnapshot>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl<T: HubTransport> Dispatcher<T> {
    async fn establish(&mut self) -> Result<(), SessionError> {
        self.set_connection(ConnectionState::Connecting).await;
        if let Err(e) = self.transport.open(&self.token).await {
            warn!(error = %e, "Hub connection failed");
            self.set_connection(ConnectionState::Disconnected).await;
            return Err(e.into());
        }

        self.set_connection(ConnectionState::Authenticating).await;
        if let Err(e) = self.login().await {
            warn!(error = %e, "Agent login failed");
            self.transport.close().await;
            self.early.clear();
            self.set_connection(ConnectionState::Disconnected).await;
            return Err(e);
        }

        self.set_connection(ConnectionState::Live).await;
        info!(agent = %self.credential.username, "Session live");
        Ok(())
    }

    async fn run(mut self) {
        let period = self.options.keep_alive;
        let mut keep_alive = interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            let flow = if let Some(frame) = self.early.pop_front() {
                self.on_frame(frame).await
            } else {
                let deadline = last_seen + self.options.server_timeout;
                tokio::select! {
                    request = self.requests.recv() => match request {
                        Some(request) => self.on_request(request).await,
                        None => Flow::Stop,
                    },
                    frame = self.transport.recv() => match frame {
                        Some(Ok(frame)) => {
                            last_seen = Instant::now();
                            self.on_frame(frame).await
                        }
                        Some(Err(e)) => Flow::Lost(e),
                        None => Flow::Lost(TransportError::Closed(None)),
                    },
                    _ = keep_alive.tick() => match self.transport.send(&HubFrame::Ping).await {
                        Ok(()) => Flow::Continue,
                        Err(e) => Flow::Lost(e),
                    },
                    _ = sleep_until(deadline) => {
                        Flow::Lost(TransportError::Timeout(self.options.server_timeout.as_secs()))
                    }
                }
            };

            match flow {
                Flow::Continue => {}
                Flow::Lost(cause) => {
                    if !self.reconnect(cause).await {
                        return;
                    }
                    last_seen = Instant::now();
                    keep_alive.reset();
                }
                Flow::Stop => {
                    self.teardown().await;
                    return;
                }
            }
        }
    }

    async fn on_request(&mut self, request: Request) -> Flow {
        match request {
            Request::Command { command, reply } => {
                after(self.advance(Input::Command(command), Some(reply)).await)
            }
            other => answer_offline(
                &mut self.state,
                self.sink.as_ref(),
                &self.updates,
                &self.snapshot,
                other,
            ),
        }
    }

    async fn on_frame(&mut self, frame: HubFrame) -> Flow {
        match frame {
            HubFrame::Invocation {
                target, arguments, ..
            } => match HubEvent::from_invocation(&target, &arguments) {
                Ok(Some(event)) => {
                    debug!(event = event.target(), "Hub event");
                    after(self.advance(Input::Hub(event), None).await)
                }
                Ok(None) => {
                    debug!(method = %target, "Ignoring unknown hub method");
                    Flow::Continue
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed hub event");
                    Flow::Continue
                }
            },
            HubFrame::Completion {
                invocation_id,
                error,
                ..
            } => {
                let Some(InFlight { call, reply }) = self.in_flight.remove(&invocation_id) else {
                    debug!(invocation_id = %invocation_id, "Completion for unknown invocation");
                    return Flow::Continue;
                };
                let outcome = match error {
                    None => Ok(()),
                    Some(message) => Err(InvokeError::Remote {
                        target: call.target().to_string(),
                        message,
                    }),
                };
                after(self.advance(Input::Completed { call, outcome }, reply).await)
            }
            HubFrame::Close {
                error,
                allow_reconnect,
            } => {
                if allow_reconnect {
                    Flow::Lost(TransportError::Closed(error))
                } else {
                    warn!(reason = ?error, "Hub closed the connection");
                    Flow::Stop
                }
            }
            HubFrame::Ping | HubFrame::Other(_) => Flow::Continue,
        }
    }

    /// Applies one input and executes its effects.
    ///
    /// Returns the transport error if an invocation could not be written.
    /// The interrupted call is completed as failed before returning.
    async fn advance(&mut self, input: Input, reply: Option<ReplySender>) -> Option<TransportError> {
        let mut queue = VecDeque::from([(input, reply)]);
        let mut lost = None;

        while let Some((input, mut reply)) = queue.pop_front() {
            let state = std::mem::take(&mut self.state);
            let (state, effects) = state.apply(input, Utc::now());
            self.state = state;

            for effect in effects {
                match effect {
                    Effect::Invoke(call) => match self.invoke(&call).await {
                        Ok(id) => {
                            self.in_flight.insert(
                                id,
                                InFlight {
                                    call,
                                    reply: reply.take(),
                                },
                            );
                        }
                        Err(e) => {
                            let target = call.target().to_string();
                            let outcome = Err(InvokeError::Interrupted {
                                target,
                                source: e.clone(),
                            });
                            queue.push_back((Input::Completed { call, outcome }, reply.take()));
                            lost.get_or_insert(e);
                        }
                    },
                    other => emit(other, &mut reply, self.sink.as_ref(), &self.updates),
                }
            }
        }

        self.snapshot.send_replace(self.state.snapshot());
        lost
    }

    async fn set_connection(&mut self, next: ConnectionState) {
        // Connection inputs never invoke.
        let _ = self.advance(Input::Connection(next), None).await;
    }

    fn next_id(&mut self) -> String {
        self.next_invocation += 1;
        self.next_invocation.to_string()
    }

    async fn invoke(&mut self, call: &HubCall) -> Result<String, TransportError> {
        let id = self.next_id();
        debug!(call = call.target(), invocation_id = %id, "Invoking hub method");
        self.transport
            .send(&HubFrame::invocation(id.clone(), call))
            .await?;
        Ok(id)
    }

    fn login_call(&self) -> HubCall {
        HubCall::AgentLogin {
            username: self.credential.username.clone(),
            password: self.credential.password.clone(),
            queues: self.options.queues.clone(),
        }
    }

    /// Issues `AgentLogin` on the freshly opened transport and waits for it.
    async fn login(&mut self) -> Result<(), SessionError> {
        let id = self.invoke(&self.login_call()).await?;
        await_login(
            &mut self.transport,
            &id,
            self.options.server_timeout,
            &mut self.early,
        )
        .await
    }

    /// Opens a fresh transport and logs in again, answering agent requests
    /// against the `Reconnecting` state meanwhile.
    ///
    /// Returns `None` if the session was shut down during the attempt.
    async fn rejoin(&mut self) -> Option<Result<(), SessionError>> {
        let id = self.next_id();
        let login = HubFrame::invocation(id.clone(), &self.login_call());
        let wait = self.options.server_timeout;

        let transport = &mut self.transport;
        let token = &self.token;
        let early = &mut self.early;
        let attempt = async move {
            transport.open(token).await?;
            transport.send(&login).await?;
            await_login(transport, &id, wait, early).await
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                outcome = &mut attempt => return Some(outcome),
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        return None;
                    };
                    let flow = answer_offline(
                        &mut self.state,
                        self.sink.as_ref(),
                        &self.updates,
                        &self.snapshot,
                        request,
                    );
                    if let Flow::Stop = flow {
                        return None;
                    }
                }
            }
        }
    }

    /// Runs the reconnect policy. Returns `false` once the session is over.
    async fn reconnect(&mut self, cause: TransportError) -> bool {
        warn!(error = %cause, "Hub connection lost");
        self.transport.close().await;
        self.early.clear();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(delay) = self.options.reconnect.delay_for(attempt) else {
                error!(attempts = attempt - 1, "Giving up on reconnecting");
                self.teardown().await;
                return false;
            };

            self.set_connection(ConnectionState::Reconnecting { attempt })
                .await;
            if attempt == 1 {
                self.fail_in_flight(&cause).await;
            }
            if !self.idle(delay).await {
                self.teardown().await;
                return false;
            }

            info!(attempt, "Reconnecting to hub");
            let Some(outcome) = self.rejoin().await else {
                self.teardown().await;
                return false;
            };
            match outcome {
                Ok(()) => {
                    self.set_connection(ConnectionState::Live).await;
                    info!(attempt, "Reconnected");
                    return true;
                }
                Err(SessionError::Auth(e)) => {
                    error!(error = %e, "Hub refused re-authentication");
                    self.teardown().await;
                    return false;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    self.transport.close().await;
                    self.early.clear();
                }
            }
        }
    }

    /// Sleeps out a reconnect delay while still answering the agent.
    ///
    /// Returns `false` if the session was shut down meanwhile.
    async fn idle(&mut self, delay: Duration) -> bool {
        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return true,
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Flow::Stop = self.on_request(request).await {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Completes every outstanding invocation as interrupted.
    async fn fail_in_flight(&mut self, cause: &TransportError) {
        let mut in_flight: Vec<(String, InFlight)> = self.in_flight.drain().collect();
        in_flight.sort_by_key(|(id, _)| id.parse::<u64>().unwrap_or(u64::MAX));
        for (_, InFlight { call, reply }) in in_flight {
            let target = call.target().to_string();
            let outcome = Err(InvokeError::Interrupted {
                target,
                source: cause.clone(),
            });
            let _ = self.advance(Input::Completed { call, outcome }, reply).await;
        }
    }

    async fn teardown(&mut self) {
        self.fail_in_flight(&TransportError::Closed(None)).await;
        self.transport.close().await;
        self.early.clear();
        self.set_connection(ConnectionState::Disconnected).await;
        info!(agent = %self.credential.username, "Session ended");
    }
}

/// Waits for the completion of the `AgentLogin` call `id`, bounded by `wait`.
///
/// Frames arriving first are kept in `early` for the dispatcher.
async fn await_login<T: HubTransport>(
    transport: &mut T,
    id: &str,
    wait: Duration,
    early: &mut VecDeque<HubFrame>,
) -> Result<(), SessionError> {
    let completion = async {
        loop {
            match transport.recv().await {
                Some(Ok(HubFrame::Completion {
                    invocation_id,
                    error,
                    ..
                })) if invocation_id == id => {
                    return match error {
                        None => Ok(()),
                        Some(message) => Err(AuthError::HubLogin(message).into()),
                    };
                }
                Some(Ok(HubFrame::Close { error, .. })) => {
                    return Err(TransportError::Closed(error).into());
                }
                Some(Ok(HubFrame::Ping)) => {}
                Some(Ok(frame)) => early.push_back(frame),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed(None).into()),
            }
        }
    };
    timeout(wait, completion)
        .await
        .unwrap_or_else(|_| Err(TransportError::Timeout(wait.as_secs()).into()))
}

/// Carries out a non-invoking effect.
fn emit(
    effect: Effect,
    reply: &mut Option<ReplySender>,
    sink: &dyn NotificationSink,
    updates: &broadcast::Sender<SessionUpdate>,
) {
    match effect {
        Effect::Reply(result) => {
            if let Some(tx) = reply.take() {
                // The caller may have given up waiting.
                let _ = tx.send(result);
            }
        }
        Effect::Notify(kind) => sink.notify(kind),
        Effect::Publish(update) => {
            // No subscribers is fine.
            let _ = updates.send(update);
        }
        Effect::Invoke(call) => {
            warn!(call = call.target(), "Invocation without a connection");
            if let Some(tx) = reply.take() {
                let _ = tx.send(Err(SessionError::NotConnected("no connection".to_string())));
            }
        }
    }
}

/// Answers an agent request without touching the transport.
///
/// Commands still go through the state machine, which rejects them with
/// `NotConnected` unless the session is live.
fn answer_offline(
    state: &mut SessionState,
    sink: &dyn NotificationSink,
    updates: &broadcast::Sender<SessionUpdate>,
    snapshot: &watch::Sender<SessionSnapshot>,
    request: Request,
) -> Flow {
    match request {
        Request::Command { command, reply } => {
            let (next, effects) = std::mem::take(state).apply(Input::Command(command), Utc::now());
            *state = next;
            let mut reply = Some(reply);
            for effect in effects {
                emit(effect, &mut reply, sink, updates);
            }
            snapshot.send_replace(state.snapshot());
            Flow::Continue
        }
        Request::Transcript {
            conversation,
            reply,
        } => {
            let messages = state.transcript(&conversation).iter().cloned().collect();
            let _ = reply.send(messages);
            Flow::Continue
        }
        Request::Shutdown => {
            info!("Session shutdown requested");
            Flow::Stop
        }
    }
}

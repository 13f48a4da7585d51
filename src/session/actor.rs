//! Connection session actor.
//!
//! One actor per scope. The mailbox is the state-machine queue: transport
//! IO runs in plain tokio tasks that post events back into the actor,
//! timers are sleep-then-tell tasks, and every transition happens inside
//! a handler. Exactly one transport handle is live per session; a new
//! attempt only starts after the previous handle is fully torn down.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::envelope as codec;
use crate::core::{
    CacheHook, ConnectionState, Envelope, EventKind, FeedError, FeedResult, Frame,
    HeartbeatClock, REFRESH_BUCKETS, ReconnectBackoff, STALE_BUCKETS, Scope, SessionConfig,
    SessionHealth, SessionStats,
};
use crate::dispatch::{EventDispatcher, EventPayload, event};
use crate::transport::Transport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Arguments for spawning a session actor.
pub struct SessionArgs<T = TungsteniteTransport>
where
    T: Transport,
{
    pub scope: Scope,
    pub config: SessionConfig,
    pub transport: T,
    pub dispatcher: Arc<EventDispatcher>,
    pub cache: Option<CacheHook>,
    pub state_tx: watch::Sender<ConnectionState>,
}

/// Externally drivable session events.
#[derive(Debug)]
pub enum SessionEvent {
    /// Begin connecting; a no-op while a handshake, connection, or retry
    /// is already live.
    Open,
    /// User-initiated teardown; terminal for automatic reconnects.
    Close,
}

/// Heartbeat tick posted by the ping task.
pub(crate) struct HeartbeatTick;

/// Reconnect timer firing.
pub(crate) struct Retry {
    epoch: u64,
}

pub(crate) struct ConnectionEstablished<T>
where
    T: Transport,
{
    reader: T::Reader,
    writer: T::Writer,
    epoch: u64,
}

pub(crate) struct ConnectionFailed {
    error: String,
    epoch: u64,
}

pub(crate) struct TransportClosed {
    reason: String,
    epoch: u64,
}

pub(crate) struct TransportFault {
    error: String,
    epoch: u64,
}

pub(crate) struct InboundFrame {
    frame: Frame,
    epoch: u64,
}

/// Ask: push one envelope upstream; `false` unless the session is open.
pub struct SendEnvelope(pub Envelope);

/// Ask: current connection state.
pub struct GetConnectionState;

/// Ask: health counters snapshot.
pub struct GetStats;

/// One logical connection scope as a kameo actor.
pub struct SessionActor<T = TungsteniteTransport>
where
    T: Transport,
{
    scope: Scope,
    url: String,
    transport: T,
    dispatcher: Arc<EventDispatcher>,
    cache: Option<CacheHook>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    backoff: ReconnectBackoff,
    heartbeat: HeartbeatClock,
    health: SessionHealth,
    actor_ref: ActorRef<Self>,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Bumped on every connect attempt and on close. Timer and IO events
    /// carry the epoch they were issued under and are ignored on mismatch,
    /// so nothing stale ever reaches the dispatcher.
    epoch: u64,
}

impl<T> Actor for SessionActor<T>
where
    T: Transport,
{
    type Args = SessionArgs<T>;
    type Error = FeedError;

    fn name() -> &'static str {
        "SessionActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> FeedResult<Self> {
        let SessionArgs {
            scope,
            config,
            transport,
            dispatcher,
            cache,
            state_tx,
        } = args;

        let url = config.endpoint.url_for(&scope);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            scope,
            url,
            transport,
            dispatcher,
            cache,
            state: ConnectionState::Closed,
            state_tx,
            backoff: ReconnectBackoff::new(config.retry),
            heartbeat: HeartbeatClock::new(config.heartbeat_interval),
            health: SessionHealth::new(),
            actor_ref: ctx,
            writer: None,
            reader_task: None,
            heartbeat_task: None,
            shutdown_tx,
            shutdown_rx,
            epoch: 0,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> FeedResult<()> {
        self.teardown_io().await;
        Ok(())
    }
}

impl<T> KameoMessage<SessionEvent> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        event: SessionEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            SessionEvent::Open => self.handle_open(),
            SessionEvent::Close => self.handle_close().await,
        }
        Ok(())
    }
}

impl<T> KameoMessage<ConnectionEstablished<T>> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Connecting {
            // A close() or newer attempt superseded this handshake.
            let mut writer = msg.writer;
            let _ = writer.close().await;
            return Ok(());
        }
        self.on_established(msg.reader, msg.writer);
        Ok(())
    }
}

impl<T> KameoMessage<ConnectionFailed> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Connecting {
            return Ok(());
        }
        self.dispatcher
            .publish(event::ERROR, EventPayload::Error(msg.error.clone()));
        self.dispatcher.publish(event::DISCONNECTED, EventPayload::None);
        self.schedule_reconnect(&format!("handshake failed: {}", msg.error));
        Ok(())
    }
}

impl<T> KameoMessage<TransportClosed> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: TransportClosed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Open {
            return Ok(());
        }
        self.on_transport_closed(msg.reason).await;
        Ok(())
    }
}

impl<T> KameoMessage<TransportFault> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: TransportFault,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Open {
            return Ok(());
        }
        warn!(scope = %self.scope, error = %msg.error, "websocket transport error");
        // The error alone does not change state; the closure that follows
        // drives the transition.
        self.dispatcher
            .publish(event::ERROR, EventPayload::Error(msg.error));
        Ok(())
    }
}

impl<T> KameoMessage<InboundFrame> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: InboundFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Open {
            return Ok(());
        }
        match msg.frame {
            Frame::Text(payload) | Frame::Binary(payload) => {
                self.process_payload(payload.as_ref());
            }
            // Protocol-level control frames are answered by the transport.
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) => {}
        }
        Ok(())
    }
}

impl<T> KameoMessage<HeartbeatTick> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        _tick: HeartbeatTick,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != ConnectionState::Open || self.writer.is_none() {
            debug!(scope = %self.scope, state = ?self.state, "skipping ping (not open)");
            return Ok(());
        }
        self.heartbeat.mark_ping();
        debug!(scope = %self.scope, "sending heartbeat ping");
        if let Err(err) = self.write_frame(Frame::text(codec::PING_PAYLOAD)).await {
            self.dispatcher
                .publish(event::ERROR, EventPayload::Error(err.to_string()));
            self.on_transport_closed(format!("ping send failed: {err}")).await;
        }
        Ok(())
    }
}

impl<T> KameoMessage<Retry> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<()>;

    async fn handle(
        &mut self,
        msg: Retry,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Reconnecting {
            debug!(scope = %self.scope, "stale reconnect timer ignored");
            return Ok(());
        }
        self.begin_connect();
        Ok(())
    }
}

impl<T> KameoMessage<SendEnvelope> for SessionActor<T>
where
    T: Transport,
{
    type Reply = bool;

    async fn handle(
        &mut self,
        msg: SendEnvelope,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != ConnectionState::Open {
            return false;
        }
        let frame = match codec::encode(&msg.0) {
            Ok(bytes) => Frame::Text(bytes),
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "failed to encode outbound envelope");
                return false;
            }
        };
        match self.write_frame(frame).await {
            Ok(()) => true,
            Err(err) => {
                self.dispatcher
                    .publish(event::ERROR, EventPayload::Error(err.to_string()));
                self.on_transport_closed(format!("send failed: {err}")).await;
                false
            }
        }
    }
}

impl<T> KameoMessage<GetConnectionState> for SessionActor<T>
where
    T: Transport,
{
    type Reply = ConnectionState;

    async fn handle(
        &mut self,
        _msg: GetConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state
    }
}

impl<T> KameoMessage<GetStats> for SessionActor<T>
where
    T: Transport,
{
    type Reply = FeedResult<SessionStats>;

    async fn handle(
        &mut self,
        _msg: GetStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.stats())
    }
}

impl<T> SessionActor<T>
where
    T: Transport,
{
    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn handle_open(&mut self) {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Open
            | ConnectionState::Reconnecting => {
                debug!(scope = %self.scope, state = ?self.state, "open ignored; session already live");
            }
            ConnectionState::Closed | ConnectionState::Failed => self.begin_connect(),
        }
    }

    fn begin_connect(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let url = self.url.clone();
        let transport = self.transport.clone();
        let actor_ref = self.actor_ref.clone();

        info!(scope = %self.scope, url = %url, "connecting websocket");
        tokio::spawn(async move {
            match transport.connect(url).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            reader,
                            writer,
                            epoch,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed {
                            error: err.to_string(),
                            epoch,
                        })
                        .send()
                        .await;
                }
            }
        });
    }

    fn on_established(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(scope = %self.scope, "websocket connection established");
        self.writer = Some(writer);
        self.backoff.reset();
        self.heartbeat.reset();
        self.health.reset();
        self.set_state(ConnectionState::Open);
        self.dispatcher.publish(event::CONNECTED, EventPayload::None);
        self.start_reader(reader);
        self.start_heartbeat();
    }

    fn start_reader(&mut self, mut reader: T::Reader) {
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let epoch = self.epoch;

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    frame = reader.next() => {
                        match frame {
                            Some(Ok(Frame::Close(reason))) => {
                                let reason = reason
                                    .map(|r| {
                                        format!(
                                            "code={} reason={}",
                                            r.code,
                                            String::from_utf8_lossy(r.reason.as_ref())
                                        )
                                    })
                                    .unwrap_or_else(|| "remote closed".to_string());
                                let _ = actor_ref
                                    .tell(TransportClosed { reason, epoch })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(InboundFrame { frame, epoch })
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let _ = actor_ref
                                    .tell(TransportFault {
                                        error: err.to_string(),
                                        epoch,
                                    })
                                    .send()
                                    .await;
                                let _ = actor_ref
                                    .tell(TransportClosed {
                                        reason: format!("read error: {err}"),
                                        epoch,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(TransportClosed {
                                        reason: "stream ended".to_string(),
                                        epoch,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn start_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }

        let interval = self.heartbeat.interval();
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        self.heartbeat_task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if actor_ref.tell(HeartbeatTick).send().await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn process_payload(&mut self, payload: &[u8]) {
        let envelope = match codec::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.health.record_decode_error();
                warn!(scope = %self.scope, error = %err, "dropping undecodable frame");
                return;
            }
        };

        self.health.record_message();
        let kind = envelope.event_kind();
        if kind == EventKind::Pong
            && let Some(rtt) = self.heartbeat.pong_received()
        {
            self.health.record_rtt(rtt);
        }

        let published = EventPayload::Message(Arc::new(envelope));
        self.dispatcher.publish(event::MESSAGE, published.clone());
        if let Some(name) = kind.named_event() {
            self.dispatcher.publish(name, published);
        }

        if kind.invalidates_cache()
            && let Some(cache) = self.cache.as_ref()
        {
            cache.mark_stale(STALE_BUCKETS);
            cache.refetch_now(REFRESH_BUCKETS);
        }
    }

    async fn write_frame(&mut self, frame: Frame) -> FeedResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(FeedError::InvalidState("no live transport".to_string()));
        };
        writer.send(frame).await
    }

    async fn on_transport_closed(&mut self, reason: String) {
        self.teardown_io().await;
        self.dispatcher.publish(event::DISCONNECTED, EventPayload::None);
        self.schedule_reconnect(&reason);
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.set_state(ConnectionState::Reconnecting);
                self.health.record_reconnect();
                warn!(
                    scope = %self.scope,
                    reason = %reason,
                    attempt = self.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling websocket reconnect"
                );
                let actor_ref = self.actor_ref.clone();
                let epoch = self.epoch;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = actor_ref.tell(Retry { epoch }).send().await;
                });
            }
            None => {
                self.set_state(ConnectionState::Failed);
                warn!(
                    scope = %self.scope,
                    reason = %reason,
                    attempts = self.backoff.attempt(),
                    "reconnect budget exhausted; session failed"
                );
                self.dispatcher
                    .publish(event::FAILED, EventPayload::Error(reason.to_string()));
            }
        }
    }

    async fn handle_close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        info!(scope = %self.scope, "closing websocket session");
        // Invalidate any pending retry timer or in-flight handshake.
        self.epoch = self.epoch.wrapping_add(1);
        self.teardown_io().await;
        self.set_state(ConnectionState::Closed);
    }

    async fn teardown_io(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.reader_task.take()
            && let Err(err) = task.await
        {
            warn!(scope = %self.scope, "reader task terminated with error: {err}");
        }
        if let Some(task) = self.heartbeat_task.take()
            && let Err(err) = task.await
        {
            warn!(scope = %self.scope, "heartbeat task terminated with error: {err}");
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.send(Frame::Close(None)).await;
            let _ = writer.close().await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
    }
}

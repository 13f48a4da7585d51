//! Session handle and consumer binding.

use std::sync::{Arc, Mutex, PoisonError};

use kameo::prelude::{Actor, ActorRef};
use tokio::sync::watch;

use crate::core::{
    CacheHook, ConnectionState, Envelope, FeedError, FeedResult, Scope, SessionConfig,
    SessionStats,
};
use crate::dispatch::{EventCallback, EventDispatcher, EventPayload, SubscriptionHandle, event};
use crate::session::actor::{
    GetConnectionState, GetStats, SendEnvelope, SessionActor, SessionArgs, SessionEvent,
};
use crate::transport::Transport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Cloneable handle to one session actor.
pub struct SessionHandle<T = TungsteniteTransport>
where
    T: Transport,
{
    actor: ActorRef<SessionActor<T>>,
    dispatcher: Arc<EventDispatcher>,
    state_rx: watch::Receiver<ConnectionState>,
    scope: Scope,
}

impl<T> Clone for SessionHandle<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            state_rx: self.state_rx.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<T> SessionHandle<T>
where
    T: Transport,
{
    /// Spawn a session actor for `scope`. The session starts `Closed`;
    /// call [`open`](Self::open) to connect. Requires a running tokio
    /// runtime.
    pub fn spawn(
        scope: Scope,
        config: SessionConfig,
        transport: T,
        cache: Option<CacheHook>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let actor = SessionActor::spawn(SessionArgs {
            scope: scope.clone(),
            config,
            transport,
            dispatcher: Arc::clone(&dispatcher),
            cache,
            state_tx,
        });

        Self {
            actor,
            dispatcher,
            state_rx,
            scope,
        }
    }

    /// Start connecting. Idempotent while a handshake, connection, or
    /// pending retry is live.
    pub async fn open(&self) -> FeedResult<()> {
        self.actor
            .tell(SessionEvent::Open)
            .send()
            .await
            .map_err(|err| FeedError::Actor(err.to_string()))
    }

    /// Tear the session down. Terminal for automatic reconnects: pending
    /// retry timers are invalidated before any of them can fire into the
    /// dispatcher.
    pub async fn close(&self) -> FeedResult<()> {
        self.actor
            .tell(SessionEvent::Close)
            .send()
            .await
            .map_err(|err| FeedError::Actor(err.to_string()))
    }

    /// Push one envelope upstream. Returns `false` unless the session is
    /// currently open.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.actor.ask(SendEnvelope(envelope)).await.unwrap_or(false)
    }

    /// Current state, read from the session's watch channel.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Current state as reported by the actor itself.
    pub async fn state_now(&self) -> FeedResult<ConnectionState> {
        self.actor
            .ask(GetConnectionState)
            .await
            .map_err(|err| FeedError::Actor(err.to_string()))
    }

    pub async fn stats(&self) -> FeedResult<SessionStats> {
        match self.actor.ask(GetStats).await {
            Ok(stats) => Ok(stats),
            Err(err) => Err(FeedError::Actor(err.to_string())),
        }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Create a consumer binding tied to this session.
    pub fn bind(&self) -> FeedBinding {
        FeedBinding::new(Arc::clone(&self.dispatcher), self.state_rx.clone())
    }
}

/// Consumer-side adapter over one session.
///
/// Registers its callbacks on creation and removes every one of them
/// exactly once when dropped, so the dispatcher never retains a dangling
/// registration for a departed consumer.
pub struct FeedBinding {
    dispatcher: Arc<EventDispatcher>,
    state_rx: watch::Receiver<ConnectionState>,
    last_message: Arc<Mutex<Option<Arc<Envelope>>>>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl FeedBinding {
    fn new(dispatcher: Arc<EventDispatcher>, state_rx: watch::Receiver<ConnectionState>) -> Self {
        let last_message: Arc<Mutex<Option<Arc<Envelope>>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last_message);
        let track: EventCallback = Arc::new(move |payload: &EventPayload| {
            if let EventPayload::Message(envelope) = payload {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(envelope));
            }
        });
        let tracker = dispatcher.subscribe(event::MESSAGE, track);

        Self {
            dispatcher,
            state_rx,
            last_message,
            subscriptions: vec![tracker],
        }
    }

    /// Register `callback` for `event_name`; removed automatically when
    /// this binding is dropped.
    pub fn on(&mut self, event_name: &str, callback: EventCallback) {
        let handle = self.dispatcher.subscribe(event_name, callback);
        self.subscriptions.push(handle);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Most recent decoded envelope seen on this session, if any.
    pub fn last_message(&self) -> Option<Arc<Envelope>> {
        self.last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for FeedBinding {
    fn drop(&mut self) {
        for handle in self.subscriptions.drain(..) {
            self.dispatcher.remove(&handle);
        }
    }
}

//! SessionManager: accept loop, per-session tasks, and the session registry.
//!
//! Each accepted stream becomes a session task that runs the responder side of
//! the handshake and then a strictly sequential receive loop.  Sends from other
//! tasks (`send_to_client`, `broadcast`) go straight to the session's
//! [`SecureChannel`], whose writer lock serializes them with the session's own
//! replies.
//!
//! The registry is a `RwLock<HashMap<..>>`.  An entry is created by
//! `accept_stream` and afterwards written only by its own session task, which
//! marks it `Closed` and then removes it.  `disconnect` and `stop` never touch
//! entries; they close the channel and let the owning task clean up.
//!
//! Every outbound send is bounded by `send_timeout`, so a peer that stops
//! reading is closed instead of holding up `broadcast` or `send_to_client`.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, SystemTime};

use futures_util::future::join_all;
use remotelink_core::protocol::DISPLAY_NAME_KEY;
use remotelink_core::{ChannelError, Envelope, SecureChannel};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::dispatch::{dispatch, Action, ServerSnapshot};
use crate::application::events::SessionEvents;
use crate::domain::{CloseReason, ConnectionId, ConnectionIdGenerator, SessionInfo, SessionState};
use crate::infrastructure::storage::config::{ConfigError, ServerConfig};

/// Pause after a resource-exhaustion `accept()` error before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long `stop()` waits for session tasks to finish cleanup.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Error type for session manager operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Every session slot is taken; the stream was dropped unanswered.
    #[error("server at capacity ({max} clients)")]
    Capacity { max: usize },
    #[error("server is stopped")]
    Stopped,
}

/// What the accept loop does after `accept()` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptErrorAction {
    /// The failure belonged to one incoming connection.
    Continue,
    /// The process is out of descriptors or memory; wait, then retry.
    Backoff,
    /// The listening socket itself is broken.
    Fatal,
}

fn classify_accept_error(err: &io::Error) -> AcceptErrorAction {
    use io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut => AcceptErrorAction::Continue,
        ErrorKind::OutOfMemory => AcceptErrorAction::Backoff,
        _ if is_resource_exhaustion(err) => AcceptErrorAction::Backoff,
        _ => AcceptErrorAction::Fatal,
    }
}

/// EMFILE, ENFILE, ENOMEM and ENOBUFS (or their Winsock equivalents).
fn is_resource_exhaustion(err: &io::Error) -> bool {
    let Some(code) = err.raw_os_error() else {
        return false;
    };
    if cfg!(windows) {
        matches!(code, 10024 | 10055)
    } else if cfg!(target_os = "linux") {
        matches!(code, 12 | 23 | 24 | 105)
    } else {
        matches!(code, 12 | 23 | 24 | 55)
    }
}

/// Sends one envelope, failing with `TimedOut` if the write stays blocked
/// longer than `limit`.
async fn send_within(
    channel: &SecureChannel,
    envelope: &Envelope,
    limit: Duration,
) -> Result<(), ChannelError> {
    tokio::time::timeout(limit, channel.send(envelope))
        .await
        .unwrap_or_else(|_| {
            Err(ChannelError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("send blocked for more than {limit:?}"),
            )))
        })
}

struct SessionEntry {
    channel: Arc<SecureChannel>,
    info: SessionInfo,
}

struct Inner {
    config: ServerConfig,
    events: Arc<dyn SessionEvents>,
    sessions: RwLock<HashMap<ConnectionId, SessionEntry>>,
    ids: ConnectionIdGenerator,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    drained: Notify,
    local_addr: StdMutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// The listening service.  Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: ServerConfig, events: Arc<dyn SessionEvents>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.network.max_clients));
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                sessions: RwLock::new(HashMap::new()),
                ids: ConnectionIdGenerator::new(),
                permits,
                active: AtomicUsize::new(0),
                drained: Notify::new(),
                local_addr: StdMutex::new(None),
                shutdown,
                accept_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Binds the listener, spawns the accept loop, and returns the bound
    /// address.  Calling `start` on a running server returns the existing
    /// address.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for an unparsable bind address,
    /// [`ServerError::Bind`] if the socket cannot be bound, and
    /// [`ServerError::Stopped`] after [`stop`](Self::stop).
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        let mut task = self.inner.accept_task.lock().await;
        if let (Some(_), Some(addr)) = (task.as_ref(), self.local_addr()) {
            return Ok(addr);
        }

        let addr = self.inner.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        *self.lock_local_addr() = Some(local);

        info!(
            "listening on {local} (max_clients={})",
            self.inner.config.network.max_clients
        );

        let manager = self.clone();
        let shutdown = self.inner.shutdown.subscribe();
        *task = Some(tokio::spawn(manager.accept_loop(listener, shutdown)));
        Ok(local)
    }

    /// Admits an already-open byte stream as a new session.
    ///
    /// Performs the capacity check, assigns an id, registers the session, and
    /// spawns its task.  At capacity the stream is dropped immediately, before
    /// any handshake byte is exchanged, and no event fires.
    pub async fn accept_stream<S>(
        &self,
        stream: S,
        peer_addr: SocketAddr,
    ) -> Result<ConnectionId, ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|_| ServerError::Capacity {
                max: self.inner.config.network.max_clients,
            })?;

        let id = self.inner.ids.next_id();
        let channel = Arc::new(SecureChannel::new(
            stream,
            self.inner.config.channel_config(),
        ));

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions.write().await.insert(
            id,
            SessionEntry {
                channel: Arc::clone(&channel),
                info: SessionInfo {
                    id,
                    peer_addr,
                    display_name: None,
                    state: SessionState::Accepted,
                    accepted_at: SystemTime::now(),
                },
            },
        );

        let manager = self.clone();
        tokio::spawn(manager.run_session(id, peer_addr, channel, permit));
        Ok(id)
    }

    /// Sends one envelope to an established session.
    ///
    /// Returns `false` if the session is unknown, not established, or the send
    /// failed or timed out (in which case the session is closed).
    pub async fn send_to_client(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        let Some(channel) = self.established_channel(id).await else {
            return false;
        };
        match send_within(&channel, envelope, self.inner.config.send_timeout()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%id, "send failed, closing session: {e}");
                channel.close().await;
                false
            }
        }
    }

    /// Sends `envelope` to every established session except `exclude`.
    ///
    /// Deliveries run concurrently.  A failed or stalled recipient is closed
    /// and logged; it never prevents delivery to the others.  Returns the
    /// number of successful deliveries.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<(ConnectionId, Arc<SecureChannel>)> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .filter(|(id, entry)| {
                    entry.info.state == SessionState::Established && Some(**id) != exclude
                })
                .map(|(id, entry)| (*id, Arc::clone(&entry.channel)))
                .collect()
        };

        let limit = self.inner.config.send_timeout();
        let results = join_all(targets.into_iter().map(|(id, channel)| async move {
            let result = send_within(&channel, envelope, limit).await;
            (id, channel, result)
        }))
        .await;

        let mut delivered = 0;
        for (id, channel, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%id, "broadcast delivery failed, closing session: {e}");
                    channel.close().await;
                }
            }
        }
        debug!("broadcast delivered to {delivered} session(s)");
        delivered
    }

    /// Force-closes one session.  Returns `false` if `id` is unknown.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let channel = {
            let sessions = self.inner.sessions.read().await;
            sessions.get(&id).map(|entry| Arc::clone(&entry.channel))
        };
        match channel {
            Some(channel) => {
                info!(%id, "disconnecting session");
                channel.close().await;
                true
            }
            None => false,
        }
    }

    /// Stops accepting, closes every live session, and waits briefly for the
    /// session tasks to finish.  Idempotent.
    pub async fn stop(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Some(task) = self.inner.accept_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("accept loop task failed: {e}");
            }
        }

        self.close_all_sessions().await;

        let drained = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.connection_count() == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(STOP_GRACE_PERIOD, drained).await.is_err() {
            warn!(
                "{} session(s) still draining after stop",
                self.connection_count()
            );
        }
        info!("server stopped");
    }

    /// Sessions currently registered, handshaking ones included.
    pub fn connection_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub async fn established_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .filter(|e| e.info.state == SessionState::Established)
            .count()
    }

    /// Snapshot of the registry, ordered by id.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.lock_local_addr()
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    // ── Accept loop ───────────────────────────────────────────────────────────

    async fn accept_loop(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer_addr, "set_nodelay failed: {e}");
                        }
                        match self.accept_stream(stream, peer_addr).await {
                            Ok(id) => debug!(%id, %peer_addr, "connection accepted"),
                            Err(e) => warn!(%peer_addr, "connection rejected: {e}"),
                        }
                    }
                    Err(e) => match classify_accept_error(&e) {
                        AcceptErrorAction::Continue => warn!("accept error: {e}"),
                        AcceptErrorAction::Backoff => {
                            warn!("accept error, backing off: {e}");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                        AcceptErrorAction::Fatal => {
                            error!("listening socket failed, stopping server: {e}");
                            self.inner.shutdown.send_replace(true);
                            self.close_all_sessions().await;
                            break;
                        }
                    },
                },
            }
        }
        info!("accept loop stopped");
    }

    async fn close_all_sessions(&self) {
        let channels: Vec<Arc<SecureChannel>> = {
            let sessions = self.inner.sessions.read().await;
            sessions.values().map(|e| Arc::clone(&e.channel)).collect()
        };
        join_all(channels.iter().map(|ch| ch.close())).await;
    }

    // ── Per-session task ──────────────────────────────────────────────────────

    async fn run_session(
        self,
        id: ConnectionId,
        peer_addr: SocketAddr,
        channel: Arc<SecureChannel>,
        _permit: OwnedSemaphorePermit,
    ) {
        self.set_state(id, SessionState::HandshakePending, None).await;

        let metadata = BTreeMap::from([(
            DISPLAY_NAME_KEY.to_string(),
            self.inner.config.server.name.clone(),
        )]);
        let handshake = tokio::time::timeout(
            self.inner.config.handshake_timeout(),
            channel.handshake_as_responder(metadata),
        )
        .await
        .unwrap_or(Err(ChannelError::HandshakeTimeout));

        let peer = match handshake {
            Ok(peer) => peer,
            Err(e) => {
                warn!(%id, %peer_addr, "handshake failed: {e}");
                self.inner.events.on_error(id, &e);
                self.set_state(id, SessionState::Closed, None).await;
                channel.close().await;
                self.remove(id).await;
                return;
            }
        };

        let display_name = peer.metadata_value(DISPLAY_NAME_KEY).map(str::to_owned);
        self.set_state(id, SessionState::Established, display_name.clone())
            .await;
        info!(
            %id,
            %peer_addr,
            "session established ({})",
            display_name.as_deref().unwrap_or("unnamed")
        );
        self.inner
            .events
            .on_connected(id, peer_addr, display_name.as_deref());

        let reason = self.receive_loop(id, &channel).await;
        self.set_state(id, SessionState::Closed, None).await;
        channel.close().await;
        self.remove(id).await;
        info!(%id, "session closed: {reason}");
        self.inner.events.on_disconnected(id, &reason);
    }

    async fn receive_loop(&self, id: ConnectionId, channel: &SecureChannel) -> CloseReason {
        loop {
            let envelope = match channel.receive().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) if channel.is_closed() => return CloseReason::ServerClosed,
                Ok(None) => return CloseReason::PeerClosed,
                Err(e) => {
                    warn!(%id, "receive failed: {e}");
                    self.inner.events.on_error(id, &e);
                    return CloseReason::Error(e.to_string());
                }
            };
            debug!(%id, kind = ?envelope.payload().kind(), "envelope received");
            self.inner.events.on_message(id, &envelope);

            let limit = self.inner.config.send_timeout();
            let reply = match dispatch(envelope, &self.snapshot()) {
                Action::Reply(reply) => reply,
                Action::ReplyThenClose(reply) => {
                    if let Err(e) = send_within(channel, &reply, limit).await {
                        debug!(%id, "farewell not delivered: {e}");
                    }
                    return CloseReason::Requested;
                }
                Action::ForwardData { reply, key, bytes } => {
                    self.inner.events.on_data(id, &key, &bytes);
                    reply
                }
                Action::Ignore => {
                    debug!(%id, "envelope ignored");
                    continue;
                }
            };

            if let Err(e) = send_within(channel, &reply, limit).await {
                if channel.is_closed() {
                    return CloseReason::ServerClosed;
                }
                warn!(%id, "reply failed: {e}");
                self.inner.events.on_error(id, &e);
                return CloseReason::Error(e.to_string());
            }
        }
    }

    // ── Registry helpers ──────────────────────────────────────────────────────

    async fn set_state(&self, id: ConnectionId, next: SessionState, display_name: Option<String>) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&id) {
            if entry.info.state.can_transition_to(next) {
                entry.info.state = next;
            } else {
                warn!(%id, "ignoring transition {:?} -> {next:?}", entry.info.state);
            }
            if display_name.is_some() {
                entry.info.display_name = display_name;
            }
        }
    }

    async fn remove(&self, id: ConnectionId) -> Option<SessionInfo> {
        let removed = self.inner.sessions.write().await.remove(&id)?;
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
        Some(removed.info)
    }

    async fn established_channel(&self, id: ConnectionId) -> Option<Arc<SecureChannel>> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&id)
            .filter(|e| e.info.state == SessionState::Established)
            .map(|e| Arc::clone(&e.channel))
    }

    fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            connections: self.connection_count(),
            port: self
                .local_addr()
                .map(|a| a.port())
                .unwrap_or(self.inner.config.network.port),
        }
    }

    fn lock_local_addr(&self) -> std::sync::MutexGuard<'_, Option<SocketAddr>> {
        self.inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! PeerClient: one outbound link to a server, with queueing and reconnection.
//!
//! Architecture:
//! - `connect` opens TCP, runs the initiator handshake, installs a *link*
//!   (the [`SecureChannel`] plus an optional heartbeat task) and spawns one
//!   link task.
//! - The link task forwards every inbound envelope to
//!   [`ClientEvents::on_message`].  When the stream ends or fails it reports
//!   the loss once; with `auto_reconnect` on it then retries on the configured
//!   backoff schedule and carries on reading the replacement link.
//! - Every installed link and every `disconnect()` bumps a generation counter.
//!   Loss reports and reconnect attempts carrying an older generation are
//!   ignored, so an explicit `disconnect()` never triggers a reconnect.
//! - Live sends and the queue flush share a send gate, so nothing sent while
//!   a link comes up overtakes envelopes queued before it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use remotelink_core::protocol::DISPLAY_NAME_KEY;
use remotelink_core::{ChannelError, Envelope, SecureChannel};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::error::ClientError;
use crate::application::events::ClientEvents;
use crate::application::outbound_queue::OutboundQueue;
use crate::domain::{ClientConfig, ConnectionState, DisconnectReason};

struct Link {
    channel: Arc<SecureChannel>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Link {
    async fn shut_down(self) {
        if let Some(task) = self.heartbeat {
            task.abort();
        }
        self.channel.close().await;
    }
}

#[derive(Default)]
struct LinkSlot {
    generation: u64,
    link: Option<Link>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    events: Arc<dyn ClientEvents>,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<LinkSlot>,
    /// Held by live sends and by the flush in `go_live`.  Lock order is
    /// `send_gate` before `slot`.
    send_gate: Mutex<()>,
    queue: StdMutex<OutboundQueue>,
    display_name: StdMutex<String>,
}

/// A client for one server endpoint.  Cheap to clone; clones share the link.
#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<Inner>,
}

impl PeerClient {
    pub fn new(config: ClientConfig, events: Arc<dyn ClientEvents>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let queue = OutboundQueue::new(config.queue_capacity(), config.message_expiry());
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                state,
                slot: Mutex::new(LinkSlot::default()),
                send_gate: Mutex::new(()),
                queue: StdMutex::new(queue),
                display_name: StdMutex::new(String::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Envelopes waiting for a link.
    pub fn queued_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Connects and completes the handshake, advertising `display_name`.
    ///
    /// On success the queue is flushed and `on_connected` fires with the
    /// server's advertised name.
    ///
    /// # Errors
    ///
    /// [`ClientError::AlreadyConnected`] unless the client is disconnected;
    /// otherwise the connect or handshake failure, which is also reported to
    /// `on_error`.  A failed `connect` never starts the reconnect loop.
    pub async fn connect(&self, display_name: &str) -> Result<(), ClientError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ClientError::AlreadyConnected);
        }

        *lock(&self.inner.display_name) = display_name.to_string();
        let expected = self.inner.slot.lock().await.generation;
        info!("connecting to {}", self.inner.config.endpoint());

        match self.inner.establish().await {
            Ok((channel, peer_name)) => {
                let Some(generation) = self.inner.go_live(Arc::clone(&channel), expected).await
                else {
                    return Err(ClientError::Channel(ChannelError::Closed));
                };
                let task = tokio::spawn(link_task(Arc::clone(&self.inner), channel, generation));
                {
                    let mut slot = self.inner.slot.lock().await;
                    if slot.generation == generation {
                        slot.task = Some(task);
                    }
                }
                info!(
                    "connected to {} ({})",
                    self.inner.config.endpoint(),
                    peer_name.as_deref().unwrap_or("unnamed")
                );
                self.inner.events.on_connected(peer_name.as_deref());
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_if_modified(|state| {
                    let connecting = *state == ConnectionState::Connecting;
                    if connecting {
                        *state = ConnectionState::Disconnected;
                    }
                    connecting
                });
                warn!("connect to {} failed: {e}", self.inner.config.endpoint());
                self.inner.events.on_error(&e);
                Err(e)
            }
        }
    }

    /// Tears down the link and stops any reconnect loop.
    ///
    /// Fires `on_disconnected(Requested)` if the client was connected or
    /// connecting.  Never triggers reconnection, and never waits on the
    /// server: a send blocked on a peer that stopped reading is abandoned.
    pub async fn disconnect(&self) {
        let (link, task) = {
            let mut slot = self.inner.slot.lock().await;
            slot.generation += 1;
            (slot.link.take(), slot.task.take())
        };
        if let Some(task) = task {
            task.abort();
        }

        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if let Some(link) = link {
            link.shut_down().await;
        }

        if matches!(
            previous,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            info!("disconnected from {}", self.inner.config.endpoint());
            self.inner
                .events
                .on_disconnected(&DisconnectReason::Requested);
        }
    }

    /// Sends `envelope`, or queues it while there is no link.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] when queueing is disabled,
    /// [`ClientError::QueueFull`] when the queue is at capacity, or the
    /// channel error if a live send fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let _gate = self.inner.send_gate.lock().await;
        if self.state().is_connected() {
            if let Some(channel) = self.inner.current_channel().await {
                return channel.send(envelope).await.map_err(ClientError::from);
            }
        }
        self.inner.enqueue(envelope.clone())
    }
}

impl Inner {
    /// Opens TCP and runs the initiator handshake.  Returns the ready channel
    /// and the server's advertised display name.
    async fn establish(&self) -> Result<(Arc<SecureChannel>, Option<String>), ClientError> {
        let addr = self.config.endpoint();
        let connect = TcpStream::connect((self.config.address(), self.config.port()));
        let stream = match time::timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::ConnectFailed { addr, source }),
            Err(_) => return Err(ClientError::ConnectTimeout { addr }),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }

        let channel = Arc::new(SecureChannel::new(stream, self.config.channel_config()));
        let metadata = BTreeMap::from([(
            DISPLAY_NAME_KEY.to_string(),
            lock(&self.display_name).clone(),
        )]);
        let handshake = time::timeout(
            self.config.handshake_timeout(),
            channel.handshake_as_initiator(metadata),
        )
        .await
        .unwrap_or(Err(ChannelError::HandshakeTimeout));

        match handshake {
            Ok(server_hello) => {
                let peer_name = server_hello
                    .metadata_value(DISPLAY_NAME_KEY)
                    .map(str::to_owned);
                Ok((channel, peer_name))
            }
            Err(e) => {
                channel.close().await;
                Err(e.into())
            }
        }
    }

    /// Installs `channel` as the live link if `expected` is still the current
    /// generation, flushes the queue, and marks the client connected.
    ///
    /// Returns the link's generation, or `None` (closing the channel) if a
    /// `disconnect()` intervened.  Does not start reading the link.
    async fn go_live(&self, channel: Arc<SecureChannel>, expected: u64) -> Option<u64> {
        let generation = {
            let mut slot = self.slot.lock().await;
            if slot.generation != expected {
                drop(slot);
                debug!("link superseded before going live");
                channel.close().await;
                return None;
            }
            slot.generation += 1;
            let heartbeat = self
                .config
                .heartbeat_interval()
                .filter(|every| !every.is_zero())
                .map(|every| tokio::spawn(heartbeat_loop(Arc::clone(&channel), every)));
            slot.link = Some(Link {
                channel: Arc::clone(&channel),
                heartbeat,
            });
            slot.generation
        };

        // Sends arriving during the flush wait on the gate, see a non-connected
        // state, and queue behind the envelopes being flushed.
        let _gate = self.send_gate.lock().await;
        self.flush(&channel).await;
        let slot = self.slot.lock().await;
        if slot.generation != generation {
            debug!("link dropped while flushing");
            return None;
        }
        self.state.send_replace(ConnectionState::Connected);
        Some(generation)
    }

    /// Handles the end of link `generation`.  Stale reports are ignored.
    ///
    /// Returns `true` if the caller should run the reconnect loop.
    async fn link_lost(&self, generation: u64, reason: DisconnectReason) -> bool {
        let (link, reconnect) = {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation {
                return false;
            }
            let Some(link) = slot.link.take() else {
                return false;
            };
            let reconnect =
                self.config.auto_reconnect() && self.config.max_reconnect_attempts() > 0;
            self.state.send_replace(if reconnect {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            });
            (link, reconnect)
        };
        link.shut_down().await;

        info!("link to {} lost: {reason}", self.config.endpoint());
        self.events.on_disconnected(&reason);
        reconnect
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().await.generation == generation
    }

    async fn current_channel(&self) -> Option<Arc<SecureChannel>> {
        let slot = self.slot.lock().await;
        slot.link.as_ref().map(|link| Arc::clone(&link.channel))
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), ClientError> {
        let mut queue = lock(&self.queue);
        if !queue.is_enabled() {
            return Err(ClientError::NotConnected);
        }
        let capacity = queue.capacity();
        queue
            .push(envelope, Instant::now())
            .map_err(|_| ClientError::QueueFull { capacity })?;
        debug!("envelope queued ({} waiting)", queue.len());
        Ok(())
    }

    /// Sends every live queued envelope in order.  On failure the unsent
    /// remainder goes back to the front of the queue.
    async fn flush(&self, channel: &SecureChannel) {
        let drained = lock(&self.queue).drain_live(Instant::now());
        if drained.expired > 0 {
            info!("dropped {} expired queued envelope(s)", drained.expired);
        }
        if drained.live.is_empty() {
            return;
        }

        let total = drained.live.len();
        let mut pending = drained.live.into_iter();
        while let Some(entry) = pending.next() {
            if let Err(e) = channel.send(&entry.envelope).await {
                warn!("queue flush interrupted: {e}");
                let mut unsent = vec![entry];
                unsent.extend(pending);
                lock(&self.queue).restore_front(unsent);
                return;
            }
        }
        debug!("flushed {total} queued envelope(s)");
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Reads the current link until it ends, then reconnects and continues with
/// the replacement.  Exits on an explicit disconnect, when reconnection is
/// off, or when the attempts run out.
async fn link_task(inner: Arc<Inner>, mut channel: Arc<SecureChannel>, mut generation: u64) {
    loop {
        let reason = read_loop(&inner, &channel).await;
        if !inner.link_lost(generation, reason).await {
            return;
        }
        match reconnect(&inner, generation).await {
            Some((next_channel, next_generation)) => {
                channel = next_channel;
                generation = next_generation;
            }
            None => return,
        }
    }
}

async fn read_loop(inner: &Inner, channel: &SecureChannel) -> DisconnectReason {
    loop {
        match channel.receive().await {
            Ok(Some(envelope)) => {
                debug!(kind = ?envelope.payload().kind(), "envelope received");
                inner.events.on_message(&envelope);
            }
            Ok(None) => return DisconnectReason::PeerClosed,
            Err(e) => {
                warn!("link failed: {e}");
                let reason = DisconnectReason::Error(e.to_string());
                inner.events.on_error(&ClientError::Channel(e));
                return reason;
            }
        }
    }
}

/// Retries the endpoint on the backoff schedule.  Returns the new live link
/// and its generation, or `None` once superseded or out of attempts.
async fn reconnect(inner: &Inner, generation: u64) -> Option<(Arc<SecureChannel>, u64)> {
    let max = inner.config.max_reconnect_attempts();
    for attempt in 1..=max {
        if !inner.is_current(generation).await {
            return None;
        }
        let delay = inner.config.backoff_delay(attempt);
        info!("reconnect attempt {attempt}/{max} in {delay:?}");
        inner.events.on_reconnecting(attempt, max);
        time::sleep(delay).await;
        if !inner.is_current(generation).await {
            return None;
        }

        match inner.establish().await {
            Ok((channel, peer_name)) => {
                let next = inner.go_live(Arc::clone(&channel), generation).await?;
                info!("reconnected on attempt {attempt}");
                inner.events.on_connected(peer_name.as_deref());
                inner.events.on_reconnect_succeeded(attempt);
                return Some((channel, next));
            }
            Err(e) => {
                warn!("reconnect attempt {attempt}/{max} failed: {e}");
                inner.events.on_error(&e);
            }
        }
    }

    let slot = inner.slot.lock().await;
    if slot.generation == generation {
        inner.state.send_replace(ConnectionState::Disconnected);
        warn!("giving up on {} after {max} attempt(s)", inner.config.endpoint());
        inner.events.on_reconnect_failed(max);
    }
    None
}

async fn heartbeat_loop(channel: Arc<SecureChannel>, every: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = channel.send(&Envelope::heartbeat()).await {
            debug!("heartbeat stopped: {e}");
            return;
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! The session-aware envelope multiplexer.
//!
//! A [`Channel`] owns one transport. A background pump task is the only
//! reader: it sorts inbound envelopes into per-kind queues, completes
//! pending commands and reacts to session envelopes. Senders may call in
//! concurrently; writes are serialized by an async mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use lime_core::{
    AsyncQueue, Command, Envelope, EnvelopeKind, Message, Node, Notification, Reason, Session,
    SessionState, new_envelope_id, reason_codes,
};
use lime_protocol::{ProtocolError, Transport};
use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{ChannelConfig, OverflowPolicy};
use crate::error::{ChannelError, ChannelResult};
use crate::pending::PendingCommands;

/// Counters describing the traffic seen by a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Envelopes read from the transport.
    pub received: u64,
    /// Envelopes written to the transport.
    pub sent: u64,
    /// Inbound envelopes discarded because their consumer queue was full.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// A channel bound to one transport and one session.
///
/// Clones share the same channel. The pump stops when the last clone is
/// dropped.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
    _pump: Arc<PumpGuard>,
}

struct PumpGuard(AbortHandle);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct ChannelInner {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    state: watch::Sender<SessionState>,
    session_id: StdMutex<Option<String>>,
    local_node: StdMutex<Option<Node>>,
    remote_node: StdMutex<Option<Node>>,
    send_lock: Mutex<()>,
    messages: AsyncQueue<Message>,
    notifications: AsyncQueue<Notification>,
    commands: AsyncQueue<Command>,
    sessions: AsyncQueue<Session>,
    pending: PendingCommands,
    remote_established: AtomicBool,
    shut_down: AtomicBool,
    fault: StdMutex<Option<ChannelError>>,
    counters: Counters,
}

impl Channel {
    /// Creates a channel over `transport` and starts its receive pump.
    ///
    /// Must be called inside a tokio runtime. The session starts in `new`;
    /// run a negotiator to establish it.
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Self {
        let promises = config.promises_limit;
        let inner = Arc::new(ChannelInner {
            transport,
            state: watch::channel(SessionState::New).0,
            session_id: StdMutex::new(None),
            local_node: StdMutex::new(None),
            remote_node: StdMutex::new(None),
            send_lock: Mutex::new(()),
            messages: AsyncQueue::new(config.message_buffer, promises),
            notifications: AsyncQueue::new(config.notification_buffer, promises),
            commands: AsyncQueue::new(config.command_buffer, promises),
            sessions: AsyncQueue::unbounded(),
            pending: PendingCommands::default(),
            remote_established: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            fault: StdMutex::new(None),
            counters: Counters::default(),
            config,
        });

        let task = tokio::spawn(pump(Arc::clone(&inner)));
        Self {
            inner,
            _pump: Arc::new(PumpGuard(task.abort_handle())),
        }
    }

    /// Sends a message. Requires an established session.
    pub async fn send_message(&self, message: Message) -> ChannelResult<()> {
        self.inner.ensure_established("send a message")?;
        self.inner.send_envelope(message.into()).await
    }

    /// Sends a notification. Requires an established session.
    pub async fn send_notification(&self, notification: Notification) -> ChannelResult<()> {
        self.inner.ensure_established("send a notification")?;
        self.inner.send_envelope(notification.into()).await
    }

    /// Sends a command without waiting for a response.
    ///
    /// Used for responses to inbound commands and for fire-and-forget
    /// requests.
    pub async fn send_command(&self, command: Command) -> ChannelResult<()> {
        self.inner.ensure_established("send a command")?;
        self.inner.send_envelope(command.into()).await
    }

    /// Receives the next message.
    pub async fn receive_message(&self) -> ChannelResult<Message> {
        Ok(self.inner.messages.receive().await?)
    }

    /// Receives the next notification.
    pub async fn receive_notification(&self) -> ChannelResult<Notification> {
        Ok(self.inner.notifications.receive().await?)
    }

    /// Receives the next inbound command that is not a response to one of
    /// our pending commands.
    pub async fn receive_command(&self) -> ChannelResult<Command> {
        Ok(self.inner.commands.receive().await?)
    }

    /// Sends a request command and waits for its response.
    ///
    /// An id is assigned when the command has none. The response is the
    /// first inbound command with the same id and a non-pending status,
    /// sent by the command's `to` node when both sides name one.
    /// Dropping the returned future forgets the request.
    pub async fn process_command(&self, mut command: Command) -> ChannelResult<Command> {
        let inner = &self.inner;
        inner.ensure_established("process a command")?;
        if !command.status.is_pending() {
            return Err(ChannelError::InvalidCommand(
                "only pending commands can be processed".to_string(),
            ));
        }

        let id = command
            .header
            .id
            .get_or_insert_with(new_envelope_id)
            .clone();
        let responder = command.header.to.clone();
        let (response, _registration) = inner.pending.register(&id, responder)?;
        trace!(command_id = %id, method = ?command.method, "Processing command");

        inner.send_envelope(command.into()).await?;

        let response = match inner.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| ChannelError::Timeout {
                    operation: "command processing",
                })?,
            None => response.await,
        };

        match response {
            Ok(result) => result,
            Err(_) => Err(inner.fault().unwrap_or(ChannelError::Closed)),
        }
    }

    /// Ends the session with the `finishing`/`finished` handshake and
    /// closes the transport.
    pub async fn finish(&self) -> ChannelResult<()> {
        let inner = &self.inner;
        inner.ensure_established("finish the session")?;
        inner.set_state(SessionState::Finishing)?;

        let finishing = inner.session_envelope(SessionState::Finishing);
        inner.send_envelope(finishing.into()).await?;

        match tokio::time::timeout(inner.config.finish_timeout, inner.wait_finished()).await {
            Ok(Ok(())) => {
                inner.shutdown(SessionState::Finished, None).await;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let error = ChannelError::Timeout {
                    operation: "session finishing",
                };
                inner
                    .shutdown(SessionState::Failed, Some(error.clone()))
                    .await;
                Err(error)
            }
        }
    }

    /// Closes the transport without the finishing handshake.
    pub async fn close(&self) {
        self.inner.shutdown(SessionState::Finished, None).await;
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Observes session state changes.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Waits until the session reaches `finished` or `failed`.
    pub async fn closed(&self) -> SessionState {
        let mut changes = self.inner.state.subscribe();
        loop {
            {
                let state = *changes.borrow_and_update();
                if state.is_terminal() {
                    return state;
                }
            }
            if changes.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// The error that ended the channel, if it ended with one.
    pub fn fault(&self) -> Option<ChannelError> {
        self.inner.fault()
    }

    /// True while the session is established and the transport connected.
    pub fn is_usable(&self) -> bool {
        self.state() == SessionState::Established && self.inner.transport.is_connected()
    }

    pub fn stats(&self) -> ChannelStats {
        let counters = &self.inner.counters;
        ChannelStats {
            received: counters.received.load(Ordering::Relaxed),
            sent: counters.sent.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.session_id).clone()
    }

    pub fn local_node(&self) -> Option<Node> {
        lock(&self.inner.local_node).clone()
    }

    pub fn remote_node(&self) -> Option<Node> {
        lock(&self.inner.remote_node).clone()
    }

    /// Number of `process_command` calls awaiting a response.
    pub fn pending_commands(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn inner(&self) -> &ChannelInner {
        &self.inner
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .field("remote_node", &self.remote_node())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ChannelInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn fault(&self) -> Option<ChannelError> {
        lock(&self.fault).clone()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    pub(crate) fn set_session_id(&self, id: impl Into<String>) {
        *lock(&self.session_id) = Some(id.into());
    }

    pub(crate) fn local_node(&self) -> Option<Node> {
        lock(&self.local_node).clone()
    }

    pub(crate) fn set_local_node(&self, node: Node) {
        *lock(&self.local_node) = Some(node);
    }

    pub(crate) fn set_remote_node(&self, node: Node) {
        *lock(&self.remote_node) = Some(node);
    }

    /// Moves the session to `next`.
    ///
    /// Terminal states are reachable from any live state; other moves must
    /// follow the session transition table.
    pub(crate) fn set_state(&self, next: SessionState) -> ChannelResult<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                outcome = Err(ChannelError::Closed);
                return false;
            }
            if *state == next {
                return false;
            }
            if !next.is_terminal() && !state.can_transition_to(next) {
                outcome = Err(ChannelError::InvalidState {
                    state: *state,
                    operation: "change the session state",
                });
                return false;
            }
            debug!(from = %state, to = %next, session_id = ?self.session_id(), "Session state changed");
            *state = next;
            true
        });
        outcome
    }

    fn ensure_established(&self, operation: &'static str) -> ChannelResult<()> {
        match self.state() {
            SessionState::Established if !self.is_shut_down() => Ok(()),
            state if state.is_terminal() => Err(ChannelError::Closed),
            _ if self.is_shut_down() => Err(ChannelError::Closed),
            state => Err(ChannelError::InvalidState { state, operation }),
        }
    }

    /// A session envelope carrying this channel's id and nodes.
    pub(crate) fn session_envelope(&self, state: SessionState) -> Session {
        let mut session = Session::new(state);
        session.header.id = self.session_id();
        session.header.from = self.local_node();
        session.header.to = lock(&self.remote_node).clone();
        session
    }

    /// Writes a session envelope regardless of the session state.
    pub(crate) async fn send_session(&self, session: Session) -> ChannelResult<()> {
        self.send_envelope(session.into()).await
    }

    /// Waits for the next session envelope routed to the negotiator.
    pub(crate) async fn receive_session(&self) -> ChannelResult<Session> {
        match self.sessions.receive().await {
            Ok(session) => Ok(session),
            Err(_) => Err(self.fault().unwrap_or(ChannelError::Closed)),
        }
    }

    /// Writes one envelope. A transport error fails the channel.
    async fn send_envelope(&self, envelope: Envelope) -> ChannelResult<()> {
        let result = {
            let _write = self.send_lock.lock().await;
            if self.is_shut_down() {
                return Err(ChannelError::Closed);
            }
            self.transport.send(&envelope).await
        };

        match result {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %envelope.kind(), envelope_id = ?envelope.id(), "Envelope sent");
                Ok(())
            }
            Err(e) => {
                let error = ChannelError::from(e);
                warn!(error = %error, session_id = ?self.session_id(), "Send failed, closing channel");
                self.shutdown(SessionState::Failed, Some(error.clone())).await;
                Err(error)
            }
        }
    }

    /// Sends without failing the channel when the write does not go through.
    pub(crate) async fn send_best_effort(&self, session: Session) {
        let _write = self.send_lock.lock().await;
        if self.is_shut_down() {
            return;
        }
        match self.transport.send(&session.into()).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!(error = %e, "Best-effort session send failed"),
        }
    }

    /// Reports `reason` to the peer and fails the channel with `error`.
    pub(crate) async fn fail_session(&self, reason: Reason, error: ChannelError) {
        if self.is_shut_down() {
            return;
        }
        warn!(code = reason.code, reason = %reason, session_id = ?self.session_id(), "Failing session");
        let mut failed = self.session_envelope(SessionState::Failed);
        failed.reason = Some(reason);
        self.send_best_effort(failed).await;
        self.shutdown(SessionState::Failed, Some(error)).await;
    }

    /// Ends the channel: records the fault, publishes the final state,
    /// fails pending commands, closes the queues and the transport.
    ///
    /// Runs once; later calls return immediately.
    pub(crate) async fn shutdown(&self, final_state: SessionState, fault: Option<ChannelError>) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(fault) = &fault {
            lock(&self.fault).get_or_insert_with(|| fault.clone());
        }
        let _ = self.set_state(final_state);

        let error = fault.unwrap_or(ChannelError::Closed);
        let failed = self.pending.fail_all(&error);
        self.messages.close();
        self.notifications.close();
        self.commands.close();
        self.sessions.close();

        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "Transport close failed");
        }
        info!(
            session_id = ?self.session_id(),
            state = %self.state(),
            failed_commands = failed,
            "Channel closed"
        );
    }

    async fn wait_finished(&self) -> ChannelResult<()> {
        loop {
            match self.sessions.receive().await {
                Ok(session) => match session.state {
                    SessionState::Finished => return Ok(()),
                    SessionState::Failed => {
                        return Err(ChannelError::SessionFailed {
                            reason: session.reason.unwrap_or_else(|| {
                                Reason::new(reason_codes::SESSION_ERROR, "session failed")
                            }),
                        });
                    }
                    _ => continue,
                },
                Err(_) if self.state() == SessionState::Finished => return Ok(()),
                Err(_) => return Err(self.fault().unwrap_or(ChannelError::Closed)),
            }
        }
    }

    /// True once traffic other than session envelopes may flow.
    fn accepts_traffic(&self) -> bool {
        match self.state() {
            SessionState::Established | SessionState::Finishing => true,
            state if state.is_negotiation() => self.remote_established.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Handles one inbound envelope. Returns false when the pump must stop.
    async fn dispatch(&self, envelope: Envelope) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        trace!(kind = %envelope.kind(), envelope_id = ?envelope.id(), "Envelope received");

        let kind = envelope.kind();
        if kind != EnvelopeKind::Session && !self.accepts_traffic() {
            let reason = Reason::new(
                reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                format!("received a {} while the session is {}", kind, self.state()),
            );
            self.fail_session(reason.clone(), ChannelError::ProtocolViolation { reason })
                .await;
            return false;
        }

        match envelope {
            Envelope::Message(message) => self.deliver(&self.messages, message, kind).await,
            Envelope::Notification(notification) => {
                self.deliver(&self.notifications, notification, kind).await
            }
            Envelope::Command(command) => {
                let command = if command.status.is_pending() {
                    command
                } else {
                    match self.pending.complete(command) {
                        Ok(()) => return true,
                        Err(unmatched) => unmatched,
                    }
                };
                // Never waits, so responses are not held behind unread requests.
                self.post_or_drop(&self.commands, command, kind);
                true
            }
            Envelope::Session(session) => self.on_session(session).await,
        }
    }

    async fn deliver<T>(&self, queue: &AsyncQueue<T>, item: T, kind: EnvelopeKind) -> bool {
        match self.config.overflow {
            OverflowPolicy::Backpressure => self.post_waiting(queue, item, kind).await,
            OverflowPolicy::Drop => {
                self.post_or_drop(queue, item, kind);
                true
            }
        }
    }

    fn post_or_drop<T>(&self, queue: &AsyncQueue<T>, item: T, kind: EnvelopeKind) {
        if !queue.post(item) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %kind, "Consumer queue full, envelope dropped");
        }
    }

    /// Waits for queue space. Stops waiting when the transport goes down
    /// (returning false) or the session starts finishing (dropping `item`).
    async fn post_waiting<T>(&self, queue: &AsyncQueue<T>, item: T, kind: EnvelopeKind) -> bool {
        let item = match queue.offer(item) {
            Ok(()) => return true,
            Err(item) => item,
        };
        debug!(kind = %kind, "Consumer queue full, waiting for space");

        tokio::select! {
            biased;
            // Fails only once the queue is closed by shutdown.
            posted = queue.post_wait(item) => posted.is_ok(),
            status = self.transport.events().wait_terminal() => {
                self.on_transport_error(status.to_error()).await;
                false
            }
            () = self.wait_for_state(SessionState::Finishing) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %kind, "Session finishing, undelivered envelope dropped");
                true
            }
        }
    }

    async fn wait_for_state(&self, target: SessionState) {
        let mut changes = self.state.subscribe();
        loop {
            if *changes.borrow_and_update() == target {
                return;
            }
            if changes.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    async fn on_session(&self, session: Session) -> bool {
        let state = self.state();
        let established = state == SessionState::Established
            || (state.is_negotiation() && self.remote_established.load(Ordering::Acquire));

        if state.is_negotiation() && !established {
            match session.state {
                SessionState::Established => {
                    self.remote_established.store(true, Ordering::Release);
                }
                SessionState::Failed => {
                    // The negotiator still drains it from the closed queue.
                    let reason = session.reason.clone().unwrap_or_else(|| {
                        Reason::new(reason_codes::SESSION_ERROR, "session failed by peer")
                    });
                    self.sessions.post(session);
                    self.shutdown(
                        SessionState::Failed,
                        Some(ChannelError::SessionFailed { reason }),
                    )
                    .await;
                    return false;
                }
                _ => {}
            }
            self.sessions.post(session);
            return true;
        }

        if established {
            return match session.state {
                SessionState::Finishing => {
                    info!(session_id = ?self.session_id(), "Peer requested session finish");
                    let finished = self.session_envelope(SessionState::Finished);
                    self.send_best_effort(finished).await;
                    self.shutdown(SessionState::Finished, None).await;
                    false
                }
                SessionState::Finished => {
                    self.shutdown(SessionState::Finished, None).await;
                    false
                }
                SessionState::Failed => {
                    let reason = session.reason.unwrap_or_else(|| {
                        Reason::new(reason_codes::SESSION_ERROR, "session failed by peer")
                    });
                    warn!(reason = %reason, "Peer failed the session");
                    self.shutdown(
                        SessionState::Failed,
                        Some(ChannelError::SessionFailed { reason }),
                    )
                    .await;
                    false
                }
                other => {
                    let reason = Reason::new(
                        reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                        format!("unexpected {} session while established", other),
                    );
                    self.fail_session(reason.clone(), ChannelError::ProtocolViolation { reason })
                        .await;
                    false
                }
            };
        }

        match (state, session.state) {
            (SessionState::Finishing, SessionState::Finishing) => {
                // Both sides asked to finish at once.
                let finished = self.session_envelope(SessionState::Finished);
                self.send_best_effort(finished).await;
                true
            }
            (SessionState::Finishing, SessionState::Finished | SessionState::Failed) => {
                self.sessions.post(session);
                true
            }
            (SessionState::Finishing, other) => {
                debug!(state = %other, "Ignoring session envelope while finishing");
                true
            }
            _ => false,
        }
    }

    async fn on_transport_error(&self, error: ProtocolError) {
        if self.is_shut_down() {
            return;
        }
        if self.state() == SessionState::Finishing && error.is_connection_closed() {
            self.shutdown(SessionState::Finished, None).await;
            return;
        }
        warn!(error = %error, session_id = ?self.session_id(), "Transport failed");
        self.shutdown(SessionState::Failed, Some(ChannelError::from(error)))
            .await;
    }
}

async fn pump(inner: Arc<ChannelInner>) {
    debug!("Channel receive pump started");
    loop {
        let received = inner.transport.receive().await;
        let keep_going = match received {
            Ok(envelope) => inner.dispatch(envelope).await,
            Err(e) => {
                inner.on_transport_error(e).await;
                false
            }
        };
        if !keep_going || inner.is_shut_down() {
            break;
        }
    }
    debug!(session_id = ?inner.session_id(), "Channel receive pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_core::{CommandMethod, Document};
    use lime_protocol::InMemoryTransport;

    fn channel_over_memory() -> (Channel, InMemoryTransport) {
        let (local, remote) = InMemoryTransport::pair(16);
        (
            Channel::new(Arc::new(local), ChannelConfig::default()),
            remote,
        )
    }

    #[tokio::test]
    async fn new_channel_rejects_traffic() {
        let (channel, _peer) = channel_over_memory();
        assert_eq!(channel.state(), SessionState::New);

        let result = channel.send_message(Message::new(Document::text("hi"))).await;
        assert!(matches!(
            result,
            Err(ChannelError::InvalidState {
                state: SessionState::New,
                ..
            })
        ));
        assert_eq!(channel.stats().sent, 0);
    }

    #[tokio::test]
    async fn state_transitions_follow_the_table() {
        let (channel, _peer) = channel_over_memory();
        let inner = channel.inner();

        assert!(inner.set_state(SessionState::Finishing).is_err());
        inner.set_state(SessionState::Authenticating).unwrap();
        assert!(inner.set_state(SessionState::Negotiating).is_err());
        inner.set_state(SessionState::Established).unwrap();
        inner.set_state(SessionState::Failed).unwrap();
        assert!(matches!(
            inner.set_state(SessionState::Established),
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn process_command_requires_pending_status() {
        let (channel, _peer) = channel_over_memory();
        channel
            .inner()
            .set_state(SessionState::Established)
            .unwrap();

        let mut command = Command::new(CommandMethod::Get, "/ping");
        command.status = lime_core::CommandStatus::Success;
        assert!(matches!(
            channel.process_command(command).await,
            Err(ChannelError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn message_before_establishment_is_a_violation() {
        let (channel, peer) = channel_over_memory();
        peer.send(&Message::new(Document::text("too early")).into())
            .await
            .unwrap();

        assert_eq!(channel.closed().await, SessionState::Failed);
        assert!(matches!(
            channel.fault(),
            Some(ChannelError::ProtocolViolation { reason })
                if reason.code == reason_codes::SESSION_INVALID_ACTION_FOR_STATE
        ));

        let Envelope::Session(failed) = peer.receive().await.unwrap() else {
            panic!("expected a session envelope");
        };
        assert_eq!(failed.state, SessionState::Failed);
    }

    #[tokio::test]
    async fn closed_channel_fails_fast() {
        let (channel, _peer) = channel_over_memory();
        channel
            .inner()
            .set_state(SessionState::Established)
            .unwrap();
        channel.close().await;

        assert_eq!(channel.state(), SessionState::Finished);
        assert!(matches!(
            channel.send_message(Message::new(Document::text("late"))).await,
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            channel.receive_message().await,
            Err(ChannelError::Closed)
        ));
    }
}

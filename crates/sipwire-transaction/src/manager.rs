// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The transaction manager: the entry point transports and applications
//! call into.
//!
//! The manager owns the [`TransactionTable`] and the [`TimerScheduler`],
//! turns inbound traffic into state-machine events via the matcher, and
//! interprets the action lists the machines return — transmitting messages,
//! arming and cancelling timers, delivering listener events, and removing
//! terminated transactions.
//!
//! Serialization discipline: a machine transition runs while its table
//! entry's guard is held (transitions for one transaction are linearized;
//! different transactions proceed in parallel), and the resulting actions
//! are applied after the guard is dropped. Timer firings and asynchronous
//! transport-error reports funnel through one command loop, so they never
//! mutate a machine from a scheduler-owned task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use sipwire_core::{Method, Request, Response, SipMessage};

use crate::builders;
use crate::events::TransactionListener;
use crate::fsm::{
    ClientAction, ClientEvent, ClientMachine, ServerAction, ServerEvent, ServerMachine,
    TerminationCause,
};
use crate::matcher;
use crate::metrics::{TransactionMetrics, TransactionOutcome, TransactionRole};
use crate::scheduler::{TimerEvent, TimerScheduler};
use crate::table::{ClientEntry, ServerEntry, TransactionLimits, TransactionTable};
use crate::timers::{TimerDefaults, TransportAwareTimers};
use crate::transport::{TransportContext, TransportDispatcher};
use crate::{TransactionError, TransactionKey, TransactionTimer};

/// Default SIP timer values per RFC 3261 §17.
const T1_DEFAULT: Duration = Duration::from_millis(500);
const T2_DEFAULT: Duration = Duration::from_secs(4);
const T4_DEFAULT: Duration = Duration::from_secs(5);

const COMMAND_QUEUE_DEPTH: usize = 128;

enum ManagerCommand {
    TransportError { key: TransactionKey },
    Shutdown,
}

/// Owns all live SIP transactions and drives their state machines.
///
/// Cloning is cheap and yields another handle to the same manager. The
/// constructors spawn the command loop, so a Tokio runtime must be running.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

struct ManagerInner {
    dispatcher: Arc<dyn TransportDispatcher>,
    listener: Arc<dyn TransactionListener>,
    table: TransactionTable,
    scheduler: TimerScheduler,
    timer_defaults: TimerDefaults,
    limits: TransactionLimits,
    metrics: TransactionMetrics,
    down: AtomicBool,
}

impl TransactionManager {
    /// Creates a manager with RFC default timers and default limits.
    pub fn new(
        dispatcher: Arc<dyn TransportDispatcher>,
        listener: Arc<dyn TransactionListener>,
    ) -> Self {
        Self::with_timers(dispatcher, listener, T1_DEFAULT, T2_DEFAULT, T4_DEFAULT)
    }

    /// Creates a manager with custom transaction limits.
    pub fn with_limits(
        dispatcher: Arc<dyn TransportDispatcher>,
        listener: Arc<dyn TransactionListener>,
        limits: TransactionLimits,
    ) -> Self {
        Self::with_timers_and_limits(
            dispatcher, listener, T1_DEFAULT, T2_DEFAULT, T4_DEFAULT, limits,
        )
    }

    /// Creates a manager with custom T1/T2/T4 values (test hook).
    pub fn with_timers(
        dispatcher: Arc<dyn TransportDispatcher>,
        listener: Arc<dyn TransactionListener>,
        t1: Duration,
        t2: Duration,
        t4: Duration,
    ) -> Self {
        Self::with_timers_and_limits(
            dispatcher,
            listener,
            t1,
            t2,
            t4,
            TransactionLimits::default(),
        )
    }

    /// Creates a manager with custom timers and limits.
    pub fn with_timers_and_limits(
        dispatcher: Arc<dyn TransportDispatcher>,
        listener: Arc<dyn TransactionListener>,
        t1: Duration,
        t2: Duration,
        t4: Duration,
        limits: TransactionLimits,
    ) -> Self {
        let (fire_tx, fire_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                dispatcher,
                listener,
                table: TransactionTable::new(),
                scheduler: TimerScheduler::new(fire_tx),
                timer_defaults: TimerDefaults { t1, t2, t4 },
                limits,
                metrics: TransactionMetrics::new(),
                down: AtomicBool::new(false),
            }),
            cmd_tx,
        };
        manager.spawn_command_loop(fire_rx, cmd_rx);
        manager
    }

    /// Gets a reference to the metrics collector.
    pub fn metrics(&self) -> &TransactionMetrics {
        &self.inner.metrics
    }

    /// Number of live client transactions.
    pub fn active_clients(&self) -> usize {
        self.inner.table.client_len()
    }

    /// Number of live server transactions.
    pub fn active_servers(&self) -> usize {
        self.inner.table.server_len()
    }

    /// Starts a client transaction and transmits the request.
    ///
    /// The request must carry a magic-cookie branch in its top Via; the
    /// derived fingerprint must not collide with a live transaction
    /// (collision means the caller reused a branch, which is a bug).
    pub async fn send_request(
        &self,
        request: Request,
        ctx: TransportContext,
    ) -> Result<ClientTransactionHandle, TransactionError> {
        if self.is_down() {
            return Err(TransactionError::ShutDown);
        }
        let key = TransactionKey::from_request(&request, false)
            .ok_or(TransactionError::MissingBranch)?;
        debug!(branch = %key.branch, method = %key.method, "starting client transaction");

        let timers = TransportAwareTimers::with_defaults(ctx.transport, self.inner.timer_defaults);
        let mut machine = ClientMachine::for_method(request.method(), timers);
        let actions = machine.on_event(ClientEvent::SendRequest(request.clone()));
        let last_final = Arc::new(Mutex::new(None));
        let entry = ClientEntry {
            machine,
            ctx,
            request: request.clone(),
            last_final: Arc::clone(&last_final),
            ack: None,
            created_at: Instant::now(),
        };

        self.evict_client_if_full().await;
        self.inner.table.insert_client(key.clone(), entry)?;
        self.inner.metrics.record_start(TransactionRole::Client);
        self.apply_client_actions(&key, actions).await;

        Ok(ClientTransactionHandle {
            manager: self.clone(),
            key,
            ctx,
            request,
            last_final,
        })
    }

    /// Feeds an inbound request into the layer.
    ///
    /// Returns a handle for the (new or already registered) server
    /// transaction, or `Ok(None)` for an ACK — ACKs never open a server
    /// transaction. Retransmissions of a registered request are absorbed
    /// here: the stored response is replayed and the application is not
    /// re-entered.
    pub async fn receive_request(
        &self,
        request: Request,
        ctx: TransportContext,
    ) -> Result<Option<ServerTransactionHandle>, TransactionError> {
        if self.is_down() {
            return Err(TransactionError::ShutDown);
        }
        let key = matcher::request_key(&request).ok_or(TransactionError::MissingBranch)?;

        if request.method() == &Method::Ack {
            let invite_key = matcher::invite_key_for(&key);
            let actions = self
                .inner
                .table
                .server_mut(&invite_key)
                .map(|mut entry| entry.machine.on_event(ServerEvent::ReceiveAck));
            match actions {
                Some(actions) => {
                    debug!(branch = %key.branch, "ACK matched INVITE server transaction");
                    self.apply_server_actions(&invite_key, actions).await;
                }
                None => {
                    // ACK for a 2xx: the transaction is gone by design,
                    // the TU handles the ACK itself.
                    debug!(branch = %key.branch, "ACK matches no INVITE transaction; passing to TU");
                    self.inner.listener.on_request(&key, &request).await;
                }
            }
            return Ok(None);
        }

        let replay = self
            .inner
            .table
            .server_mut(&key)
            .map(|entry| entry.machine.on_retransmit());
        if let Some(actions) = replay {
            debug!(branch = %key.branch, method = %key.method, "absorbed request retransmission");
            if !actions.is_empty() {
                self.inner.metrics.record_retransmission();
            }
            self.apply_server_actions(&key, actions).await;
            return Ok(Some(ServerTransactionHandle {
                manager: self.clone(),
                key,
            }));
        }

        let timers = TransportAwareTimers::with_defaults(ctx.transport, self.inner.timer_defaults);
        let entry = ServerEntry {
            machine: ServerMachine::for_method(request.method(), timers),
            ctx,
            request: request.clone(),
            created_at: Instant::now(),
        };

        self.evict_server_if_full().await;
        self.inner.table.insert_server(key.clone(), entry)?;
        self.inner.metrics.record_start(TransactionRole::Server);
        debug!(branch = %key.branch, method = %key.method, "created server transaction");
        self.inner.listener.on_request(&key, &request).await;

        Ok(Some(ServerTransactionHandle {
            manager: self.clone(),
            key,
        }))
    }

    /// Feeds an inbound response into the matching client transaction.
    ///
    /// Responses that match nothing are dropped; a stray or late response is
    /// normal network behavior, not an error.
    pub async fn receive_response(&self, response: Response) {
        if self.is_down() {
            return;
        }
        let Some(key) = matcher::response_key(&response) else {
            debug!("response without usable Via branch and CSeq; dropping");
            return;
        };

        let actions = {
            let Some(mut entry) = self.inner.table.client_mut(&key) else {
                warn!(
                    branch = %key.branch,
                    method = %key.method,
                    code = response.code(),
                    "no matching client transaction for response"
                );
                return;
            };
            if response.is_final() {
                let mut last_final = entry.last_final.lock();
                if last_final.is_none() {
                    *last_final = Some(response.clone());
                }
            }
            let event = if response.is_final() {
                ClientEvent::ReceiveFinal(response)
            } else {
                ClientEvent::ReceiveProvisional(response)
            };
            entry.machine.on_event(event)
        };
        self.apply_client_actions(&key, actions).await;
    }

    /// Tears everything down: cancels all timers, drops all transactions,
    /// and suppresses all further events. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.shutdown();
        let drained = self.inner.table.drain_keys();
        debug!(count = drained.len(), "dropped all live transactions on shutdown");
        let _ = self.cmd_tx.try_send(ManagerCommand::Shutdown);
    }

    fn is_down(&self) -> bool {
        self.inner.down.load(Ordering::SeqCst)
    }

    fn spawn_command_loop(
        &self,
        mut fire_rx: mpsc::Receiver<TimerEvent>,
        mut cmd_rx: mpsc::Receiver<ManagerCommand>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = fire_rx.recv() => {
                        manager.handle_timer(event.key, event.timer).await;
                    }
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        ManagerCommand::TransportError { key } => {
                            manager.handle_transport_failure(key).await;
                        }
                        ManagerCommand::Shutdown => break,
                    },
                    else => break,
                }
            }
        });
    }

    async fn handle_timer(&self, key: TransactionKey, timer: TransactionTimer) {
        if self.is_down() {
            return;
        }
        self.inner.metrics.record_timer_fired(timer);

        if key.is_server {
            let Some(actions) = self
                .inner
                .table
                .server_mut(&key)
                .map(|mut entry| entry.machine.on_event(ServerEvent::TimerFired(timer)))
            else {
                debug!(?key, ?timer, "timer fired for unknown transaction");
                return;
            };
            if actions
                .iter()
                .any(|a| matches!(a, ServerAction::Transmit(_)))
            {
                self.inner.metrics.record_retransmission();
            }
            self.apply_server_actions(&key, actions).await;
        } else {
            let Some(actions) = self
                .inner
                .table
                .client_mut(&key)
                .map(|mut entry| entry.machine.on_event(ClientEvent::TimerFired(timer)))
            else {
                debug!(?key, ?timer, "timer fired for unknown transaction");
                return;
            };
            if actions
                .iter()
                .any(|a| matches!(a, ClientAction::Transmit(_)))
            {
                self.inner.metrics.record_retransmission();
            }
            self.apply_client_actions(&key, actions).await;
        }
    }

    async fn handle_transport_failure(&self, key: TransactionKey) {
        if self.is_down() {
            return;
        }
        if key.is_server {
            let Some(actions) = self
                .inner
                .table
                .server_mut(&key)
                .map(|mut entry| entry.machine.on_event(ServerEvent::TransportError))
            else {
                return;
            };
            self.apply_server_actions(&key, actions).await;
        } else {
            let Some(actions) = self
                .inner
                .table
                .client_mut(&key)
                .map(|mut entry| entry.machine.on_event(ClientEvent::TransportError))
            else {
                return;
            };
            self.apply_client_actions(&key, actions).await;
        }
    }

    async fn send_response(
        &self,
        key: &TransactionKey,
        response: Response,
        is_final: bool,
    ) -> Result<(), TransactionError> {
        if self.is_down() {
            return Err(TransactionError::ShutDown);
        }
        if is_final && response.is_informational() {
            return Err(TransactionError::InvalidStatus {
                expected: "final",
                code: response.code(),
            });
        }
        if !is_final && response.is_final() {
            return Err(TransactionError::InvalidStatus {
                expected: "provisional",
                code: response.code(),
            });
        }

        let actions = {
            let Some(mut entry) = self.inner.table.server_mut(key) else {
                return Err(TransactionError::NotFound(key.clone()));
            };
            let allowed = if is_final {
                entry.machine.can_send_final()
            } else {
                entry.machine.can_send_provisional()
            };
            if !allowed {
                return Err(TransactionError::AlreadyResponded);
            }
            let event = if is_final {
                ServerEvent::SendFinal(response)
            } else {
                ServerEvent::SendProvisional(response)
            };
            entry.machine.on_event(event)
        };
        self.apply_server_actions(key, actions).await;
        Ok(())
    }

    fn create_cancel(&self, key: &TransactionKey) -> Result<Request, TransactionError> {
        let Some(entry) = self.inner.table.client(key) else {
            return Err(TransactionError::NotFound(key.clone()));
        };
        match &entry.machine {
            ClientMachine::NonInvite(_) => Err(TransactionError::NotCancellable(
                entry.request.method().clone(),
            )),
            ClientMachine::Invite(_) if !entry.machine.cancellable() => {
                Err(TransactionError::AlreadyAnswered)
            }
            ClientMachine::Invite(_) => builders::build_cancel(&entry.request),
        }
    }

    async fn apply_client_actions(&self, key: &TransactionKey, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Transmit(request) => {
                    self.transmit(key, SipMessage::Request(request)).await;
                }
                ClientAction::Deliver(response) => {
                    self.inner.listener.on_response(key, &response).await;
                }
                ClientAction::SendAck(response) => {
                    self.send_auto_ack(key, &response).await;
                }
                ClientAction::RetransmitAck => {
                    let ack = self.inner.table.client(key).and_then(|e| e.ack.clone());
                    if let Some(ack) = ack {
                        self.inner.metrics.record_retransmission();
                        self.transmit(key, SipMessage::Request(ack)).await;
                    }
                }
                ClientAction::Schedule { timer, duration } => {
                    self.inner.scheduler.arm(key.clone(), timer, duration);
                }
                ClientAction::CancelTimer(timer) => {
                    self.inner.scheduler.cancel(key, timer);
                }
                ClientAction::Terminate(cause) => {
                    self.terminate_client(key, cause).await;
                }
            }
        }
    }

    async fn apply_server_actions(&self, key: &TransactionKey, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::Transmit(response) => {
                    self.transmit(key, SipMessage::Response(response)).await;
                }
                ServerAction::Schedule { timer, duration } => {
                    self.inner.scheduler.arm(key.clone(), timer, duration);
                }
                ServerAction::CancelTimer(timer) => {
                    self.inner.scheduler.cancel(key, timer);
                }
                ServerAction::Terminate(cause) => {
                    self.terminate_server(key, cause).await;
                }
            }
        }
    }

    async fn transmit(&self, key: &TransactionKey, message: SipMessage) {
        let ctx = if key.is_server {
            self.inner.table.server(key).map(|entry| entry.ctx)
        } else {
            self.inner.table.client(key).map(|entry| entry.ctx)
        };
        let Some(ctx) = ctx else {
            return;
        };

        if let Err(err) = self.inner.dispatcher.send(&ctx, message).await {
            error!(%err, ?key, "transport dispatch failed");
            if self
                .cmd_tx
                .try_send(ManagerCommand::TransportError { key: key.clone() })
                .is_err()
            {
                warn!(?key, "command queue full; dropping transport error report");
            }
        }
    }

    /// Synthesizes the ACK for a non-2xx final response, stores it for
    /// replay on duplicate finals, and transmits it.
    async fn send_auto_ack(&self, key: &TransactionKey, response: &Response) {
        let built = {
            let Some(entry) = self.inner.table.client(key) else {
                return;
            };
            builders::build_ack(&entry.request, response)
        };
        match built {
            Ok(ack) => {
                if let Some(mut entry) = self.inner.table.client_mut(key) {
                    entry.ack = Some(ack.clone());
                }
                self.transmit(key, SipMessage::Request(ack)).await;
            }
            Err(err) => warn!(%err, ?key, "failed to synthesize ACK"),
        }
    }

    async fn terminate_client(&self, key: &TransactionKey, cause: TerminationCause) {
        self.inner.scheduler.cancel_all(key);
        let Some(entry) = self.inner.table.remove_client(key) else {
            return;
        };
        self.inner.metrics.record_complete(
            TransactionRole::Client,
            entry.request.method().as_str(),
            entry.created_at.elapsed(),
            outcome_for(cause),
        );
        match cause {
            TerminationCause::TimedOut => self.inner.listener.on_timeout(key).await,
            TerminationCause::TransportFailed => {
                self.inner.listener.on_transport_error(key).await
            }
            TerminationCause::Completed => {}
        }
        self.inner.listener.on_terminated(key).await;
    }

    async fn terminate_server(&self, key: &TransactionKey, cause: TerminationCause) {
        self.inner.scheduler.cancel_all(key);
        let Some(entry) = self.inner.table.remove_server(key) else {
            return;
        };
        self.inner.metrics.record_complete(
            TransactionRole::Server,
            entry.request.method().as_str(),
            entry.created_at.elapsed(),
            outcome_for(cause),
        );
        match cause {
            TerminationCause::TimedOut => self.inner.listener.on_timeout(key).await,
            TerminationCause::TransportFailed => {
                self.inner.listener.on_transport_error(key).await
            }
            TerminationCause::Completed => {}
        }
        self.inner.listener.on_terminated(key).await;
    }

    async fn evict_client_if_full(&self) {
        if self.inner.table.client_len() < self.inner.limits.max_client_transactions {
            return;
        }
        let Some(victim) = self.inner.table.oldest_client() else {
            return;
        };
        warn!(
            key = ?victim,
            limit = self.inner.limits.max_client_transactions,
            "client transaction limit reached; evicting oldest"
        );
        self.inner.scheduler.cancel_all(&victim);
        if let Some(entry) = self.inner.table.remove_client(&victim) {
            self.inner.metrics.record_complete(
                TransactionRole::Client,
                entry.request.method().as_str(),
                entry.created_at.elapsed(),
                TransactionOutcome::Evicted,
            );
            self.inner.listener.on_terminated(&victim).await;
        }
    }

    async fn evict_server_if_full(&self) {
        if self.inner.table.server_len() < self.inner.limits.max_server_transactions {
            return;
        }
        let Some(victim) = self.inner.table.oldest_server() else {
            return;
        };
        warn!(
            key = ?victim,
            limit = self.inner.limits.max_server_transactions,
            "server transaction limit reached; evicting oldest"
        );
        self.inner.scheduler.cancel_all(&victim);
        if let Some(entry) = self.inner.table.remove_server(&victim) {
            self.inner.metrics.record_complete(
                TransactionRole::Server,
                entry.request.method().as_str(),
                entry.created_at.elapsed(),
                TransactionOutcome::Evicted,
            );
            self.inner.listener.on_terminated(&victim).await;
        }
    }
}

fn outcome_for(cause: TerminationCause) -> TransactionOutcome {
    match cause {
        TerminationCause::Completed => TransactionOutcome::Completed,
        TerminationCause::TimedOut => TransactionOutcome::Timeout,
        TerminationCause::TransportFailed => TransactionOutcome::TransportError,
    }
}

/// Application-side handle to a client transaction.
#[derive(Clone)]
pub struct ClientTransactionHandle {
    manager: TransactionManager,
    key: TransactionKey,
    ctx: TransportContext,
    request: Request,
    last_final: Arc<Mutex<Option<Response>>>,
}

impl ClientTransactionHandle {
    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// Builds a CANCEL referencing this transaction.
    ///
    /// Valid only for an INVITE that has not yet received a final response;
    /// sending the CANCEL opens an independent sibling transaction and does
    /// not abort this one.
    pub fn create_cancel(&self) -> Result<Request, TransactionError> {
        self.manager.create_cancel(&self.key)
    }

    /// Builds the ACK for the final response this transaction received.
    ///
    /// Fails until a final response has arrived. Needed for 2xx answers,
    /// where the ACK is the application's responsibility even after the
    /// transaction itself has terminated; for non-2xx the layer has already
    /// ACKed on its own.
    pub fn create_ack(&self) -> Result<Request, TransactionError> {
        let last_final = self.last_final.lock();
        let response = last_final
            .as_ref()
            .ok_or(TransactionError::NoFinalResponse)?;
        builders::build_ack(&self.request, response)
    }

    /// Builds the CANCEL and sends it as its own client transaction over
    /// this transaction's transport path.
    pub async fn send_cancel(&self) -> Result<ClientTransactionHandle, TransactionError> {
        let cancel = self.create_cancel()?;
        self.manager.send_request(cancel, self.ctx).await
    }
}

/// Application-side handle to a server transaction.
#[derive(Clone)]
pub struct ServerTransactionHandle {
    manager: TransactionManager,
    key: TransactionKey,
}

impl std::fmt::Debug for ClientTransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransactionHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ServerTransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTransactionHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ServerTransactionHandle {
    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// Sends a 1xx response. May be repeated while no final has been sent.
    pub async fn send_provisional(&self, response: Response) -> Result<(), TransactionError> {
        self.manager.send_response(&self.key, response, false).await
    }

    /// Sends the final response. Valid exactly once; retransmission toward
    /// the far end is handled by the transaction afterwards.
    pub async fn send_final(&self, response: Response) -> Result<(), TransactionError> {
        self.manager.send_response(&self.key, response, true).await
    }
}

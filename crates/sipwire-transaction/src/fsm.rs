// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four transaction state machines of RFC 3261 §17.
//!
//! Each machine is a pure transition function: `on_event` maps the current
//! state and an input event to a new state plus a list of side-effect
//! actions for the runtime to apply. The machines never touch I/O, locks, or
//! the clock; retransmission, duplicate absorption, and timeout behavior are
//! all expressed as explicit transitions so the runtime stays a thin
//! interpreter.
//!
//! Terminated is absorbing: once a machine reports it, every further event
//! returns no actions.

use std::time::Duration;

use sipwire_core::{Method, Request, Response};

use crate::timers::TransportAwareTimers;
use crate::{
    ClientInviteState, ClientNonInviteState, ServerInviteState, ServerNonInviteState,
    TransactionTimer,
};

/// Why a transaction reached Terminated.
///
/// Decides which events the runtime emits before the terminal
/// `on_terminated`: a timeout additionally emits `on_timeout`, a transport
/// failure `on_transport_error`, normal completion nothing extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationCause {
    Completed,
    TimedOut,
    TransportFailed,
}

/// Events driving the client-side state machines.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SendRequest(Request),
    ReceiveProvisional(Response),
    ReceiveFinal(Response),
    TimerFired(TransactionTimer),
    TransportError,
}

/// Side effects emitted by the client-side state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Hand the request to the transport (initial send or retransmission).
    Transmit(Request),
    /// Deliver a response to the transaction user.
    Deliver(Response),
    /// Synthesize an ACK for this non-2xx final response and transmit it.
    SendAck(Response),
    /// Retransmit the previously synthesized ACK.
    RetransmitAck,
    Schedule {
        timer: TransactionTimer,
        duration: Duration,
    },
    CancelTimer(TransactionTimer),
    Terminate(TerminationCause),
}

/// Events driving the server-side state machines.
///
/// The initial request is consumed at construction time by the runtime (it
/// creates the machine and delivers the request to the application);
/// retransmissions of it enter through [`ServerMachine::on_retransmit`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    SendProvisional(Response),
    SendFinal(Response),
    ReceiveAck,
    TimerFired(TransactionTimer),
    TransportError,
}

/// Side effects emitted by the server-side state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Hand the response to the transport (first send or replay).
    Transmit(Response),
    Schedule {
        timer: TransactionTimer,
        duration: Duration,
    },
    CancelTimer(TransactionTimer),
    Terminate(TerminationCause),
}

/// Client INVITE transaction (RFC 3261 §17.1.1).
pub struct ClientInviteFsm {
    state: ClientInviteState,
    timers: TransportAwareTimers,
    a_interval: Duration,
    retransmits: u32,
    last_request: Option<Request>,
}

impl ClientInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientInviteState::Calling,
            a_interval: timers.duration(TransactionTimer::A),
            timers,
            retransmits: 0,
            last_request: None,
        }
    }

    pub fn state(&self) -> ClientInviteState {
        self.state
    }

    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    pub fn on_event(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        use ClientInviteState::*;
        match (self.state, event) {
            (Calling, ClientEvent::SendRequest(request)) if self.last_request.is_none() => {
                self.handle_send(request)
            }
            (Calling | Proceeding, ClientEvent::ReceiveProvisional(response)) => {
                self.state = Proceeding;
                vec![
                    ClientAction::CancelTimer(TransactionTimer::A),
                    ClientAction::Deliver(response),
                ]
            }
            (Calling | Proceeding, ClientEvent::ReceiveFinal(response)) => {
                self.handle_final(response)
            }
            (Completed, ClientEvent::ReceiveFinal(_)) => {
                // The far end kept retransmitting its answer; our ACK was
                // lost. Replay it, never the ResponseEvent.
                vec![ClientAction::RetransmitAck]
            }
            (Calling, ClientEvent::TimerFired(TransactionTimer::A)) => self.handle_timer_a(),
            (Calling | Proceeding, ClientEvent::TimerFired(TransactionTimer::B)) => {
                self.state = Terminated;
                vec![
                    ClientAction::CancelTimer(TransactionTimer::A),
                    ClientAction::Terminate(TerminationCause::TimedOut),
                ]
            }
            (Completed, ClientEvent::TimerFired(TransactionTimer::D)) => {
                self.state = Terminated;
                vec![ClientAction::Terminate(TerminationCause::Completed)]
            }
            (Terminated, ClientEvent::TransportError) => Vec::new(),
            (_, ClientEvent::TransportError) => {
                self.state = Terminated;
                vec![ClientAction::Terminate(TerminationCause::TransportFailed)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, request: Request) -> Vec<ClientAction> {
        self.last_request = Some(request.clone());
        let mut actions = vec![ClientAction::Transmit(request)];
        if self.timers.should_retransmit() {
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::A,
                duration: self.a_interval,
            });
        }
        actions.push(ClientAction::Schedule {
            timer: TransactionTimer::B,
            duration: self.timers.duration(TransactionTimer::B),
        });
        actions
    }

    fn handle_final(&mut self, response: Response) -> Vec<ClientAction> {
        let mut actions = vec![
            ClientAction::CancelTimer(TransactionTimer::A),
            ClientAction::CancelTimer(TransactionTimer::B),
            ClientAction::Deliver(response.clone()),
        ];
        if response.is_success() {
            // 2xx terminates the transaction at once; the ACK for a 2xx is
            // the transaction user's responsibility (RFC 3261 §17.1.1.2).
            self.state = ClientInviteState::Terminated;
            actions.push(ClientAction::Terminate(TerminationCause::Completed));
            return actions;
        }

        actions.push(ClientAction::SendAck(response));
        let wait = self.timers.duration(TransactionTimer::D);
        if wait.is_zero() {
            self.state = ClientInviteState::Terminated;
            actions.push(ClientAction::Terminate(TerminationCause::Completed));
        } else {
            self.state = ClientInviteState::Completed;
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::D,
                duration: wait,
            });
        }
        actions
    }

    fn handle_timer_a(&mut self) -> Vec<ClientAction> {
        let Some(request) = &self.last_request else {
            return Vec::new();
        };
        self.retransmits += 1;
        self.a_interval = (self.a_interval * 2).min(self.timers.defaults().t2);
        vec![
            ClientAction::Transmit(request.clone()),
            ClientAction::Schedule {
                timer: TransactionTimer::A,
                duration: self.a_interval,
            },
        ]
    }
}

/// Client non-INVITE transaction (RFC 3261 §17.1.2).
pub struct ClientNonInviteFsm {
    state: ClientNonInviteState,
    timers: TransportAwareTimers,
    e_interval: Duration,
    retransmits: u32,
    last_request: Option<Request>,
}

impl ClientNonInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientNonInviteState::Trying,
            e_interval: timers.duration(TransactionTimer::E),
            timers,
            retransmits: 0,
            last_request: None,
        }
    }

    pub fn state(&self) -> ClientNonInviteState {
        self.state
    }

    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    pub fn on_event(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        use ClientNonInviteState::*;
        match (self.state, event) {
            (Trying, ClientEvent::SendRequest(request)) if self.last_request.is_none() => {
                self.handle_send(request)
            }
            (Trying | Proceeding, ClientEvent::ReceiveProvisional(response)) => {
                self.state = Proceeding;
                vec![ClientAction::Deliver(response)]
            }
            (Trying | Proceeding, ClientEvent::ReceiveFinal(response)) => {
                self.handle_final(response)
            }
            // Duplicate finals while waiting out Timer K are absorbed.
            (Completed, ClientEvent::ReceiveFinal(_)) => Vec::new(),
            (Trying | Proceeding, ClientEvent::TimerFired(TransactionTimer::E)) => {
                self.handle_timer_e()
            }
            (Trying | Proceeding, ClientEvent::TimerFired(TransactionTimer::F)) => {
                self.state = Terminated;
                vec![
                    ClientAction::CancelTimer(TransactionTimer::E),
                    ClientAction::Terminate(TerminationCause::TimedOut),
                ]
            }
            (Completed, ClientEvent::TimerFired(TransactionTimer::K)) => {
                self.state = Terminated;
                vec![ClientAction::Terminate(TerminationCause::Completed)]
            }
            (Terminated, ClientEvent::TransportError) => Vec::new(),
            (_, ClientEvent::TransportError) => {
                self.state = Terminated;
                vec![ClientAction::Terminate(TerminationCause::TransportFailed)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, request: Request) -> Vec<ClientAction> {
        self.last_request = Some(request.clone());
        let mut actions = vec![ClientAction::Transmit(request)];
        if self.timers.should_retransmit() {
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::E,
                duration: self.e_interval,
            });
        }
        actions.push(ClientAction::Schedule {
            timer: TransactionTimer::F,
            duration: self.timers.duration(TransactionTimer::F),
        });
        actions
    }

    fn handle_final(&mut self, response: Response) -> Vec<ClientAction> {
        let mut actions = vec![
            ClientAction::CancelTimer(TransactionTimer::E),
            ClientAction::CancelTimer(TransactionTimer::F),
            ClientAction::Deliver(response),
        ];
        let wait = self.timers.duration(TransactionTimer::K);
        if wait.is_zero() {
            self.state = ClientNonInviteState::Terminated;
            actions.push(ClientAction::Terminate(TerminationCause::Completed));
        } else {
            self.state = ClientNonInviteState::Completed;
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::K,
                duration: wait,
            });
        }
        actions
    }

    fn handle_timer_e(&mut self) -> Vec<ClientAction> {
        let Some(request) = &self.last_request else {
            return Vec::new();
        };
        self.retransmits += 1;
        // While Trying the interval doubles up to T2; once a provisional
        // arrived, retransmissions continue at a flat T2 (RFC 3261 §17.1.2.2).
        self.e_interval = match self.state {
            ClientNonInviteState::Proceeding => self.timers.defaults().t2,
            _ => (self.e_interval * 2).min(self.timers.defaults().t2),
        };
        vec![
            ClientAction::Transmit(request.clone()),
            ClientAction::Schedule {
                timer: TransactionTimer::E,
                duration: self.e_interval,
            },
        ]
    }
}

/// Server INVITE transaction (RFC 3261 §17.2.1).
pub struct ServerInviteFsm {
    state: ServerInviteState,
    timers: TransportAwareTimers,
    g_interval: Duration,
    retransmits: u32,
    last_response: Option<Response>,
}

impl ServerInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerInviteState::Proceeding,
            g_interval: timers.duration(TransactionTimer::G),
            timers,
            retransmits: 0,
            last_response: None,
        }
    }

    pub fn state(&self) -> ServerInviteState {
        self.state
    }

    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    /// Reaction to a retransmission of the initiating INVITE: replay the
    /// last response without re-entering the application.
    pub fn on_retransmit(&self) -> Vec<ServerAction> {
        match (self.state, &self.last_response) {
            (
                ServerInviteState::Proceeding | ServerInviteState::Completed,
                Some(response),
            ) => vec![ServerAction::Transmit(response.clone())],
            _ => Vec::new(),
        }
    }

    pub fn on_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        use ServerInviteState::*;
        match (self.state, event) {
            (Proceeding, ServerEvent::SendProvisional(response)) => {
                self.last_response = Some(response.clone());
                vec![ServerAction::Transmit(response)]
            }
            (Proceeding, ServerEvent::SendFinal(response)) => self.handle_final(response),
            (Completed, ServerEvent::ReceiveAck) => self.handle_ack(),
            // ACK retransmissions while Confirmed are absorbed.
            (Confirmed, ServerEvent::ReceiveAck) => Vec::new(),
            (Completed, ServerEvent::TimerFired(TransactionTimer::G)) => self.handle_timer_g(),
            (Completed, ServerEvent::TimerFired(TransactionTimer::H)) => {
                // The far end never confirmed our final response.
                self.state = Terminated;
                vec![
                    ServerAction::CancelTimer(TransactionTimer::G),
                    ServerAction::Terminate(TerminationCause::TimedOut),
                ]
            }
            (Confirmed, ServerEvent::TimerFired(TransactionTimer::I)) => {
                self.state = Terminated;
                vec![ServerAction::Terminate(TerminationCause::Completed)]
            }
            (Terminated, ServerEvent::TransportError) => Vec::new(),
            (_, ServerEvent::TransportError) => {
                self.state = Terminated;
                vec![ServerAction::Terminate(TerminationCause::TransportFailed)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_final(&mut self, response: Response) -> Vec<ServerAction> {
        if response.is_success() {
            // 2xx is transmitted once and ends the transaction; its
            // retransmission is owned by the TU (RFC 3261 §13.3.1.4).
            self.state = ServerInviteState::Terminated;
            return vec![
                ServerAction::Transmit(response),
                ServerAction::Terminate(TerminationCause::Completed),
            ];
        }

        self.last_response = Some(response.clone());
        self.state = ServerInviteState::Completed;
        let mut actions = vec![ServerAction::Transmit(response)];
        if self.timers.should_retransmit() {
            actions.push(ServerAction::Schedule {
                timer: TransactionTimer::G,
                duration: self.g_interval,
            });
        }
        actions.push(ServerAction::Schedule {
            timer: TransactionTimer::H,
            duration: self.timers.duration(TransactionTimer::H),
        });
        actions
    }

    fn handle_ack(&mut self) -> Vec<ServerAction> {
        let mut actions = vec![
            ServerAction::CancelTimer(TransactionTimer::G),
            ServerAction::CancelTimer(TransactionTimer::H),
        ];
        let wait = self.timers.duration(TransactionTimer::I);
        if wait.is_zero() {
            self.state = ServerInviteState::Terminated;
            actions.push(ServerAction::Terminate(TerminationCause::Completed));
        } else {
            self.state = ServerInviteState::Confirmed;
            actions.push(ServerAction::Schedule {
                timer: TransactionTimer::I,
                duration: wait,
            });
        }
        actions
    }

    fn handle_timer_g(&mut self) -> Vec<ServerAction> {
        let Some(response) = &self.last_response else {
            return Vec::new();
        };
        self.retransmits += 1;
        let transmit = ServerAction::Transmit(response.clone());
        self.g_interval = (self.g_interval * 2).min(self.timers.defaults().t2);
        vec![
            transmit,
            ServerAction::Schedule {
                timer: TransactionTimer::G,
                duration: self.g_interval,
            },
        ]
    }
}

/// Server non-INVITE transaction (RFC 3261 §17.2.2).
pub struct ServerNonInviteFsm {
    state: ServerNonInviteState,
    timers: TransportAwareTimers,
    last_response: Option<Response>,
}

impl ServerNonInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerNonInviteState::Trying,
            timers,
            last_response: None,
        }
    }

    pub fn state(&self) -> ServerNonInviteState {
        self.state
    }

    /// Reaction to a retransmission of the initiating request: absorb
    /// silently while Trying, replay the last response afterwards.
    pub fn on_retransmit(&self) -> Vec<ServerAction> {
        match (self.state, &self.last_response) {
            (
                ServerNonInviteState::Proceeding | ServerNonInviteState::Completed,
                Some(response),
            ) => vec![ServerAction::Transmit(response.clone())],
            _ => Vec::new(),
        }
    }

    pub fn on_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        use ServerNonInviteState::*;
        match (self.state, event) {
            (Trying | Proceeding, ServerEvent::SendProvisional(response)) => {
                self.state = Proceeding;
                self.last_response = Some(response.clone());
                vec![ServerAction::Transmit(response)]
            }
            (Trying | Proceeding, ServerEvent::SendFinal(response)) => {
                self.handle_final(response)
            }
            (Completed, ServerEvent::TimerFired(TransactionTimer::J)) => {
                self.state = Terminated;
                vec![ServerAction::Terminate(TerminationCause::Completed)]
            }
            (Terminated, ServerEvent::TransportError) => Vec::new(),
            (_, ServerEvent::TransportError) => {
                self.state = Terminated;
                vec![ServerAction::Terminate(TerminationCause::TransportFailed)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_final(&mut self, response: Response) -> Vec<ServerAction> {
        self.last_response = Some(response.clone());
        let mut actions = vec![ServerAction::Transmit(response)];
        let wait = self.timers.duration(TransactionTimer::J);
        if wait.is_zero() {
            self.state = ServerNonInviteState::Terminated;
            actions.push(ServerAction::Terminate(TerminationCause::Completed));
        } else {
            self.state = ServerNonInviteState::Completed;
            actions.push(ServerAction::Schedule {
                timer: TransactionTimer::J,
                duration: wait,
            });
        }
        actions
    }
}

/// Role wrapper dispatching client events to the INVITE or non-INVITE machine.
pub enum ClientMachine {
    Invite(ClientInviteFsm),
    NonInvite(ClientNonInviteFsm),
}

impl ClientMachine {
    /// Picks the machine variant for the request method.
    pub fn for_method(method: &Method, timers: TransportAwareTimers) -> Self {
        match method {
            Method::Invite => Self::Invite(ClientInviteFsm::new(timers)),
            _ => Self::NonInvite(ClientNonInviteFsm::new(timers)),
        }
    }

    pub fn on_event(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        match self {
            Self::Invite(fsm) => fsm.on_event(event),
            Self::NonInvite(fsm) => fsm.on_event(event),
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self {
            Self::Invite(fsm) => fsm.state() == ClientInviteState::Terminated,
            Self::NonInvite(fsm) => fsm.state() == ClientNonInviteState::Terminated,
        }
    }

    /// True while a CANCEL may still be issued for this transaction:
    /// an INVITE that has not yet received a final response.
    pub fn cancellable(&self) -> bool {
        matches!(
            self,
            Self::Invite(fsm) if matches!(
                fsm.state(),
                ClientInviteState::Calling | ClientInviteState::Proceeding
            )
        )
    }

    pub fn retransmits(&self) -> u32 {
        match self {
            Self::Invite(fsm) => fsm.retransmits(),
            Self::NonInvite(fsm) => fsm.retransmits(),
        }
    }
}

/// Role wrapper dispatching server events to the INVITE or non-INVITE machine.
pub enum ServerMachine {
    Invite(ServerInviteFsm),
    NonInvite(ServerNonInviteFsm),
}

impl ServerMachine {
    /// Picks the machine variant for the request method.
    pub fn for_method(method: &Method, timers: TransportAwareTimers) -> Self {
        match method {
            Method::Invite => Self::Invite(ServerInviteFsm::new(timers)),
            _ => Self::NonInvite(ServerNonInviteFsm::new(timers)),
        }
    }

    pub fn on_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match self {
            Self::Invite(fsm) => fsm.on_event(event),
            Self::NonInvite(fsm) => fsm.on_event(event),
        }
    }

    pub fn on_retransmit(&self) -> Vec<ServerAction> {
        match self {
            Self::Invite(fsm) => fsm.on_retransmit(),
            Self::NonInvite(fsm) => fsm.on_retransmit(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self {
            Self::Invite(fsm) => fsm.state() == ServerInviteState::Terminated,
            Self::NonInvite(fsm) => fsm.state() == ServerNonInviteState::Terminated,
        }
    }

    /// True while the application may still send a provisional response.
    pub fn can_send_provisional(&self) -> bool {
        match self {
            Self::Invite(fsm) => fsm.state() == ServerInviteState::Proceeding,
            Self::NonInvite(fsm) => matches!(
                fsm.state(),
                ServerNonInviteState::Trying | ServerNonInviteState::Proceeding
            ),
        }
    }

    /// True while the application may still send the final response.
    pub fn can_send_final(&self) -> bool {
        self.can_send_provisional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::Transport;
    use bytes::Bytes;
    use sipwire_core::{Headers, RequestLine, SipUri, StatusLine};

    fn udp_timers() -> TransportAwareTimers {
        TransportAwareTimers::new(Transport::Udp)
    }

    fn tcp_timers() -> TransportAwareTimers {
        TransportAwareTimers::new(Transport::Tcp)
    }

    fn sample_request(method: Method) -> Request {
        Request::new(
            RequestLine::new(method, SipUri::parse("sip:example.com").unwrap()),
            Headers::new(),
            Bytes::new(),
        )
        .expect("valid request")
    }

    fn sample_response(code: u16) -> Response {
        Response::new(
            StatusLine::new(code, "Reason").expect("valid status line"),
            Headers::new(),
            Bytes::new(),
        )
        .expect("valid response")
    }

    #[test]
    fn client_invite_send_arms_a_and_b() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        let actions = fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));

        assert!(actions.iter().any(|a| matches!(a, ClientAction::Transmit(_))));
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::A, duration } if *duration == Duration::from_millis(500)
        )));
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::B, duration } if *duration == Duration::from_secs(32)
        )));
    }

    #[test]
    fn client_invite_reliable_transport_skips_timer_a() {
        let mut fsm = ClientInviteFsm::new(tcp_timers());
        let actions = fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));

        assert!(!actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::A, .. }
        )));
    }

    #[test]
    fn client_invite_timer_a_doubles_capped_at_t2() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));

        let mut intervals = Vec::new();
        for _ in 0..5 {
            let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::A));
            let scheduled = actions.iter().find_map(|a| match a {
                ClientAction::Schedule {
                    timer: TransactionTimer::A,
                    duration,
                } => Some(*duration),
                _ => None,
            });
            intervals.push(scheduled.expect("Timer A rescheduled"));
        }

        assert_eq!(
            intervals,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(4000),
                Duration::from_millis(4000),
            ]
        );
        assert_eq!(fsm.retransmits(), 5);
    }

    #[test]
    fn client_invite_provisional_cancels_timer_a() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(180)));

        assert_eq!(fsm.state(), ClientInviteState::Proceeding);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::CancelTimer(TransactionTimer::A))));
        assert!(actions.iter().any(|a| matches!(a, ClientAction::Deliver(_))));

        // Timer A no longer retransmits once Proceeding.
        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::A));
        assert!(actions.is_empty());
    }

    #[test]
    fn client_invite_non_2xx_acks_and_arms_timer_d() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(486)));

        assert_eq!(fsm.state(), ClientInviteState::Completed);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::Deliver(_))));
        assert!(actions.iter().any(|a| matches!(a, ClientAction::SendAck(_))));
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::D, duration } if *duration == Duration::from_secs(32)
        )));
    }

    #[test]
    fn client_invite_duplicate_final_retransmits_ack_only() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        fsm.on_event(ClientEvent::ReceiveFinal(sample_response(486)));

        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(486)));
        assert_eq!(actions, vec![ClientAction::RetransmitAck]);
    }

    #[test]
    fn client_invite_2xx_terminates_without_auto_ack() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));

        assert_eq!(fsm.state(), ClientInviteState::Terminated);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::Deliver(_))));
        assert!(!actions.iter().any(|a| matches!(a, ClientAction::SendAck(_))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn client_invite_timer_b_times_out() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::B));

        assert_eq!(fsm.state(), ClientInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TimedOut))));

        // Terminated is absorbing.
        assert!(fsm
            .on_event(ClientEvent::ReceiveFinal(sample_response(200)))
            .is_empty());
    }

    #[test]
    fn client_invite_timer_d_completes() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        fsm.on_event(ClientEvent::ReceiveFinal(sample_response(404)));
        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::D));

        assert_eq!(fsm.state(), ClientInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn client_non_invite_happy_path() {
        let mut fsm = ClientNonInviteFsm::new(udp_timers());
        let actions = fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
        assert!(actions.iter().any(|a| matches!(a, ClientAction::Transmit(_))));

        let actions = fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(100)));
        assert_eq!(fsm.state(), ClientNonInviteState::Proceeding);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::Deliver(_))));

        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));
        assert_eq!(fsm.state(), ClientNonInviteState::Completed);
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::K, duration } if *duration == Duration::from_secs(5)
        )));

        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::K));
        assert_eq!(fsm.state(), ClientNonInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn client_non_invite_timer_e_flat_t2_while_proceeding() {
        let mut fsm = ClientNonInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
        fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(100)));

        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::E));
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule { timer: TransactionTimer::E, duration } if *duration == Duration::from_secs(4)
        )));
    }

    #[test]
    fn client_non_invite_duplicate_final_absorbed() {
        let mut fsm = ClientNonInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
        fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));
        assert_eq!(fsm.state(), ClientNonInviteState::Completed);

        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));
        assert!(actions.is_empty());
    }

    #[test]
    fn client_non_invite_timer_f_times_out() {
        let mut fsm = ClientNonInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::F));

        assert_eq!(fsm.state(), ClientNonInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TimedOut))));
    }

    #[test]
    fn client_non_invite_reliable_final_terminates_immediately() {
        let mut fsm = ClientNonInviteFsm::new(tcp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));

        assert_eq!(fsm.state(), ClientNonInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::Completed))));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, ClientAction::Schedule { timer: TransactionTimer::K, .. })));
    }

    #[test]
    fn server_invite_final_arms_g_and_h() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        let actions = fsm.on_event(ServerEvent::SendFinal(sample_response(486)));

        assert_eq!(fsm.state(), ServerInviteState::Completed);
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Schedule { timer: TransactionTimer::G, .. })));
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Schedule { timer: TransactionTimer::H, .. })));
    }

    #[test]
    fn server_invite_timer_g_doubles_capped_at_t2() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        fsm.on_event(ServerEvent::SendFinal(sample_response(486)));

        let mut intervals = Vec::new();
        for _ in 0..4 {
            let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::G));
            assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));
            let scheduled = actions.iter().find_map(|a| match a {
                ServerAction::Schedule {
                    timer: TransactionTimer::G,
                    duration,
                } => Some(*duration),
                _ => None,
            });
            intervals.push(scheduled.expect("Timer G rescheduled"));
        }

        assert_eq!(
            intervals,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[test]
    fn server_invite_ack_confirms_then_timer_i_terminates() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        fsm.on_event(ServerEvent::SendFinal(sample_response(486)));

        let actions = fsm.on_event(ServerEvent::ReceiveAck);
        assert_eq!(fsm.state(), ServerInviteState::Confirmed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::CancelTimer(TransactionTimer::G))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Schedule { timer: TransactionTimer::I, .. })));

        // Duplicate ACK is absorbed.
        assert!(fsm.on_event(ServerEvent::ReceiveAck).is_empty());

        let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::I));
        assert_eq!(fsm.state(), ServerInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn server_invite_timer_h_times_out_without_ack() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        fsm.on_event(ServerEvent::SendFinal(sample_response(486)));
        let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::H));

        assert_eq!(fsm.state(), ServerInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::TimedOut))));
    }

    #[test]
    fn server_invite_2xx_terminates_without_timer_g() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        let actions = fsm.on_event(ServerEvent::SendFinal(sample_response(200)));

        assert_eq!(fsm.state(), ServerInviteState::Terminated);
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, ServerAction::Schedule { timer: TransactionTimer::G, .. })));
    }

    #[test]
    fn server_invite_replays_response_on_retransmit() {
        let mut fsm = ServerInviteFsm::new(udp_timers());
        assert!(fsm.on_retransmit().is_empty());

        fsm.on_event(ServerEvent::SendProvisional(sample_response(180)));
        let actions = fsm.on_retransmit();
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));

        fsm.on_event(ServerEvent::SendFinal(sample_response(486)));
        let actions = fsm.on_retransmit();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn server_non_invite_flow() {
        let mut fsm = ServerNonInviteFsm::new(udp_timers());
        assert_eq!(fsm.state(), ServerNonInviteState::Trying);
        // Retransmission before any response is silently absorbed.
        assert!(fsm.on_retransmit().is_empty());

        let actions = fsm.on_event(ServerEvent::SendProvisional(sample_response(100)));
        assert_eq!(fsm.state(), ServerNonInviteState::Proceeding);
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));

        let actions = fsm.on_event(ServerEvent::SendFinal(sample_response(200)));
        assert_eq!(fsm.state(), ServerNonInviteState::Completed);
        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Schedule { timer: TransactionTimer::J, duration } if *duration == Duration::from_secs(32)
        )));

        // Duplicate request replays the stored final.
        let actions = fsm.on_retransmit();
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Transmit(_))));

        let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::J));
        assert_eq!(fsm.state(), ServerNonInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn server_non_invite_reliable_final_terminates_immediately() {
        let mut fsm = ServerNonInviteFsm::new(tcp_timers());
        let actions = fsm.on_event(ServerEvent::SendFinal(sample_response(200)));

        assert_eq!(fsm.state(), ServerNonInviteState::Terminated);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::Completed))));
    }

    #[test]
    fn transport_error_terminates_every_machine() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::TransportError);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TransportFailed))));
        // Absorbing afterwards.
        assert!(fsm.on_event(ClientEvent::TransportError).is_empty());

        let mut fsm = ServerNonInviteFsm::new(udp_timers());
        let actions = fsm.on_event(ServerEvent::TransportError);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::TransportFailed))));
    }

    #[test]
    fn machine_wrappers_pick_variant_by_method() {
        let client = ClientMachine::for_method(&Method::Invite, udp_timers());
        assert!(matches!(client, ClientMachine::Invite(_)));
        assert!(client.cancellable());

        let client = ClientMachine::for_method(&Method::Options, udp_timers());
        assert!(matches!(client, ClientMachine::NonInvite(_)));
        assert!(!client.cancellable());

        let server = ServerMachine::for_method(&Method::Invite, udp_timers());
        assert!(matches!(server, ServerMachine::Invite(_)));
        assert!(server.can_send_final());
    }

    #[test]
    fn cancellable_window_closes_on_final() {
        let mut fsm = ClientInviteFsm::new(udp_timers());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        fsm.on_event(ClientEvent::ReceiveFinal(sample_response(486)));

        let machine = ClientMachine::Invite(fsm);
        assert!(!machine.cancellable());
    }
}

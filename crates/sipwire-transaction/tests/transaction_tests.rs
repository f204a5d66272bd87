// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State-machine level tests against the public FSM API.

use std::time::Duration;

use bytes::Bytes;
use sipwire_core::{Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
use sipwire_transaction::{
    ClientAction, ClientEvent, ClientInviteFsm, ClientInviteState, ClientNonInviteFsm,
    ClientNonInviteState, ServerAction, ServerEvent, ServerInviteFsm, ServerInviteState,
    ServerNonInviteFsm, ServerNonInviteState, TerminationCause, TransactionTimer, Transport,
    TransportAwareTimers,
};
use smol_str::SmolStr;

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
        StatusLine::new(code, SmolStr::new("Reason")).expect("valid status line"),
        Headers::new(),
        Bytes::new(),
    )
    .expect("valid response")
}

fn udp() -> TransportAwareTimers {
    TransportAwareTimers::new(Transport::Udp)
}

// ==========================
// Client INVITE
// ==========================

#[test]
fn client_invite_retransmission_series_doubles_to_t2() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));

    // 500, 1000, 2000, 4000, 4000, ... per RFC defaults with T2 = 4s.
    let mut observed = vec![Duration::from_millis(500)];
    for _ in 0..5 {
        let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::A));
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, ClientAction::Transmit(_))),
            "Timer A must retransmit the INVITE"
        );
        let next = actions
            .iter()
            .find_map(|a| match a {
                ClientAction::Schedule {
                    timer: TransactionTimer::A,
                    duration,
                } => Some(*duration),
                _ => None,
            })
            .expect("Timer A rescheduled");
        observed.push(next);
    }

    assert_eq!(
        observed,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(4000),
            Duration::from_millis(4000),
        ]
    );
}

#[test]
fn client_invite_states_are_monotonic() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
    assert_eq!(fsm.state(), ClientInviteState::Calling);

    fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(180)));
    assert_eq!(fsm.state(), ClientInviteState::Proceeding);

    // A later provisional does not fall back to Calling.
    fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(183)));
    assert_eq!(fsm.state(), ClientInviteState::Proceeding);

    fsm.on_event(ClientEvent::ReceiveFinal(sample_response(486)));
    assert_eq!(fsm.state(), ClientInviteState::Completed);

    // A provisional after the final is ignored in Completed.
    let actions = fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(180)));
    assert!(actions.is_empty());
    assert_eq!(fsm.state(), ClientInviteState::Completed);

    fsm.on_event(ClientEvent::TimerFired(TransactionTimer::D));
    assert_eq!(fsm.state(), ClientInviteState::Terminated);
}

#[test]
fn client_invite_terminated_is_absorbing() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
    let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::B));
    assert!(actions
        .iter()
        .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TimedOut))));

    for event in [
        ClientEvent::ReceiveProvisional(sample_response(180)),
        ClientEvent::ReceiveFinal(sample_response(200)),
        ClientEvent::TimerFired(TransactionTimer::A),
        ClientEvent::TimerFired(TransactionTimer::B),
        ClientEvent::TransportError,
    ] {
        assert!(
            fsm.on_event(event).is_empty(),
            "Terminated must absorb every further event"
        );
    }
    assert_eq!(fsm.state(), ClientInviteState::Terminated);
}

#[test]
fn client_invite_every_non_2xx_class_is_acked() {
    for code in [300, 404, 503, 603] {
        let mut fsm = ClientInviteFsm::new(udp());
        fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Invite)));
        let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(code)));

        assert_eq!(
            fsm.state(),
            ClientInviteState::Completed,
            "code {code} must move to Completed"
        );
        assert!(
            actions.iter().any(|a| matches!(a, ClientAction::SendAck(_))),
            "code {code} must be ACKed automatically"
        );
        assert!(
            actions.iter().any(|a| matches!(
                a,
                ClientAction::Schedule {
                    timer: TransactionTimer::D,
                    ..
                }
            )),
            "code {code} must arm Timer D"
        );
    }
}

// ==========================
// Client non-INVITE
// ==========================

#[test]
fn client_non_invite_retransmission_on_timer_e() {
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));

    let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::E));
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, ClientAction::Transmit(_))),
        "Timer E should trigger retransmission"
    );
    assert!(
        actions.iter().any(|a| matches!(
            a,
            ClientAction::Schedule {
                timer: TransactionTimer::E,
                duration
            } if *duration == Duration::from_millis(1000)
        )),
        "Timer E should be rescheduled doubled"
    );
}

#[test]
fn client_non_invite_duplicate_final_response_ignored() {
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
    fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));
    assert_eq!(fsm.state(), ClientNonInviteState::Completed);

    let actions = fsm.on_event(ClientEvent::ReceiveFinal(sample_response(200)));
    assert!(
        actions.is_empty(),
        "duplicate final responses must not be delivered again"
    );
}

#[test]
fn client_non_invite_timer_f_timeout() {
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));

    let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::F));
    assert_eq!(fsm.state(), ClientNonInviteState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TimedOut))));
}

#[test]
fn client_non_invite_timeout_still_governed_by_f_while_proceeding() {
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientEvent::SendRequest(sample_request(Method::Options)));
    fsm.on_event(ClientEvent::ReceiveProvisional(sample_response(100)));
    assert_eq!(fsm.state(), ClientNonInviteState::Proceeding);

    // The provisional did not cancel the absolute timeout.
    let actions = fsm.on_event(ClientEvent::TimerFired(TransactionTimer::F));
    assert_eq!(fsm.state(), ClientNonInviteState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ClientAction::Terminate(TerminationCause::TimedOut))));
}

// ==========================
// Server INVITE
// ==========================

#[test]
fn server_invite_full_lifecycle_with_ack() {
    let mut fsm = ServerInviteFsm::new(udp());
    assert_eq!(fsm.state(), ServerInviteState::Proceeding);

    fsm.on_event(ServerEvent::SendProvisional(sample_response(180)));
    assert_eq!(fsm.state(), ServerInviteState::Proceeding);

    let actions = fsm.on_event(ServerEvent::SendFinal(sample_response(486)));
    assert_eq!(fsm.state(), ServerInviteState::Completed);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::Schedule { timer: TransactionTimer::G, .. })));

    let actions = fsm.on_event(ServerEvent::ReceiveAck);
    assert_eq!(fsm.state(), ServerInviteState::Confirmed);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::CancelTimer(TransactionTimer::H))));

    let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::I));
    assert_eq!(fsm.state(), ServerInviteState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::Completed))));
}

#[test]
fn server_invite_timer_g_retransmits_final() {
    let mut fsm = ServerInviteFsm::new(udp());
    fsm.on_event(ServerEvent::SendFinal(sample_response(486)));

    let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::G));
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::Transmit(_))));
    assert!(actions.iter().any(|a| matches!(
        a,
        ServerAction::Schedule {
            timer: TransactionTimer::G,
            duration
        } if *duration == Duration::from_millis(1000)
    )));
}

#[test]
fn server_invite_timer_h_without_ack_times_out() {
    let mut fsm = ServerInviteFsm::new(udp());
    fsm.on_event(ServerEvent::SendFinal(sample_response(486)));

    let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::H));
    assert_eq!(fsm.state(), ServerInviteState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::TimedOut))));
}

#[test]
fn server_invite_replays_last_response_verbatim() {
    let mut fsm = ServerInviteFsm::new(udp());
    let busy = sample_response(486);
    fsm.on_event(ServerEvent::SendFinal(busy.clone()));

    let actions = fsm.on_retransmit();
    assert_eq!(actions, vec![ServerAction::Transmit(busy)]);
}

// ==========================
// Server non-INVITE
// ==========================

#[test]
fn server_non_invite_absorbs_retransmission_before_any_response() {
    let fsm = ServerNonInviteFsm::new(udp());
    assert_eq!(fsm.state(), ServerNonInviteState::Trying);
    assert!(
        fsm.on_retransmit().is_empty(),
        "nothing to replay while Trying"
    );
}

#[test]
fn server_non_invite_replays_final_on_retransmission() {
    let mut fsm = ServerNonInviteFsm::new(udp());
    let ok = sample_response(200);
    fsm.on_event(ServerEvent::SendFinal(ok.clone()));
    assert_eq!(fsm.state(), ServerNonInviteState::Completed);

    assert_eq!(fsm.on_retransmit(), vec![ServerAction::Transmit(ok)]);
}

#[test]
fn server_non_invite_timer_j_terminates() {
    let mut fsm = ServerNonInviteFsm::new(udp());
    fsm.on_event(ServerEvent::SendFinal(sample_response(200)));

    let actions = fsm.on_event(ServerEvent::TimerFired(TransactionTimer::J));
    assert_eq!(fsm.state(), ServerNonInviteState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ServerAction::Terminate(TerminationCause::Completed))));
}

// sipwire - The Sipwire SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Prints the RFC 3261 Table 4 timer values per transport class.
//!
//! Run with: `cargo run -p sipwire-transaction --example timer_behavior`

use sipwire_transaction::{TransactionTimer, Transport, TransportAwareTimers};

fn main() {
    let kinds = [
        TransactionTimer::A,
        TransactionTimer::B,
        TransactionTimer::D,
        TransactionTimer::E,
        TransactionTimer::F,
        TransactionTimer::G,
        TransactionTimer::H,
        TransactionTimer::I,
        TransactionTimer::J,
        TransactionTimer::K,
    ];

    for transport in [Transport::Udp, Transport::Tcp, Transport::Tls] {
        let timers = TransportAwareTimers::new(transport);
        println!(
            "{:?} (reliable: {}, retransmits: {})",
            transport,
            transport.is_reliable(),
            timers.should_retransmit()
        );
        for kind in kinds {
            println!("  Timer {:?}: {:?}", kind, timers.duration(kind));
        }
        println!();
    }
}

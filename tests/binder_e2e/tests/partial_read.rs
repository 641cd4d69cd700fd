// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Buffer-exhaustion handling: undelivered messages re-queue at the head and
//! arrive unchanged on the next, larger read.

use std::sync::Arc;

use binder_e2e::{bc_reply, bc_transaction, creds, run, run_with_capacity, BrRecord};
use nexus_binder::defs::TF_ONE_WAY;
use nexus_binder::{Device, Process};

fn bootstrap() -> (Device, Arc<Process>, Arc<Process>) {
    let device = Device::new();
    let server = device.open(1, true);
    device.set_context_manager(&server, 0).expect("first bind succeeds");
    let client = device.open(2, true);
    (device, server, client)
}

#[test]
fn undersized_read_requeues_and_redelivers_identically() {
    let (device, server, client) = bootstrap();
    let a = creds(1, 0);
    let b = creds(2, 0);
    let payload: Vec<u8> = (0..64).collect();

    let records = run(&device, &client, a, &bc_transaction((0, 0), 3, 0, &payload, &[]));
    assert_eq!(records, [BrRecord::TransactionComplete]);

    // Too small for the message: zero bytes of progress, message kept.
    let records = run_with_capacity(&device, &server, b, &[], 8).expect("read");
    assert!(records.is_empty());

    let records = run(&device, &server, b, &[]);
    match records.as_slice() {
        [BrRecord::Transaction(t)] => {
            assert_eq!(t.data, payload, "redelivery is byte-identical");
            assert_eq!(t.header.code, 3);
        }
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    }

    // The reply outgrows the request buffer, forcing the reallocation path.
    let big_reply = vec![0x5Au8; 128];
    let records = run(&device, &server, b, &bc_reply(3, 0, &big_reply, &[]));
    assert_eq!(records, [BrRecord::TransactionComplete]);
    let records = run(&device, &client, a, &[]);
    match records.as_slice() {
        [BrRecord::Reply(t)] => assert_eq!(t.data, big_reply),
        other => panic!("expected one BR_REPLY, got {other:?}"),
    }
}

#[test]
fn partially_filled_read_keeps_queue_order() {
    let (device, server, client) = bootstrap();
    let a = creds(1, 0);
    let b = creds(2, 0);

    for data in [b"aaaa", b"bbbb"] {
        let records =
            run(&device, &client, a, &bc_transaction((0, 0), 1, TF_ONE_WAY, data, &[]));
        assert_eq!(records, [BrRecord::TransactionComplete]);
    }

    // Room for one record (48 bytes) but not two: the second message goes
    // back to the head of the queue.
    let records = run_with_capacity(&device, &server, b, &[], 95).expect("read");
    match records.as_slice() {
        [BrRecord::Transaction(t)] => assert_eq!(t.data, b"aaaa"),
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    }

    let records = run(&device, &server, b, &[]);
    match records.as_slice() {
        [BrRecord::Transaction(t)] => assert_eq!(t.data, b"bbbb"),
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    }
}

// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Embedded-descriptor translation across process boundaries: export,
//! reference materialisation, and cookie restoration on the way home.

use std::sync::Arc;

use binder_e2e::{bc_reply, bc_transaction, creds, run, BrRecord};
use nexus_binder::defs::{FlatObject, FLAT_OBJECT_SIZE, TAG_BINDER, TAG_HANDLE};
use nexus_binder::{Device, Process};

const EXPORT_KEY: u64 = 0xA;
const EXPORT_COOKIE: u64 = 0xC0FFEE;

fn bootstrap() -> (Device, Arc<Process>, Arc<Process>) {
    let device = Device::new();
    let manager = device.open(1, true);
    device.set_context_manager(&manager, 0).expect("first bind succeeds");
    let client = device.open(2, true);
    (device, manager, client)
}

fn export_payload() -> Vec<u8> {
    let mut payload = vec![0u8; FLAT_OBJECT_SIZE];
    FlatObject { tag: TAG_BINDER, flags: 0, binder: EXPORT_KEY, cookie: EXPORT_COOKIE }
        .encode(&mut payload, 0);
    payload
}

#[test]
fn exported_object_round_trips_unchanged() {
    let (device, manager, client) = bootstrap();
    let a = creds(1, 0);
    let b = creds(2, 0);

    // The client exports an object inside a transaction to the manager.
    let records =
        run(&device, &client, a, &bc_transaction((0, 0), 1, 0, &export_payload(), &[0]));
    assert_eq!(records, [BrRecord::TransactionComplete]);

    let records = run(&device, &manager, b, &[]);
    let request = match records.as_slice() {
        [BrRecord::Transaction(t)] => t,
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    };
    assert_eq!(request.offsets, [0]);
    let handle = FlatObject::decode(&request.data, 0).expect("descriptor in payload");
    assert_eq!(handle.tag, TAG_HANDLE, "export arrives as a handle");
    assert_eq!(handle.binder, EXPORT_KEY);
    let client_owner = handle.cookie;
    assert_ne!(client_owner, 0, "owner id is smuggled through the cookie");

    // The manager hands the same handle back inside its reply.
    let records = run(&device, &manager, b, &bc_reply(1, 0, &request.data, &request.offsets));
    assert_eq!(records, [BrRecord::TransactionComplete]);

    let records = run(&device, &client, a, &[]);
    let reply = match records.as_slice() {
        [BrRecord::Reply(t)] => t,
        other => panic!("expected one BR_REPLY, got {other:?}"),
    };
    let restored = FlatObject::decode(&reply.data, 0).expect("descriptor in payload");
    assert_eq!(restored.tag, TAG_BINDER, "tag reverts at the exporter");
    assert_eq!(restored.binder, EXPORT_KEY);
    assert_eq!(restored.cookie, EXPORT_COOKIE, "export cookie is restored");
}

#[test]
fn materialised_reference_is_directly_addressable() {
    let (device, manager, client) = bootstrap();
    let a = creds(1, 0);
    let b = creds(2, 0);

    run(&device, &client, a, &bc_transaction((0, 0), 1, 0, &export_payload(), &[0]));
    let records = run(&device, &manager, b, &[]);
    let request = match records.as_slice() {
        [BrRecord::Transaction(t)] => t,
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    };
    let handle = FlatObject::decode(&request.data, 0).expect("descriptor in payload");

    // The reference entry persists in the manager's registry, so the manager
    // can now target the client's object without any further handshake.
    let records = run(
        &device,
        &manager,
        b,
        &bc_transaction((handle.cookie, handle.binder), 2, 0, b"direct", &[]),
    );
    assert_eq!(records, [BrRecord::TransactionComplete]);

    // Thread 1 still awaits its own reply, so a second client worker picks
    // the inbound request up from the process-wide queue.
    let records = run(&device, &client, creds(3, 0), &[]);
    match records.as_slice() {
        [BrRecord::Transaction(t)] => {
            assert_eq!(t.data, b"direct");
            assert_eq!(t.header.target_key, EXPORT_KEY);
            assert_eq!(t.header.sender_pid, 1);
        }
        other => panic!("expected one BR_TRANSACTION, got {other:?}"),
    }
}

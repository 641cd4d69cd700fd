// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thread-pool signalling and the looper state machine.

use std::sync::Arc;

use binder_e2e::{bc_looper, bc_transaction, creds, run, run_with_capacity, BrRecord};
use nexus_binder::defs::{
    BC_ENTER_LOOPER, BC_EXIT_LOOPER, BC_REGISTER_LOOPER, TF_ONE_WAY,
};
use nexus_binder::{Device, Process};

fn bootstrap() -> (Device, Arc<Process>, Arc<Process>) {
    let device = Device::new();
    let server = device.open(1, true);
    device.set_context_manager(&server, 0).expect("first bind succeeds");
    let client = device.open(2, true);
    (device, server, client)
}

fn queue_one_way_jobs(device: &Device, client: &Arc<Process>, count: usize) {
    for _ in 0..count {
        let records =
            run(device, client, creds(1, 0), &bc_transaction((0, 0), 1, TF_ONE_WAY, b"job", &[]));
        assert_eq!(records, [BrRecord::TransactionComplete]);
    }
}

#[test]
fn spawn_is_signalled_once_while_work_backs_up() {
    let (device, server, client) = bootstrap();
    device.set_max_threads(&server, 4);

    // One active looper.
    assert!(run(&device, &server, creds(10, 0), &bc_looper(BC_ENTER_LOOPER)).is_empty());
    queue_one_way_jobs(&device, &client, 2);

    // A fresh worker with room for the probe plus one message: the spawn
    // request precedes the first delivery.
    let capacity = 4 + (4 + 40 + 3);
    let records =
        run_with_capacity(&device, &server, creds(11, 0), &[], capacity).expect("read");
    assert!(
        matches!(records.as_slice(), [BrRecord::SpawnLooper, BrRecord::Transaction(_)]),
        "got {records:?}"
    );

    // Depth dropped to one: no second spawn request.
    let records = run(&device, &server, creds(12, 0), &[]);
    assert!(matches!(records.as_slice(), [BrRecord::Transaction(_)]), "got {records:?}");

    // The spawned worker announces itself and frees the pending slot.
    assert!(run(&device, &server, creds(13, 0), &bc_looper(BC_REGISTER_LOOPER)).is_empty());
}

#[test]
fn spawn_respects_the_pool_budget() {
    let (device, server, client) = bootstrap();
    device.set_max_threads(&server, 1);

    assert!(run(&device, &server, creds(10, 0), &bc_looper(BC_ENTER_LOOPER)).is_empty());
    queue_one_way_jobs(&device, &client, 2);

    // Backlog exists, but the single budgeted looper is already running.
    let records = run(&device, &server, creds(11, 0), &[]);
    assert!(
        matches!(records.as_slice(), [BrRecord::Transaction(_), BrRecord::Transaction(_)]),
        "got {records:?}"
    );
}

#[test]
fn thread_exit_redirects_serviced_requests_and_frees_its_slot() {
    let (device, server, client) = bootstrap();
    device.set_max_threads(&server, 1);
    let caller = creds(1, 0);

    assert!(run(&device, &server, creds(10, 0), &bc_looper(BC_ENTER_LOOPER)).is_empty());

    // The looper picks up a synchronous call and now owes it a reply.
    let records = run(&device, &client, caller, &bc_transaction((0, 0), 4, 0, b"call", &[]));
    assert_eq!(records, [BrRecord::TransactionComplete]);
    let records = run(&device, &server, creds(10, 0), &[]);
    assert!(matches!(records.as_slice(), [BrRecord::Transaction(_)]), "got {records:?}");

    // With the single budgeted looper active, backlog cannot trigger a spawn.
    queue_one_way_jobs(&device, &client, 2);
    let records = run(&device, &server, creds(11, 0), &[]);
    assert!(
        matches!(records.as_slice(), [BrRecord::Transaction(_), BrRecord::Transaction(_)]),
        "got {records:?}"
    );

    assert!(device.thread_exit(&server, 10).is_ok());

    // The stranded caller gets a synthetic death notice instead of hanging.
    let records = run(&device, &client, caller, &[]);
    assert_eq!(records, [BrRecord::DeadBinder]);
    assert!(run(&device, &client, caller, &[]).is_empty());

    // The exited looper's slot is back in the budget: backlog now spawns.
    queue_one_way_jobs(&device, &client, 2);
    let records = run(&device, &server, creds(12, 0), &[]);
    assert!(
        matches!(
            records.as_slice(),
            [BrRecord::SpawnLooper, BrRecord::Transaction(_), BrRecord::Transaction(_)]
        ),
        "got {records:?}"
    );
}

#[test]
fn looper_transitions_reject_protocol_violations() {
    let (device, server, _client) = bootstrap();
    let worker = creds(10, 0);

    assert!(run(&device, &server, worker, &bc_looper(BC_ENTER_LOOPER)).is_empty());
    // Entering twice, or registering while active, is refused.
    assert_eq!(
        run(&device, &server, worker, &bc_looper(BC_ENTER_LOOPER)),
        [BrRecord::FailedReply]
    );
    assert_eq!(
        run(&device, &server, worker, &bc_looper(BC_REGISTER_LOOPER)),
        [BrRecord::FailedReply]
    );

    assert!(run(&device, &server, worker, &bc_looper(BC_EXIT_LOOPER)).is_empty());
    assert_eq!(
        run(&device, &server, worker, &bc_looper(BC_EXIT_LOOPER)),
        [BrRecord::FailedReply]
    );

    // A worker that never entered cannot exit either.
    assert_eq!(
        run(&device, &server, creds(11, 0), &bc_looper(BC_EXIT_LOOPER)),
        [BrRecord::FailedReply]
    );

    // Announcing the same spawned worker twice is refused.
    assert!(run(&device, &server, creds(12, 0), &bc_looper(BC_REGISTER_LOOPER)).is_empty());
    assert_eq!(
        run(&device, &server, creds(12, 0), &bc_looper(BC_REGISTER_LOOPER)),
        [BrRecord::FailedReply]
    );
}

//! End-to-end scenario: four replicas, `f=1`, a single client command
//! committed through the three-chain rule with no faults and no view
//! changes.

mod common;

use consensus::crypto::hash::Hash;
use consensus::crypto::scheme::SchemeKind;
use consensus::ingress::Finality;
use std::time::Duration;
use tokio::sync::oneshot;

/// R0 proposes B1 over genesis carrying cmd 0xAA. R1..R3 vote, R0's QC1
/// seals at the root and R0 keeps beating out empty follow-up blocks as
/// each prior QC lands, every one carrying the previous QC forward. Once
/// the block carrying QC3 delivers, the three-chain rooted at B1 is
/// complete and every replica commits it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_replicas_commit_a_single_command() {
    let replicas = common::cluster(4, SchemeKind::Dummy, 4, 3);
    let handles = common::spawn_all(replicas);

    let (tx, rx) = oneshot::channel();
    let cmd_hash = Hash::new([0xAA; 32]);
    handles[0].submit(
        cmd_hash,
        vec![0xAA],
        Box::new(move |finality| {
            let _ = tx.send(finality);
        }),
    );

    let finality = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("command decided before timeout")
        .expect("decision callback fired exactly once");
    assert_eq!(finality, Finality::Decided { height: 1, idx: 0 });
}

/// A client submitting to a non-leader gets an immediate `NotLeader` nudge
/// rather than being silently swallowed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_leader_acknowledges_not_leader_immediately() {
    let replicas = common::cluster(4, SchemeKind::Dummy, 4, 3);
    let handles = common::spawn_all(replicas);

    let (tx, rx) = oneshot::channel();
    handles[1].submit(
        Hash::new([0x01; 32]),
        vec![0x01],
        Box::new(move |finality| {
            let _ = tx.send(finality);
        }),
    );

    let finality = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("not-leader ack arrives promptly")
        .unwrap();
    assert_eq!(finality, Finality::NotLeader);
}

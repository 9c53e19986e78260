//! End-to-end scenario: the vote-aggregation tree under BLS. Seven replicas,
//! `f=2`, fanout 2 — `R0 -> {R1, R2}`, `R1 -> {R3, R4}`, `R2 -> {R5, R6}`
//! (see `tree::tests::seven_replicas_fanout_two_matches_scenario_2` for the
//! topology in isolation). `R1` and `R2` each aggregate themselves plus
//! their two children into a 3-signer partial QC and relay just that one
//! aggregate upward; `R0` folds its own vote plus both relays (1 + 3 + 3)
//! past `nmajority = 5` without ever seeing a raw vote from a leaf.

mod common;

use consensus::crypto::hash::Hash;
use consensus::crypto::scheme::SchemeKind;
use consensus::ingress::Finality;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn seven_replicas_commit_through_relayed_aggregates() {
    let replicas = common::cluster(7, SchemeKind::Bls, 2, 3);
    let handles = common::spawn_all(replicas);

    let (tx, rx) = oneshot::channel();
    let cmd_hash = Hash::new([0x42; 32]);
    handles[0].submit(
        cmd_hash,
        vec![0x42],
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

use consensus::config::{PeerInfo, ReplicaConfig};
use consensus::consensus::ConsensusCore;
use consensus::crypto::hash::Hash;
use consensus::crypto::scheme::{Keypair, PartialCert, QuorumCert, SchemeKind};
use consensus::tree::TreeTopology;
use consensus::Block;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn core(n: u16, scheme: SchemeKind) -> ConsensusCore {
    let peers: Vec<_> = (0..n)
        .map(|i| PeerInfo {
            id: i,
            address: format!("127.0.0.1:{}", 9000 + i),
            public_key: Keypair::generate(i, scheme).public,
        })
        .collect();
    let keypair = Keypair::generate(0, scheme);
    let f = (n as usize - 1) / 3;
    let config = ReplicaConfig::new(peers, 0, keypair, scheme, f, 2, 2);
    ConsensusCore::new(config)
}

fn bench_three_chain_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("three_chain_commit");
    for &n in &[4u16, 7, 13] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut core = core(n, SchemeKind::Dummy);
                let mut parent = core.genesis();
                let mut parent_height = 0u64;
                let mut qc: Option<QuorumCert> = None;
                for _ in 0..8 {
                    let wire_qc = qc.take().map(|mut q| {
                        q.compute().unwrap();
                        consensus::block::qc_to_wire(&q)
                    });
                    let block =
                        Block::new(vec![parent], parent_height + 1, vec![], wire_qc, vec![]).unwrap();
                    let outcome = core.on_receive_proposal(block.clone()).unwrap();
                    black_box(&outcome.committed);
                    let mut sealed = QuorumCert::new(SchemeKind::Dummy, block.hash, n as usize);
                    for id in 0..n {
                        sealed
                            .add_part(PartialCert {
                                obj_hash: block.hash,
                                voter: id,
                                sig: consensus::crypto::scheme::PartialSig::Dummy,
                            })
                            .unwrap();
                    }
                    parent = block.hash;
                    parent_height = block.height;
                    qc = Some(sealed);
                }
            });
        });
    }
    group.finish();
}

fn bench_vote_aggregation_tree_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_construction");
    for &n in &[7u16, 31, 127] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let ids: Vec<_> = (0..n).collect();
                let tree = TreeTopology::new(ids.clone(), ids, 2);
                black_box(tree.root());
            });
        });
    }
    group.finish();
}

fn bench_dummy_qc_fold(c: &mut Criterion) {
    c.bench_function("dummy_qc_fold_13_of_19", |b| {
        b.iter(|| {
            let hash = Hash::new([7u8; 32]);
            let mut qc = QuorumCert::new(SchemeKind::Dummy, hash, 19);
            for id in 0..13u16 {
                qc.add_part(PartialCert {
                    obj_hash: hash,
                    voter: id,
                    sig: consensus::crypto::scheme::PartialSig::Dummy,
                })
                .unwrap();
            }
            qc.compute().unwrap();
            black_box(qc);
        });
    });
}

criterion_group!(
    benches,
    bench_three_chain_commit,
    bench_vote_aggregation_tree_construction,
    bench_dummy_qc_fold
);
criterion_main!(benches);

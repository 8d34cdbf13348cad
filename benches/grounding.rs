//! Benchmarks for walk sampling and cyclic rule scoring.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use burl::config::ScoringConfig;
use burl::graph::{EntityId, RelationId, Triple, TripleSet};
use burl::rule::{Atom, Body, GroundingContext, Rule, RuleShape};
use burl::sampler::PathSampler;

/// 2000 entities, 4 relations, 20000 random edges.
fn synthetic_graph() -> TripleSet {
    let mut rng = StdRng::seed_from_u64(0);
    let mut ts = TripleSet::new();
    while ts.len() < 20_000 {
        let head = EntityId::from_raw(rng.gen_range(1..=2000));
        let tail = EntityId::from_raw(rng.gen_range(1..=2000));
        let relation = RelationId::from_raw(rng.gen_range(1..=4));
        if head != tail {
            ts.insert(Triple::new(head, relation, tail));
        }
    }
    ts
}

fn bench_sampling(c: &mut Criterion) {
    let ts = synthetic_graph();
    let sampler = PathSampler::new(&ts, None);
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("sample_acyclic_3", |bench| {
        bench.iter(|| black_box(sampler.sample(3, false, &mut rng)))
    });
    c.bench_function("sample_cyclic_3", |bench| {
        bench.iter(|| black_box(sampler.sample(3, true, &mut rng)))
    });
}

fn bench_cyclic_scoring(c: &mut Criterion) {
    let ts = synthetic_graph();
    let scoring = ScoringConfig::default();
    let ctx = GroundingContext::learning(&ts, &scoring);
    let a = EntityId::variable_for('A');
    let rule = Rule::new(
        Atom::new(EntityId::X, RelationId::from_raw(1), EntityId::Y),
        Body::new(vec![
            Atom::new(EntityId::X, RelationId::from_raw(2), a),
            Atom::new(a, RelationId::from_raw(3), EntityId::Y),
        ]),
        RuleShape::Cyclic,
    );
    let mut rng = StdRng::seed_from_u64(2);

    c.bench_function("score_cyclic_2", |bench| {
        bench.iter(|| {
            let mut rule = rule.clone();
            rule.compute_scores(&ctx, &mut rng);
            black_box(rule.stats())
        })
    });
}

criterion_group!(benches, bench_sampling, bench_cyclic_scoring);
criterion_main!(benches);

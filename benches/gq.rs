use criterion::{criterion_group, criterion_main, Criterion};

use openpubkey::gq;
use openpubkey::providers::mock::MockOp;

pub fn criterion_gq_benchmark(c: &mut Criterion) {
    let op = MockOp::new().unwrap();
    let id_token = op.issue_id_token(&op.default_claims()).unwrap();
    let public_key = op.public_key();

    c.bench_function("GQ: transform RS256 ID Token", |b| {
        b.iter(|| gq::sign_jwt(&public_key, &id_token, None).unwrap());
    });

    let gq_token = gq::sign_jwt(&public_key, &id_token, None).unwrap();
    c.bench_function("GQ: verify transformed token", |b| {
        b.iter(|| gq::verify_jwt(&public_key, &gq_token).unwrap());
    });
}

criterion_group!(benches, criterion_gq_benchmark);
criterion_main!(benches);

//! Codec benchmarks for lobby-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lobby_protocol::{codec, Identity, Roster, ServerEvent};

fn roster(size: u64) -> Roster {
    (0..size)
        .map(|n| {
            let identity = Identity::new(n, format!("user-{n}"))
                .with_attribute("avatar", format!("avatars/{n}.png"))
                .with_attribute("level", n % 50);
            (n.to_string(), identity)
        })
        .collect()
}

fn bench_decode_identify(c: &mut Criterion) {
    let frame = br#"{"userId": 123456}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("identify", |b| b.iter(|| codec::decode(black_box(frame))));
    group.finish();
}

fn bench_encode_roster(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [10u64, 100, 1000] {
        let event = ServerEvent::user_update(roster(size));
        group.bench_function(format!("user_update_{size}"), |b| {
            b.iter(|| codec::encode(black_box(&event)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode_identify, bench_encode_roster);
criterion_main!(benches);

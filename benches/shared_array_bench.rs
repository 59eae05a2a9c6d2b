use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shared_array::{make_array, Array, ArrayKey, HandleFactory, KeyRef, SharedConfig, Value};
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn counted() -> HandleFactory {
    HandleFactory::new(SharedConfig::new().use_uncounted(false))
}

fn string_keyed(seed: u64, n: usize) -> Array {
    Array::from_entries(
        lcg(seed)
            .take(n)
            .enumerate()
            .map(|(i, x)| (ArrayKey::from(key(x)), Value::Int(i as i64))),
    )
}

fn bench_make_hashed(c: &mut Criterion) {
    let arr = string_keyed(1, 10_000);
    let f = counted();
    c.bench_function("make_shared_hashed_10k", |b| {
        b.iter(|| black_box(f.make_shared(&arr, false, false).unwrap()))
    });
}

fn bench_make_packed(c: &mut Criterion) {
    let arr: Array = (0..10_000).map(Value::Int).collect();
    let f = counted();
    c.bench_function("make_shared_packed_10k", |b| {
        b.iter(|| black_box(f.make_shared(&arr, false, false).unwrap()))
    });
}

fn bench_make_uncounted(c: &mut Criterion) {
    let arr = string_keyed(3, 10_000);
    let f = HandleFactory::default();
    c.bench_function("make_shared_uncounted_10k", |b| {
        b.iter(|| black_box(f.make_shared(&arr, false, false).unwrap()))
    });
}

fn bench_index_of_hit(c: &mut Criterion) {
    c.bench_function("hashed_index_of_hit", |b| {
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        let arr = Array::from_entries(
            keys.iter()
                .enumerate()
                .map(|(i, k)| (ArrayKey::from(k.as_str()), Value::Int(i as i64))),
        );
        let (h, _) = counted().make_shared(&arr, false, false).unwrap();
        let t = h.as_shared_array().unwrap();
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(t.index_of(KeyRef::Str(k.as_str())).unwrap());
        })
    });
}

fn bench_index_of_miss(c: &mut Criterion) {
    c.bench_function("hashed_index_of_miss", |b| {
        let (h, _) = counted()
            .make_shared(&string_keyed(11, 10_000), false, false)
            .unwrap();
        let t = h.as_shared_array().unwrap();
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in the table
            let k = key(miss.next().unwrap());
            black_box(t.index_of(KeyRef::Str(&k)));
        })
    });
}

fn bench_materialize_read(c: &mut Criterion) {
    c.bench_function("materialize_and_read_1k", |b| {
        let (h, _) = counted()
            .make_shared(&string_keyed(13, 1_000), false, false)
            .unwrap();
        b.iter(|| {
            let v = make_array(&h).unwrap();
            let sum: i64 = v
                .as_array()
                .unwrap()
                .borrow()
                .iter()
                .filter_map(|(_, v)| v.as_int())
                .sum();
            black_box(sum);
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_make_hashed, bench_make_packed, bench_make_uncounted,
        bench_index_of_hit, bench_index_of_miss, bench_materialize_read
}
criterion_main!(benches);

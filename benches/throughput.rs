//! Criterion benchmarks for the hot-path pieces.
//!
//! Measures:
//! - Add then cancel (no match)
//! - Place with a full match
//! - SPSC push/pop pairs
//! - Gaussian price draws

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use market_sim::{channel, Arena, NormalBoxMuller, Order, OrderBook, Side, Xoroshiro128Plus};

fn bench_add_then_cancel(c: &mut Criterion) {
    let mut arena = Arena::new(65_536);
    let mut book = OrderBook::new("BENCH", 0.01);
    let mut id = 0u64;

    c.bench_function("book_add_then_cancel", |b| {
        b.iter(|| {
            id += 1;
            let o = Order {
                id,
                price: 90.0 + (id % 100) as f64 * 0.01,
                qty: 10,
                side: Side::Buy,
                ts_ns: id,
            };
            let fill = book.add_order(&mut arena, &o);
            black_box(fill);
            black_box(book.cancel_order(&mut arena, id));
        })
    });
}

fn bench_full_match(c: &mut Criterion) {
    let mut arena = Arena::new(65_536);
    let mut book = OrderBook::new("BENCH", 0.01);
    let mut id = 0u64;

    c.bench_function("book_full_match", |b| {
        b.iter(|| {
            let ask = Order {
                id: id + 1,
                price: 100.0,
                qty: 10,
                side: Side::Sell,
                ts_ns: id,
            };
            let bid = Order {
                id: id + 2,
                price: 100.0,
                qty: 10,
                side: Side::Buy,
                ts_ns: id,
            };
            id += 2;
            book.add_order(&mut arena, &ask);
            black_box(book.add_order(&mut arena, &bid));
        })
    });
}

fn bench_spsc_push_pop(c: &mut Criterion) {
    let (mut tx, mut rx) = channel::<u64, 1024>();
    let mut i = 0u64;

    c.bench_function("spsc_push_pop", |b| {
        b.iter(|| {
            i += 1;
            let _ = tx.try_push(black_box(i));
            black_box(rx.try_pop());
        })
    });
}

fn bench_price_draw(c: &mut Criterion) {
    let mut rng = Xoroshiro128Plus::new(42);
    let mut normal = NormalBoxMuller::new();

    c.bench_function("gaussian_price_draw", |b| {
        b.iter(|| black_box(normal.sample(&mut rng, 100.0, 0.1)))
    });
}

criterion_group!(
    benches,
    bench_add_then_cancel,
    bench_full_match,
    bench_spsc_push_pop,
    bench_price_draw
);
criterion_main!(benches);

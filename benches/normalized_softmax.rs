use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use proxima::{MetricLoss, NormalizedSoftmaxLoss, Shape, Tensor, Variable};

fn bench_normalized_softmax(c: &mut Criterion) {
    let loss_fn = NormalizedSoftmaxLoss::with_seed(0.05, 128, 512, 3).unwrap();
    let embeddings = Variable::constant(Tensor::randn_seeded(Shape::new([64, 128]), 9));
    let labels: Vec<usize> = (0..64).map(|i| i % 512).collect();

    c.bench_function("normalized_softmax_forward", |b| {
        b.iter(|| {
            let loss = loss_fn.forward(black_box(&embeddings), &labels, None).unwrap();
            black_box(loss.item())
        })
    });

    c.bench_function("normalized_softmax_forward_backward", |b| {
        b.iter(|| {
            loss_fn.zero_grad();
            let loss = loss_fn.forward(black_box(&embeddings), &labels, None).unwrap();
            loss.backward().unwrap();
            black_box(loss.item())
        })
    });
}

criterion_group!(benches, bench_normalized_softmax);
criterion_main!(benches);

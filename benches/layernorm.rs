//! Layer norm forward/backward throughput, sequential vs rayon backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layernorm_rs::{Backend, Dims3, LayerNorm, LayerNormConfig};

const SHAPES: &[(usize, usize, usize)] = &[(1, 64, 768), (8, 128, 768), (4, 512, 1024)];

fn inputs(dims: Dims3) -> (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>) {
    let x = (0..dims.numel()).map(|i| ((i % 97) as f32 - 48.0) / 16.0).collect();
    let w = (0..dims.channels).map(|i| 1.0 + (i % 7) as f32 * 0.01).collect();
    let b = vec![0.0; dims.channels];
    let dout = (0..dims.numel()).map(|i| ((i % 13) as f32 - 6.0) / 6.0).collect();
    (x, w, b, dout)
}

fn label(dims: Dims3) -> String {
    format!("{}x{}x{}", dims.batch, dims.seq_len, dims.channels)
}

fn bench_layernorm(c: &mut Criterion) {
    let mut group = c.benchmark_group("layernorm");

    for &(b, t, ch) in SHAPES {
        let dims = Dims3::new(b, t, ch);
        let (x, w, bias, dout) = inputs(dims);
        group.throughput(Throughput::Bytes((dims.numel() * std::mem::size_of::<f32>()) as u64));

        for backend in [Backend::Sequential, Backend::Parallel] {
            let config = LayerNormConfig::sequential().with_backend(backend);

            group.bench_with_input(
                BenchmarkId::new(format!("forward/{}", backend), label(dims)),
                &dims,
                |bench, &dims| {
                    bench.iter(|| LayerNorm::forward(black_box(&x), &w, &bias, dims, &config).unwrap())
                },
            );

            let (_, cache) = LayerNorm::forward(&x, &w, &bias, dims, &config).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("backward/{}", backend), label(dims)),
                &dims,
                |bench, _| bench.iter(|| LayerNorm::backward(black_box(&dout), &cache, &config).unwrap()),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_layernorm);
criterion_main!(benches);

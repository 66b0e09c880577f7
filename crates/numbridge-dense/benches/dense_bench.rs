use criterion::{Criterion, criterion_group, criterion_main};
use nalgebra::DMatrix;
use numbridge_dense::{ColMajor, FnExpr, RowMajor, SharedMatrix, evaluate};

fn bench_evaluate(c: &mut Criterion) {
    for &n in &[4, 16, 64] {
        let col = DMatrix::from_fn(n, n, |r, c| (r + c) as f64);
        c.bench_function(&format!("evaluate_colmajor_{n}x{n}"), |b| {
            b.iter(|| evaluate(&col));
        });
        let row = SharedMatrix::<RowMajor>::from_fn(n, n, |r, c| (r + c) as f64);
        c.bench_function(&format!("evaluate_rowmajor_{n}x{n}"), |b| {
            b.iter(|| evaluate(&row));
        });
        let lazy = FnExpr::new(n, n, |r, c| (r * c) as f64).row_major();
        c.bench_function(&format!("evaluate_lazy_rows_{n}x{n}"), |b| {
            b.iter(|| evaluate(&lazy));
        });
    }
}

fn bench_shared(c: &mut Criterion) {
    let base = SharedMatrix::<ColMajor>::zeros(64, 64);
    c.bench_function("shared_share_drop", |b| {
        b.iter(|| base.share());
    });
    c.bench_function("shared_cow_write_64x64", |b| {
        b.iter(|| {
            let mut copy = base.share();
            copy[(3, 3)] = 1.0;
            copy
        });
    });
}

criterion_group!(benches, bench_evaluate, bench_shared);
criterion_main!(benches);

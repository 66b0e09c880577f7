#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nalgebra::DMatrix;
use numbridge_dense::{RowMajor, SharedMatrix};
use numbridge_integrate::{DenseMatrixAdapter, VectorAdapter};

#[derive(Debug, Arbitrary)]
struct MatrixInput {
    rows: u8,
    cols: u8,
    row_major: bool,
    alias: bool,
    values: Vec<f64>,
    update: Vec<f64>,
}

fn fill(rows: usize, cols: usize, values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |r, c| {
        values.get(r * cols + c).copied().unwrap_or(0.0)
    })
}

fn same_bits(a: &DMatrix<f64>, b: &DMatrix<f64>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

fuzz_target!(|input: MatrixInput| {
    let rows = usize::from(input.rows % 12) + 1;
    let cols = usize::from(input.cols % 12) + 1;
    let mut source = fill(rows, cols, &input.values);
    let expected = source.clone();

    let mut adapter = if input.alias {
        DenseMatrixAdapter::alias(&mut source)
    } else if input.row_major {
        let shared = SharedMatrix::<RowMajor>::from_fn(rows, cols, |r, c| expected[(r, c)]);
        DenseMatrixAdapter::from_expr(&shared)
    } else {
        DenseMatrixAdapter::from_expr(&expected)
    };
    assert_eq!(adapter.shape(), (rows, cols));
    assert!(adapter.column_pointers_consistent());
    assert!(same_bits(&adapter.to_dmatrix(), &expected));

    let next = fill(rows, cols, &input.update);
    adapter.assign(&next).expect("shape matches");
    assert!(adapter.column_pointers_consistent());
    assert!(same_bits(&adapter.to_dmatrix(), &next));

    let wrong = DMatrix::<f64>::zeros(rows + 1, cols);
    assert!(adapter.assign(&wrong).is_err());

    if cols == 1 {
        let vector = VectorAdapter::from_expr(&next).expect("column vectors convert");
        assert_eq!(vector.len(), rows);
    }
});

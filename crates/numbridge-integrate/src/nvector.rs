//! Vector ABI adapter.
//!
//! Every vector handed to the native solver, and every vector the solver
//! clones from it, carries a pointer to one process-wide [`NVectorOps`]
//! table whose entries run nalgebra routines over views of the wrapped
//! buffer. The solver may pass the same vector as input and output to any
//! operation; each entry detects identical handles and works in place.
//! Partially overlapping buffers are never produced by the solver and are
//! not supported.

use std::ffi::{c_int, c_void};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use nalgebra::{DVectorView, DVectorViewMut};
use numbridge_dense::{DenseError, DenseExpr, ScopedBuffer, evaluate_vector};
use numbridge_native::{GenericVector, Index, NVector, NVectorOps, Real};

/// Identifier reported by `get_vector_id` for adapter vectors.
pub const NVECTOR_ID_NALGEBRA: c_int = 100;

/// Scratch elements kept inline by operations that need a temporary.
const OP_SCRATCH: usize = 16;

struct VectorContent {
    data: *mut Real,
    len: usize,
    owns_data: bool,
}

/// A Rust buffer presented to the native library as a vector handle.
///
/// [`borrowed`](Self::borrowed) aliases the caller's slice, so anything the
/// solver writes lands directly in it. [`owned`](Self::owned) and
/// [`from_expr`](Self::from_expr) hold their own copy.
pub struct VectorAdapter<'a> {
    raw: NonNull<GenericVector>,
    _borrow: PhantomData<&'a mut [f64]>,
}

impl<'a> VectorAdapter<'a> {
    /// Zero-copy: the handle's data pointer is `data.as_mut_ptr()`.
    #[must_use]
    pub fn borrowed(data: &'a mut [f64]) -> Self {
        Self::from_content(VectorContent {
            data: data.as_mut_ptr(),
            len: data.len(),
            owns_data: false,
        })
    }

    fn from_content(content: VectorContent) -> Self {
        let content = Box::into_raw(Box::new(content)).cast::<c_void>();
        let vector = Box::new(GenericVector {
            content,
            ops: ops_table(),
        });
        Self {
            raw: NonNull::from(Box::leak(vector)),
            _borrow: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> NVector {
        self.raw.as_ptr()
    }

    fn content(&self) -> &VectorContent {
        // SAFETY: the adapter created this content and frees it only on drop.
        unsafe { content_of(self.raw.as_ptr()) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.content().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the data belongs to a caller's slice.
    #[must_use]
    pub fn is_aliased(&self) -> bool {
        !self.content().owns_data
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const f64 {
        self.content().data
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        // SAFETY: no native call is running while `self` is borrowed.
        unsafe { slice_of(self.raw.as_ptr()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        // SAFETY: as above, and `&mut self` makes the access exclusive.
        unsafe { slice_mut_of(self.raw.as_ptr()) }
    }

    #[must_use]
    pub fn view(&self) -> DVectorView<'_, f64> {
        let data = self.as_slice();
        DVectorView::from_slice(data, data.len())
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.as_slice().to_vec()
    }
}

impl VectorAdapter<'static> {
    #[must_use]
    pub fn owned(data: Vec<f64>) -> Self {
        let len = data.len();
        let data = Box::into_raw(data.into_boxed_slice()).cast::<Real>();
        Self::from_content(VectorContent {
            data,
            len,
            owns_data: true,
        })
    }

    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self::owned(vec![0.0; len])
    }

    /// Evaluated copy of a row or column vector expression.
    pub fn from_expr(expr: &impl DenseExpr) -> Result<Self, DenseError> {
        evaluate_vector(expr).map(Self::owned)
    }
}

impl Drop for VectorAdapter<'_> {
    fn drop(&mut self) {
        // SAFETY: the handle was built by `from_content` and is released once.
        unsafe { destroy(self.raw.as_ptr()) };
    }
}

impl std::fmt::Debug for VectorAdapter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorAdapter")
            .field("len", &self.len())
            .field("aliased", &self.is_aliased())
            .field("data", &self.as_slice())
            .finish()
    }
}

static OPS: OnceLock<NVectorOps> = OnceLock::new();

/// The operation table shared by every adapter vector.
pub(crate) fn ops_table() -> &'static NVectorOps {
    OPS.get_or_init(|| {
        log::trace!("building the vector operation table");
        NVectorOps {
            get_vector_id,
            clone_empty,
            clone,
            destroy,
            space,
            get_array_pointer,
            set_array_pointer,
            linear_sum,
            constant,
            prod,
            div,
            scale,
            abs,
            inv,
            add_const,
            dot_prod,
            max_norm,
            wrms_norm,
            wrms_norm_mask,
            min,
            wl2_norm,
            l1_norm,
            compare,
            inv_test,
            constr_mask,
            min_quotient,
        }
    })
}

// ═══════════════════════════════════════════════════════════════════
// Content access
// ═══════════════════════════════════════════════════════════════════

unsafe fn content_of<'c>(v: NVector) -> &'c VectorContent {
    unsafe { &*(*v).content.cast::<VectorContent>() }
}

unsafe fn content_mut<'c>(v: NVector) -> &'c mut VectorContent {
    unsafe { &mut *(*v).content.cast::<VectorContent>() }
}

/// Elements of `v`. A data-less vector reads as empty.
pub(crate) unsafe fn slice_of<'s>(v: NVector) -> &'s [f64] {
    let c = unsafe { content_of(v) };
    if c.data.is_null() || c.len == 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(c.data, c.len) }
}

pub(crate) unsafe fn slice_mut_of<'s>(v: NVector) -> &'s mut [f64] {
    let c = unsafe { content_of(v) };
    if c.data.is_null() || c.len == 0 {
        return &mut [];
    }
    unsafe { std::slice::from_raw_parts_mut(c.data, c.len) }
}

unsafe fn view<'s>(v: NVector) -> DVectorView<'s, f64> {
    let data = unsafe { slice_of(v) };
    DVectorView::from_slice(data, data.len())
}

unsafe fn view_mut<'s>(v: NVector) -> DVectorViewMut<'s, f64> {
    let data = unsafe { slice_mut_of(v) };
    let len = data.len();
    DVectorViewMut::from_slice(data, len)
}

fn same(a: NVector, b: NVector) -> bool {
    ptr::eq(a, b)
}

/// z = f(x), elementwise, with `z` allowed to be `x`.
unsafe fn unary(x: NVector, z: NVector, f: impl Fn(f64) -> f64) {
    let mut zv = unsafe { view_mut(z) };
    if same(x, z) {
        zv.apply(|v| *v = f(*v));
    } else {
        zv.zip_apply(&unsafe { view(x) }, |zi, xi| *zi = f(xi));
    }
}

/// z = f(x, y), elementwise, with `z` allowed to be `x`, `y` or both.
unsafe fn binary(x: NVector, y: NVector, z: NVector, f: impl Fn(f64, f64) -> f64) {
    let mut zv = unsafe { view_mut(z) };
    match (same(x, z), same(y, z)) {
        (true, true) => zv.apply(|v| *v = f(*v, *v)),
        (true, false) => zv.zip_apply(&unsafe { view(y) }, |zi, yi| *zi = f(*zi, yi)),
        (false, true) => zv.zip_apply(&unsafe { view(x) }, |zi, xi| *zi = f(xi, *zi)),
        (false, false) => {
            zv.zip_zip_apply(&unsafe { view(x) }, &unsafe { view(y) }, |zi, xi, yi| {
                *zi = f(xi, yi);
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Table entries
// ═══════════════════════════════════════════════════════════════════

unsafe extern "C" fn get_vector_id(_v: NVector) -> c_int {
    NVECTOR_ID_NALGEBRA
}

unsafe extern "C" fn clone_empty(w: NVector) -> NVector {
    if w.is_null() {
        return ptr::null_mut();
    }
    let len = unsafe { content_of(w) }.len;
    let content = Box::into_raw(Box::new(VectorContent {
        data: ptr::null_mut(),
        len,
        owns_data: false,
    }));
    Box::into_raw(Box::new(GenericVector {
        content: content.cast(),
        ops: ops_table(),
    }))
}

unsafe extern "C" fn clone(w: NVector) -> NVector {
    if w.is_null() {
        return ptr::null_mut();
    }
    let len = unsafe { content_of(w) }.len;
    let data = Box::into_raw(vec![0.0; len].into_boxed_slice()).cast::<Real>();
    let content = Box::into_raw(Box::new(VectorContent {
        data,
        len,
        owns_data: true,
    }));
    Box::into_raw(Box::new(GenericVector {
        content: content.cast(),
        ops: ops_table(),
    }))
}

unsafe fn release_data(c: &mut VectorContent) {
    if c.owns_data && !c.data.is_null() {
        let slice = ptr::slice_from_raw_parts_mut(c.data, c.len);
        drop(unsafe { Box::from_raw(slice) });
    }
    c.data = ptr::null_mut();
    c.owns_data = false;
}

unsafe extern "C" fn destroy(v: NVector) {
    if v.is_null() {
        return;
    }
    let vector = unsafe { Box::from_raw(v) };
    let mut content = unsafe { Box::from_raw(vector.content.cast::<VectorContent>()) };
    unsafe { release_data(&mut content) };
}

unsafe extern "C" fn space(v: NVector, lrw: *mut Index, liw: *mut Index) {
    let len = unsafe { content_of(v) }.len;
    unsafe {
        if let Some(lrw) = lrw.as_mut() {
            *lrw = len as Index;
        }
        if let Some(liw) = liw.as_mut() {
            *liw = 1;
        }
    }
}

unsafe extern "C" fn get_array_pointer(v: NVector) -> *mut Real {
    unsafe { content_of(v) }.data
}

/// Re-point `v` at caller-owned data. Data `v` owned before is released.
unsafe extern "C" fn set_array_pointer(data: *mut Real, v: NVector) {
    let c = unsafe { content_mut(v) };
    if c.data != data {
        unsafe { release_data(c) };
    }
    c.data = data;
}

unsafe extern "C" fn linear_sum(a: Real, x: NVector, b: Real, y: NVector, z: NVector) {
    let mut zv = unsafe { view_mut(z) };
    match (same(x, z), same(y, z)) {
        (true, true) => zv *= a + b,
        (true, false) => zv.axpy(b, &unsafe { view(y) }, a),
        (false, true) => zv.axpy(a, &unsafe { view(x) }, b),
        (false, false) => {
            zv.copy_from(&unsafe { view(y) });
            zv.axpy(a, &unsafe { view(x) }, b);
        }
    }
}

unsafe extern "C" fn constant(c: Real, z: NVector) {
    unsafe { view_mut(z) }.fill(c);
}

unsafe extern "C" fn prod(x: NVector, y: NVector, z: NVector) {
    unsafe { binary(x, y, z, |a, b| a * b) };
}

unsafe extern "C" fn div(x: NVector, y: NVector, z: NVector) {
    unsafe { binary(x, y, z, |a, b| a / b) };
}

unsafe extern "C" fn scale(c: Real, x: NVector, z: NVector) {
    let mut zv = unsafe { view_mut(z) };
    if !same(x, z) {
        zv.copy_from(&unsafe { view(x) });
    }
    zv *= c;
}

unsafe extern "C" fn abs(x: NVector, z: NVector) {
    unsafe { unary(x, z, f64::abs) };
}

unsafe extern "C" fn inv(x: NVector, z: NVector) {
    unsafe { unary(x, z, f64::recip) };
}

unsafe extern "C" fn add_const(x: NVector, b: Real, z: NVector) {
    let mut zv = unsafe { view_mut(z) };
    if !same(x, z) {
        zv.copy_from(&unsafe { view(x) });
    }
    zv.add_scalar_mut(b);
}

unsafe extern "C" fn dot_prod(x: NVector, y: NVector) -> Real {
    unsafe { view(x) }.dot(&unsafe { view(y) })
}

unsafe extern "C" fn max_norm(x: NVector) -> Real {
    unsafe { view(x) }.amax()
}

unsafe fn weighted_sum_sq(x: NVector, w: NVector) -> Real {
    unsafe { view(x) }.zip_fold(&unsafe { view(w) }, 0.0, |acc, xi, wi| {
        let p = xi * wi;
        acc + p * p
    })
}

unsafe extern "C" fn wrms_norm(x: NVector, w: NVector) -> Real {
    let n = unsafe { content_of(x) }.len;
    if n == 0 {
        return 0.0;
    }
    (unsafe { weighted_sum_sq(x, w) } / n as Real).sqrt()
}

/// Like `wrms_norm`, counting only components with `id_i > 0` in the sum
/// but still dividing by the full length.
unsafe extern "C" fn wrms_norm_mask(x: NVector, w: NVector, id: NVector) -> Real {
    let (xs, ws, ids) = unsafe { (slice_of(x), slice_of(w), slice_of(id)) };
    if xs.is_empty() {
        return 0.0;
    }
    let sum: Real = xs
        .iter()
        .zip(ws)
        .zip(ids)
        .filter(|&(_, &mask)| mask > 0.0)
        .map(|((&xi, &wi), _)| (xi * wi) * (xi * wi))
        .sum();
    (sum / xs.len() as Real).sqrt()
}

unsafe extern "C" fn min(x: NVector) -> Real {
    let xv = unsafe { view(x) };
    if xv.is_empty() {
        return Real::MAX;
    }
    xv.min()
}

unsafe extern "C" fn wl2_norm(x: NVector, w: NVector) -> Real {
    unsafe { weighted_sum_sq(x, w) }.sqrt()
}

unsafe extern "C" fn l1_norm(x: NVector) -> Real {
    unsafe { view(x) }.lp_norm(1)
}

unsafe extern "C" fn compare(c: Real, x: NVector, z: NVector) {
    unsafe { unary(x, z, |v| if v.abs() >= c { 1.0 } else { 0.0 }) };
}

unsafe extern "C" fn inv_test(x: NVector, z: NVector) -> c_int {
    let has_zero = unsafe { slice_of(x) }.contains(&0.0);
    unsafe { unary(x, z, |v| if v == 0.0 { v } else { v.recip() }) };
    c_int::from(!has_zero)
}

/// `c_i = ±2` demands `x_i` strictly positive / negative, `c_i = ±1`
/// non-negative / non-positive, `c_i = 0` nothing.
unsafe extern "C" fn constr_mask(c: NVector, x: NVector, m: NVector) -> c_int {
    let (cs, xs) = unsafe { (slice_of(c), slice_of(x)) };
    let mut violated: ScopedBuffer<f64, OP_SCRATCH> = ScopedBuffer::new(xs.len());
    let mut all_pass = true;
    for ((slot, &ci), &xi) in violated.iter_mut().zip(cs).zip(xs) {
        let fails = if ci.abs() > 1.5 {
            xi * ci <= 0.0
        } else if ci.abs() > 0.5 {
            xi * ci < 0.0
        } else {
            false
        };
        *slot = if fails { 1.0 } else { 0.0 };
        all_pass &= !fails;
    }
    // `m` may be `c` or `x`; the result is staged before it is written.
    let out = unsafe { slice_mut_of(m) };
    let k = out.len().min(violated.len());
    out[..k].copy_from_slice(&violated[..k]);
    c_int::from(all_pass)
}

unsafe extern "C" fn min_quotient(num: NVector, denom: NVector) -> Real {
    unsafe { view(num) }.zip_fold(&unsafe { view(denom) }, Real::MAX, |acc, n, d| {
        if d == 0.0 { acc } else { acc.min(n / d) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use numbridge_native::NVECTOR_OPS_LEN;
    use numbridge_runtime::assert_close_slice;

    fn table() -> &'static NVectorOps {
        ops_table()
    }

    #[test]
    fn one_table_with_twenty_six_entries() {
        assert_eq!(
            std::mem::size_of::<NVectorOps>(),
            NVECTOR_OPS_LEN * std::mem::size_of::<usize>()
        );
        let a = VectorAdapter::zeros(2);
        let b = VectorAdapter::zeros(3);
        unsafe {
            assert!(ptr::eq((*a.raw()).ops, (*b.raw()).ops));
            assert!(ptr::eq((*a.raw()).ops, table()));
        }
    }

    #[test]
    fn borrowed_adapter_aliases_the_slice() {
        let mut data = vec![1.0, 2.0, 3.0];
        let expected = data.as_ptr();
        {
            let v = VectorAdapter::borrowed(&mut data);
            assert!(v.is_aliased());
            assert_eq!(v.as_ptr(), expected);
            unsafe {
                assert_eq!((table().get_array_pointer)(v.raw()).cast_const(), expected);
                (table().scale)(2.0, v.raw(), v.raw());
            }
        }
        assert_eq!(data, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn from_expr_copies_row_vectors() {
        let row = nalgebra::RowDVector::from_vec(vec![1.0, 2.0]);
        let v = VectorAdapter::from_expr(&row).unwrap();
        assert!(!v.is_aliased());
        assert_eq!(v.as_slice(), &[1.0, 2.0]);
        let m = nalgebra::DMatrix::<f64>::zeros(2, 2);
        assert!(VectorAdapter::from_expr(&m).is_err());
    }

    #[test]
    fn space_reports_length() {
        let v = VectorAdapter::zeros(7);
        let (mut lrw, mut liw) = (0, 0);
        unsafe { (table().space)(v.raw(), &mut lrw, &mut liw) };
        assert_eq!((lrw, liw), (7, 1));
        assert_eq!(unsafe { (table().get_vector_id)(v.raw()) }, NVECTOR_ID_NALGEBRA);
    }

    #[test]
    fn clones_own_zeroed_data_and_are_destroyed() {
        let v = VectorAdapter::owned(vec![5.0, 6.0]);
        unsafe {
            let c = (table().clone)(v.raw());
            assert_eq!(slice_of(c), &[0.0, 0.0]);
            assert_ne!(slice_of(c).as_ptr(), v.as_ptr());
            (table().destroy)(c);
        }
    }

    #[test]
    fn empty_clone_points_at_foreign_data() {
        let v = VectorAdapter::zeros(3);
        let mut column = [1.0, 2.0, 3.0];
        unsafe {
            let e = (table().clone_empty)(v.raw());
            assert!(slice_of(e).is_empty());
            (table().set_array_pointer)(column.as_mut_ptr(), e);
            (table().scale)(10.0, e, e);
            (table().destroy)(e);
        }
        assert_eq!(column, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn linear_sum_handles_every_aliasing_pattern() {
        let x = VectorAdapter::owned(vec![1.0, 2.0]);
        let y = VectorAdapter::owned(vec![10.0, 20.0]);
        let z = VectorAdapter::zeros(2);
        unsafe {
            (table().linear_sum)(2.0, x.raw(), 3.0, y.raw(), z.raw());
            assert_eq!(z.as_slice(), &[32.0, 64.0]);
            (table().linear_sum)(1.0, z.raw(), -1.0, y.raw(), z.raw());
            assert_eq!(z.as_slice(), &[22.0, 44.0]);
            (table().linear_sum)(1.0, x.raw(), 0.5, z.raw(), z.raw());
            assert_eq!(z.as_slice(), &[12.0, 24.0]);
            (table().linear_sum)(1.0, z.raw(), 1.0, z.raw(), z.raw());
            assert_eq!(z.as_slice(), &[24.0, 48.0]);
        }
    }

    #[test]
    fn elementwise_ops_in_place_and_out_of_place() {
        let x = VectorAdapter::owned(vec![-2.0, 4.0]);
        let y = VectorAdapter::owned(vec![2.0, 8.0]);
        let z = VectorAdapter::zeros(2);
        unsafe {
            (table().prod)(x.raw(), y.raw(), z.raw());
            assert_eq!(z.as_slice(), &[-4.0, 32.0]);
            (table().div)(z.raw(), y.raw(), z.raw());
            assert_eq!(z.as_slice(), &[-2.0, 4.0]);
            (table().abs)(z.raw(), z.raw());
            assert_eq!(z.as_slice(), &[2.0, 4.0]);
            (table().inv)(z.raw(), z.raw());
            assert_eq!(z.as_slice(), &[0.5, 0.25]);
            (table().add_const)(x.raw(), 1.0, z.raw());
            assert_eq!(z.as_slice(), &[-1.0, 5.0]);
            (table().constant)(3.0, z.raw());
            assert_eq!(z.as_slice(), &[3.0, 3.0]);
            (table().compare)(3.0, x.raw(), z.raw());
            assert_eq!(z.as_slice(), &[0.0, 1.0]);
        }
    }

    #[test]
    fn reductions() {
        let x = VectorAdapter::owned(vec![3.0, -4.0]);
        let w = VectorAdapter::owned(vec![1.0, 0.5]);
        let id = VectorAdapter::owned(vec![1.0, 0.0]);
        unsafe {
            assert_eq!((table().dot_prod)(x.raw(), w.raw()), 1.0);
            assert_eq!((table().max_norm)(x.raw()), 4.0);
            assert_eq!((table().min)(x.raw()), -4.0);
            assert_eq!((table().l1_norm)(x.raw()), 7.0);
            assert_close_slice(
                &[
                    (table().wrms_norm)(x.raw(), w.raw()),
                    (table().wl2_norm)(x.raw(), w.raw()),
                    (table().wrms_norm_mask)(x.raw(), w.raw(), id.raw()),
                ],
                &[(13.0f64 / 2.0).sqrt(), 13.0f64.sqrt(), (9.0f64 / 2.0).sqrt()],
                1e-15,
                0.0,
            );
        }
    }

    #[test]
    fn empty_vector_reductions() {
        let e = VectorAdapter::zeros(0);
        unsafe {
            assert_eq!((table().wrms_norm)(e.raw(), e.raw()), 0.0);
            assert_eq!((table().min)(e.raw()), Real::MAX);
            assert_eq!((table().max_norm)(e.raw()), 0.0);
        }
    }

    #[test]
    fn inv_test_reports_zeros() {
        let x = VectorAdapter::owned(vec![2.0, 0.0]);
        let z = VectorAdapter::zeros(2);
        let ok = VectorAdapter::owned(vec![4.0, 0.5]);
        unsafe {
            assert_eq!((table().inv_test)(x.raw(), z.raw()), 0);
            assert_eq!(z.as_slice()[0], 0.5);
            assert_eq!((table().inv_test)(ok.raw(), ok.raw()), 1);
        }
        assert_eq!(ok.as_slice(), &[0.25, 2.0]);
    }

    #[test]
    fn constraint_mask_marks_violations() {
        let c = VectorAdapter::owned(vec![2.0, 1.0, -1.0, -2.0, 0.0]);
        let x = VectorAdapter::owned(vec![0.0, 0.0, 1.0, -1.0, -5.0]);
        let m = VectorAdapter::zeros(5);
        let pass = unsafe { (table().constr_mask)(c.raw(), x.raw(), m.raw()) };
        assert_eq!(pass, 0);
        assert_eq!(m.as_slice(), &[1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn min_quotient_skips_zero_denominators() {
        let num = VectorAdapter::owned(vec![1.0, 6.0, 5.0]);
        let den = VectorAdapter::owned(vec![0.0, 3.0, 1.0]);
        assert_eq!(unsafe { (table().min_quotient)(num.raw(), den.raw()) }, 2.0);
        let zeros = VectorAdapter::zeros(3);
        assert_eq!(
            unsafe { (table().min_quotient)(num.raw(), zeros.raw()) },
            Real::MAX
        );
    }
}

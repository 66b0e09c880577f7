//! Opaque vector ABI.
//!
//! The library never looks inside `content`; every access goes through the
//! operation table attached to the vector. Whoever creates a vector decides
//! what the content is and supplies the table.

use std::ffi::{c_int, c_void};

use crate::{Index, Real};

pub type NVector = *mut GenericVector;

#[repr(C)]
pub struct GenericVector {
    pub content: *mut c_void,
    pub ops: *const NVectorOps,
}

/// Number of entries in [`NVectorOps`].
pub const NVECTOR_OPS_LEN: usize = 26;

/// Vector operation table. `z` arguments are outputs and may alias any input.
#[repr(C)]
pub struct NVectorOps {
    pub get_vector_id: unsafe extern "C" fn(v: NVector) -> c_int,
    /// New vector sharing the table, without data.
    pub clone_empty: unsafe extern "C" fn(w: NVector) -> NVector,
    /// New vector of the same length owning zeroed data; null on failure.
    pub clone: unsafe extern "C" fn(w: NVector) -> NVector,
    pub destroy: unsafe extern "C" fn(v: NVector),
    pub space: unsafe extern "C" fn(v: NVector, lrw: *mut Index, liw: *mut Index),
    pub get_array_pointer: unsafe extern "C" fn(v: NVector) -> *mut Real,
    pub set_array_pointer: unsafe extern "C" fn(data: *mut Real, v: NVector),
    /// z = a x + b y
    pub linear_sum: unsafe extern "C" fn(a: Real, x: NVector, b: Real, y: NVector, z: NVector),
    pub constant: unsafe extern "C" fn(c: Real, z: NVector),
    pub prod: unsafe extern "C" fn(x: NVector, y: NVector, z: NVector),
    pub div: unsafe extern "C" fn(x: NVector, y: NVector, z: NVector),
    pub scale: unsafe extern "C" fn(c: Real, x: NVector, z: NVector),
    pub abs: unsafe extern "C" fn(x: NVector, z: NVector),
    pub inv: unsafe extern "C" fn(x: NVector, z: NVector),
    pub add_const: unsafe extern "C" fn(x: NVector, b: Real, z: NVector),
    pub dot_prod: unsafe extern "C" fn(x: NVector, y: NVector) -> Real,
    pub max_norm: unsafe extern "C" fn(x: NVector) -> Real,
    pub wrms_norm: unsafe extern "C" fn(x: NVector, w: NVector) -> Real,
    pub wrms_norm_mask: unsafe extern "C" fn(x: NVector, w: NVector, id: NVector) -> Real,
    pub min: unsafe extern "C" fn(x: NVector) -> Real,
    pub wl2_norm: unsafe extern "C" fn(x: NVector, w: NVector) -> Real,
    pub l1_norm: unsafe extern "C" fn(x: NVector) -> Real,
    /// z_i = 1 if |x_i| >= c else 0
    pub compare: unsafe extern "C" fn(c: Real, x: NVector, z: NVector),
    /// z = 1/x; returns 0 if some x_i == 0, 1 otherwise.
    pub inv_test: unsafe extern "C" fn(x: NVector, z: NVector) -> c_int,
    /// Constraint check; m_i = 1 where violated. Returns 1 when all pass.
    pub constr_mask: unsafe extern "C" fn(c: NVector, x: NVector, m: NVector) -> c_int,
    /// min over i with denom_i != 0 of num_i / denom_i, or `Real::MAX`.
    pub min_quotient: unsafe extern "C" fn(num: NVector, denom: NVector) -> Real,
}

// Thin dispatch helpers used inside the library. Every caller must pass
// vectors that are non-null and carry a valid operation table.

#[inline]
unsafe fn ops<'a>(v: NVector) -> &'a NVectorOps {
    // SAFETY: caller guarantees `v` and its table are valid.
    unsafe { &*(*v).ops }
}

pub(crate) unsafe fn nv_len(v: NVector) -> usize {
    let mut lrw: Index = 0;
    let mut liw: Index = 0;
    unsafe { (ops(v).space)(v, &mut lrw, &mut liw) };
    usize::try_from(lrw).unwrap_or(0)
}

pub(crate) unsafe fn nv_clone(v: NVector) -> NVector {
    unsafe { (ops(v).clone)(v) }
}

pub(crate) unsafe fn nv_clone_empty(v: NVector) -> NVector {
    unsafe { (ops(v).clone_empty)(v) }
}

pub(crate) unsafe fn nv_destroy(v: NVector) {
    if !v.is_null() {
        unsafe { (ops(v).destroy)(v) }
    }
}

pub(crate) unsafe fn nv_data(v: NVector) -> *mut Real {
    unsafe { (ops(v).get_array_pointer)(v) }
}

pub(crate) unsafe fn nv_set_data(data: *mut Real, v: NVector) {
    unsafe { (ops(v).set_array_pointer)(data, v) }
}

pub(crate) unsafe fn nv_linear_sum(a: Real, x: NVector, b: Real, y: NVector, z: NVector) {
    unsafe { (ops(z).linear_sum)(a, x, b, y, z) }
}

pub(crate) unsafe fn nv_copy(x: NVector, z: NVector) {
    unsafe { (ops(z).scale)(1.0, x, z) }
}

pub(crate) unsafe fn nv_scale(c: Real, x: NVector, z: NVector) {
    unsafe { (ops(z).scale)(c, x, z) }
}

pub(crate) unsafe fn nv_abs(x: NVector, z: NVector) {
    unsafe { (ops(z).abs)(x, z) }
}

pub(crate) unsafe fn nv_add_const(x: NVector, b: Real, z: NVector) {
    unsafe { (ops(z).add_const)(x, b, z) }
}

pub(crate) unsafe fn nv_min(x: NVector) -> Real {
    unsafe { (ops(x).min)(x) }
}

pub(crate) unsafe fn nv_inv_test(x: NVector, z: NVector) -> bool {
    unsafe { (ops(z).inv_test)(x, z) != 0 }
}

pub(crate) unsafe fn nv_wrms_norm(x: NVector, w: NVector) -> Real {
    unsafe { (ops(x).wrms_norm)(x, w) }
}

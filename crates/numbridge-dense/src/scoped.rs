#![forbid(unsafe_code)]

//! Inline-or-heap scratch storage.

use std::ops::{Deref, DerefMut};

/// Scratch array of `len` elements that lives inline when `len <= N` and on
/// the heap otherwise.
///
/// Moving a heap-backed buffer moves the `Vec` handle, so the data pointer
/// stays the same across moves and is never inside the buffer itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedBuffer<T: Copy + Default, const N: usize> {
    storage: Storage<T, N>,
}

#[derive(Debug, Clone, PartialEq)]
enum Storage<T: Copy + Default, const N: usize> {
    Inline { data: [T; N], len: usize },
    Heap(Vec<T>),
}

impl<T: Copy + Default, const N: usize> ScopedBuffer<T, N> {
    /// Inline threshold in elements.
    pub const INLINE_CAPACITY: usize = N;

    /// `len` default-initialized elements.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let storage = if len <= N {
            Storage::Inline {
                data: [T::default(); N],
                len,
            }
        } else {
            Storage::Heap(vec![T::default(); len])
        };
        Self { storage }
    }

    #[must_use]
    pub fn from_slice(values: &[T]) -> Self {
        let mut buffer = Self::new(values.len());
        buffer.as_mut_slice().copy_from_slice(values);
        buffer
    }

    /// True when the elements are stored inline.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self.storage, Storage::Inline { .. })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Inline { len, .. } => *len,
            Storage::Heap(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Storage::Inline { data, len } => &data[..*len],
            Storage::Heap(v) => v,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.storage {
            Storage::Inline { data, len } => &mut data[..*len],
            Storage::Heap(v) => v,
        }
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.as_slice().as_ptr()
    }

    /// Copy out into a `Vec`, whatever the storage mode.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }
}

impl<T: Copy + Default, const N: usize> Deref for ScopedBuffer<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Copy + Default, const N: usize> DerefMut for ScopedBuffer<T, N> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

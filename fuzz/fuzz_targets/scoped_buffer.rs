#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use numbridge_dense::ScopedBuffer;

#[derive(Debug, Arbitrary)]
struct BufferInput {
    values: Vec<f64>,
    writes: Vec<(u16, f64)>,
}

type Scratch = ScopedBuffer<f64, 16>;

fuzz_target!(|input: BufferInput| {
    let mut buffer = Scratch::from_slice(&input.values);
    assert_eq!(buffer.len(), input.values.len());
    assert_eq!(buffer.is_static(), input.values.len() <= Scratch::INLINE_CAPACITY);

    let mut expected = input.values.clone();
    if !expected.is_empty() {
        for (idx, value) in &input.writes {
            let idx = usize::from(*idx) % expected.len();
            buffer[idx] = *value;
            expected[idx] = *value;
        }
    }

    let before = buffer.as_ptr();
    let moved = Box::new(buffer);
    if !moved.is_static() {
        // A move transfers the heap allocation untouched.
        assert_eq!(moved.as_ptr(), before);
        let start = (&*moved as *const Scratch).cast::<u8>();
        let end = start.wrapping_add(std::mem::size_of::<Scratch>());
        let data = moved.as_ptr().cast::<u8>();
        assert!(data < start || data >= end);
    }
    let same = moved
        .iter()
        .zip(&expected)
        .all(|(a, b)| a.to_bits() == b.to_bits());
    assert!(same);
});

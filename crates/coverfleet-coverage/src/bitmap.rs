//! Coverage bitmap arithmetic.
//!
//! Buffers of different lengths are combined as if the shorter one were
//! zero-padded to the length of the longer one.

/// Number of set bits in `data`.
pub fn popcount(data: &[u8]) -> u64 {
    let mut chunks = data.chunks_exact(8);
    let mut total: u64 = chunks
        .by_ref()
        .map(|c| {
            let word = u64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
            u64::from(word.count_ones())
        })
        .sum();
    total += chunks
        .remainder()
        .iter()
        .map(|b| u64::from(b.count_ones()))
        .sum::<u64>();
    total
}

/// OR `data` into `acc`, growing `acc` with zeros when `data` is longer.
pub fn merge_into(acc: &mut Vec<u8>, data: &[u8]) {
    if data.len() > acc.len() {
        acc.resize(data.len(), 0);
    }
    for (a, b) in acc.iter_mut().zip(data) {
        *a |= *b;
    }
}

/// Bitwise OR of two buffers, zero-padded to the longer length.
pub fn merge(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut merged = a.to_vec();
    merge_into(&mut merged, b);
    merged
}

/// Popcount of the OR of every buffer; 0 for no buffers.
pub fn merged_popcount<'a, I>(buffers: I) -> u64
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut merged = Vec::new();
    for data in buffers {
        merge_into(&mut merged, data);
    }
    popcount(&merged)
}

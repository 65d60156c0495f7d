//! Log retention.

/// Prunes an ordered log in place.
///
/// An entry survives if its key is at or above `watermark`, or if it is one
/// of the last `min_len` entries. Relative order is preserved.
pub fn truncate<T, F>(entries: &mut Vec<T>, watermark: u64, min_len: usize, key: F)
where
    F: Fn(&T) -> u64,
{
    let len = entries.len();
    let mut index = 0;
    entries.retain(|entry| {
        let from_end = len - index;
        index += 1;
        from_end <= min_len || key(entry) >= watermark
    });
}

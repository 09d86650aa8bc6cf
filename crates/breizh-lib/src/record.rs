//! Runtime-stride record views
//!
//! Every stream handled by the mergers is a flat sequence of u64 words made
//! of fixed-width records: one key followed by `color_words` color words.
//! The width is only known at runtime (it grows with every merge round), so
//! records are never materialized as structs; they are addressed as slices
//! of a word buffer with a known stride.

/// Width of a record: one key word plus `color_words` color words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    color_words: usize,
}

impl RecordLayout {
    /// Layout of records carrying `color_words` 64-bit color words
    pub const fn new(color_words: usize) -> Self {
        Self { color_words }
    }

    /// Layout of records carrying `colors` color bits (rounded up to words)
    pub const fn for_colors(colors: usize) -> Self {
        Self::new(crate::constants::color_words(colors))
    }

    /// Number of color words per record
    #[inline]
    pub const fn color_words(&self) -> usize {
        self.color_words
    }

    /// Number of u64 words per record
    #[inline]
    pub const fn stride(&self) -> usize {
        1 + self.color_words
    }

    /// Number of bytes per record
    #[inline]
    pub const fn record_bytes(&self) -> usize {
        self.stride() * 8
    }
}

/// Record `index` of a word buffer holding records of `stride` words
#[inline]
pub fn record_at(words: &[u64], index: usize, stride: usize) -> &[u64] {
    &words[index * stride..(index + 1) * stride]
}

/// Mutable record `index` of a word buffer holding records of `stride` words
#[inline]
pub fn record_at_mut(words: &mut [u64], index: usize, stride: usize) -> &mut [u64] {
    &mut words[index * stride..(index + 1) * stride]
}

/// Typed read-only view over a buffer of records
#[derive(Debug, Clone, Copy)]
pub struct RecordSlice<'a> {
    words: &'a [u64],
    stride: usize,
}

impl<'a> RecordSlice<'a> {
    /// Wrap `words` as records of `layout`
    ///
    /// # Panics
    /// Panics if the buffer does not hold a whole number of records.
    pub fn new(words: &'a [u64], layout: RecordLayout) -> Self {
        let stride = layout.stride();
        assert_eq!(
            words.len() % stride,
            0,
            "record buffer of {} words is not aligned to a {}-word record",
            words.len(),
            stride
        );
        Self { words, stride }
    }

    /// Number of records
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len() / self.stride
    }

    /// True if the view holds no record
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Full record (key followed by colors)
    #[inline]
    pub fn record(&self, index: usize) -> &'a [u64] {
        record_at(self.words, index, self.stride)
    }

    /// Key of a record
    #[inline]
    pub fn key(&self, index: usize) -> u64 {
        self.words[index * self.stride]
    }

    /// Color words of a record
    #[inline]
    pub fn colors(&self, index: usize) -> &'a [u64] {
        &self.record(index)[1..]
    }

    /// Iterate over the records
    pub fn iter(&self) -> impl Iterator<Item = &'a [u64]> + 'a {
        self.words.chunks_exact(self.stride)
    }
}

/// Ordering used by the external sorter: color payload first, key as tie-break
#[inline]
pub fn cmp_colors_then_key(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    a[1..].cmp(&b[1..]).then_with(|| a[0].cmp(&b[0]))
}

/// Number of set color bits in a record's color words
#[inline]
pub fn popcount(colors: &[u64]) -> u32 {
    colors.iter().map(|w| w.count_ones()).sum()
}

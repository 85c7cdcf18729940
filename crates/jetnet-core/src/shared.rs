use std::{fmt, ops::Deref, sync::Arc};

/// Reference-counted, sliceable view over an immutable byte buffer.
///
/// One application packet backs every fragment that is cut from it, so the
/// fragments hold cheap views into the same allocation instead of copies.
#[derive(Clone, Default)]
pub struct SharedBytes {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl SharedBytes {
    /// Takes ownership of a vector.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let data: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = data.len();
        Self { data, start: 0, len }
    }

    /// Copies a slice into a new buffer.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Creates a view of `len` bytes starting at `start` without copying.
    /// Panics if the range exceeds the current view.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start + len <= self.len, "slice {}..{} out of bounds of {}", start, start + len, self.len);
        Self { data: self.data.clone(), start: self.start + start, len }
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live views sharing the underlying allocation.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

// Equality is by content: a view and a fresh copy of the same bytes are equal.
impl PartialEq for SharedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for SharedBytes {}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBytes").field("len", &self.len).field("refs", &self.ref_count()).finish()
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for SharedBytes {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

impl From<&str> for SharedBytes {
    fn from(text: &str) -> Self {
        Self::copy_from_slice(text.as_bytes())
    }
}

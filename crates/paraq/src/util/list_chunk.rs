/// Size of the first chunk.
const INITIAL_CHUNK_CAPACITY: usize = 8;

/// Largest chunk allocated.
const MAX_CHUNK_CAPACITY: usize = 4096;

/// Append-only list stored as a sequence of chunks.
///
/// Chunks double in size up to a max, so growing never copies existing
/// elements. Used for group contents where the final size is unknown.
#[derive(Debug, Clone)]
pub struct ListChunk<T> {
    chunks: Vec<Vec<T>>,
    len: usize,
}

impl<T> Default for ListChunk<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListChunk<T> {
    pub fn new() -> Self {
        ListChunk {
            chunks: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) {
        let needs_chunk = match self.chunks.last() {
            Some(chunk) => chunk.len() == chunk.capacity(),
            None => true,
        };
        if needs_chunk {
            let capacity = match self.chunks.last() {
                Some(chunk) => (chunk.capacity() * 2).min(MAX_CHUNK_CAPACITY),
                None => INITIAL_CHUNK_CAPACITY,
            };
            self.chunks.push(Vec::with_capacity(capacity));
        }
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(value);
        }
        self.len += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flatten()
    }

    /// Flatten into a single vec, preserving insertion order.
    pub fn into_vec(self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend(chunk);
        }
        out
    }
}

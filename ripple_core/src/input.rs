pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
}

/// Candidates are text. `len` counts bytes, matching what is written to the target.
impl Input for String {
    fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }
    fn len(&self) -> usize {
        self.as_str().len()
    }
    fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

/// Limits applied when loading feature definitions from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsConfig {
    /// Maximum bytes read from a feature file.
    pub max_file_size: usize,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024,
        }
    }
}

//! In-memory filesystem holding materialized test data.
//!
//! The generate phase fills one of these with `<prefix>.in` and
//! `<prefix>.ans` files; the validate and check phases read from it and
//! the archive writer uploads it. A build is atomic per revision, so the
//! whole data set comfortably lives in memory for its duration.

use std::collections::HashMap;

use anyhow::{Context, Result};

#[derive(Debug, Default, Clone)]
pub struct MemFs {
    files: HashMap<String, Vec<u8>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file.
    pub fn write(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.files.insert(path.into(), content);
    }

    pub fn read(&self, path: &str) -> Result<&[u8]> {
        self.files
            .get(path)
            .map(Vec::as_slice)
            .with_context(|| format!("file '{path}' not found in test data"))
    }

    #[allow(dead_code)]
    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// All file paths, sorted for deterministic iteration.
    #[allow(dead_code)]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let mut fs = MemFs::new();
        assert!(fs.is_empty());
        fs.write("a-0.in", b"1 2\n".to_vec());
        fs.write("a-0.ans", b"3\n".to_vec());
        assert_eq!(fs.read("a-0.in").unwrap(), b"1 2\n");
        assert!(fs.exists("a-0.ans"));
        assert!(fs.read("a-1.in").is_err());
        assert_eq!(fs.paths(), vec!["a-0.ans".to_string(), "a-0.in".to_string()]);
    }

    #[test]
    fn test_overwrite() {
        let mut fs = MemFs::new();
        fs.write("x", b"old".to_vec());
        fs.write("x", b"new".to_vec());
        assert_eq!(fs.read("x").unwrap(), b"new");
        assert_eq!(fs.len(), 1);
    }
}

//! Source line cache
//!
//! Trace lines quote the source they describe. Files are read once, split
//! into lines and kept in an LRU keyed by path. Modules that have no file
//! on disk can be registered from memory.
//!
//! @module trace/source

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shown in place of a line that cannot be read
pub const UNAVAILABLE_SOURCE: &str = "SOURCE IS UNAVAILABLE";

/// Cached source files as line vectors
pub struct SourceCache {
    /// Files read from disk (path -> lines)
    cache: LruCache<PathBuf, Arc<Vec<String>>>,
    /// In-memory sources; never evicted
    registered: HashMap<PathBuf, Arc<Vec<String>>>,
}

impl SourceCache {
    pub fn new(max_files: usize) -> Self {
        let capacity = NonZeroUsize::new(max_files).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            registered: HashMap::new(),
        }
    }

    /// Provide the source of a module that has no readable file
    pub fn register(&mut self, path: impl Into<PathBuf>, source: &str) {
        self.registered
            .insert(path.into(), Arc::new(split_lines(source)));
    }

    /// All lines of `path`, if it can be read
    pub fn lines(&mut self, path: &Path) -> Option<Arc<Vec<String>>> {
        if let Some(lines) = self.registered.get(path) {
            return Some(Arc::clone(lines));
        }
        if let Some(lines) = self.cache.get(path) {
            return Some(Arc::clone(lines));
        }

        let bytes = std::fs::read(path).ok()?;
        let lines = split_lines(&String::from_utf8_lossy(&bytes));
        if lines.is_empty() {
            return None;
        }
        let lines = Arc::new(lines);
        self.cache.put(path.to_path_buf(), Arc::clone(&lines));
        Some(lines)
    }

    /// One line (1-indexed), or the unavailable marker
    pub fn line(&mut self, path: &Path, line: u32) -> String {
        self.lines(path)
            .and_then(|lines| lines.get(line.saturating_sub(1) as usize).cloned())
            .unwrap_or_else(|| UNAVAILABLE_SOURCE.to_string())
    }

    /// Lines `start..=end` (1-indexed), clamped to the file
    pub fn range(&mut self, path: &Path, start: u32, end: u32) -> Option<Vec<String>> {
        let lines = self.lines(path)?;
        let start_idx = start.saturating_sub(1) as usize;
        let end_idx = (end as usize).min(lines.len());
        if start_idx >= end_idx {
            return None;
        }
        Some(lines[start_idx..end_idx].to_vec())
    }

    pub fn files_cached(&self) -> usize {
        self.cache.len() + self.registered.len()
    }
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new(256)
    }
}

fn split_lines(source: &str) -> Vec<String> {
    source.lines().map(|l| l.trim_end().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_get_line() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(&dir, "a.py", "x = 1\ny = 2\nz = 3\n");
        let mut cache = SourceCache::new(4);

        assert_eq!(cache.line(&path, 1), "x = 1");
        assert_eq!(cache.line(&path, 3), "z = 3");
        assert_eq!(cache.line(&path, 4), UNAVAILABLE_SOURCE);
    }

    #[test]
    fn test_get_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(&dir, "a.py", "a\nb\nc\nd\n");
        let mut cache = SourceCache::new(4);
        assert_eq!(cache.range(&path, 2, 3).unwrap(), vec!["b", "c"]);
        assert_eq!(cache.range(&path, 3, 99).unwrap(), vec!["c", "d"]);
        assert!(cache.range(&path, 9, 12).is_none());
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let mut cache = SourceCache::new(4);
        assert_eq!(
            cache.line(Path::new("/no/such/module.py"), 1),
            UNAVAILABLE_SOURCE
        );
    }

    #[test]
    fn test_registered_source_wins() {
        let mut cache = SourceCache::new(1);
        cache.register("<string>", "print('hi')\n");
        assert_eq!(cache.line(Path::new("<string>"), 1), "print('hi')");
    }

    #[test]
    fn test_cache_eviction() {
        let dir = TempDir::new().unwrap();
        let path1 = create_test_file(&dir, "one.py", "1\n");
        let path2 = create_test_file(&dir, "two.py", "2\n");
        let mut cache = SourceCache::new(1);

        cache.line(&path1, 1);
        assert_eq!(cache.files_cached(), 1);
        cache.line(&path2, 1);
        assert_eq!(cache.files_cached(), 1);
    }
}

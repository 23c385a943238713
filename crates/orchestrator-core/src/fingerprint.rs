//! Task fingerprinting: the unique key for all persisted records of a task.

use sha2::{Digest, Sha256};
use std::path::Path;

/// `hash8(absolute_task_path) + "_" + basename(task_path)`, so identical
/// absolute paths collide deterministically and paths that differ only in
/// prefix do not (§4.1).
pub fn task_fingerprint(task_path: &Path) -> String {
    let absolute = task_path
        .canonicalize()
        .unwrap_or_else(|_| task_path.to_path_buf());
    let basename = task_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string());
    format!("{}_{}", hash8(&absolute.to_string_lossy()), basename)
}

/// First 8 hex characters of the SHA-256 digest of `input`.
pub fn hash8(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let full = format!("{:x}", digest);
    full[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_hash8_deterministic() {
        assert_eq!(hash8("/home/user/project"), hash8("/home/user/project"));
        assert_eq!(hash8("/home/user/project").len(), 8);
    }

    #[test]
    fn test_fingerprint_differs_for_different_paths() {
        let a = task_fingerprint(&PathBuf::from("/tmp/does-not-exist-a"));
        let b = task_fingerprint(&PathBuf::from("/tmp/does-not-exist-b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_includes_basename() {
        let fp = task_fingerprint(&PathBuf::from("/tmp/does-not-exist/my-task"));
        assert!(fp.ends_with("_my-task"));
    }
}

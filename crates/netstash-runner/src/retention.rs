//! Keep-last-N pruning over backup artifacts, ordered by file
//! modification time. Invoked explicitly (CLI or a schedule's retention
//! setting), never as a background task.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

/// Which of `paths` fall outside the newest `keep` by mtime. Paths that
/// no longer exist (or cannot be stat'ed) are skipped rather than
/// counted against the budget.
pub fn stale_backups(paths: Vec<PathBuf>, keep: usize) -> Vec<PathBuf> {
    let mut dated: Vec<(SystemTime, PathBuf)> = paths
        .into_iter()
        .filter_map(|p| {
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.into_iter().skip(keep).map(|(_, p)| p).collect()
}

/// Delete everything beyond the newest `keep`. A file that fails to
/// delete is logged and skipped; the pass never aborts. Returns how
/// many artifacts were removed.
pub fn prune(paths: Vec<PathBuf>, keep: usize) -> usize {
    let stale = stale_backups(paths, keep);
    let mut removed = 0;
    for path in stale {
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("🧹 Pruned {}", path.display());
                removed += 1;
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not prune {}: {e}", path.display());
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &std::path::Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    #[test]
    fn test_keeps_newest_n_by_mtime() {
        let dir = std::env::temp_dir().join("netstash-test-retention-order");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        // creation order deliberately differs from mtime order
        let old = touch(&dir, "r1_aaaa1111.cfg", 300);
        let newest = touch(&dir, "r1_bbbb2222.cfg", 10);
        let mid = touch(&dir, "r1_cccc3333.cfg", 100);

        let stale = stale_backups(vec![old.clone(), newest.clone(), mid.clone()], 2);
        assert_eq!(stale, vec![old.clone()]);

        let removed = prune(vec![old.clone(), newest.clone(), mid.clone()], 2);
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(newest.exists());
        assert!(mid.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_files_do_not_count_against_the_budget() {
        let dir = std::env::temp_dir().join("netstash-test-retention-missing");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let a = touch(&dir, "a.cfg", 50);
        let b = touch(&dir, "b.cfg", 20);
        let ghost = dir.join("gone.cfg");

        // the ghost is skipped; both real files fit the budget of 2
        let stale = stale_backups(vec![ghost, a, b], 2);
        assert!(stale.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_keep_zero_removes_everything() {
        let dir = std::env::temp_dir().join("netstash-test-retention-zero");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let a = touch(&dir, "a.cfg", 50);
        let b = touch(&dir, "b.cfg", 20);

        assert_eq!(prune(vec![a.clone(), b.clone()], 0), 2);
        assert!(!a.exists() && !b.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}

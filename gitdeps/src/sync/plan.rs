//! Classifying files into keep, download and delete.

use std::collections::HashSet;

use crate::config::OverwriteMode;
use crate::manifest::{file_key, DependencyFile, WorkingFile};
use crate::report::Prompter;

use super::refresh::LocalFiles;

/// What a sync will do to the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Local files already matching their target.
    pub keep: Vec<WorkingFile>,
    /// Pending entries for every file to fetch.
    pub downloads: Vec<WorkingFile>,
    /// Local files to remove from disk.
    pub deletes: Vec<WorkingFile>,
    /// Locally modified files left untouched.
    pub tampered_kept: Vec<WorkingFile>,
    /// Files under excluded folders or ignore rules, carried over as is.
    pub protected: Vec<WorkingFile>,
}

impl SyncPlan {
    /// Compare the filtered target against the local state.
    ///
    /// `tampered` deletion candidates are returned separately in
    /// `tampered_kept`; [`SyncPlan::resolve_tampered`] decides their fate.
    pub fn classify(
        targets: &[&DependencyFile],
        mut local: LocalFiles,
        is_protected: impl Fn(&str) -> bool,
    ) -> Self {
        let mut plan = Self::default();

        for target in targets {
            let key = file_key(&target.name);
            match local.remove(&key) {
                Some(mut existing) if existing.hash == target.hash => {
                    existing.expected_hash = target.hash.clone();
                    plan.keep.push(existing);
                }
                Some(stale) => {
                    local.insert(key, stale);
                    plan.downloads
                        .push(WorkingFile::pending(target.name.clone(), target.hash.clone()));
                }
                None => {
                    plan.downloads
                        .push(WorkingFile::pending(target.name.clone(), target.hash.clone()));
                }
            }
        }

        for (_, leftover) in local {
            if is_protected(&leftover.name) {
                plan.protected.push(leftover);
            } else if !leftover.expected_hash.is_empty() && leftover.hash != leftover.expected_hash
            {
                plan.tampered_kept.push(leftover);
            } else {
                plan.deletes.push(leftover);
            }
        }

        plan
    }

    /// Apply the overwrite policy to locally modified files.
    ///
    /// Files that may be overwritten move to `deletes`. The rest stay in
    /// `tampered_kept` and their downloads are dropped.
    pub fn resolve_tampered(&mut self, mode: OverwriteMode, prompter: &dyn Prompter) {
        if self.tampered_kept.is_empty() {
            return;
        }

        let overwrite = match mode {
            OverwriteMode::Force => true,
            OverwriteMode::Unchanged => false,
            OverwriteMode::Prompt => {
                let names: Vec<String> =
                    self.tampered_kept.iter().map(|f| f.name.clone()).collect();
                prompter.confirm_overwrite(&names)
            }
        };

        if overwrite {
            self.deletes.append(&mut self.tampered_kept);
            return;
        }

        let kept: HashSet<String> = self
            .tampered_kept
            .iter()
            .map(|f| file_key(&f.name))
            .collect();
        self.downloads
            .retain(|file| !kept.contains(&file_key(&file.name)));
    }

    /// Names scheduled for download that already exist locally.
    pub fn replaced(&self) -> HashSet<String> {
        let deleted: HashSet<String> = self.deletes.iter().map(|f| file_key(&f.name)).collect();
        self.downloads
            .iter()
            .map(|f| file_key(&f.name))
            .filter(|key| deleted.contains(key))
            .collect()
    }

    /// The working manifest to persist before downloading.
    pub fn next_working_files(&self) -> Vec<WorkingFile> {
        let mut files: Vec<WorkingFile> = self
            .keep
            .iter()
            .chain(&self.downloads)
            .chain(&self.tampered_kept)
            .chain(&self.protected)
            .cloned()
            .collect();
        files.sort_by_key(|f| file_key(&f.name));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::DeclinePrompter;

    fn declared(name: &str, hash: &str) -> DependencyFile {
        DependencyFile {
            name: name.to_string(),
            hash: hash.to_string(),
            is_executable: false,
        }
    }

    fn local_file(name: &str, hash: &str, expected: &str) -> WorkingFile {
        WorkingFile {
            name: name.to_string(),
            hash: hash.to_string(),
            expected_hash: expected.to_string(),
            timestamp: 42,
        }
    }

    fn local(files: Vec<WorkingFile>) -> LocalFiles {
        files.into_iter().map(|f| (file_key(&f.name), f)).collect()
    }

    struct AcceptPrompter;

    impl Prompter for AcceptPrompter {
        fn confirm_overwrite(&self, _files: &[String]) -> bool {
            true
        }
    }

    #[test]
    fn test_matching_file_is_kept() {
        let a = declared("A.bin", "h1");
        let plan = SyncPlan::classify(&[&a], local(vec![local_file("a.bin", "h1", "")]), |_| false);

        assert_eq!(plan.keep.len(), 1);
        assert_eq!(plan.keep[0].expected_hash, "h1");
        assert!(plan.downloads.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_missing_file_is_downloaded() {
        let a = declared("a.bin", "h1");
        let plan = SyncPlan::classify(&[&a], LocalFiles::new(), |_| false);

        assert_eq!(plan.downloads, vec![WorkingFile::pending("a.bin", "h1")]);
    }

    #[test]
    fn test_outdated_file_is_replaced() {
        let a = declared("a.bin", "h2");
        let plan = SyncPlan::classify(
            &[&a],
            local(vec![local_file("a.bin", "h1", "h1")]),
            |_| false,
        );

        assert_eq!(plan.downloads.len(), 1);
        assert_eq!(plan.deletes.len(), 1);
        assert!(plan.replaced().contains("a.bin"));
    }

    #[test]
    fn test_dropped_file_is_deleted_unless_protected() {
        let plan = SyncPlan::classify(
            &[],
            local(vec![
                local_file("old.bin", "h1", "h1"),
                local_file("Keep/mine.bin", "h2", "h2"),
            ]),
            |name| name.starts_with("Keep/"),
        );

        assert_eq!(plan.deletes.len(), 1);
        assert_eq!(plan.deletes[0].name, "old.bin");
        assert_eq!(plan.protected.len(), 1);
        assert!(plan.replaced().is_empty());
    }

    #[test]
    fn test_tampered_file_kept_by_default() {
        let a = declared("a.bin", "h1");
        let mut plan = SyncPlan::classify(
            &[&a],
            local(vec![local_file("a.bin", "edited", "h1")]),
            |_| false,
        );
        assert_eq!(plan.tampered_kept.len(), 1);

        plan.resolve_tampered(OverwriteMode::Unchanged, &DeclinePrompter);

        assert!(plan.downloads.is_empty());
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.next_working_files().len(), 1);
        assert_eq!(plan.next_working_files()[0].hash, "edited");
    }

    #[test]
    fn test_tampered_file_overwritten_when_forced_or_confirmed() {
        for (mode, prompter) in [
            (OverwriteMode::Force, &DeclinePrompter as &dyn Prompter),
            (OverwriteMode::Prompt, &AcceptPrompter as &dyn Prompter),
        ] {
            let a = declared("a.bin", "h1");
            let mut plan = SyncPlan::classify(
                &[&a],
                local(vec![local_file("a.bin", "edited", "h1")]),
                |_| false,
            );

            plan.resolve_tampered(mode, prompter);

            assert!(plan.tampered_kept.is_empty());
            assert_eq!(plan.deletes.len(), 1);
            assert_eq!(plan.downloads.len(), 1);
        }
    }

    #[test]
    fn test_adopted_file_is_never_tampered() {
        let a = declared("a.bin", "h1");
        let plan = SyncPlan::classify(&[&a], local(vec![local_file("a.bin", "other", "")]), |_| {
            false
        });

        assert!(plan.tampered_kept.is_empty());
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn test_next_working_files_sorted() {
        let b = declared("b.bin", "h2");
        let a = declared("a.bin", "h1");
        let plan = SyncPlan::classify(&[&b, &a], LocalFiles::new(), |_| false);

        let names: Vec<_> = plan
            .next_working_files()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }
}

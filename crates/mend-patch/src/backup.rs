//! Run-scoped pristine backups.
//!
//! Every apply run that writes gets its own directory under
//! `.mend_backups/<run_id>/` mirroring the project tree. A file is captured
//! once per run, before its first write, so the run directory always holds
//! pre-run content. A `manifest.json` of blake3 hashes guards restores
//! against truncated or tampered copies.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mend_plan::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::PatchError;

/// Directory under the project root that holds backup runs.
pub const DEFAULT_BACKUP_DIR: &str = ".mend_backups";

const MANIFEST_FILE: &str = "manifest.json";

/// Factory and restore surface for a project's backup runs.
#[derive(Debug, Clone)]
pub struct BackupStore {
    project_root: PathBuf,
    backups_root: PathBuf,
}

impl BackupStore {
    /// Store rooted at `<project_root>/.mend_backups`.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let backups_root = project_root.join(DEFAULT_BACKUP_DIR);
        Self {
            project_root,
            backups_root,
        }
    }

    #[inline]
    #[must_use]
    pub fn backups_root(&self) -> &Path {
        &self.backups_root
    }

    /// Starts a run stamped from the injected clock. Nothing is written
    /// until the first capture.
    #[must_use]
    pub fn begin_run(&self, clock: &dyn Clock) -> BackupRun {
        let stamp = DateTime::from_timestamp(clock.now_ts(), 0).unwrap_or_else(Utc::now);
        let run_id = stamp.format("%Y%m%d_%H%M%S").to_string();
        BackupRun {
            dir: self.backups_root.join(&run_id),
            run_id,
            project_root: self.project_root.clone(),
            hashes: BTreeMap::new(),
        }
    }

    /// Run ids sorted ascending; empty when no backups exist yet.
    ///
    /// # Errors
    ///
    /// I/O failures while reading the backups root.
    pub fn list_runs(&self) -> Result<Vec<String>, PatchError> {
        if !self.backups_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        let entries =
            fs::read_dir(&self.backups_root).map_err(|e| PatchError::io(&self.backups_root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PatchError::io(&self.backups_root, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    runs.push(name.to_owned());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Rewrites every file captured by a run back into the project.
    ///
    /// Defaults to the latest run. Per-file problems are collected in the
    /// report instead of aborting, so a partially damaged run still restores
    /// what it can. Restoring the same run twice is safe.
    ///
    /// # Errors
    ///
    /// [`PatchError::BackupDirMissing`] when no backups root exists,
    /// [`PatchError::NoBackupRuns`] when it is empty, and
    /// [`PatchError::RunNotFound`] for an explicit id with no directory.
    pub fn restore(&self, run_id: Option<&str>) -> Result<RestoreReport, PatchError> {
        if !self.backups_root.is_dir() {
            return Err(PatchError::BackupDirMissing(self.backups_root.clone()));
        }
        let run_id = match run_id {
            Some(id) => {
                if !self.backups_root.join(id).is_dir() {
                    return Err(PatchError::RunNotFound(id.to_owned()));
                }
                id.to_owned()
            }
            None => self
                .list_runs()?
                .pop()
                .ok_or(PatchError::NoBackupRuns)?,
        };
        let run_dir = self.backups_root.join(&run_id);
        let manifest = read_manifest(&run_dir);

        let mut files = Vec::new();
        collect_files(&run_dir, &run_dir, &mut files)?;
        files.sort();

        let mut report = RestoreReport {
            run_id,
            restored: Vec::new(),
            errors: Vec::new(),
        };
        for rel in files {
            if rel.to_str() == Some(MANIFEST_FILE) {
                continue;
            }
            let from = run_dir.join(&rel);
            let bytes = match fs::read(&from) {
                Ok(bytes) => bytes,
                Err(err) => {
                    report.errors.push(format!("{}: {err}", rel.display()));
                    continue;
                }
            };
            if let Some(expected) = manifest.get(&manifest_key(&rel)) {
                let actual = blake3::hash(&bytes).to_hex().to_string();
                if actual != *expected {
                    report
                        .errors
                        .push(format!("checksum mismatch for {}", rel.display()));
                    continue;
                }
            }
            let dest = self.project_root.join(&rel);
            if let Some(parent) = dest.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    report.errors.push(format!("{}: {err}", rel.display()));
                    continue;
                }
            }
            match fs::write(&dest, &bytes) {
                Ok(()) => report.restored.push(rel),
                Err(err) => report.errors.push(format!("{}: {err}", rel.display())),
            }
        }
        debug!(
            run = %report.run_id,
            restored = report.restored.len(),
            errors = report.errors.len(),
            "restore finished"
        );
        Ok(report)
    }
}

/// One run's capture state. Created by [`BackupStore::begin_run`].
#[derive(Debug)]
pub struct BackupRun {
    run_id: String,
    dir: PathBuf,
    project_root: PathBuf,
    hashes: BTreeMap<String, String>,
}

impl BackupRun {
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True until the first capture.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Copies the current content of `rel_path` into the run directory.
    ///
    /// Only the first capture per file does anything; later calls in the
    /// same run are no-ops, which is what keeps the pristine copy pristine
    /// when several operations touch one file.
    ///
    /// # Errors
    ///
    /// I/O failures reading the source or writing the copy.
    pub fn capture(&mut self, rel_path: &Path) -> Result<(), PatchError> {
        let key = manifest_key(rel_path);
        if self.hashes.contains_key(&key) {
            return Ok(());
        }
        let source_path = self.project_root.join(rel_path);
        let bytes = fs::read(&source_path).map_err(|e| PatchError::io(&source_path, e))?;
        let dest = self.dir.join(rel_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
        }
        fs::write(&dest, &bytes).map_err(|e| PatchError::io(&dest, e))?;
        debug!(file = %rel_path.display(), run = %self.run_id, "captured pristine copy");
        self.hashes
            .insert(key, blake3::hash(&bytes).to_hex().to_string());
        Ok(())
    }

    /// Writes the hash manifest. Call after the last capture; a run with no
    /// captures writes nothing.
    ///
    /// # Errors
    ///
    /// I/O failure writing `manifest.json`.
    pub fn finish(&self) -> Result<(), PatchError> {
        if self.hashes.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&self.hashes)?;
        fs::write(&path, json).map_err(|e| PatchError::io(&path, e))
    }
}

/// What a restore did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Run that was restored.
    pub run_id: String,
    /// Project-relative paths written back, sorted.
    pub restored: Vec<PathBuf>,
    /// Per-file failures, never fatal to the rest of the restore.
    pub errors: Vec<String>,
}

fn manifest_key(rel_path: &Path) -> String {
    rel_path.display().to_string()
}

fn read_manifest(run_dir: &Path) -> BTreeMap<String, String> {
    let path = run_dir.join(MANIFEST_FILE);
    let Ok(text) = fs::read_to_string(&path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&text) {
        Ok(map) => map,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "unreadable manifest, hashes unchecked");
            BTreeMap::new()
        }
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), PatchError> {
    let entries = fs::read_dir(dir).map_err(|e| PatchError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PatchError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_plan::FixedClock;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn capture_keeps_first_content_only() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "original\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));

        run.capture(Path::new("m.py")).unwrap();
        write(project.path(), "m.py", "modified\n");
        run.capture(Path::new("m.py")).unwrap();

        let copied = read(&store.backups_root().join(run.run_id()), "m.py");
        assert_eq!(copied, "original\n");
    }

    #[test]
    fn run_id_comes_from_clock() {
        let project = TempDir::new().unwrap();
        let store = BackupStore::new(project.path());
        let run = store.begin_run(&FixedClock(0));
        assert_eq!(run.run_id(), "19700101_000000");
        assert!(run.is_empty());
    }

    #[test]
    fn finish_writes_blake3_manifest() {
        let project = TempDir::new().unwrap();
        write(project.path(), "pkg/m.py", "x = 1\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));
        run.capture(Path::new("pkg/m.py")).unwrap();
        run.finish().unwrap();

        let manifest: BTreeMap<String, String> = serde_json::from_str(
            &read(&store.backups_root().join(run.run_id()), "manifest.json"),
        )
        .unwrap();
        assert_eq!(
            manifest.get("pkg/m.py").map(String::as_str),
            Some(blake3::hash(b"x = 1\n").to_hex().as_str())
        );
    }

    #[test]
    fn restore_defaults_to_latest_run() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "first\n");
        let store = BackupStore::new(project.path());

        let mut older = store.begin_run(&FixedClock(0));
        older.capture(Path::new("m.py")).unwrap();
        older.finish().unwrap();

        write(project.path(), "m.py", "second\n");
        let mut newer = store.begin_run(&FixedClock(61));
        newer.capture(Path::new("m.py")).unwrap();
        newer.finish().unwrap();

        write(project.path(), "m.py", "third\n");
        let report = store.restore(None).unwrap();
        assert_eq!(report.run_id, "19700101_000101");
        assert_eq!(report.restored, vec![PathBuf::from("m.py")]);
        assert!(report.errors.is_empty());
        assert_eq!(read(project.path(), "m.py"), "second\n");
    }

    #[test]
    fn restore_named_run_and_rerun_safely() {
        let project = TempDir::new().unwrap();
        write(project.path(), "pkg/m.py", "keep\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));
        run.capture(Path::new("pkg/m.py")).unwrap();
        run.finish().unwrap();

        write(project.path(), "pkg/m.py", "broken\n");
        let first = store.restore(Some("19700101_000000")).unwrap();
        let second = store.restore(Some("19700101_000000")).unwrap();
        assert_eq!(first, second);
        assert_eq!(read(project.path(), "pkg/m.py"), "keep\n");
    }

    #[test]
    fn restore_never_rewrites_the_manifest_entry() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "x\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));
        run.capture(Path::new("m.py")).unwrap();
        run.finish().unwrap();

        let report = store.restore(None).unwrap();
        assert_eq!(report.restored, vec![PathBuf::from("m.py")]);
        assert!(!project.path().join("manifest.json").exists());
    }

    #[test]
    fn tampered_copy_is_reported_not_restored() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "good\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));
        run.capture(Path::new("m.py")).unwrap();
        run.finish().unwrap();

        let copy = store.backups_root().join(run.run_id()).join("m.py");
        fs::write(&copy, "tampered\n").unwrap();
        write(project.path(), "m.py", "current\n");

        let report = store.restore(None).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.errors, vec!["checksum mismatch for m.py".to_string()]);
        assert_eq!(read(project.path(), "m.py"), "current\n");
    }

    #[test]
    fn missing_backup_dir_is_an_error() {
        let project = TempDir::new().unwrap();
        let store = BackupStore::new(project.path());
        let err = store.restore(None).unwrap_err();
        assert!(err.to_string().starts_with("Backup dir not found: "));
    }

    #[test]
    fn empty_backup_dir_has_no_runs() {
        let project = TempDir::new().unwrap();
        let store = BackupStore::new(project.path());
        fs::create_dir_all(store.backups_root()).unwrap();
        let err = store.restore(None).unwrap_err();
        assert_eq!(err.to_string(), "No backup runs found");
    }

    #[test]
    fn unknown_run_id_is_an_error() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "x\n");
        let store = BackupStore::new(project.path());
        let mut run = store.begin_run(&FixedClock(0));
        run.capture(Path::new("m.py")).unwrap();
        run.finish().unwrap();

        let err = store.restore(Some("20990101_000000")).unwrap_err();
        assert_eq!(err.to_string(), "Run not found: 20990101_000000");
    }

    #[test]
    fn list_runs_sorted_ascending() {
        let project = TempDir::new().unwrap();
        let store = BackupStore::new(project.path());
        fs::create_dir_all(store.backups_root().join("20260102_000000")).unwrap();
        fs::create_dir_all(store.backups_root().join("20260101_000000")).unwrap();
        assert_eq!(
            store.list_runs().unwrap(),
            vec!["20260101_000000".to_string(), "20260102_000000".to_string()]
        );
    }
}

//! Testing utilities for the mend workspace
//!
//! Throwaway project trees, canned Python sources and staged plan files.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use mend_plan::{Operation, OperationKind};
use tempfile::TempDir;

/// Module where `os` is imported and never used.
pub const PY_UNUSED_IMPORT: &str = "import os\nx = 1\n";

/// Module with nothing to fix.
pub const PY_CLEAN: &str = "x = 1\n";

/// Module whose only import is used.
pub const PY_USED_IMPORT: &str = "import sys\n\n\ndef main():\n    return sys.argv\n";

/// A project root that cleans itself up when dropped.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        TestProject {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under the project root, creating parent directories.
    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read_file(&self, rel: &str) -> String {
        fs::read_to_string(self.dir.path().join(rel)).unwrap()
    }

    pub fn file_exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }

    /// Stage a plan file the way the planning side hands one off.
    pub fn write_plan(&self, operations: &[Operation]) -> PathBuf {
        let path = self.dir.path().join("mend_plan.json");
        let payload = serde_json::json!({ "operations": operations });
        fs::write(&path, serde_json::to_string_pretty(&payload).unwrap()).unwrap();
        path
    }
}

impl Default for TestProject {
    fn default() -> Self {
        TestProject::new()
    }
}

/// Project with one module holding an unused import, ready to fix.
pub fn project_with_unused_import(rel: &str) -> TestProject {
    let project = TestProject::new();
    project.write_file(rel, PY_UNUSED_IMPORT);
    project
}

pub fn remove_import_op(target: &str) -> Operation {
    Operation::new(OperationKind::RemoveUnusedImport, target)
}

//! Plan intake.
//!
//! The fix cycle consumes a patch plan staged by an upstream planner (or a
//! human) as plain JSON at the project root, so staging and fixing can run
//! as separate steps or separate tools.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use mend_plan::Operation;

use crate::error::CoreError;

/// Staged patch plan consumed by `mend fix`.
pub const PLAN_FILE: &str = "mend_plan.json";

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default)]
    operations: Vec<Operation>,
}

/// Load the staged plan from `<root>/mend_plan.json`.
///
/// `Ok(None)` when no plan is staged. An unreadable or malformed file is an
/// error rather than an empty plan, so a truncated write cannot turn into
/// "nothing to do".
///
/// # Errors
///
/// [`CoreError::PlanRead`] / [`CoreError::PlanParse`].
pub fn load_plan(root: &Path) -> Result<Option<Vec<Operation>>, CoreError> {
    let path = root.join(PLAN_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| CoreError::PlanRead {
        path: path.clone(),
        source,
    })?;
    let parsed: PlanFile =
        serde_json::from_str(&raw).map_err(|source| CoreError::PlanParse { path, source })?;
    Ok(Some(parsed.operations))
}

#[cfg(test)]
mod tests {
    use super::*;

    use mend_plan::OperationKind;

    #[test]
    fn missing_plan_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_plan(dir.path()).unwrap().is_none());
    }

    #[test]
    fn plan_operations_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PLAN_FILE),
            r#"{"operations": [
                {"kind": "remove_unused_import", "target_file": "app.py", "extra_params": ["os"]},
                {"kind": "split_module", "target_file": "big.py"}
            ]}"#,
        )
        .unwrap();

        let ops = load_plan(dir.path()).unwrap().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind(), OperationKind::RemoveUnusedImport);
        assert_eq!(ops[0].extra_params(), ["os"]);
        assert_eq!(ops[1].target_file(), Path::new("big.py"));
    }

    #[test]
    fn empty_operations_list_is_an_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PLAN_FILE), r#"{"operations": []}"#).unwrap();
        assert_eq!(load_plan(dir.path()).unwrap().unwrap().len(), 0);
    }

    #[test]
    fn corrupt_plan_is_an_error_not_an_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PLAN_FILE), "{\"operations\": [").unwrap();
        let err = load_plan(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::PlanParse { .. }));
    }
}

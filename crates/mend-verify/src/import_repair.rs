//! Import repair planning.
//!
//! Takes a classified verification failure and proposes operations that
//! would fix it: redirect the import at the module's real location, copy a
//! missing definition into the failing file, or stub the module outright.
//! The strategies per failure run in order; the first that produces an
//! operation wins.

use std::fs;
use std::path::{Component, Path, PathBuf};

use mend_plan::{Operation, OperationKind};
use mend_syntax::{import_insertion_point, ParsedModule};
use regex::Regex;
use tracing::{debug, info};

use crate::failure::{classify_failure, failing_file_candidates, ImportFailure};

/// Directories never searched for definitions.
pub const SKIP_DIRS: [&str; 6] = [
    "venv",
    ".venv",
    "node_modules",
    "__pycache__",
    ".git",
    ".mend_backups",
];

const STUB_DOCSTRING: &str = "\"\"\"Auto-created stub module.\"\"\"\n";

/// Derives repair operations for one failing verification output.
///
/// Returns an empty vector when the failure is not import-shaped or
/// nothing actionable can be derived, so callers can treat "no repairs"
/// uniformly.
#[must_use]
pub fn plan_import_repairs(root: &Path, output: &str) -> Vec<Operation> {
    let Some(failure) = classify_failure(output) else {
        return Vec::new();
    };
    let failing = first_project_file(root, &failing_file_candidates(output));
    debug!(?failure, failing = ?failing, "planning import repair");
    let ops = match &failure {
        ImportFailure::ModuleNotFound { module } => {
            repair_missing_module(root, module, failing.as_deref())
        }
        ImportFailure::SymbolNotFound { symbol, module } => {
            repair_missing_symbol(root, symbol, module, failing.as_deref())
        }
        ImportFailure::NameUndefined { name } => repair_undefined_name(root, name, failing.as_deref()),
    };
    if !ops.is_empty() {
        info!(count = ops.len(), "import repair proposed");
    }
    ops
}

/// Redirect the import to the module's real location, else stub it.
fn repair_missing_module(root: &Path, module: &str, failing: Option<&Path>) -> Vec<Operation> {
    if let Some(found) = find_module_file(root, module) {
        let found_dotted = dotted_module(&found);
        if let Some(op) = redirect_op(root, failing, module, &found_dotted) {
            return vec![op];
        }
    }
    stub_op(root, module, None).into_iter().collect()
}

/// Redirect the import to a file that defines the symbol, else stub the
/// module the import pointed at.
fn repair_missing_symbol(
    root: &Path,
    symbol: &str,
    module: &str,
    failing: Option<&Path>,
) -> Vec<Operation> {
    if symbol.starts_with('_') {
        return Vec::new();
    }
    for rel in project_py_files(root) {
        let Ok(content) = fs::read_to_string(root.join(&rel)) else {
            continue;
        };
        if !defines_symbol(&content, symbol) {
            continue;
        }
        let found_dotted = dotted_module(&rel);
        if let Some(op) = redirect_op(root, failing, module, &found_dotted) {
            return vec![op];
        }
    }
    // Stubbing over a module that exists would shadow real code.
    if root.join(module_rel_path(module)).exists() {
        return Vec::new();
    }
    stub_op(root, module, Some(symbol)).into_iter().collect()
}

/// Copy the definition of `name` from where it exists into the failing
/// file, right after its import block.
fn repair_undefined_name(root: &Path, name: &str, failing: Option<&Path>) -> Vec<Operation> {
    let Some(failing) = failing else {
        return Vec::new();
    };
    let Ok(source) = fs::read_to_string(root.join(failing)) else {
        return Vec::new();
    };
    if find_assignment_line(&source, name).is_some() {
        return Vec::new();
    }
    for rel in project_py_files(root) {
        if rel == failing {
            continue;
        }
        let Ok(content) = fs::read_to_string(root.join(&rel)) else {
            continue;
        };
        let Some(line) = find_assignment_line(&content, name) else {
            continue;
        };
        let patched = insert_after_imports(&source, line);
        let op = Operation::new(OperationKind::FixImport, failing)
            .with_content(patched)
            .with_description(format!(
                "copy definition of '{name}' from {} into {}",
                rel.display(),
                failing.display()
            ));
        return vec![op];
    }
    Vec::new()
}

fn redirect_op(
    root: &Path,
    failing: Option<&Path>,
    missing: &str,
    found: &str,
) -> Option<Operation> {
    let failing = failing?;
    if found == missing {
        return None;
    }
    let source = fs::read_to_string(root.join(failing)).ok()?;
    let old = format!("from {missing} import ");
    if !source.contains(&old) {
        return None;
    }
    let patched = source.replacen(&old, &format!("from {found} import "), 1);
    Some(
        Operation::new(OperationKind::FixImport, failing)
            .with_content(patched)
            .with_description(format!("redirect import of '{missing}' to '{found}'")),
    )
}

fn stub_op(root: &Path, module: &str, symbol: Option<&str>) -> Option<Operation> {
    let rel = module_rel_path(module);
    if root.join(&rel).exists() {
        return None;
    }
    let mut content = String::from(STUB_DOCSTRING);
    if let Some(symbol) = symbol {
        content.push('\n');
        content.push('\n');
        if symbol.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            content.push_str(&format!("{symbol} = None\n"));
        } else {
            content.push_str(&format!(
                "def {symbol}(*args, **kwargs):\n    raise NotImplementedError\n"
            ));
        }
    }
    Some(
        Operation::new(OperationKind::CreateModuleStub, rel)
            .with_content(content)
            .with_description(format!("stub missing module '{module}'")),
    )
}

fn first_project_file(root: &Path, candidates: &[String]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = Path::new(candidate);
        let rel = if path.is_absolute() {
            match path.strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            }
        } else {
            path
        };
        if root.join(rel).is_file() {
            return Some(rel.to_path_buf());
        }
    }
    None
}

/// Project-relative `.py` files in sorted order, skipping [`SKIP_DIRS`].
fn project_py_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();
    files
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SKIP_DIRS.contains(&name) {
                continue;
            }
            walk(root, &path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("py") {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
}

fn find_module_file(root: &Path, module: &str) -> Option<PathBuf> {
    let direct = module_rel_path(module);
    if root.join(&direct).is_file() {
        return Some(direct);
    }
    let package_init = PathBuf::from(module.replace('.', "/")).join("__init__.py");
    if root.join(&package_init).is_file() {
        return Some(package_init);
    }
    let last = module.rsplit('.').next()?;
    project_py_files(root)
        .into_iter()
        .find(|rel| rel.file_stem().and_then(|s| s.to_str()) == Some(last))
}

fn module_rel_path(module: &str) -> PathBuf {
    PathBuf::from(module.replace('.', "/")).with_extension("py")
}

/// Dotted module path for a project-relative file; `pkg/__init__.py`
/// collapses to `pkg`.
fn dotted_module(rel: &Path) -> String {
    let base = rel.with_extension("");
    let mut parts: Vec<&str> = base
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    if parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

fn defines_symbol(content: &str, symbol: &str) -> bool {
    content.lines().any(|line| {
        line.starts_with(&format!("def {symbol}("))
            || line.starts_with(&format!("async def {symbol}("))
            || line.starts_with(&format!("class {symbol}("))
            || line.starts_with(&format!("class {symbol}:"))
    })
}

/// First top-level single-line assignment of `name`, annotated or not.
fn find_assignment_line<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(r"(?m)^{}\s*(?::[^=\n]+)?=\s*\S.*$", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.find(content).map(|m| m.as_str())
}

fn insert_after_imports(source: &str, line: &str) -> String {
    let at = ParsedModule::parse(source)
        .ok()
        .filter(|module| !module.has_errors())
        .map_or(0, |module| import_insertion_point(&module));
    let mut patched = String::with_capacity(source.len() + line.len() + 1);
    patched.push_str(&source[..at]);
    patched.push_str(line);
    patched.push('\n');
    patched.push_str(&source[at..]);
    patched
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn relocated_module_import_is_redirected() {
        let project = TempDir::new().unwrap();
        write(project.path(), "pkg/util.py", "def parse(raw):\n    return raw\n");
        write(project.path(), "m.py", "from util import parse\n\nx = parse('1')\n");
        let output = concat!(
            "  File \"m.py\", line 1, in <module>\n",
            "ModuleNotFoundError: No module named 'util'\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::FixImport);
        assert_eq!(ops[0].target_file(), Path::new("m.py"));
        assert_eq!(
            ops[0].content(),
            Some("from pkg.util import parse\n\nx = parse('1')\n")
        );
    }

    #[test]
    fn unfindable_module_gets_a_stub() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "from ghost import thing\n");
        let output = concat!(
            "  File \"m.py\", line 1, in <module>\n",
            "ModuleNotFoundError: No module named 'ghost'\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::CreateModuleStub);
        assert_eq!(ops[0].target_file(), Path::new("ghost.py"));
        assert_eq!(ops[0].content(), Some("\"\"\"Auto-created stub module.\"\"\"\n"));
    }

    #[test]
    fn moved_symbol_redirects_to_its_definer() {
        let project = TempDir::new().unwrap();
        write(project.path(), "pkg/a.py", "VALUE = 1\n");
        write(
            project.path(),
            "pkg/b.py",
            "def helper_fn(x):\n    return x\n",
        );
        write(
            project.path(),
            "tests/test_m.py",
            "from pkg.a import helper_fn\n",
        );
        let output = concat!(
            "tests/test_m.py:1: in <module>\n",
            "E   ImportError: cannot import name 'helper_fn' from 'pkg.a'\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target_file(), Path::new("tests/test_m.py"));
        assert_eq!(ops[0].content(), Some("from pkg.b import helper_fn\n"));
    }

    #[test]
    fn missing_symbol_with_no_definer_stubs_the_module() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "from vanished import helper_fn\n");
        let output = concat!(
            "  File \"m.py\", line 1, in <module>\n",
            "ImportError: cannot import name 'helper_fn' from 'vanished'\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::CreateModuleStub);
        assert_eq!(ops[0].target_file(), Path::new("vanished.py"));
        let content = ops[0].content().unwrap();
        assert!(content.contains("def helper_fn(*args, **kwargs):"));
    }

    #[test]
    fn constant_symbol_stubs_as_assignment() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "from settings import MAX_SIZE\n");
        let output = "ImportError: cannot import name 'MAX_SIZE' from 'settings'\n  File \"m.py\", line 1\n";

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].content().unwrap().contains("MAX_SIZE = None\n"));
    }

    #[test]
    fn private_symbols_are_left_alone() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "from pkg import _secret\n");
        let output = "ImportError: cannot import name '_secret' from 'pkg'\n";
        assert!(plan_import_repairs(project.path(), output).is_empty());
    }

    #[test]
    fn undefined_name_is_copied_after_imports() {
        let project = TempDir::new().unwrap();
        write(project.path(), "conf.py", "LIMIT = 10\nOTHER = 2\n");
        write(
            project.path(),
            "m.py",
            "import os\n\ndef check(p):\n    return len(p) < LIMIT\n",
        );
        let output = concat!(
            "  File \"m.py\", line 4, in check\n",
            "NameError: name 'LIMIT' is not defined\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target_file(), Path::new("m.py"));
        assert_eq!(
            ops[0].content(),
            Some("import os\nLIMIT = 10\n\ndef check(p):\n    return len(p) < LIMIT\n")
        );
    }

    #[test]
    fn name_already_defined_locally_needs_nothing() {
        let project = TempDir::new().unwrap();
        write(project.path(), "m.py", "LIMIT = 5\nx = LIMIT\n");
        let output = "  File \"m.py\", line 2\nNameError: name 'LIMIT' is not defined\n";
        assert!(plan_import_repairs(project.path(), output).is_empty());
    }

    #[test]
    fn search_ignores_backup_directories() {
        let project = TempDir::new().unwrap();
        write(
            project.path(),
            ".mend_backups/20260101_000000/real.py",
            "def helper_fn(x):\n    return x\n",
        );
        write(project.path(), "m.py", "from real import helper_fn\n");
        let output = concat!(
            "  File \"m.py\", line 1\n",
            "ImportError: cannot import name 'helper_fn' from 'real'\n",
        );

        let ops = plan_import_repairs(project.path(), output);
        // The only definer is inside the backup tree, so a stub is the answer.
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::CreateModuleStub);
    }

    #[test]
    fn passing_output_plans_nothing() {
        let project = TempDir::new().unwrap();
        assert!(plan_import_repairs(project.path(), "4 passed\n").is_empty());
    }

    #[test]
    fn dotted_module_collapses_init() {
        assert_eq!(dotted_module(Path::new("pkg/util.py")), "pkg.util");
        assert_eq!(dotted_module(Path::new("pkg/__init__.py")), "pkg");
        assert_eq!(dotted_module(Path::new("top.py")), "top");
    }
}

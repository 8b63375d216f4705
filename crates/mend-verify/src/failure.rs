//! Verification failure classification.
//!
//! Recognizes the import-shaped Python failures a follow-up repair can
//! address, and digs the implicated file out of pytest/traceback output.

use regex::Regex;

/// An import-shaped failure parsed from verification output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportFailure {
    /// `ModuleNotFoundError: No module named 'pkg.helper'`
    ModuleNotFound {
        /// Dotted module path the import could not find.
        module: String,
    },
    /// `ImportError: cannot import name 'parse' from 'pkg.helper'`
    SymbolNotFound {
        /// Name the import asked for.
        symbol: String,
        /// Module the import pointed at.
        module: String,
    },
    /// `NameError: name 'LIMIT' is not defined`
    NameUndefined {
        /// The undefined name.
        name: String,
    },
}

/// Classifies combined verification output. Module errors win over symbol
/// errors, which win over bare name errors, since a missing module usually
/// drags the other two behind it.
#[must_use]
pub fn classify_failure(output: &str) -> Option<ImportFailure> {
    if let Some(module) = parse_module_not_found(output) {
        return Some(ImportFailure::ModuleNotFound { module });
    }
    if let Some((symbol, module)) = parse_symbol_not_found(output) {
        return Some(ImportFailure::SymbolNotFound { symbol, module });
    }
    parse_name_undefined(output).map(|name| ImportFailure::NameUndefined { name })
}

fn parse_module_not_found(output: &str) -> Option<String> {
    // Example:
    //   E   ModuleNotFoundError: No module named 'pkg.helper'
    let re = Regex::new(r"ModuleNotFoundError: No module named '(?P<module>[^']+)'").ok()?;
    Some(re.captures(output)?.name("module")?.as_str().to_string())
}

fn parse_symbol_not_found(output: &str) -> Option<(String, String)> {
    // Example:
    //   E   ImportError: cannot import name 'parse' from 'pkg.helper'
    let re =
        Regex::new(r"cannot import name '(?P<symbol>[^']+)' from '(?P<module>[^']+)'").ok()?;
    let caps = re.captures(output)?;
    Some((
        caps.name("symbol")?.as_str().to_string(),
        caps.name("module")?.as_str().to_string(),
    ))
}

fn parse_name_undefined(output: &str) -> Option<String> {
    // Example:
    //   E   NameError: name 'LIMIT' is not defined
    let re = Regex::new(r"name '(?P<name>[^']+)' is not defined").ok()?;
    Some(re.captures(output)?.name("name")?.as_str().to_string())
}

/// Paths implicated by the output, most reliable source first: pytest
/// collection errors, short-traceback summary lines, `File "..."` frames,
/// then any `.py` mention in the eight lines before the error itself.
#[must_use]
pub fn failing_file_candidates(output: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    // Example:
    //   ________________ ERROR collecting tests/test_api.py ________________
    push_matches(&mut candidates, output, r"ERROR collecting (?P<path>\S+\.py)");
    // Example:
    //   tests/test_api.py:2: in <module>
    push_matches(&mut candidates, output, r"(?P<path>\S+\.py):\d+: in ");
    // Example:
    //   File "pkg/mod.py", line 3, in <module>
    push_matches(&mut candidates, output, r#"File "(?P<path>[^"]+\.py)""#);
    for path in lookback_candidates(output) {
        push_unique(&mut candidates, path);
    }
    candidates
}

fn push_matches(candidates: &mut Vec<String>, output: &str, pattern: &str) {
    let Ok(re) = Regex::new(pattern) else {
        return;
    };
    for caps in re.captures_iter(output) {
        if let Some(m) = caps.name("path") {
            push_unique(candidates, normalize(m.as_str()));
        }
    }
}

fn push_unique(candidates: &mut Vec<String>, path: String) {
    if !candidates.contains(&path) {
        candidates.push(path);
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").replace('\\', "/")
}

fn lookback_candidates(output: &str) -> Vec<String> {
    let Ok(err_re) = Regex::new(r"ModuleNotFoundError|ImportError|NameError") else {
        return Vec::new();
    };
    let Ok(py_re) = Regex::new(r"(?P<path>[\w./-]+\.py)\b") else {
        return Vec::new();
    };
    let lines: Vec<&str> = output.lines().collect();
    let mut found = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if !err_re.is_match(line) {
            continue;
        }
        // Nearest mention above the error line wins.
        for back in lines[index.saturating_sub(8)..index].iter().rev() {
            if let Some(m) = py_re.captures(back).and_then(|caps| caps.name("path")) {
                found.push(normalize(m.as_str()));
                break;
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COLLECT_ERROR: &str = concat!(
        "==================================== ERRORS ====================================\n",
        "________________ ERROR collecting tests/test_api.py ________________\n",
        "ImportError while importing test module '/proj/tests/test_api.py'.\n",
        "tests/test_api.py:2: in <module>\n",
        "    from pkg.helper import parse\n",
        "E   ModuleNotFoundError: No module named 'pkg.helper'\n",
    );

    #[test]
    fn module_not_found_is_classified() {
        assert_eq!(
            classify_failure(COLLECT_ERROR),
            Some(ImportFailure::ModuleNotFound {
                module: "pkg.helper".into()
            })
        );
    }

    #[test]
    fn symbol_not_found_is_classified() {
        let output = "E   ImportError: cannot import name 'parse' from 'pkg.helper' (/proj/pkg/helper.py)\n";
        assert_eq!(
            classify_failure(output),
            Some(ImportFailure::SymbolNotFound {
                symbol: "parse".into(),
                module: "pkg.helper".into()
            })
        );
    }

    #[test]
    fn name_error_is_classified() {
        let output = "E   NameError: name 'LIMIT' is not defined\n";
        assert_eq!(
            classify_failure(output),
            Some(ImportFailure::NameUndefined {
                name: "LIMIT".into()
            })
        );
    }

    #[test]
    fn module_error_outranks_name_error() {
        let output = concat!(
            "E   NameError: name 'x' is not defined\n",
            "E   ModuleNotFoundError: No module named 'ghost'\n",
        );
        assert_eq!(
            classify_failure(output),
            Some(ImportFailure::ModuleNotFound {
                module: "ghost".into()
            })
        );
    }

    #[test]
    fn clean_output_classifies_as_nothing() {
        assert_eq!(classify_failure("3 passed in 0.12s\n"), None);
        assert!(failing_file_candidates("3 passed in 0.12s\n").is_empty());
    }

    #[test]
    fn collection_error_names_the_test_file_first() {
        let candidates = failing_file_candidates(COLLECT_ERROR);
        assert_eq!(candidates.first().map(String::as_str), Some("tests/test_api.py"));
    }

    #[test]
    fn file_frames_are_picked_up() {
        let output = concat!(
            "Traceback (most recent call last):\n",
            "  File \"pkg/mod.py\", line 3, in <module>\n",
            "    from ghost import thing\n",
            "ModuleNotFoundError: No module named 'ghost'\n",
        );
        let candidates = failing_file_candidates(output);
        assert!(candidates.contains(&"pkg/mod.py".to_string()));
    }

    #[test]
    fn lookback_finds_nearby_mentions() {
        let output = concat!(
            "checking pkg/weird.py\n",
            "something unrelated\n",
            "NameError: name 'X' is not defined\n",
        );
        let candidates = failing_file_candidates(output);
        assert_eq!(candidates, vec!["pkg/weird.py".to_string()]);
    }

    #[test]
    fn candidates_are_deduplicated_in_order() {
        let output = concat!(
            "tests/test_a.py:1: in <module>\n",
            "  File \"tests/test_a.py\", line 1, in <module>\n",
            "  File \"pkg/b.py\", line 9, in helper\n",
            "E   ImportError: cannot import name 'x' from 'pkg.b'\n",
        );
        let candidates = failing_file_candidates(output);
        assert_eq!(
            candidates,
            vec!["tests/test_a.py".to_string(), "pkg/b.py".to_string()]
        );
    }
}

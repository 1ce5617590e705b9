use std::path::Path;

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SyntaxError,
    ImportError,
    AssertionError,
    CollectionError,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureClassification {
    pub kind: FailureKind,
    /// Whether this failure kind is the expected outcome of a RED phase.
    pub expected: bool,
}

/// Static (text-level) analysis of a generated test file, rejecting
/// trivial/empty/cheating patterns before a RED result is trusted.
///
/// Generated tests may target any language the task's toolchain produces, so
/// this operates on source text with regex heuristics rather than parsing a
/// single language's AST.
pub struct TestValidator {
    test_path: std::path::PathBuf,
    target_module: Option<String>,
}

fn test_function_re() -> Regex {
    Regex::new(r"(?m)^\s*(?:async\s+)?(?:def|fn)\s+(test_\w+)\s*\([^)]*\)[^\{:]*[:\{]")
        .expect("static pattern compiles")
}

impl TestValidator {
    pub fn new(test_path: impl Into<std::path::PathBuf>, target_module: Option<String>) -> Self {
        Self {
            test_path: test_path.into(),
            target_module,
        }
    }

    fn source(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.test_path)?)
    }

    /// Flags `assert True` / `assert true` and literal-vs-literal comparisons.
    /// `assert false` / `assert False` is deliberately not trivial: it is a
    /// legitimate force-fail pattern.
    pub fn check_trivial_assertions(&self) -> Result<Vec<String>> {
        let source = self.source()?;
        let mut trivial = Vec::new();

        let true_literal = Regex::new(r"(?i)\bassert\s*\(?\s*true\s*\)?\s*$").unwrap();
        let literal_cmp = Regex::new(
            r#"(?i)\bassert\s+(?:\d+(?:\.\d+)?|"[^"]*"|'[^']*')\s*==\s*(?:\d+(?:\.\d+)?|"[^"]*"|'[^']*')"#,
        )
        .unwrap();

        for (lineno, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if true_literal.is_match(trimmed) {
                trivial.push(format!("line {}: assert true", lineno + 1));
            } else if literal_cmp.is_match(trimmed) {
                trivial.push(format!("line {}: literal comparison", lineno + 1));
            }
        }
        Ok(trivial)
    }

    /// Finds `test_*` functions whose body has no assertion and no
    /// exception-expectation context (`pytest.raises`, `assert_raises`,
    /// `#[should_panic]`, `expect_err`).
    pub fn check_empty_tests(&self) -> Result<Vec<String>> {
        let source = self.source()?;
        let re = test_function_re();
        let mut empty = Vec::new();

        let bodies = Self::split_function_bodies(&source, &re);
        for (name, body) in bodies {
            let meaningful: Vec<&str> = body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .filter(|l| !Self::is_docstring_or_noop(l))
                .collect();

            if meaningful.is_empty() {
                empty.push(format!("{name}: only contains pass/docstring"));
            } else if !Self::has_assertion(&body) {
                empty.push(format!("{name}: no assert statements"));
            }
        }
        Ok(empty)
    }

    fn is_docstring_or_noop(line: &str) -> bool {
        line == "pass"
            || line == "{}"
            || line.starts_with("\"\"\"")
            || line.starts_with("'''")
            || line == "//"
            || line.starts_with("# ")
    }

    fn has_assertion(body: &str) -> bool {
        let assertion_markers = [
            "assert", "assert_eq!", "assert_ne!", "assert!", "pytest.raises", "assertRaises",
            "should_panic", "expect_err", "Assert.", "expect(",
        ];
        assertion_markers.iter().any(|m| body.contains(m))
    }

    /// Splits the source into (function name, body-until-next-function) pairs.
    fn split_function_bodies(source: &str, re: &Regex) -> Vec<(String, String)> {
        let matches: Vec<_> = re.captures_iter(source).collect();
        let mut out = Vec::new();
        for (i, caps) in matches.iter().enumerate() {
            let name = caps[1].to_string();
            let start = caps.get(0).unwrap().end();
            let end = matches.get(i + 1).map(|m| m.get(0).unwrap().start()).unwrap_or(source.len());
            out.push((name, source[start..end].to_string()));
        }
        out
    }

    /// Warns (never fails) if the target module is not referenced by any
    /// import-like form.
    pub fn check_imports(&self) -> Result<(bool, Option<String>)> {
        let Some(target_module) = &self.target_module else {
            return Ok((true, None));
        };
        let source = self.source()?;
        let module_name = target_module.trim_end_matches(".py").trim_end_matches(".rs");

        let found = source.lines().any(|line| {
            let line = line.trim();
            (line.starts_with("import ") || line.starts_with("from ") || line.starts_with("use "))
                && line.contains(module_name)
        });

        if found {
            Ok((true, None))
        } else {
            Ok((false, Some(format!("module '{module_name}' not imported"))))
        }
    }

    pub fn classify_failure(&self, output: &str) -> FailureClassification {
        let lower = output.to_lowercase();

        if lower.contains("syntaxerror") {
            return FailureClassification {
                kind: FailureKind::SyntaxError,
                expected: false,
            };
        }
        if lower.contains("modulenotfounderror") || lower.contains("importerror") {
            return FailureClassification {
                kind: FailureKind::ImportError,
                expected: true,
            };
        }
        if lower.contains("assertionerror") || lower.contains("assertion failed") {
            return FailureClassification {
                kind: FailureKind::AssertionError,
                expected: true,
            };
        }
        if lower.contains("error collecting") {
            return FailureClassification {
                kind: FailureKind::CollectionError,
                expected: false,
            };
        }
        FailureClassification {
            kind: FailureKind::Unknown,
            expected: true,
        }
    }

    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for t in self.check_trivial_assertions()? {
            errors.push(format!("trivial assertion: {t}"));
        }
        for e in self.check_empty_tests()? {
            errors.push(format!("empty test: {e}"));
        }

        let (has_import, reason) = self.check_imports()?;
        if !has_import {
            warnings.push(format!("missing import: {}", reason.unwrap_or_default()));
        }

        Ok(ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        })
    }
}

pub fn validate(test_path: &Path, target_module: Option<String>) -> Result<ValidationResult> {
    TestValidator::new(test_path, target_module).validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_assert_true_as_trivial() {
        let file = write_file("def test_x():\n    assert True\n");
        let validator = TestValidator::new(file.path(), None);
        let trivial = validator.check_trivial_assertions().unwrap();
        assert_eq!(trivial.len(), 1);
    }

    #[test]
    fn does_not_flag_assert_false() {
        let file = write_file("def test_x():\n    assert False\n");
        let validator = TestValidator::new(file.path(), None);
        assert!(validator.check_trivial_assertions().unwrap().is_empty());
    }

    #[test]
    fn flags_literal_comparison() {
        let file = write_file("def test_x():\n    assert 1 == 1\n");
        let validator = TestValidator::new(file.path(), None);
        assert_eq!(validator.check_trivial_assertions().unwrap().len(), 1);
    }

    #[test]
    fn flags_empty_function_body() {
        let file = write_file("def test_x():\n    pass\n");
        let validator = TestValidator::new(file.path(), None);
        assert_eq!(validator.check_empty_tests().unwrap().len(), 1);
    }

    #[test]
    fn accepts_function_with_assertion() {
        let file = write_file("def test_x():\n    assert add(2, 3) == 5\n");
        let validator = TestValidator::new(file.path(), None);
        assert!(validator.check_empty_tests().unwrap().is_empty());
    }

    #[test]
    fn accepts_exception_expectation_context() {
        let file = write_file("def test_x():\n    with pytest.raises(ValueError):\n        divide(1, 0)\n");
        let validator = TestValidator::new(file.path(), None);
        assert!(validator.check_empty_tests().unwrap().is_empty());
    }

    #[test]
    fn warns_but_does_not_fail_on_missing_import() {
        let file = write_file("def test_x():\n    assert 1 == 2\n");
        let validator = TestValidator::new(file.path(), Some("add".to_string()));
        let result = validator.validate().unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn classifies_import_error_as_expected() {
        let validator = TestValidator::new("unused", None);
        let classification = validator.classify_failure("ModuleNotFoundError: no module named 'add'");
        assert_eq!(classification.kind, FailureKind::ImportError);
        assert!(classification.expected);
    }

    #[test]
    fn classifies_syntax_error_as_unexpected() {
        let validator = TestValidator::new("unused", None);
        let classification = validator.classify_failure("SyntaxError: invalid syntax");
        assert_eq!(classification.kind, FailureKind::SyntaxError);
        assert!(!classification.expected);
    }
}

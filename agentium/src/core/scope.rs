//! Package-scope rules for multi-package repositories.
//!
//! Paths are repository-relative with `/` separators, as reported by git.

use serde::{Deserialize, Serialize};

const EXEMPT_ROOT_FILES: [&str; 4] = [
    "package.json",
    "pnpm-lock.yaml",
    "package-lock.json",
    "yarn.lock",
];

const EXEMPT_PREFIXES: [&str; 1] = [".github/workflows/"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<String>,
    pub exempt: Vec<String>,
}

/// True when `path` lies strictly inside `package`.
pub fn is_in_scope(path: &str, package: &str) -> bool {
    let package = package.trim_end_matches('/');
    if package.is_empty() {
        return true;
    }
    path.strip_prefix(package)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Root manifests, root lockfiles and CI workflows may change from any package.
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_ROOT_FILES.contains(&path)
        || EXEMPT_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeValidator {
    package: Option<String>,
}

impl ScopeValidator {
    pub fn new(package: Option<String>) -> Self {
        let package = package
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { package }
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn validate_files<S: AsRef<str>>(&self, files: &[S]) -> ValidationResult {
        let Some(package) = &self.package else {
            return ValidationResult {
                valid: true,
                ..ValidationResult::default()
            };
        };
        let mut result = ValidationResult::default();
        for file in files {
            let path = file.as_ref();
            if is_in_scope(path, package) {
                continue;
            }
            if is_exempt(path) {
                result.exempt.push(path.to_string());
            } else {
                result.violations.push(path.to_string());
            }
        }
        result.valid = result.violations.is_empty();
        result
    }

    /// Message handed back to the agent after a violation, or empty when valid.
    pub fn format_violation_error(&self, result: &ValidationResult) -> String {
        if result.valid {
            return String::new();
        }
        let package = self.package.as_deref().unwrap_or_default();
        let count = result.violations.len();
        let (noun, was) = if count == 1 {
            ("file is", "was")
        } else {
            ("files are", "were")
        };
        let mut message = format!(
            "Scope violation: changes must stay within package '{package}'. \
             The following {count} {noun} outside the allowed scope and {was} reverted:\n"
        );
        for path in &result.violations {
            message.push_str("  - ");
            message.push_str(path);
            message.push('\n');
        }
        message.push_str("Redo the work touching only files under ");
        message.push_str(package);
        message.push('/');
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_scope_requires_separator_boundary() {
        assert!(is_in_scope("packages/core/src/a.ts", "packages/core"));
        assert!(is_in_scope("packages/core/src/a.ts", "packages/core/"));
        assert!(!is_in_scope("packages/core-utils/a.ts", "packages/core"));
        assert!(!is_in_scope("packages/core", "packages/core"));
        assert!(!is_in_scope("other/packages/core/a.ts", "packages/core"));
    }

    #[test]
    fn exemptions_are_root_only() {
        assert!(is_exempt("package.json"));
        assert!(is_exempt("pnpm-lock.yaml"));
        assert!(is_exempt(".github/workflows/ci.yml"));
        assert!(!is_exempt("packages/other/package.json"));
        assert!(!is_exempt(".github/CODEOWNERS"));
    }

    #[test]
    fn all_exempt_changes_are_valid() {
        let validator = ScopeValidator::new(Some("packages/core".to_string()));
        let result = validator.validate_files(&["package.json", "yarn.lock", ".github/workflows/x.yml"]);
        assert!(result.valid);
        assert_eq!(result.exempt.len(), 3);
        assert!(validator.format_violation_error(&result).is_empty());
    }

    #[test]
    fn violations_are_listed() {
        let validator = ScopeValidator::new(Some("packages/core".to_string()));
        let result = validator.validate_files(&[
            "packages/core/src/a.ts",
            "packages/web/src/b.ts",
            "packages/web/package.json",
        ]);
        assert!(!result.valid);
        assert_eq!(
            result.violations,
            vec!["packages/web/src/b.ts", "packages/web/package.json"]
        );
        let message = validator.format_violation_error(&result);
        assert!(message.starts_with("Scope violation"));
        assert!(message.contains("The following 2 files are outside the allowed scope"));
        assert!(message.contains("  - packages/web/src/b.ts\n"));
        assert!(message.contains("  - packages/web/package.json\n"));
    }

    #[test]
    fn no_package_is_always_valid() {
        let validator = ScopeValidator::new(None);
        assert!(validator.validate_files(&["anything/at/all.rs"]).valid);
        assert_eq!(ScopeValidator::new(Some("  ".to_string())).package(), None);
    }
}

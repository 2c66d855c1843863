//! Version policies and the lightweight `version:` line scan.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::error::Error;

/// Format accepted by the default policy: "1", "1.0", "1.2.3", ...
static VALID_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)*$").expect("valid version pattern"));

static DEFAULT_POLICY: Lazy<RwLock<VersionPolicy>> =
    Lazy::new(|| RwLock::new(VersionPolicy::numeric()));

/// Decides whether a file's declared version matches the target version.
///
/// `true` means "versions match, no migration needed". The process-wide
/// default is [`VersionPolicy::numeric`]; it can be replaced once at startup
/// via [`set_default_policy`], and overridden per record or per store at
/// construction time.
#[derive(Clone)]
pub struct VersionPolicy(Arc<dyn Fn(&str, &str) -> bool + Send + Sync>);

impl VersionPolicy {
    pub fn new(compare: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(compare))
    }

    /// Validates both strings against `^\d+(\.\d+)*$` and compares them
    /// literally, ignoring ASCII case. A string that fails validation reports
    /// a mismatch (forcing migration) rather than erroring.
    pub fn numeric() -> Self {
        Self::new(|current, target| {
            if !VALID_VERSION.is_match(target) || !VALID_VERSION.is_match(current) {
                return false;
            }
            current.eq_ignore_ascii_case(target)
        })
    }

    pub fn matches(&self, current: &str, target: &str) -> bool {
        (self.0)(current, target)
    }
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self::numeric()
    }
}

impl std::fmt::Debug for VersionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VersionPolicy(..)")
    }
}

/// Returns the process-wide default policy used by records and stores that
/// were not given an explicit one.
pub fn default_policy() -> VersionPolicy {
    DEFAULT_POLICY.read().clone()
}

/// Replaces the process-wide default policy.
///
/// Intended to be called once at process start, before any record or store is
/// constructed. Records already constructed keep the policy they captured;
/// mutating the default concurrently with in-flight construction is not
/// supported.
pub fn set_default_policy(policy: VersionPolicy) {
    *DEFAULT_POLICY.write() = policy;
}

/// Extracts the declared version from a config file without parsing the
/// document.
///
/// The scan reads lines, skips any whose trimmed form starts with `#`, and
/// takes the first remaining line whose trimmed form starts with the literal
/// prefix `version:`. The text after the prefix is trimmed and stripped of
/// surrounding single or double quotes. Nested occurrences are not
/// recognized; a file with no matching line fails with
/// [`Error::VersionMissing`].
pub fn scan_version(path: &Path) -> Result<String, Error> {
    let contents = fs::read_to_string(path)?;
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("version:") {
            let value = rest.trim().trim_matches(|c| c == '\'' || c == '"');
            return Ok(value.to_string());
        }
    }
    Err(Error::VersionMissing {
        path: path.to_path_buf(),
    })
}

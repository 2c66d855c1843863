//! The shared load / verify-version / backup / merge sequence.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::codec::{self, CodecOptions, ConfigData};
use crate::error::Error;
use crate::version::{self, VersionPolicy};

/// File name without its final extension.
pub(crate) fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(dot) => name[..dot].to_string(),
        None => name,
    }
}

fn hex_suffix() -> String {
    format!("{:04x}", rand::random::<u16>())
}

/// One run of the migration pipeline over a single file. Both
/// [`ConfigRecord`](crate::ConfigRecord) and
/// [`BulkConfigStore`](crate::BulkConfigStore) drive their loads through
/// this.
pub(crate) struct Pipeline<'a> {
    /// Directory the backup subdirectory is created under.
    pub dir: &'a Path,
    pub options: &'a CodecOptions,
    pub target_version: Option<&'a str>,
    pub backup_dir: &'a str,
    pub extension: &'a str,
    pub policy: &'a VersionPolicy,
}

impl Pipeline<'_> {
    /// Runs the pipeline for `file` and returns the canonical instance.
    ///
    /// Missing file: materialized from defaults, target version stamped if
    /// configured, no backup. No target version: merge-update only, no
    /// version logic. Otherwise the declared version is scanned and compared
    /// through the policy; a mismatch copies the original bytes into the
    /// backup directory before the merge-update stamps the target.
    ///
    /// Re-running immediately with no external edits takes the match branch
    /// and produces no new backup.
    pub fn run<T: ConfigData>(&self, file: &Path) -> Result<T, Error> {
        if !file.exists() {
            debug!(file = %file.display(), "materializing config from defaults");
            return codec::update(file, self.options, self.target_version);
        }
        let Some(target) = self.target_version else {
            return codec::update(file, self.options, None);
        };
        let current = version::scan_version(file)?;
        if self.policy.matches(&current, target) {
            // Match branch: the version already present is kept verbatim.
            return codec::update(file, self.options, Some(&current));
        }
        let backup = self.backup(file, &current)?;
        info!(
            file = %file.display(),
            from = %current,
            to = %target,
            backup = %backup.display(),
            "migrating config"
        );
        codec::update(file, self.options, Some(target))
    }

    /// Copies the unmigrated file into the backup subdirectory, creating it
    /// on first use. Name collisions are statistically negligible and not
    /// retried.
    fn backup(&self, file: &Path, current: &str) -> Result<PathBuf, Error> {
        let backup_dir = self.dir.join(self.backup_dir);
        if !backup_dir.exists() {
            fs::create_dir_all(&backup_dir)?;
        }
        let name = format!(
            "{}-v{}-{}.{}",
            base_name(file),
            current,
            hex_suffix(),
            self.extension
        );
        let dest = backup_dir.join(name);
        fs::copy(file, &dest)?;
        Ok(dest)
    }
}

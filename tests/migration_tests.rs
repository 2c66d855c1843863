//! The load / verify-version / backup / merge pipeline, end to end.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use yamlcfg::{version, CodecOptions, ConfigRecord, Error, VersionPolicy};

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
    max_connections: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            max_connections: 100,
        }
    }
}

fn backup_files(dir: &Path) -> Vec<String> {
    let backup = dir.join("old");
    if !backup.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = fs::read_dir(&backup)
        .expect("Failed to read backup directory")
        .map(|entry| entry.expect("Failed to read entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn mismatched_version_creates_one_backup_with_original_bytes() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    let original = "version: '1.0'\nhost: example.org\nport: 9000\n";
    fs::write(&path, original).expect("Failed to write config file");

    let record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("2.0")
        .build()
        .expect("Failed to build record");

    let backups = backup_files(dir.path());
    assert_eq!(backups.len(), 1, "Exactly one backup expected");
    let name = &backups[0];
    assert!(
        name.starts_with("server-v1.0-") && name.ends_with(".yml"),
        "Unexpected backup name: {name}"
    );
    let backed_up = fs::read_to_string(dir.path().join("old").join(name))
        .expect("Failed to read backup");
    assert_eq!(backed_up, original, "Backup must hold the unmigrated bytes");

    // The live file now declares the target version and keeps file values.
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "2.0"
    );
    assert_eq!(record.get().host, "example.org");
    assert_eq!(record.get().port, 9000);
    assert_eq!(record.get().max_connections, 100, "Missing field filled from defaults");
}

#[test]
fn pipeline_is_idempotent_across_two_runs() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    fs::write(&path, "version: '1.0'\nhost: example.org\n").expect("Failed to write config file");

    let build = || {
        ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
            .target_version("2.0")
            .build()
            .expect("Failed to build record")
    };
    build();
    build();

    assert_eq!(
        backup_files(dir.path()).len(),
        1,
        "Second run takes the match branch and creates no new backup"
    );
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "2.0"
    );
}

#[test]
fn matching_version_skips_backup() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    fs::write(&path, "version: '2.0'\nhost: example.org\n").expect("Failed to write config file");

    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("2.0")
        .build()
        .expect("Failed to build record");

    assert!(backup_files(dir.path()).is_empty());
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "2.0"
    );
}

#[test]
fn match_branch_preserves_declared_version_verbatim() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    fs::write(&path, "version: '1.0.0'\nhost: example.org\n").expect("Failed to write config file");

    // A policy that treats 1.0.0 and 1.0 as the same line of versions.
    let lenient = VersionPolicy::new(|current, target| current.starts_with(target));
    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("1.0")
        .policy(lenient)
        .build()
        .expect("Failed to build record");

    assert!(backup_files(dir.path()).is_empty());
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "1.0.0",
        "The match branch must not restamp the version"
    );
}

#[test]
fn invalid_version_string_forces_migration() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    fs::write(&path, "version: v1\nhost: example.org\n").expect("Failed to write config file");

    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("1.0")
        .build()
        .expect("Failed to build record");

    let backups = backup_files(dir.path());
    assert_eq!(backups.len(), 1);
    assert!(backups[0].starts_with("server-vv1-"));
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "1.0"
    );
}

#[test]
fn missing_version_line_is_fatal_when_target_configured() {
    let dir = temp_dir();
    fs::write(dir.path().join("server.yml"), "host: example.org\n")
        .expect("Failed to write config file");

    let result = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("1.0")
        .build();
    assert!(matches!(result, Err(Error::VersionMissing { .. })));
}

#[test]
fn no_target_version_means_no_version_logic() {
    let dir = temp_dir();
    let path = dir.path().join("server.yml");
    // Unknown keys and no version line at all.
    fs::write(&path, "host: example.org\nlegacy_key: true\n").expect("Failed to write config file");

    let record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .build()
        .expect("Failed to build record");

    assert_eq!(record.get().host, "example.org");
    let rewritten = fs::read_to_string(&path).expect("Failed to read config file");
    assert!(
        !rewritten.contains("legacy_key"),
        "Unknown keys are dropped by the merge-update"
    );
    assert!(
        version::scan_version(&path).is_err(),
        "No version line is written without a target version"
    );
    assert!(backup_files(dir.path()).is_empty());
}

#[test]
fn custom_backup_dir_name_is_used() {
    let dir = temp_dir();
    fs::write(dir.path().join("server.yml"), "version: '1.0'\n").expect("Failed to write config file");

    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .target_version("2.0")
        .backup_dir("archive")
        .build()
        .expect("Failed to build record");

    let archive: Vec<_> = fs::read_dir(dir.path().join("archive"))
        .expect("Backup directory missing")
        .collect();
    assert_eq!(archive.len(), 1);
    assert!(!dir.path().join("old").exists());
}

#[test]
fn header_and_footer_are_written_as_comments() {
    let dir = temp_dir();
    let options = CodecOptions::builder()
        .header("Server settings\nEdit with care")
        .footer("End of file")
        .build()
        .expect("Failed to build options");

    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .options(options)
        .target_version("1.0")
        .build()
        .expect("Failed to build record");

    let path = dir.path().join("server.yml");
    let contents = fs::read_to_string(&path).expect("Failed to read config file");
    assert!(contents.starts_with("# Server settings\n# Edit with care\n"));
    assert!(contents.ends_with("# End of file\n"));
    // Comment lines do not confuse the version scan.
    assert_eq!(
        version::scan_version(&path).expect("Failed to scan version"),
        "1.0"
    );
}

#[test]
fn excluded_fields_are_not_written() {
    let dir = temp_dir();
    let options = CodecOptions::builder()
        .exclude(vec!["max_connections".to_string()])
        .build()
        .expect("Failed to build options");

    let _record = ConfigRecord::<ServerConfig>::builder(dir.path(), "server")
        .options(options)
        .build()
        .expect("Failed to build record");

    let contents = fs::read_to_string(dir.path().join("server.yml"))
        .expect("Failed to read config file");
    assert!(!contents.contains("max_connections"));
    assert!(contents.contains("host"));
}

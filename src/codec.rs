//! YAML codec: typed records in, documents with a managed `version:` key out.

use std::fs;
use std::path::Path;

use derive_builder::Builder;
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::Error;

/// Marker for types usable as config records. Blanket-implemented for every
/// type with serde support and a `Default`.
pub trait ConfigData: Default + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> ConfigData for T where T: Default + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Top-level key reserved for the schema version. Managed entirely by the
/// codec; a field of this name on the record type is never written through.
pub(crate) const VERSION_KEY: &str = "version";

/// Presentation options for written documents.
///
/// Replaces the original annotation-driven metadata with an explicit struct:
/// `header`/`footer` are comment blocks emitted around the document, and
/// `exclude` lists top-level keys omitted on save.
#[derive(Debug, Clone, Default, Builder)]
#[builder(default, setter(into, strip_option))]
pub struct CodecOptions {
    pub header: Option<String>,
    pub footer: Option<String>,
    pub exclude: Vec<String>,
}

impl CodecOptions {
    pub fn builder() -> CodecOptionsBuilder {
        CodecOptionsBuilder::default()
    }
}

/// Parses `path` into an instance, filling fields missing from the file with
/// defaults. The file is not touched. Used for provisional loads during bulk
/// scans, before any migration.
pub(crate) fn peek<T: ConfigData>(path: &Path) -> Result<T, Error> {
    let raw = fs::read_to_string(path)?;
    let file_value: Value = serde_yaml::from_str(&raw)?;
    let merged = overlay(defaults_value::<T>(path)?, &file_value, path)?;
    Ok(serde_yaml::from_value(merged)?)
}

/// Merge-update: overlays the file's values on the type's defaults, rewrites
/// the file with the merged content, and returns the merged instance. A
/// missing file is materialized from defaults. `stamp` is the version text
/// written at the top of the document, if any.
pub(crate) fn update<T: ConfigData>(
    path: &Path,
    options: &CodecOptions,
    stamp: Option<&str>,
) -> Result<T, Error> {
    let merged = if path.exists() {
        let raw = fs::read_to_string(path)?;
        let file_value: Value = serde_yaml::from_str(&raw)?;
        overlay(defaults_value::<T>(path)?, &file_value, path)?
    } else {
        defaults_value::<T>(path)?
    };
    let instance: T = serde_yaml::from_value(merged)?;
    save(path, &instance, options, stamp)?;
    Ok(instance)
}

/// Serializes `instance` and writes it to `path`, stamping `stamp` as the
/// top-level `version:` key when present. The write goes through a temp file
/// and rename so readers never observe a partial document.
pub(crate) fn save<T: ConfigData>(
    path: &Path,
    instance: &T,
    options: &CodecOptions,
    stamp: Option<&str>,
) -> Result<(), Error> {
    let value = serde_yaml::to_value(instance)?;
    let Value::Mapping(map) = value else {
        return Err(Error::Shape {
            path: path.to_path_buf(),
        });
    };

    // Version first so the line scan finds it at the top of the document.
    let mut doc = Mapping::new();
    if let Some(version) = stamp {
        doc.insert(Value::from(VERSION_KEY), Value::from(version));
    }
    for (key, val) in map {
        if let Value::String(name) = &key {
            if name == VERSION_KEY || options.exclude.iter().any(|e| e == name) {
                continue;
            }
        }
        doc.insert(key, val);
    }

    let mut out = String::new();
    if let Some(header) = &options.header {
        push_comment_block(&mut out, header);
    }
    out.push_str(&serde_yaml::to_string(&Value::Mapping(doc))?);
    if let Some(footer) = &options.footer {
        push_comment_block(&mut out, footer);
    }

    write_atomic(path, &out)?;
    Ok(())
}

fn push_comment_block(out: &mut String, block: &str) {
    for line in block.lines() {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn defaults_value<T: ConfigData>(path: &Path) -> Result<Value, Error> {
    let value = serde_yaml::to_value(T::default())?;
    match value {
        Value::Mapping(_) => Ok(value),
        _ => Err(Error::Shape {
            path: path.to_path_buf(),
        }),
    }
}

/// Merges file values onto the defaults, restricted to the defaults' keys:
/// the output contains exactly the record type's fields, taking the file's
/// value where present (recursively for nested mappings) and the default
/// otherwise. Unknown file keys are dropped.
fn overlay(defaults: Value, file: &Value, path: &Path) -> Result<Value, Error> {
    match file {
        // Empty document.
        Value::Null => Ok(defaults),
        Value::Mapping(_) => Ok(merge(defaults, file)),
        _ => Err(Error::Shape {
            path: path.to_path_buf(),
        }),
    }
}

fn merge(default: Value, file: &Value) -> Value {
    match (default, file) {
        (Value::Mapping(defaults), Value::Mapping(file_map)) => {
            let mut out = Mapping::new();
            for (key, default_val) in defaults {
                let merged = match file_map.get(&key) {
                    Some(file_val) => merge(default_val, file_val),
                    None => default_val,
                };
                out.insert(key, merged);
            }
            Value::Mapping(out)
        }
        // Scalars, sequences, or a type change: the file wins; a bad type
        // surfaces as a deserialization error downstream.
        (_, file_val) => file_val.clone(),
    }
}

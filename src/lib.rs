//! Typed, file-backed YAML configuration records.
//!
//! A [`ConfigRecord`] owns one file: it is loaded (and created from defaults
//! if missing) at construction, migrated across schema versions with an
//! automatic backup of the original, reloaded on demand with hash-based
//! change detection, and saved back. A [`ConfigRegistry`] is a process-wide
//! directory of records keyed by type, letting consumers subscribe to a
//! config before it exists. A [`BulkConfigStore`] manages a directory of
//! many files sharing one schema, keyed by a caller-supplied identifier.
//!
//! All three drive their loads through the same pipeline: scan the file's
//! `version:` line, compare it to the target through a [`VersionPolicy`],
//! back up and migrate on mismatch, and merge missing fields from the type's
//! defaults.

pub mod codec;
pub mod error;
mod pipeline;
pub mod promise;
pub mod record;
pub mod registry;
pub mod store;
pub mod version;

pub use codec::{CodecOptions, CodecOptionsBuilder, ConfigData};
pub use error::Error;
pub use promise::{Executor, InitHandle};
pub use record::ConfigRecord;
pub use registry::ConfigRegistry;
pub use store::{BulkConfigStore, ConfigEntry};
pub use version::VersionPolicy;

// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Atomic JSON document storage.
//!
//! Loads never fail: a missing or unreadable document resolves to a typed
//! default carried inside [`Defaulted`]. Each save stages into its own
//! uniquely named `<name>.<random>.tmp` file in the target's directory,
//! syncs it and renames it over the target, so concurrent readers only ever
//! see a complete old or new document even when several writers overlap.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Suffix of every staging file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A JSON document with a well-defined fallback value.
pub trait Document: Serialize + DeserializeOwned {
    /// Short human-readable name used in log messages.
    const KIND: &'static str;

    /// Value substituted when the document is missing or malformed.
    fn fallback() -> Self;
}

/// Why a load resolved to the fallback value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultReason {
    /// The file does not exist yet.
    Missing,
    /// The file exists but could not be read.
    Unreadable(String),
    /// The file was read but is not valid JSON of the expected shape.
    Malformed(String),
}

impl fmt::Display for DefaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultReason::Missing => write!(f, "file does not exist"),
            DefaultReason::Unreadable(e) => write!(f, "unreadable: {e}"),
            DefaultReason::Malformed(e) => write!(f, "malformed: {e}"),
        }
    }
}

/// The "error" side of a load: always carries a usable default.
#[derive(Debug, Clone, PartialEq)]
pub struct Defaulted<T> {
    pub value: T,
    pub reason: DefaultReason,
}

impl<T> Defaulted<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Load/save access to one JSON document on disk.
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonStore<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonStore").field("path", &self.path).finish()
    }
}

impl<T: Document> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Prefix of this document's staging files: `<file name>.`
    fn staging_prefix(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{name}.")
    }

    /// Load the document, or the fallback together with the reason it was used.
    pub fn load(&self) -> Result<T, Defaulted<T>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "No {} document at {}, using defaults",
                    T::KIND,
                    self.path.display()
                );
                return Err(Defaulted {
                    value: T::fallback(),
                    reason: DefaultReason::Missing,
                });
            }
            Err(e) => {
                log::warn!(
                    "Could not read {} document {}: {e}, using defaults",
                    T::KIND,
                    self.path.display()
                );
                return Err(Defaulted {
                    value: T::fallback(),
                    reason: DefaultReason::Unreadable(e.to_string()),
                });
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            log::warn!(
                "Malformed {} document {}: {e}, using defaults",
                T::KIND,
                self.path.display()
            );
            Defaulted {
                value: T::fallback(),
                reason: DefaultReason::Malformed(e.to_string()),
            }
        })
    }

    /// Load the document, collapsing the defaulted case into its value.
    pub fn load_or_default(&self) -> T {
        self.load().unwrap_or_else(Defaulted::into_value)
    }

    /// Atomically replace the document with `value`.
    pub fn save(&self, value: &T) -> io::Result<()> {
        let dir = self.staging_dir();
        fs::create_dir_all(dir)?;

        let mut contents = serde_json::to_string_pretty(value).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize {} document: {e}", T::KIND),
            )
        })?;
        contents.push('\n');

        // A private staging file per write, so overlapping writers never
        // share (and truncate) one another's partial output.
        let mut staged = tempfile::Builder::new()
            .prefix(&self.staging_prefix())
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?;
        staged.write_all(contents.as_bytes())?;
        staged.as_file().sync_all()?;

        // On failure the staging file is removed when the error drops it.
        staged.persist(&self.path).map_err(|e| {
            io::Error::new(
                e.error.kind(),
                format!(
                    "Failed to move {} into place at {}: {}",
                    T::KIND,
                    self.path.display(),
                    e.error
                ),
            )
        })?;

        log::debug!("Saved {} document to {}", T::KIND, self.path.display());
        Ok(())
    }
}

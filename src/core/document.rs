// src/core/document.rs

//! Loaded design files.
//!
//! A design file is not parsed: it is read once to check its signature, tell
//! the legacy format from the s-expression one and fingerprint its content.

use log::debug;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read {kind} '{}': {source}", path.display())]
    Io {
        kind: DesignKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{}' is not a valid KiCad {kind} file", path.display())]
    Corrupted { kind: DesignKind, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignKind {
    Schematic,
    Board,
}

impl DesignKind {
    /// Accepted file extensions, newest format first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Schematic => &["kicad_sch", "sch"],
            Self::Board => &["kicad_pcb"],
        }
    }

    fn detect(self, content: &str) -> Option<DesignFormat> {
        let head = content.trim_start();
        match self {
            Self::Schematic if head.starts_with("(kicad_sch") => Some(DesignFormat::SExpression),
            Self::Schematic if head.starts_with("EESchema Schematic File Version") => {
                Some(DesignFormat::Legacy)
            }
            Self::Board if head.starts_with("(kicad_pcb") => Some(DesignFormat::SExpression),
            Self::Board if head.starts_with("PCBNEW-BOARD") => Some(DesignFormat::Legacy),
            _ => None,
        }
    }
}

impl fmt::Display for DesignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schematic => write!(f, "schematic"),
            Self::Board => write!(f, "board"),
        }
    }
}

/// KiCad 5 and older use the legacy text formats, KiCad 6+ uses s-expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignFormat {
    Legacy,
    SExpression,
}

/// A design file loaded by the global context.
#[derive(Debug, PartialEq, Eq)]
pub struct DesignDocument {
    pub kind: DesignKind,
    pub path: PathBuf,
    /// File name without extension, used for `%f` in output patterns.
    pub name: String,
    pub format: DesignFormat,
    pub file_size: u64,
    pub content_hash: String,
}

impl DesignDocument {
    /// Reads `path`, checks the signature and fingerprints the content.
    pub fn load(path: &Path, kind: DesignKind) -> Result<Self, DocumentError> {
        debug!("Loading {} '{}'", kind, path.display());
        let content = fs::read(path).map_err(|source| DocumentError::Io {
            kind,
            path: path.to_path_buf(),
            source,
        })?;

        let format = kind
            .detect(&String::from_utf8_lossy(&content))
            .ok_or_else(|| DocumentError::Corrupted {
                kind,
                path: path.to_path_buf(),
            })?;

        let hash = blake3::hash(&content);
        let content_hash = hex::encode(hash.as_bytes().get(..HASH_TRUNCATE_LENGTH).unwrap_or_default());
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(
            "Loaded {} '{}': format={:?}, size={}, hash={}",
            kind,
            path.display(),
            format,
            content.len(),
            content_hash
        );

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            name,
            format,
            file_size: content.len() as u64,
            content_hash,
        })
    }
}

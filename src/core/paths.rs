// src/core/paths.rs

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Failed to expand path template '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Data directories where a KiCad installation may keep its shared files,
/// most specific first: the user's local data dir, then the system prefixes.
pub fn install_data_prefixes() -> Vec<PathBuf> {
    let mut prefixes = Vec::new();
    if let Some(local) = dirs::data_local_dir() {
        prefixes.push(local);
    }
    prefixes.push(PathBuf::from("/usr/local/share"));
    prefixes.push(PathBuf::from("/usr/share"));
    prefixes
}

/// Places where KiCad keeps its user configuration, derived from the home directory.
pub fn guess_kicad_config_dirs(home: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![home.join(".config").join("kicad")];
    if cfg!(target_os = "macos") {
        dirs.push(home.join("Library").join("Preferences").join("kicad"));
    }
    dirs
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in a user supplied path.
pub fn expand_user_path(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Lists the files directly inside `dir` whose extension is one of `extensions`,
/// sorted by name. Hidden files and KiCad's auxiliary copies are skipped.
pub fn find_files_with_extension(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            let has_ext = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e));
            has_ext
                && !name.starts_with('.')
                && !name.contains("-cache.")
                && !name.contains("-rescue.")
        })
        .collect();
    found.dedup();
    found
}

// src/system/tools.rs

use std::env;
use std::path::{Path, PathBuf};

/// Looks `executable_name` up in `PATH`. Names containing a path separator are
/// checked as given.
pub fn find_in_path(executable_name: &str) -> Option<PathBuf> {
    let candidate = Path::new(executable_name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .flat_map(|dir| executable_names(executable_name).map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

fn executable_names(name: &str) -> impl Iterator<Item = String> + '_ {
    let exe = if cfg!(target_os = "windows") {
        Some(format!("{name}.exe"))
    } else {
        None
    };
    std::iter::once(name.to_string()).chain(exe)
}

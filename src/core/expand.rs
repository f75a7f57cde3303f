// src/core/expand.rs

//! # Filename Expansion
//!
//! Turns an output pattern such as `%f-%i.%x` into a concrete path inside the
//! output directory. The expansion is pure: no I/O, no global state.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref PATTERN_TOKEN_RE: Regex = Regex::new(r"%([A-Za-z])").unwrap();
}

/// Per-call token values, keyed by the token letter (`'f'` for `%f`).
pub type TokenOverrides = BTreeMap<char, String>;

/// Expands `pattern` and joins the result under `output_dir`.
///
/// `%i` becomes `output_id` and `%x` becomes `default_extension`. Any letter
/// present in `overrides` is replaced by its value, and overrides win over the
/// built-in tokens. Unknown tokens are kept literally so patterns written for
/// newer token sets still produce a usable name.
pub fn expand(
    output_dir: &Path,
    pattern: &str,
    output_id: &str,
    default_extension: &str,
    overrides: &TokenOverrides,
) -> PathBuf {
    let file_name = PATTERN_TOKEN_RE.replace_all(pattern, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let Some(letter) = caps.get(1).and_then(|m| m.as_str().chars().next()) else {
            return whole.to_string();
        };
        if let Some(value) = overrides.get(&letter) {
            return value.clone();
        }
        match letter {
            'i' => output_id.to_string(),
            'x' => default_extension.to_string(),
            _ => whole.to_string(),
        }
    });
    output_dir.join(file_name.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_id_and_extension() {
        let path = expand(Path::new("/out"), "%i.%x", "erc", "txt", &TokenOverrides::new());
        assert_eq!(path, PathBuf::from("/out/erc.txt"));
    }

    #[test]
    fn test_expand_with_design_name_and_variant() {
        let mut overrides = TokenOverrides::new();
        overrides.insert('f', "amplifier".to_string());
        overrides.insert('v', "_prod".to_string());
        let path = expand(Path::new("out"), "%f-%i%v.%x", "schematic", "pdf", &overrides);
        assert_eq!(path, PathBuf::from("out/amplifier-schematic_prod.pdf"));
    }

    #[test]
    fn test_expand_unknown_tokens_pass_through() {
        let path = expand(Path::new("/out"), "%q-%i.%x", "drc", "txt", &TokenOverrides::new());
        assert_eq!(path, PathBuf::from("/out/%q-drc.txt"));
    }

    #[test]
    fn test_expand_override_wins_over_builtin() {
        let mut overrides = TokenOverrides::new();
        overrides.insert('x', "csv".to_string());
        let path = expand(Path::new("/out"), "%i.%x", "bom", "txt", &overrides);
        assert_eq!(path, PathBuf::from("/out/bom.csv"));
    }

    #[test]
    fn test_expand_empty_variant_collapses() {
        let mut overrides = TokenOverrides::new();
        overrides.insert('v', String::new());
        let path = expand(Path::new("/out"), "%i%v.%x", "erc", "txt", &overrides);
        assert_eq!(path, PathBuf::from("/out/erc.txt"));
    }
}

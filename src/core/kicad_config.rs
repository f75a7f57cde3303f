// src/core/kicad_config.rs

//! # KiCad Configuration Loader
//!
//! Reads KiCad's own configuration: the `kicad_common` file (for the user
//! defined path variables) and the symbol library tables (`sym-lib-table`),
//! both the global one living next to `kicad_common` and the one in the
//! project directory.
//!
//! The search for the configuration directory is:
//!
//! 1. `$KICAD_CONFIG_HOME`
//! 2. `$XDG_CONFIG_HOME/kicad`
//! 3. `$HOME/.config/kicad` (and the macOS preferences folder)
//!
//! A missing `kicad_common` is not an error: the symbol libraries are then
//! located from `$KICAD_SYMBOL_DIR` or guessed from the installation prefixes.
//! Only when no library at all can be located the load fails.
//!
//! All the inputs coming from the process environment are captured in a
//! [`ToolEnvironment`], so the resolution is reproducible.

use crate::constants::{
    ENV_HOME, ENV_KICAD_CONFIG_HOME, ENV_KICAD_SYMBOL_DIR, ENV_KIPRJMOD, ENV_XDG_CONFIG_HOME,
    KICAD_COMMON_FILENAME, KICAD_ENV_SECTION, SYM_LIB_TABLE_FILENAME, SYM_LIB_TABLE_SIGNATURE,
};
use crate::core::paths;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    static ref ENV_REF_RE: Regex = Regex::new(r"\$\{([^}]*)\}").unwrap();
    // `(key value)` or a bare `(flag)`. Values may be quoted and contain escaped quotes.
    static ref LIB_FIELD_RE: Regex =
        Regex::new(r#"\((\w+)(?:\s+("(?:[^"\\]|\\.)*"|[^()\s]*))?\s*\)"#).unwrap();
}

const LIB_FIELDS: [&str; 5] = ["name", "type", "uri", "options", "descr"];
const LIB_FLAGS: [&str; 2] = ["disabled", "hidden"];

/// Errors raised while loading the KiCad configuration.
#[derive(Error, Debug)]
pub enum KicadConfigError {
    /// A malformed configuration file. `line` is 1-based.
    #[error("{msg} ({}:{line}): `{content}`", path.display())]
    Parse {
        msg: &'static str,
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("Unable to expand `{token}` in `{context}` ({}:{line})", path.display())]
    UnableToExpand {
        token: String,
        context: String,
        path: PathBuf,
        line: usize,
    },
    #[error("Unable to find KiCad libraries, tried: {}", tried.join(", "))]
    LibrariesNotFound { tried: Vec<String> },
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KicadConfigError {
    /// The 1-based line of the offending entry, when the error comes from a file.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Parse { line, .. } | Self::UnableToExpand { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Snapshot of the process environment used to locate KiCad's files.
#[derive(Debug, Clone, Default)]
pub struct ToolEnvironment {
    pub vars: HashMap<String, String>,
    /// Data directories where KiCad may be installed (`/usr/share`, ...).
    pub install_prefixes: Vec<PathBuf>,
}

impl ToolEnvironment {
    /// Captures the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
            install_prefixes: paths::install_data_prefixes(),
        }
    }

    /// Looks up a variable. Empty values count as undefined.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }
}

/// A KiCad path variable and where it was defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub value: String,
    /// Line in `kicad_common`, `None` for variables set by us or detected.
    pub line: Option<usize>,
}

/// An entry of a symbol library table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibAlias {
    pub name: String,
    pub lib_type: String,
    /// The URI with every `${VAR}` already expanded.
    pub uri: String,
    pub options: String,
    pub descr: String,
    pub disabled: bool,
    pub source: PathBuf,
    pub line: usize,
}

impl LibAlias {
    pub fn is_legacy(&self) -> bool {
        self.lib_type == "Legacy"
    }
}

impl fmt::Display for LibAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` -> `{}` ({})", self.name, self.uri, self.lib_type)
    }
}

/// The loaded KiCad configuration. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct KicadConfig {
    config_dir: Option<PathBuf>,
    project_dir: PathBuf,
    env: BTreeMap<String, EnvEntry>,
    sym_lib_dir: Option<PathBuf>,
    lib_aliases: BTreeMap<String, LibAlias>,
}

impl KicadConfig {
    /// Directory containing `kicad_common`, if one was found.
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn env(&self) -> &BTreeMap<String, EnvEntry> {
        &self.env
    }

    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(|e| e.value.as_str())
    }

    pub fn sym_lib_dir(&self) -> Option<&Path> {
        self.sym_lib_dir.as_deref()
    }

    pub fn lib_aliases(&self) -> &BTreeMap<String, LibAlias> {
        &self.lib_aliases
    }

    pub fn lib_alias(&self, name: &str) -> Option<&LibAlias> {
        self.lib_aliases.get(name)
    }

    /// Expands `${VAR}` references using the KiCad variables first and the process
    /// environment second. Returns the first unresolved token on failure.
    pub fn expand_env(&self, text: &str, environment: &ToolEnvironment) -> Result<String, String> {
        let mut missing = None;
        let expanded = ENV_REF_RE.replace_all(text, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match self.env_var(name).or_else(|| environment.var(name)) {
                Some(value) => value.to_string(),
                None => {
                    let token = caps.get(0).map_or("", |m| m.as_str()).to_string();
                    missing.get_or_insert(token.clone());
                    token
                }
            }
        });
        match missing {
            Some(token) => Err(token),
            None => Ok(expanded.into_owned()),
        }
    }
}

/// Locates and loads the KiCad configuration for the design at `start_path`.
pub fn locate_and_load(
    start_path: &Path,
    environment: &ToolEnvironment,
) -> Result<KicadConfig, KicadConfigError> {
    let project_dir = start_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut config = KicadConfig {
        project_dir: project_dir.clone(),
        ..Default::default()
    };
    config.env.insert(
        ENV_KIPRJMOD.to_string(),
        EnvEntry {
            value: project_dir.to_string_lossy().into_owned(),
            line: None,
        },
    );

    if let Some(common) = find_kicad_common(environment) {
        info!("Reading KiCad config from `{}`", common.display());
        config.config_dir = common.parent().map(Path::to_path_buf);
        let content = read(&common)?;
        parse_kicad_common(&common, &content, &mut config.env)?;
    }

    let mut tried = Vec::new();
    config.sym_lib_dir = resolve_symbol_dir(&mut config.env, environment, &mut tried);

    let mut tables = Vec::new();
    if let Some(dir) = &config.config_dir {
        tables.push(dir.join(SYM_LIB_TABLE_FILENAME));
    }
    tables.push(project_dir.join(SYM_LIB_TABLE_FILENAME));
    for table in tables {
        if !table.is_file() {
            debug!("No symbol library table at `{}`", table.display());
            continue;
        }
        debug!("Loading symbol library table `{}`", table.display());
        let content = read(&table)?;
        // Project entries replace global ones with the same name.
        for (name, alias) in parse_sym_lib_table(&table, &content, &config, environment)? {
            config.lib_aliases.insert(name, alias);
        }
    }

    debug!(
        "{} symbol librar(ies) in the tables, {} legacy",
        config.lib_aliases.len(),
        config.lib_aliases.values().filter(|a| a.is_legacy()).count()
    );
    if config.sym_lib_dir.is_none() && config.lib_aliases.is_empty() {
        return Err(KicadConfigError::LibrariesNotFound { tried });
    }
    Ok(config)
}

fn read(path: &Path) -> Result<String, KicadConfigError> {
    fs::read_to_string(path).map_err(|source| KicadConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Finds `kicad_common` following the documented precedence.
pub fn find_kicad_common(environment: &ToolEnvironment) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = environment.var(ENV_KICAD_CONFIG_HOME) {
        debug!("Looking for KiCad config in `${ENV_KICAD_CONFIG_HOME}` ({dir})");
        candidates.push(PathBuf::from(dir).join(KICAD_COMMON_FILENAME));
    }
    if let Some(dir) = environment.var(ENV_XDG_CONFIG_HOME) {
        debug!("Looking for KiCad config in `${ENV_XDG_CONFIG_HOME}` ({dir})");
        candidates.push(PathBuf::from(dir).join("kicad").join(KICAD_COMMON_FILENAME));
    }
    let home = match environment.var(ENV_HOME) {
        Some(home) => PathBuf::from(home),
        None => {
            warn!("Environment variable `{ENV_HOME}` not defined, using `/`");
            PathBuf::from("/")
        }
    };
    for dir in paths::guess_kicad_config_dirs(&home) {
        debug!("Guessing KiCad config in `{}`", dir.display());
        candidates.push(dir.join(KICAD_COMMON_FILENAME));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            return Some(candidate.clone());
        }
        debug!("No KiCad config at `{}`", candidate.display());
    }
    warn!(
        "Unable to find KiCad configuration file ({})",
        candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    None
}

/// Parses the INI style `kicad_common`, keeping only the path variables.
fn parse_kicad_common(
    path: &Path,
    content: &str,
    env: &mut BTreeMap<String, EnvEntry>,
) -> Result<(), KicadConfigError> {
    let mut section: Option<&str> = None;
    let mut has_env_section = false;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.trim());
            has_env_section |= section == Some(KICAD_ENV_SECTION);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(KicadConfigError::Parse {
                msg: "Malformed KiCad config line",
                path: path.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            });
        };
        if section == Some(KICAD_ENV_SECTION) {
            let name = key.trim().to_uppercase();
            let value = value.trim().to_string();
            debug!("- KiCad var: {name}=\"{value}\"");
            env.insert(
                name,
                EnvEntry {
                    value,
                    line: Some(idx + 1),
                },
            );
        }
    }

    if !has_env_section {
        debug!("KiCad config without {KICAD_ENV_SECTION} section");
    }
    Ok(())
}

fn resolve_symbol_dir(
    env: &mut BTreeMap<String, EnvEntry>,
    environment: &ToolEnvironment,
    tried: &mut Vec<String>,
) -> Option<PathBuf> {
    if let Some(entry) = env.get(ENV_KICAD_SYMBOL_DIR) {
        return Some(PathBuf::from(&entry.value));
    }
    tried.push(format!("{ENV_KICAD_SYMBOL_DIR} in {KICAD_COMMON_FILENAME}"));

    let detected = match environment.var(ENV_KICAD_SYMBOL_DIR) {
        Some(dir) => Some(PathBuf::from(dir)),
        None => {
            tried.push(format!("${ENV_KICAD_SYMBOL_DIR}"));
            guess_symbol_dir(environment, tried)
        }
    };

    if let Some(dir) = &detected {
        debug!("Detected {ENV_KICAD_SYMBOL_DIR}=\"{}\"", dir.display());
        env.insert(
            ENV_KICAD_SYMBOL_DIR.to_string(),
            EnvEntry {
                value: dir.to_string_lossy().into_owned(),
                line: None,
            },
        );
    }
    detected
}

/// Looks for the stock symbol libraries under the installation prefixes.
pub fn guess_symbol_dir(environment: &ToolEnvironment, tried: &mut Vec<String>) -> Option<PathBuf> {
    for prefix in &environment.install_prefixes {
        for sub in ["kicad/library", "kicad/symbols"] {
            let candidate = prefix.join(sub);
            if candidate.is_dir() {
                return Some(candidate);
            }
            tried.push(candidate.display().to_string());
        }
    }
    None
}

fn parse_error(msg: &'static str, path: &Path, line: usize, content: &str) -> KicadConfigError {
    KicadConfigError::Parse {
        msg,
        path: path.to_path_buf(),
        line,
        content: content.to_string(),
    }
}

fn un_quote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

/// Parses a `sym-lib-table`, expanding the URIs with `config`'s variables.
///
/// Blank lines are skipped everywhere, so a table without its signature is
/// reported at its first non blank line: line 1 unless the file starts with
/// empty lines.
pub fn parse_sym_lib_table(
    path: &Path,
    content: &str,
    config: &KicadConfig,
    environment: &ToolEnvironment,
) -> Result<BTreeMap<String, LibAlias>, KicadConfigError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(idx, l)| (idx + 1, l))
        .filter(|(_, l)| !l.trim().is_empty());

    match lines.next() {
        Some((_, line)) if line.trim().starts_with(SYM_LIB_TABLE_SIGNATURE) => {}
        Some((num, line)) => {
            return Err(parse_error("Symbol libs table missing signature", path, num, line));
        }
        None => return Err(parse_error("Symbol libs table missing signature", path, 1, "")),
    }

    let mut aliases = BTreeMap::new();
    for (num, raw) in lines {
        let line = raw.trim();
        if line.starts_with(')') {
            break;
        }
        if line.starts_with("(version") {
            continue;
        }
        if !line.starts_with("(lib ") && !line.starts_with("(lib(") {
            return Err(parse_error("Unknown symbol table entry", path, num, raw));
        }
        let alias = parse_lib_entry(line, path, num, config, environment)?;
        if aliases.contains_key(&alias.name) {
            return Err(parse_error("Duplicated symbol library alias", path, num, raw));
        }
        debug!("Added lib alias {alias}");
        aliases.insert(alias.name.clone(), alias);
    }
    Ok(aliases)
}

fn parse_lib_entry(
    line: &str,
    path: &Path,
    num: usize,
    config: &KicadConfig,
    environment: &ToolEnvironment,
) -> Result<LibAlias, KicadConfigError> {
    let body = line
        .strip_prefix("(lib")
        .and_then(|b| b.trim_end().strip_suffix(')'))
        .ok_or_else(|| parse_error("Malformed lib entry", path, num, line))?;

    let mut fields: BTreeMap<&str, String> = BTreeMap::new();
    let mut disabled = false;
    for caps in LIB_FIELD_RE.captures_iter(body) {
        let Some(key) = caps.get(1) else {
            continue;
        };
        let key = key.as_str();
        match caps.get(2) {
            Some(value) if LIB_FIELDS.contains(&key) => {
                if fields.insert(key, un_quote(value.as_str())).is_some() {
                    return Err(parse_error("Malformed lib entry", path, num, line));
                }
            }
            None if LIB_FLAGS.contains(&key) => disabled |= key == "disabled",
            _ => return Err(parse_error("Malformed lib entry", path, num, line)),
        }
    }
    // Anything that is not a field means an unbalanced or truncated entry.
    let leftover = body.chars().filter(|c| !c.is_whitespace()).count();
    let used: usize = LIB_FIELD_RE
        .find_iter(body)
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).count())
        .sum();
    if fields.len() != LIB_FIELDS.len() || leftover != used {
        return Err(parse_error("Malformed lib entry", path, num, line));
    }

    let mut take = |key: &str| fields.remove(key).unwrap_or_default();
    let name = take("name");
    if name.is_empty() {
        return Err(parse_error("unnamed LibAlias", path, num, line));
    }
    let raw_uri = take("uri");
    let uri = config
        .expand_env(&raw_uri, environment)
        .map_err(|token| KicadConfigError::UnableToExpand {
            token,
            context: raw_uri.clone(),
            path: path.to_path_buf(),
            line: num,
        })?;

    Ok(LibAlias {
        name,
        lib_type: take("type"),
        uri,
        options: take("options"),
        descr: take("descr"),
        disabled,
        source: path.to_path_buf(),
        line: num,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD_TABLE: &str = "(sym_lib_table\n  (lib (name 4xxx)(type Legacy)(uri ${KICAD_SYMBOL_DIR}/4xxx.lib)(options \"\")(descr \"4xxx series\"))\n  (lib (name \"My Lib\")(type KiCad)(uri ${KIPRJMOD}/my.kicad_sym)(options \"\")(descr \"\"))\n)\n";

    fn config_with_symbols(dir: &str) -> KicadConfig {
        let mut config = KicadConfig::default();
        config.env.insert(
            ENV_KICAD_SYMBOL_DIR.to_string(),
            EnvEntry {
                value: dir.to_string(),
                line: None,
            },
        );
        config.env.insert(
            ENV_KIPRJMOD.to_string(),
            EnvEntry {
                value: "/prj".to_string(),
                line: None,
            },
        );
        config
    }

    fn parse(content: &str) -> Result<BTreeMap<String, LibAlias>, KicadConfigError> {
        parse_sym_lib_table(
            Path::new("sym-lib-table"),
            content,
            &config_with_symbols("/usr/share/kicad/library"),
            &ToolEnvironment::default(),
        )
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_table_expands_uris() {
        let aliases = parse(GOOD_TABLE).unwrap();
        assert_eq!(aliases.len(), 2);
        let lib = &aliases["4xxx"];
        assert_eq!(lib.uri, "/usr/share/kicad/library/4xxx.lib");
        assert!(lib.is_legacy());
        assert_eq!(lib.descr, "4xxx series");
        assert_eq!(lib.line, 2);
        assert_eq!(aliases["My Lib"].uri, "/prj/my.kicad_sym");
    }

    #[test]
    fn test_parse_table_missing_signature() {
        let err = parse("(lib (name a)(type Legacy)(uri a)(options \"\")(descr \"\"))\n").unwrap_err();
        match err {
            KicadConfigError::Parse { msg, line, .. } => {
                assert_eq!(msg, "Symbol libs table missing signature");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_signature_after_blank_lines() {
        let err = parse("\n\n(lib (name a))\n").unwrap_err();
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("missing signature"), "{err}");
    }

    #[test]
    fn test_parse_table_unknown_entry() {
        let err = parse("(sym_lib_table\n  (foo (name a))\n)\n").unwrap_err();
        match err {
            KicadConfigError::Parse { msg, line, .. } => {
                assert_eq!(msg, "Unknown symbol table entry");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_table_malformed_entry() {
        let err = parse("(sym_lib_table\n  (lib (name a)(type Legacy)(uri a))\n)\n").unwrap_err();
        assert!(err.to_string().contains("Malformed lib entry"), "{err}");
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_parse_table_unnamed_alias() {
        let err = parse("(sym_lib_table\n  (lib (name \"\")(type Legacy)(uri a)(options \"\")(descr \"\"))\n)\n")
            .unwrap_err();
        assert!(err.to_string().contains("unnamed LibAlias"), "{err}");
    }

    #[test]
    fn test_parse_table_duplicated_alias() {
        let entry = "  (lib (name a)(type Legacy)(uri a)(options \"\")(descr \"\"))\n";
        let err = parse(&format!("(sym_lib_table\n{entry}{entry})\n")).unwrap_err();
        assert!(err.to_string().contains("Duplicated"), "{err}");
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_parse_table_unable_to_expand() {
        let err = parse("(sym_lib_table\n  (lib (name a)(type Legacy)(uri ${BOGUS}/a.lib)(options \"\")(descr \"\"))\n)\n")
            .unwrap_err();
        match &err {
            KicadConfigError::UnableToExpand { token, context, line, .. } => {
                assert_eq!(token, "${BOGUS}");
                assert_eq!(context, "${BOGUS}/a.lib");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("Unable to expand `${BOGUS}` in"));
    }

    #[test]
    fn test_parse_table_accepts_version_and_flags() {
        let aliases = parse("(sym_lib_table\n  (version 7)\n  (lib (name a)(type KiCad)(uri /a.kicad_sym)(options \"\")(descr \"\")(disabled))\n)\n")
            .unwrap();
        assert!(aliases["a"].disabled);
    }

    #[test]
    fn test_load_from_kicad_config_home() {
        let tmp = TempDir::new().unwrap();
        let conf_dir = tmp.path().join("kicad_ok");
        write(
            &conf_dir,
            KICAD_COMMON_FILENAME,
            "Editor=xdg-open\n[EnvironmentVariables]\nKICAD_SYMBOL_DIR=/usr/share/kicad/library\nKICAD_TEMPLATE_DIR=/usr/share/kicad/template\n",
        );
        write(&conf_dir, SYM_LIB_TABLE_FILENAME, GOOD_TABLE);
        let prj = tmp.path().join("prj");
        let sch = write(&prj, "board.sch", "EESchema Schematic File Version 4\n");

        let environment = ToolEnvironment::default()
            .with_var(ENV_KICAD_CONFIG_HOME, conf_dir.to_string_lossy());
        let config = locate_and_load(&sch, &environment).unwrap();

        assert_eq!(config.config_dir(), Some(conf_dir.as_path()));
        assert_eq!(config.env_var("KICAD_TEMPLATE_DIR"), Some("/usr/share/kicad/template"));
        assert_eq!(config.env()["KICAD_TEMPLATE_DIR"].line, Some(4));
        assert_eq!(
            config.sym_lib_dir(),
            Some(Path::new("/usr/share/kicad/library"))
        );
        let mine = config.lib_alias("My Lib").unwrap();
        assert_eq!(mine.uri, format!("{}/my.kicad_sym", prj.display()));
    }

    #[test]
    fn test_kicad_common_precedence() {
        let tmp = TempDir::new().unwrap();
        let explicit = write(&tmp.path().join("explicit"), KICAD_COMMON_FILENAME, "");
        let xdg = tmp.path().join("xdg");
        let from_xdg = write(&xdg.join("kicad"), KICAD_COMMON_FILENAME, "");
        let home = tmp.path().join("home");
        let from_home = write(&home.join(".config").join("kicad"), KICAD_COMMON_FILENAME, "");

        let environment = ToolEnvironment::default()
            .with_var(ENV_XDG_CONFIG_HOME, xdg.to_string_lossy())
            .with_var(ENV_HOME, home.to_string_lossy());
        let with_override = environment
            .clone()
            .with_var(ENV_KICAD_CONFIG_HOME, tmp.path().join("explicit").to_string_lossy());
        assert_eq!(find_kicad_common(&with_override), Some(explicit));
        assert_eq!(find_kicad_common(&environment), Some(from_xdg));

        let home_only = ToolEnvironment::default().with_var(ENV_HOME, home.to_string_lossy());
        assert_eq!(find_kicad_common(&home_only), Some(from_home));
    }

    #[test]
    fn test_project_table_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let xdg = tmp.path().join("xdg");
        write(&xdg.join("kicad"), KICAD_COMMON_FILENAME, "[General]\nFoo=1\n");
        write(
            &xdg.join("kicad"),
            SYM_LIB_TABLE_FILENAME,
            "(sym_lib_table\n  (lib (name a)(type Legacy)(uri /global/a.lib)(options \"\")(descr \"\"))\n)\n",
        );
        let prj = tmp.path().join("prj");
        write(
            &prj,
            SYM_LIB_TABLE_FILENAME,
            "(sym_lib_table\n  (lib (name a)(type Legacy)(uri /local/a.lib)(options \"\")(descr \"\"))\n)\n",
        );
        let sch = write(&prj, "x.sch", "");

        let environment = ToolEnvironment::default()
            .with_var(ENV_XDG_CONFIG_HOME, xdg.to_string_lossy())
            .with_var(ENV_HOME, tmp.path().to_string_lossy());
        let config = locate_and_load(&sch, &environment).unwrap();
        assert_eq!(config.lib_alias("a").unwrap().uri, "/local/a.lib");
        // No KICAD_SYMBOL_DIR anywhere, but the tables provide libraries.
        assert!(config.sym_lib_dir().is_none());
    }

    #[test]
    fn test_symbol_dir_from_environment_when_no_config() {
        let tmp = TempDir::new().unwrap();
        let sch = write(&tmp.path().join("prj"), "x.sch", "");
        let environment = ToolEnvironment::default().with_var(ENV_KICAD_SYMBOL_DIR, "tests");
        let config = locate_and_load(&sch, &environment).unwrap();
        assert!(config.config_dir().is_none());
        assert_eq!(config.sym_lib_dir(), Some(Path::new("tests")));
        assert_eq!(config.env_var(ENV_KICAD_SYMBOL_DIR), Some("tests"));
    }

    #[test]
    fn test_symbol_dir_guessed_from_install_prefix() {
        let tmp = TempDir::new().unwrap();
        let share = tmp.path().join("share");
        fs::create_dir_all(share.join("kicad/library")).unwrap();
        let sch = write(&tmp.path().join("prj"), "x.sch", "");
        let environment = ToolEnvironment {
            install_prefixes: vec![tmp.path().join("missing"), share.clone()],
            ..Default::default()
        };
        let config = locate_and_load(&sch, &environment).unwrap();
        assert_eq!(config.sym_lib_dir(), Some(share.join("kicad/library").as_path()));
    }

    #[test]
    fn test_no_libraries_anywhere() {
        let tmp = TempDir::new().unwrap();
        let sch = write(&tmp.path().join("prj"), "x.sch", "");
        let environment = ToolEnvironment::default().with_var(ENV_HOME, "");
        let err = locate_and_load(&sch, &environment).unwrap_err();
        match &err {
            KicadConfigError::LibrariesNotFound { tried } => {
                assert!(tried.iter().any(|t| t.contains(ENV_KICAD_SYMBOL_DIR)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("Unable to find KiCad libraries"));
    }

    #[test]
    fn test_malformed_kicad_common() {
        let tmp = TempDir::new().unwrap();
        let conf_dir = tmp.path().join("conf");
        write(&conf_dir, KICAD_COMMON_FILENAME, "[EnvironmentVariables]\nnot a pair\n");
        let sch = write(&tmp.path().join("prj"), "x.sch", "");
        let environment = ToolEnvironment::default()
            .with_var(ENV_KICAD_CONFIG_HOME, conf_dir.to_string_lossy());
        let err = locate_and_load(&sch, &environment).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }
}

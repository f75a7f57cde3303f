// src/constants.rs

/// The default name of the pipeline plan file.
pub const PLAN_FILENAME: &str = "kiflow.toml";

/// The pattern used for every output file name when the plan does not define one.
/// `%f` is the design base name, `%i` the output id, `%v` the variant id and `%x` the extension.
pub const DEFAULT_OUTPUT_PATTERN: &str = "%f-%i%v.%x";

// --- External tools ---

/// Schematic automation tool (KiAuto).
pub const CMD_EESCHEMA_DO: &str = "eeschema_do";
/// Board automation tool (KiAuto).
pub const CMD_PCBNEW_DO: &str = "pcbnew_do";

// --- KiCad configuration ---

/// The name of KiCad's main configuration file.
pub const KICAD_COMMON_FILENAME: &str = "kicad_common";
/// The name of KiCad's symbol library table.
pub const SYM_LIB_TABLE_FILENAME: &str = "sym-lib-table";
/// Section of `kicad_common` holding the user defined path variables.
pub const KICAD_ENV_SECTION: &str = "EnvironmentVariables";
/// First line of every symbol library table.
pub const SYM_LIB_TABLE_SIGNATURE: &str = "(sym_lib_table";

// --- Environment variables ---

pub const ENV_KICAD_CONFIG_HOME: &str = "KICAD_CONFIG_HOME";
pub const ENV_XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
pub const ENV_HOME: &str = "HOME";
pub const ENV_KICAD_SYMBOL_DIR: &str = "KICAD_SYMBOL_DIR";
pub const ENV_KIPRJMOD: &str = "KIPRJMOD";
pub const ENV_GITLAB_CI: &str = "GITLAB_CI";

// --- Process exit statuses ---
// Scripts depend on these values, never renumber them.

pub const EXIT_OK: i32 = 0;
pub const EXIT_BAD_ARGS: i32 = 1;
pub const EXIT_BAD_CONFIG: i32 = 2;
pub const NO_SCH_FILE: i32 = 3;
pub const NO_PCB_FILE: i32 = 4;
pub const PLOT_ERROR: i32 = 5;
pub const MISSING_TOOL: i32 = 6;
pub const CORRUPTED_DESIGN: i32 = 7;
pub const DRC_ERROR: i32 = 11;
pub const ERC_ERROR: i32 = 12;
pub const PDF_SCH_PRINT: i32 = 14;
pub const PDF_PCB_PRINT: i32 = 15;

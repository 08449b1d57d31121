//! Crate-wide constants.

/// Application name, used for store and config directory names.
pub const APP_NAME: &str = "depot";

/// Length of the truncated hash used for store object names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Marker file written into a store object once it is fully published.
pub const COMPLETE_MARKER: &str = ".depot-complete";

/// Name of the optional settings file at the package root.
pub const SETTINGS_FILENAME: &str = "depot.toml";

/// Value for `SOURCE_DATE_EPOCH` in every spawned command (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

//! Various tally-wide constants.

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `tally` binary.
pub const TALLY_APP: &str = "Tally";

//------------ Config File Paths --------------------------------------------

/// The default path to the tally config file.
pub const TALLY_DEFAULT_CONFIG_FILE: &str = "/etc/tally.conf";

//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “warn.”
pub const TALLY_ENV_LOG_LEVEL: &str = "TALLY_LOG_LEVEL";

/// The environment variable indicating the default storage URI.
///
/// The value will be overwritten with that in the config file. Defaults to
/// `local://./data` if not set or not a valid URI.
pub const TALLY_ENV_STORAGE_URI: &str = "TALLY_STORAGE_URI";

//------------ Retention ----------------------------------------------------

/// How many days of history are kept.
///
/// Records older than this, measured back from the most recent stored
/// snapshot, are removed by a retention pass.
pub const RETENTION_DAYS: i64 = 365;

//------------ Update Windows -----------------------------------------------

/// How many days back a manual run reaches when backfilling added projects.
pub const MANUAL_BACKFILL_DAYS: i64 = 30;

//------------ Fetch Defaults -----------------------------------------------

/// The default number of project pipelines fetching concurrently.
pub const DEF_FETCH_PARALLELISM: usize = 4;

/// The default page size hint for binding event fetches.
pub const DEF_PAGE_SIZE: usize = 500;

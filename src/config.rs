//! Worker configuration
//!
//! Settings live in a sectioned text file (`[app]`, `[mysql_schema]`,
//! `[mysql]`; TOML syntax) under the key names listed in the deployment
//! docs. Loading is strict: a missing file, a missing required key, or an
//! unparseable value is fatal at startup. Cadence and output keys default
//! to "disabled" when absent.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::scalar::{Ctx, ScalarError};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid section/key/value text.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The file parsed but holds an unusable combination of values.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// ε or the precision settings cannot build an arithmetic context.
    #[error("invalid arithmetic settings: {0}")]
    Arithmetic(#[from] ScalarError),
}

/// `[app]` section: worker identity, arithmetic shape, and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct AppConfig {
    /// Worker identity; 0 is the root worker.
    pub client_id: i16,
    /// Campaign identifier.
    pub batch_id: i32,
    /// Mantissa width for every scalar in the run.
    pub gmp_precision_bits: u32,
    /// Fingerprint digit count `D`.
    pub str_point_digits: usize,
    /// Digits used for status output only.
    pub print_digits: usize,
    /// Generation limit.
    pub max_iterations: u8,
    /// ε as a decimal string.
    pub str_epsilon: String,
    /// Seed point file.
    pub starting_points_file: PathBuf,
    /// Seed reader buffer size in bytes.
    #[serde(default = "default_seed_buffer")]
    pub starting_points_file_line_buffer: usize,
    /// Status cadence in seconds; 0 disables.
    #[serde(default)]
    pub update_interval_sec: u64,
    /// Checkpoint cadence in seconds; 0 disables.
    #[serde(default)]
    pub checkpoint_interval_sec: u64,
    /// Wallclock budget in seconds; 0 disables.
    #[serde(default)]
    pub benchmark_time_sec: u64,
    /// Dedup cache capacity `K`; 0 disables the cache.
    #[serde(default)]
    pub max_point_cache: usize,
    /// Whether the root dumps the known set at termination.
    #[serde(default)]
    pub write_points_to_file: bool,
    /// Dump destination; required when the dump is enabled.
    #[serde(default)]
    pub output_filename: Option<PathBuf>,
}

fn default_seed_buffer() -> usize {
    4096
}

/// `[mysql_schema]` section: table names and column shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct SchemaConfig {
    /// Working-set table name.
    pub db_table_name_working: String,
    /// Known-set table name.
    pub db_table_name_known: String,
    /// Run-status table name.
    pub db_table_name_status: String,
    /// Width of the coordinate string columns.
    pub db_point_char_digits: usize,
    /// Precision of the decimal projection columns.
    pub db_point_decimal_digits_precision: u32,
    /// Scale of the decimal projection columns.
    pub db_point_decimal_digits_scale: u32,
}

/// `[mysql]` section: connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct DbConfig {
    /// Server host.
    pub db_server: String,
    /// User name.
    pub db_user: String,
    /// Password.
    pub db_password: String,
    /// Database name.
    pub db_database_name: String,
}

/// The full worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `[app]` section.
    pub app: AppConfig,
    /// `[mysql_schema]` section.
    pub mysql_schema: SchemaConfig,
    /// `[mysql]` section.
    pub mysql: DbConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the arithmetic context these settings describe.
    pub fn scalar_ctx(&self) -> Result<Ctx, ScalarError> {
        Ctx::new(
            self.app.gmp_precision_bits,
            &self.app.str_epsilon,
            self.app.str_point_digits,
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Also checks precision, digit count, and ε.
        let _ = self.scalar_ctx()?;

        // The fingerprint must carry strictly less information than the
        // mantissa (a decimal digit needs more than 3 bits).
        let digit_bits = self.app.str_point_digits as u64 * 3;
        if digit_bits >= u64::from(self.app.gmp_precision_bits) {
            return Err(ConfigError::Invalid(format!(
                "STR_POINT_DIGITS {} does not fit in GMP_PRECISION_BITS {}",
                self.app.str_point_digits, self.app.gmp_precision_bits
            )));
        }

        if self.app.str_point_digits > self.mysql_schema.db_point_char_digits {
            return Err(ConfigError::Invalid(format!(
                "STR_POINT_DIGITS {} exceeds DB_POINT_CHAR_DIGITS {}",
                self.app.str_point_digits, self.mysql_schema.db_point_char_digits
            )));
        }

        if self.mysql_schema.db_point_decimal_digits_scale
            > self.mysql_schema.db_point_decimal_digits_precision
        {
            return Err(ConfigError::Invalid(
                "decimal scale exceeds decimal precision".to_owned(),
            ));
        }

        if self.app.write_points_to_file && self.app.output_filename.is_none() {
            return Err(ConfigError::Invalid(
                "WRITE_POINTS_TO_FILE set without OUTPUT_FILENAME".to_owned(),
            ));
        }

        Ok(())
    }

    /// Logs the effective settings, password excluded.
    pub fn dump(&self) {
        debug!(
            client_id = self.app.client_id,
            batch_id = self.app.batch_id,
            precision_bits = self.app.gmp_precision_bits,
            str_point_digits = self.app.str_point_digits,
            print_digits = self.app.print_digits,
            max_iterations = self.app.max_iterations,
            epsilon = %self.app.str_epsilon,
            starting_points_file = %self.app.starting_points_file.display(),
            update_interval_sec = self.app.update_interval_sec,
            checkpoint_interval_sec = self.app.checkpoint_interval_sec,
            benchmark_time_sec = self.app.benchmark_time_sec,
            max_point_cache = self.app.max_point_cache,
            "app settings"
        );
        debug!(
            working = %self.mysql_schema.db_table_name_working,
            known = %self.mysql_schema.db_table_name_known,
            status = %self.mysql_schema.db_table_name_status,
            char_digits = self.mysql_schema.db_point_char_digits,
            decimal_precision = self.mysql_schema.db_point_decimal_digits_precision,
            decimal_scale = self.mysql_schema.db_point_decimal_digits_scale,
            "schema settings"
        );
        debug!(
            server = %self.mysql.db_server,
            user = %self.mysql.db_user,
            database = %self.mysql.db_database_name,
            "connection settings"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(app_extra: &str) -> String {
        format!(
            r#"
[app]
CLIENT_ID = 0
BATCH_ID = 7
GMP_PRECISION_BITS = 200
STR_POINT_DIGITS = 50
PRINT_DIGITS = 10
MAX_ITERATIONS = 2
STR_EPSILON = "1e-20"
STARTING_POINTS_FILE = "points.txt"
{app_extra}

[mysql_schema]
DB_TABLE_NAME_WORKING = "points_working"
DB_TABLE_NAME_KNOWN = "points_known"
DB_TABLE_NAME_STATUS = "run_status"
DB_POINT_CHAR_DIGITS = 60
DB_POINT_DECIMAL_DIGITS_PRECISION = 65
DB_POINT_DECIMAL_DIGITS_SCALE = 30

[mysql]
DB_SERVER = "localhost"
DB_USER = "worker"
DB_PASSWORD = "secret"
DB_DATABASE_NAME = "constructible"
"#
        )
    }

    fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn full_fixture_parses() {
        let config = parse(&fixture("UPDATE_INTERVAL_SEC = 30")).unwrap();
        assert_eq!(config.app.client_id, 0);
        assert_eq!(config.app.batch_id, 7);
        assert_eq!(config.app.update_interval_sec, 30);
        // Absent optional keys fall back to disabled.
        assert_eq!(config.app.benchmark_time_sec, 0);
        assert_eq!(config.app.max_point_cache, 0);
        assert!(!config.app.write_points_to_file);
        assert_eq!(config.mysql_schema.db_table_name_known, "points_known");
        assert_eq!(config.mysql.db_password, "secret");
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(fixture("").as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.app.gmp_precision_bits, 200);
        assert!(config.scalar_ctx().is_ok());
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = Config::load(Path::new("/nonexistent/worker.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn missing_required_key_is_fatal() {
        let text = fixture("").replace("BATCH_ID = 7\n", "");
        assert!(matches!(parse(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn oversized_fingerprint_is_rejected() {
        let text = fixture("").replace(
            "GMP_PRECISION_BITS = 200",
            "GMP_PRECISION_BITS = 64",
        );
        assert!(matches!(parse(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn dump_without_filename_is_rejected() {
        let config = parse(&fixture("WRITE_POINTS_TO_FILE = true"));
        assert!(matches!(config, Err(ConfigError::Invalid(_))));

        let ok = parse(&fixture(
            "WRITE_POINTS_TO_FILE = true\nOUTPUT_FILENAME = \"out.txt\"",
        ));
        assert!(ok.is_ok());
    }

    #[test]
    fn bad_epsilon_is_rejected() {
        let text = fixture("").replace("\"1e-20\"", "\"zero-ish\"");
        assert!(matches!(parse(&text), Err(ConfigError::Arithmetic(_))));
    }
}

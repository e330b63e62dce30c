use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use paraq_error::{DbError, Result};
use tracing::debug;

use crate::runtime::cancel::CancellationToken;

/// Upper bound on the number of partitions a query may use.
pub const MAX_DEGREE_OF_PARALLELISM: usize = 512;

/// Prefix for environment variables read by [`QuerySettings::from_env`].
pub const ENV_PREFIX: &str = "PARAQ_";

/// Degree of parallelism used when none is configured.
pub fn default_degree_of_parallelism() -> usize {
    num_cpus::get().clamp(1, MAX_DEGREE_OF_PARALLELISM)
}

/// Controls whether a query may fall back to sequential execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Run sequentially if the query contains operators that would need to
    /// buffer or re-index their input to run in parallel.
    #[default]
    Default,
    /// Always run in parallel.
    ForceParallelism,
    /// Always run sequentially on the calling thread.
    ForceSequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ForceParallelism => "force_parallelism",
            Self::ForceSequential => "force_sequential",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_lowercase().as_str() {
            "default" => Self::Default,
            "force_parallelism" | "parallel" => Self::ForceParallelism,
            "force_sequential" | "sequential" => Self::ForceSequential,
            other => {
                return Err(DbError::invalid_argument(format!(
                    "Invalid execution mode: '{other}'"
                )));
            }
        })
    }
}

/// Settings carried by a query and applied when it's executed.
#[derive(Debug, Clone, Default)]
pub struct QuerySettings {
    /// Number of partitions. Uses the number of cpus if unset.
    pub degree_of_parallelism: Option<usize>,
    pub execution_mode: ExecutionMode,
    /// Partition indexible sources in small interleaved stripes instead of
    /// contiguous ranges.
    pub prefer_striping: bool,
    cancellation_tokens: Vec<CancellationToken>,
}

impl QuerySettings {
    /// Build settings from `PARAQ_*` environment variables, using defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        for name in GET_SET_FUNCTIONS.keys() {
            let var = format!("{ENV_PREFIX}{}", name.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                debug!(%var, %value, "applying setting from environment");
                settings.set_from_str(name, &value)?;
            }
        }
        Ok(settings)
    }

    pub fn with_degree_of_parallelism(mut self, dop: Option<usize>) -> Self {
        self.degree_of_parallelism = dop;
        self
    }

    pub fn with_execution_mode(mut self, execution_mode: ExecutionMode) -> Self {
        self.execution_mode = execution_mode;
        self
    }

    pub fn with_striping(mut self, prefer_striping: bool) -> Self {
        self.prefer_striping = prefer_striping;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_tokens.push(token);
        self
    }

    pub fn cancellation_tokens(&self) -> &[CancellationToken] {
        &self.cancellation_tokens
    }

    /// Degree of parallelism to execute with, validating any configured
    /// value.
    pub fn resolved_degree_of_parallelism(&self) -> Result<usize> {
        match self.degree_of_parallelism {
            Some(dop) => {
                DegreeOfParallelism::validate(dop)?;
                Ok(dop)
            }
            None => Ok(default_degree_of_parallelism()),
        }
    }

    /// Combine settings from two inputs of a binary operator. Explicit values
    /// on `self` take precedence. Cancellation tokens from both are kept.
    pub fn merge(&self, other: &QuerySettings) -> QuerySettings {
        let execution_mode = match self.execution_mode {
            ExecutionMode::Default => other.execution_mode,
            mode => mode,
        };

        let mut cancellation_tokens = self.cancellation_tokens.clone();
        cancellation_tokens.extend(other.cancellation_tokens.iter().cloned());

        QuerySettings {
            degree_of_parallelism: self.degree_of_parallelism.or(other.degree_of_parallelism),
            execution_mode,
            prefer_striping: self.prefer_striping || other.prefer_striping,
            cancellation_tokens,
        }
    }

    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::invalid_argument(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::invalid_argument(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    /// Names and descriptions of all settings, sorted by name.
    pub fn describe_settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, func)| (*name, func.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    set: fn(value: &str, conf: &mut QuerySettings) -> Result<()>,
    get: fn(conf: &QuerySettings) -> String,
    description: &'static str,
}

impl SettingFunctions {
    const fn new<S: QuerySetting>() -> Self {
        SettingFunctions {
            set: S::set_from_str as _,
            get: S::get_as_string as _,
            description: S::DESCRIPTION,
        }
    }
}

fn insert_setting<S: QuerySetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<DegreeOfParallelism>(&mut map);
    insert_setting::<ExecutionModeSetting>(&mut map);
    insert_setting::<PreferStriping>(&mut map);

    map
});

pub trait QuerySetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut QuerySettings) -> Result<()>;
    fn get_as_string(conf: &QuerySettings) -> String;
}

pub struct DegreeOfParallelism;

impl DegreeOfParallelism {
    pub fn validate(dop: usize) -> Result<()> {
        if dop == 0 || dop > MAX_DEGREE_OF_PARALLELISM {
            return Err(DbError::invalid_argument("Degree of parallelism out of range")
                .with_field("degree_of_parallelism", dop)
                .with_field("max", MAX_DEGREE_OF_PARALLELISM));
        }
        Ok(())
    }
}

impl QuerySetting for DegreeOfParallelism {
    const NAME: &'static str = "degree_of_parallelism";
    const DESCRIPTION: &'static str =
        "Number of partitions to execute with, or 'auto' to use the number of cpus";

    fn set_from_str(value: &str, conf: &mut QuerySettings) -> Result<()> {
        if value.eq_ignore_ascii_case("auto") {
            conf.degree_of_parallelism = None;
            return Ok(());
        }
        let dop: usize = value.trim().parse().map_err(|_| {
            DbError::invalid_argument(format!("Invalid degree of parallelism: '{value}'"))
        })?;
        Self::validate(dop)?;
        conf.degree_of_parallelism = Some(dop);
        Ok(())
    }

    fn get_as_string(conf: &QuerySettings) -> String {
        match conf.degree_of_parallelism {
            Some(dop) => dop.to_string(),
            None => "auto".to_string(),
        }
    }
}

pub struct ExecutionModeSetting;

impl QuerySetting for ExecutionModeSetting {
    const NAME: &'static str = "execution_mode";
    const DESCRIPTION: &'static str =
        "One of 'default', 'force_parallelism', or 'force_sequential'";

    fn set_from_str(value: &str, conf: &mut QuerySettings) -> Result<()> {
        conf.execution_mode = value.trim().parse()?;
        Ok(())
    }

    fn get_as_string(conf: &QuerySettings) -> String {
        conf.execution_mode.to_string()
    }
}

pub struct PreferStriping;

impl QuerySetting for PreferStriping {
    const NAME: &'static str = "prefer_striping";
    const DESCRIPTION: &'static str =
        "Partition random access sources in interleaved stripes instead of ranges";

    fn set_from_str(value: &str, conf: &mut QuerySettings) -> Result<()> {
        conf.prefer_striping = parse_bool(value)?;
        Ok(())
    }

    fn get_as_string(conf: &QuerySettings) -> String {
        conf.prefer_striping.to_string()
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "on" => Ok(true),
        "false" | "f" | "0" | "off" => Ok(false),
        _ => Err(DbError::invalid_argument(format!("Invalid boolean: '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use paraq_error::ErrorKind;

    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut settings = QuerySettings::default();

        settings.set_from_str("degree_of_parallelism", "4").unwrap();
        settings.set_from_str("execution_mode", "force_sequential").unwrap();
        settings.set_from_str("prefer_striping", "on").unwrap();

        assert_eq!(Some(4), settings.degree_of_parallelism);
        assert_eq!(ExecutionMode::ForceSequential, settings.execution_mode);
        assert!(settings.prefer_striping);
        assert_eq!("4", settings.get_as_string("degree_of_parallelism").unwrap());

        settings.set_from_str("degree_of_parallelism", "auto").unwrap();
        assert_eq!(None, settings.degree_of_parallelism);
    }

    #[test]
    fn rejects_out_of_range_dop() {
        let mut settings = QuerySettings::default();
        let err = settings
            .set_from_str("degree_of_parallelism", "0")
            .unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());

        settings.degree_of_parallelism = Some(MAX_DEGREE_OF_PARALLELISM + 1);
        assert!(settings.resolved_degree_of_parallelism().is_err());
    }

    #[test]
    fn unknown_setting() {
        let mut settings = QuerySettings::default();
        assert!(settings.set_from_str("batch_size", "4").is_err());
        assert!(settings.get_as_string("batch_size").is_err());
    }

    #[test]
    fn merge_prefers_left() {
        let left = QuerySettings::default()
            .with_degree_of_parallelism(Some(2))
            .with_cancellation(CancellationToken::new());
        let right = QuerySettings::default()
            .with_degree_of_parallelism(Some(8))
            .with_execution_mode(ExecutionMode::ForceParallelism)
            .with_striping(true)
            .with_cancellation(CancellationToken::new());

        let merged = left.merge(&right);
        assert_eq!(Some(2), merged.degree_of_parallelism);
        assert_eq!(ExecutionMode::ForceParallelism, merged.execution_mode);
        assert!(merged.prefer_striping);
        assert_eq!(2, merged.cancellation_tokens().len());
    }

    #[test]
    fn builders_keep_cancellation_tokens() {
        let token = CancellationToken::new();
        let settings = QuerySettings::default()
            .with_cancellation(token.clone())
            .with_degree_of_parallelism(Some(3))
            .with_execution_mode(ExecutionMode::ForceSequential)
            .with_striping(true);

        assert_eq!(Some(3), settings.degree_of_parallelism);
        assert_eq!(ExecutionMode::ForceSequential, settings.execution_mode);
        assert!(settings.prefer_striping);
        assert_eq!(1, settings.cancellation_tokens().len());

        token.cancel();
        assert!(settings.cancellation_tokens()[0].is_canceled());
    }

    #[test]
    fn describe_lists_all() {
        let names: Vec<_> = QuerySettings::describe_settings()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            vec!["degree_of_parallelism", "execution_mode", "prefer_striping"],
            names
        );
    }
}

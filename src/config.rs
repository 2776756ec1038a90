use std::env;
use std::time::Duration;

use crate::error::FatalConfigError;

/// Process-wide configuration, resolved once from the environment at
/// startup. Every field here corresponds to an environment variable
/// documented in the wire contract; unset required variables are a
/// `fatal_config` error, never a silently-assumed default.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker_url: String,
    pub judge_api_key: String,
    pub judge_model: String,
    pub judge_cache_ttl: Duration,
    pub judge_deadline: Duration,
    pub judge_max_parallel: usize,
    pub rules_file: Option<String>,
    pub worker_parallelism: usize,
    pub quiescence: Duration,
    pub correlation_ceiling: Duration,
    pub registry_url: Option<String>,
    pub health_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, FatalConfigError> {
        let broker_url = required("BROKER_URL")?;
        let judge_api_key = required("JUDGE_API_KEY")?;

        let judge_model = env::var("JUDGE_MODEL")
            .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string());

        let judge_cache_ttl = Duration::from_secs(parse_opt("JUDGE_CACHE_TTL_SEC", 3600)?);
        let judge_deadline = Duration::from_millis(parse_opt("JUDGE_DEADLINE_MS", 400)?);
        let judge_max_parallel = parse_opt("JUDGE_MAX_PARALLEL", 5)? as usize;

        let rules_file = env::var("RULES_FILE").ok();

        let default_parallelism = 4 * num_cpus::get();
        let worker_parallelism = parse_opt("WORKER_PARALLELISM", default_parallelism as u64)? as usize;

        let quiescence = Duration::from_millis(parse_opt("QUIESCENCE_MS", 30_000)?);
        let correlation_ceiling = Duration::from_secs(300);

        let registry_url = env::var("REGISTRY_URL").ok();
        let health_port = parse_opt("HEALTH_PORT", 8090)? as u16;

        Ok(Self {
            broker_url,
            judge_api_key,
            judge_model,
            judge_cache_ttl,
            judge_deadline,
            judge_max_parallel,
            rules_file,
            worker_parallelism,
            quiescence,
            correlation_ceiling,
            registry_url,
            health_port,
        })
    }
}

fn required(name: &str) -> Result<String, FatalConfigError> {
    env::var(name).map_err(|_| FatalConfigError::MissingEnvVar(name.to_string()))
}

fn parse_opt(name: &str, default: u64) -> Result<u64, FatalConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| FatalConfigError::InvalidEnvVar(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

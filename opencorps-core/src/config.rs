//! Runtime configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Name of the user-supplied configuration file looked up in repositories.
pub const USER_CONFIG_FILE: &str = ".opencorps.yml";

/// Name of the generated CI pipeline file committed to the fork.
pub const CI_CONFIG_FILE: &str = ".travis.yml";

#[derive(Clone, Debug, PartialEq)]
pub struct CorpsConfig {
    /// Organisation that owns every fork.
    pub fork_org: String,
    /// `advance` gives up once `failure_count` exceeds this.
    pub max_failures: u32,
    /// Delay before re-running `advance` after a step failed.
    pub retry_delay: Duration,
    /// Delay before re-running `advance` after a step succeeded.
    pub requeue_delay: Duration,
    /// Upper bound on a single `advance` call.
    pub step_timeout: Duration,
    /// Upper bound on `advance` calls per trigger.
    pub max_rounds: u32,
    /// Extra `NAME=value` pairs encrypted into every generated CI config.
    pub secure_variables: Vec<String>,
    /// Public base URL that source-host webhooks post to.
    pub webhook_base_url: String,
    /// Directory of `.tera` files overriding the embedded CI template.
    pub template_dir: Option<PathBuf>,
}

impl Default for CorpsConfig {
    fn default() -> Self {
        Self {
            fork_org: "OpenCorps".to_owned(),
            max_failures: 20,
            retry_delay: Duration::from_millis(500),
            requeue_delay: Duration::ZERO,
            step_timeout: Duration::from_secs(60),
            max_rounds: 64,
            secure_variables: Vec::new(),
            webhook_base_url: "https://theopencorps.org".to_owned(),
            template_dir: None,
        }
    }
}

impl CorpsConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or unparsable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        let fork_org = lookup("OPENCORPS_FORK_ORG").unwrap_or(defaults.fork_org);
        let max_failures = number("OPENCORPS_MAX_FAILURES")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.max_failures);
        let retry_delay = number("OPENCORPS_RETRY_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);
        let requeue_delay = number("OPENCORPS_REQUEUE_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.requeue_delay);
        let step_timeout = number("OPENCORPS_STEP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.step_timeout);
        let max_rounds = number("OPENCORPS_MAX_ROUNDS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.max_rounds);
        let secure_variables: Vec<String> = lookup("OPENCORPS_SECURE_VARIABLES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let webhook_base_url =
            lookup("OPENCORPS_WEBHOOK_BASE_URL").unwrap_or(defaults.webhook_base_url);
        let template_dir = lookup("OPENCORPS_TEMPLATE_DIR").map(PathBuf::from);

        if secure_variables.is_empty() {
            tracing::debug!("OPENCORPS_SECURE_VARIABLES not set -- only the project token is encrypted");
        }
        if max_rounds == 0 {
            tracing::warn!("OPENCORPS_MAX_ROUNDS is 0 -- triggers will never advance a project");
        }

        Self {
            fork_org,
            max_failures,
            retry_delay,
            requeue_delay,
            step_timeout,
            max_rounds,
            secure_variables,
            webhook_base_url,
            template_dir,
        }
    }
}

//! Logging setup.
//!
//! Events go to stderr so that stdout stays clean for JSON output of the
//! CLI commands. The `[logging].level` directive is the default; the
//! `ANNOUNCER_LOG` environment variable overrides it with full
//! `EnvFilter` syntax.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const LOG_ENV_VAR: &str = "ANNOUNCER_LOG";

/// Installs the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive(&config.level))
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

fn default_directive(level: &str) -> Directive {
    match level.trim().parse::<Directive>() {
        Ok(directive) => directive,
        Err(e) => {
            eprintln!("Warning: invalid logging.level '{}': {}; using info", level, e);
            LevelFilter::INFO.into()
        }
    }
}

use dlnaconfig::Config;
use tracing_subscriber::EnvFilter;

/// Installe le subscriber `tracing` global.
///
/// `RUST_LOG` a priorité sur `host.logger.min_level`. Sans console
/// (`host.logger.enable_console: false`), seules les erreurs sont émises sur
/// stderr. Un second appel est sans effet.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.get_log_enable_console() {
            config.get_log_min_level().to_lowercase()
        } else {
            "error".to_string()
        };
        EnvFilter::new(level)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}

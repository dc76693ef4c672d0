use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber; `--log` wins over `RUST_LOG`, which wins over the settings file.
pub fn init(cli_filter: Option<&str>, configured_filter: &str) {
    let filter = build_filter(cli_filter, configured_filter);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_filter(cli_filter: Option<&str>, configured_filter: &str) -> EnvFilter {
    if let Some(directive) = cli_filter {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return filter,
            Err(error) => eprintln!("WARN: --log '{directive}' is not a valid filter ({error})"),
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(configured_filter).unwrap_or_else(|error| {
        eprintln!(
            "WARN: log_filter '{configured_filter}' is not a valid filter ({error}); \
             falling back to '{}'",
            crate::settings::DEFAULT_LOG_FILTER
        );
        EnvFilter::new(crate::settings::DEFAULT_LOG_FILTER)
    })
}

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "rosterd=info";

/// stdout belongs to the protocol, so logs go to stderr without colour.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

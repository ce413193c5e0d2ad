use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber.
///
/// `default_directive` (e.g. `"ebo=info"`) is added on top of `RUST_LOG`.
/// Returns an error if the directive does not parse or a subscriber is
/// already installed.
pub fn init_logging(default_directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::from_default_env().add_directive(default_directive.parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}

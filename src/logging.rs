use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `default_filter`
/// (e.g. `"endless_ping=info"`). Fails if a global subscriber already exists.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_filter)?;

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_filter(filter);

    Registry::default()
        .with(layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn build_filter(env: Option<&str>, default_filter: &str) -> Result<EnvFilter> {
    match env.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid RUST_LOG directives: {directives}")),
        None => EnvFilter::try_new(default_filter)
            .with_context(|| format!("Invalid log filter: {default_filter}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_prefers_env() {
        let filter = build_filter(Some("endless_ping=trace"), "warn").unwrap();
        assert!(filter.to_string().contains("endless_ping=trace"));
    }

    #[test]
    fn test_filter_falls_back_to_default() {
        let filter = build_filter(None, "endless_ping=debug").unwrap();
        assert!(filter.to_string().contains("endless_ping=debug"));

        let filter = build_filter(Some("  "), "info").unwrap();
        assert!(filter.to_string().contains("info"));
    }

    #[test]
    fn test_invalid_default_filter() {
        assert!(build_filter(None, "endless_ping=notalevel").is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging("warn");
        assert!(init_logging("warn").is_err());
    }
}

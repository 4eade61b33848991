use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// The binary target is `threat_intel`, the library `threat_intel_updater`.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "threat_intel_updater=debug,threat_intel=debug,info"
    } else {
        "threat_intel_updater=info,threat_intel=info"
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

pub fn init_cli_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines, for running under a service manager that ships logs elsewhere.
pub fn init_json_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_library_and_binary() {
        for verbose in [false, true] {
            let directives = default_directives(verbose);
            assert!(directives.contains("threat_intel_updater="));
            assert!(directives.contains("threat_intel="));
            assert!(EnvFilter::try_new(directives).is_ok());
        }
        assert!(default_directives(true).contains("threat_intel=debug"));
    }
}

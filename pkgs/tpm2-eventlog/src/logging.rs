use tracing_subscriber::EnvFilter;

use crate::cli::Verbosity;

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Installs the global subscriber. Diagnostics go to stderr, stdout is kept
/// for the rendered log. `RUST_LOG` wins over `verbosity` when set.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_directives() {
        assert_eq!(Verbosity::Quiet.directive(), "error");
        assert_eq!(Verbosity::default().directive(), "warn");
        assert_eq!(Verbosity::Verbose.directive(), "debug");
    }
}

//! Tracing setup for the `noir` binary.
//!
//! [`init_tracing`] is meant to run once at startup; a second call leaves the
//! first subscriber in place.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const NOIR_TARGETS: [&str; 3] = ["noir", "noir_core", "noir_state"];

/// Filter used when `RUST_LOG` is unset: `level` for noir's own crates,
/// `warn` for everything else (HTTP clients get chatty at debug).
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(NOIR_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// reports. `json` switches to newline-delimited JSON.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(json).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_noir_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,noir=debug,noir_core=debug,noir_state=debug"
        );
        assert!(default_directives(Level::INFO).parse::<EnvFilter>().is_ok());
    }
}

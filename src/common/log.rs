//! Logging setup: JSON lines through `tracing-subscriber`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::common::config::AppCfg;

/// Install the global subscriber. `RUST_LOG` wins over `cfg.log_level`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing(cfg: &AppCfg) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true),
        )
        .try_init();
}

/// Milliseconds elapsed since `start`, for the `elapsed_ms` log field.
pub fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let cfg = AppCfg {
            log_level: "debug".to_string(),
            ..AppCfg::default()
        };
        init_tracing(&cfg);
        init_tracing(&cfg);
        tracing::info!(dsid = 1, "logging initialised");
    }

    #[test]
    fn elapsed_is_monotonic() {
        let start = std::time::Instant::now();
        let a = elapsed_ms(start);
        let b = elapsed_ms(start);
        assert!(b >= a);
    }
}

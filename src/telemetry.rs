// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Logging setup for processes embedding the engine.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting `json` or `text` log output
pub const LOG_FORMAT_ENV: &str = "RUST_LOG_FORMAT";

/// Install the global `tracing` subscriber.
///
/// Output format: `timestamp file:line LEVEL message` with structured fields, or one JSON
/// object per line when `RUST_LOG_FORMAT=json`. The filter follows `RUST_LOG` and
/// defaults to `info`. Calling this twice is harmless; the second call keeps the first
/// subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "text".to_string());

    let result = match log_format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_target(false)
            .json()
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_target(false)
            .with_ansi(true)
            .compact()
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

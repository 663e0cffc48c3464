// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Subscriber setup: `EnvFilter` plus a human or json formatter.

use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" | "" => Ok(OutputFormat::Human),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

fn default_filter(log_level: &str) -> String {
    format!("mapgate={log_level},tower_http=warn,axum=info,reqwest=warn,hyper=warn")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(default_filter(&log_level))
    })
}

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise
/// `LOG_LEVEL` (default `info`) applies to this crate.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing(format: OutputFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        OutputFormat::Human => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init(),
        OutputFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
    }
    .is_ok();
    if installed {
        tracing::debug!(?format, "tracing initialized");
    }
    installed
}

/// Like [`init_tracing`], with the format taken from `LOG_FORMAT`.
pub fn init_tracing_from_env() -> bool {
    let raw = std::env::var("LOG_FORMAT").unwrap_or_default();
    match OutputFormat::from_str(&raw) {
        Ok(format) => init_tracing(format),
        Err(e) => {
            let installed = init_tracing(OutputFormat::Human);
            tracing::warn!("{e}, falling back to human output");
            installed
        }
    }
}

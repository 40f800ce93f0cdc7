// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Log subscriber setup for the command-line driver.

use serde::Deserialize;
use tracing_subscriber::{
    layer::SubscriberExt as _, reload, util::SubscriberInitExt as _, EnvFilter, Registry,
};

use crate::config::Verbosity;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Json,
}

/// Lets the configured debug level change the log filter after startup.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` was set, so the configured level is ignored.
    from_env: bool,
}

impl LogHandle {
    pub fn apply(&self, verbosity: Verbosity) {
        if self.from_env {
            return;
        }
        if let Err(e) = self
            .filter
            .reload(EnvFilter::new(verbosity.directive()))
        {
            tracing::warn!(error = %e, "Could not change the log filter.");
        }
    }
}

/// Install the global subscriber, logging to stderr.
pub fn init(format: LogFormat, verbosity: Verbosity) -> LogHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(verbosity.directive()), false),
    };
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match format {
        LogFormat::Full => registry.with(fmt).init(),
        LogFormat::Json => registry.with(fmt.json()).init(),
    };
    LogHandle {
        filter: handle,
        from_env,
    }
}

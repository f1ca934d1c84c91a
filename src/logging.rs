// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Local Diagnostics
//!
//! Installs the `tracing` subscriber used by the binaries.
//!
//! - `APP_ENV=production`: JSON lines, `warn` and up unless `RUST_LOG` says otherwise
//! - anything else: human-readable output at `info`

use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn is_production() -> bool {
    env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let production = is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if production {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info,lapin=warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);

    let _ = if production {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
}

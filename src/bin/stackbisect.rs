// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use stackbisect::{
    config::Config,
    path::{default_config_path, resolve_artifact},
    session::Session,
};

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Bisect tests of an artifact down to the one crashing the test runner.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "stackbisect [options] <artifact>",
    version
)]
struct Cli {
    /// Path or glob pattern of test artifact to bisect.
    #[arg(value_name = "artifact")]
    pub artifact: String,

    /// Configuration file to use instead of the default one.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Wall-clock budget per batch in seconds, 0 disables it.
    #[arg(short, long, value_name = "seconds")]
    pub timeout: Option<u64>,

    /// Output pattern identifying the crash, may be given more than once.
    #[arg(short, long = "signature", value_name = "pattern")]
    pub signatures: Vec<String>,

    /// Test harness program to invoke.
    #[arg(long, value_name = "program")]
    pub harness: Option<String>,

    /// Also write bisection report as TOML to path.
    #[arg(short, long, value_name = "path")]
    pub report: Option<PathBuf>,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        let artifact = resolve_artifact(&self.artifact)?;

        let session = Session::open(config, artifact)?;
        let report = session.bisect().await?;
        session.close()?;

        println!("{report}");
        if let Some(path) = self.report {
            report.write_to(&path)?;
            info!("report written to {:?}", path.display());
        }

        Ok(())
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(default_config_path()?)?,
        };

        if let Some(timeout) = self.timeout {
            config.oracle.timeout_secs = timeout;
        }

        if !self.signatures.is_empty() {
            config.oracle.signatures = self.signatures.clone();
        }

        if let Some(harness) = &self.harness {
            config.harness.program = harness.clone();
        }
        debug!("using configuration:\n{config}");

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

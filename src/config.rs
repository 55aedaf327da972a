// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that stackbisect uses to
//! figure out how to talk to the external test harness, and how to judge its
//! output. Every setting has a default, so a missing configuration file or a
//! partially filled one are both valid.
//!
//! # General Layout
//!
//! ```toml
//! [harness]
//! program = "dotnet"
//! discover_args = ["test", "{artifact}", "--no-build", "--no-restore", "--list-tests"]
//! run_args = ["test", "{artifact}", "--no-build", "--no-restore", "--filter", "{filter}"]
//! run_all_args = ["test", "{artifact}", "--no-build", "--no-restore"]
//! listing_marker = "The following Tests are available:"
//! filter_property = "FullyQualifiedName"
//!
//! [oracle]
//! timeout_secs = 300
//! signatures = ["stack overflow", "System.StackOverflowException"]
//! output_tail = 20
//! ```
//!
//! The `{artifact}` and `{filter}` placeholders are substituted per argument
//! when the harness is invoked. Batches covering every discovered test use
//! `run_all_args`, so the full suite never has to fit into a single filter
//! argument.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Placeholder substituted with the test artifact path.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// Placeholder substituted with the batch filter expression.
pub const FILTER_PLACEHOLDER: &str = "{filter}";

/// Snapshot of all settings for a bisection run.
///
/// Loaded once at startup and handed down by value. Nothing mutates it after
/// command line overrides are applied.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// How to invoke the external test harness.
    pub harness: HarnessSettings,

    /// How to judge batch outcomes.
    pub oracle: OracleSettings,
}

impl Config {
    /// Load configuration file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if shell expansion fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path.as_ref()).map_err(|err| ConfigError::Read {
            source: err,
            path: path.as_ref().into(),
        })?;

        data.parse()
    }

    /// Load configuration file at target path, or fall back to defaults if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] if existing file cannot be loaded.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        Self::load(path)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on harness program and working directory.
        config.harness.program = shellexpand::full(config.harness.program.as_str())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned();
        if let Some(dir) = config.harness.working_dir.take() {
            let expanded = shellexpand::full(dir.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
            config.harness.working_dir = Some(PathBuf::from(expanded));
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// External test harness settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Harness binary to invoke.
    pub program: String,

    /// Arguments that make the harness list available tests.
    pub discover_args: Vec<String>,

    /// Arguments that make the harness run a filtered batch of tests.
    pub run_args: Vec<String>,

    /// Arguments that make the harness run every test, without a filter.
    pub run_all_args: Vec<String>,

    /// Line in discovery output after which test names start.
    pub listing_marker: Option<String>,

    /// Test property matched by each term of the filter expression.
    pub filter_property: String,

    /// Directory to run the harness from.
    pub working_dir: Option<PathBuf>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            program: "dotnet".into(),
            discover_args: vec![
                "test".into(),
                ARTIFACT_PLACEHOLDER.into(),
                "--no-build".into(),
                "--no-restore".into(),
                "--list-tests".into(),
            ],
            run_args: vec![
                "test".into(),
                ARTIFACT_PLACEHOLDER.into(),
                "--no-build".into(),
                "--no-restore".into(),
                "--filter".into(),
                FILTER_PLACEHOLDER.into(),
            ],
            run_all_args: vec![
                "test".into(),
                ARTIFACT_PLACEHOLDER.into(),
                "--no-build".into(),
                "--no-restore".into(),
            ],
            listing_marker: Some("The following Tests are available:".into()),
            filter_property: "FullyQualifiedName".into(),
            working_dir: None,
        }
    }
}

/// Batch classification settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Wall-clock budget per batch in seconds. Zero disables the timeout.
    pub timeout_secs: u64,

    /// Output patterns that identify the crash being hunted.
    pub signatures: Vec<String>,

    /// Number of trailing output lines to show for unrelated failures.
    pub output_tail: usize,
}

impl OracleSettings {
    /// Per batch timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            signatures: vec![
                "stack overflow".into(),
                "System.StackOverflowException".into(),
            ],
            output_tail: 20,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

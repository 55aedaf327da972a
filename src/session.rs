// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bisection session management.
//!
//! A __session__ is one bisection run against one test artifact. It owns every
//! resource the run needs: the configuration snapshot, the artifact path, and
//! a __scratch directory__ that holds transient files like captured batch
//! output.
//!
//! # Scratch Directory Lifetime
//!
//! The scratch directory is created when the session opens, and removed when
//! the session is dropped or explicitly closed. Every exit path out of a run,
//! including setup failures and aborted harness invocations, therefore leaves
//! nothing behind.

use crate::{
    bisect::{oracle::HarnessOracle, BisectError, BisectionResult, Bisector, CandidateSet},
    config::Config,
    harness::{Harness, HarnessError},
};

use serde::Serialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

/// One bisection run.
#[derive(Debug)]
pub struct Session {
    config: Config,
    artifact: PathBuf,
    scratch: TempDir,
}

impl Session {
    /// Open new session for target artifact.
    ///
    /// The artifact may be a built test assembly, or a project directory.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::ArtifactNotFound`] if artifact does not exist.
    /// - Return [`SessionError::Scratch`] if scratch directory cannot be
    ///   created.
    pub fn open(config: Config, artifact: impl Into<PathBuf>) -> Result<Self> {
        let artifact = artifact.into();
        if !artifact.exists() {
            return Err(SessionError::ArtifactNotFound { artifact });
        }

        let scratch = tempfile::Builder::new()
            .prefix("stackbisect-")
            .tempdir()
            .map_err(SessionError::Scratch)?;
        debug!("scratch directory at {:?}", scratch.path().display());

        Ok(Self {
            config,
            artifact,
            scratch,
        })
    }

    /// Path to artifact under bisection.
    pub fn artifact(&self) -> &Path {
        self.artifact.as_path()
    }

    /// Path to scratch directory.
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Discover all test cases of artifact.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Discovery`] if harness fails to list tests.
    /// - Return [`SessionError::NoTests`] if harness lists nothing.
    pub async fn discover(&self) -> Result<CandidateSet> {
        let harness = Harness::new(self.config.harness.clone());
        let tests = harness
            .discover(&self.artifact, self.config.oracle.timeout())
            .await?;
        if tests.is_empty() {
            return Err(SessionError::NoTests {
                artifact: self.artifact.clone(),
            });
        }
        info!("found {} tests", tests.len());

        Ok(CandidateSet::new(tests))
    }

    /// Discover tests, and bisect them down to the test crashing the runner.
    ///
    /// The full set of tests is run first, so the search only starts if the
    /// failure actually reproduces.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Discovery`] or [`SessionError::NoTests`] if
    ///   discovery fails.
    /// - Return [`SessionError::Bisect`] if the full set does not reproduce
    ///   the failure, or the harness cannot be invoked.
    #[instrument(skip(self), level = "debug")]
    pub async fn bisect(&self) -> Result<Report> {
        let tests = self.discover().await?;
        let discovered = tests.len();

        let oracle = HarnessOracle::new(
            Harness::new(self.config.harness.clone()),
            self.artifact.clone(),
            self.scratch.path(),
            &self.config.oracle,
        )
        .with_discovered(tests.clone());
        let mut bisector = Bisector::new(oracle);
        let result = bisector.run(tests).await?;
        info!(
            "bisection finished after {} oracle calls",
            bisector.oracle_calls()
        );

        Ok(Report {
            artifact: self.artifact.clone(),
            discovered,
            oracle_calls: bisector.oracle_calls(),
            result,
        })
    }

    /// Close session, removing its scratch directory.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Scratch`] if scratch directory cannot be
    ///   removed.
    pub fn close(self) -> Result<()> {
        self.scratch.close().map_err(SessionError::Scratch)
    }
}

/// Summary of a finished bisection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Artifact that was bisected.
    pub artifact: PathBuf,

    /// Number of tests discovered in artifact.
    pub discovered: usize,

    /// Number of oracle calls, including the initial check.
    pub oracle_calls: usize,

    /// Outcome of bisection.
    pub result: BisectionResult,
}

impl Report {
    /// Serialize report as TOML.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Serialize`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::ser::to_string_pretty(self)?)
    }

    /// Write report as TOML to target path.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Serialize`] if serialization fails.
    /// - Return [`SessionError::WriteReport`] if report cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|err| SessionError::WriteReport {
                source: err,
                path: path.into(),
            })?;
        }

        write(path, self.to_toml()?).map_err(|err| SessionError::WriteReport {
            source: err,
            path: path.into(),
        })
    }
}

impl Display for Report {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            fmt,
            "bisected {} tests of {:?} with {} oracle calls",
            self.discovered,
            self.artifact.display(),
            self.oracle_calls
        )?;
        write!(fmt, "{}", self.result)
    }
}

/// All possible error types for a bisection session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Artifact to bisect does not exist.
    #[error("test artifact {:?} not found", artifact.display())]
    ArtifactNotFound { artifact: PathBuf },

    /// Scratch directory cannot be created or removed.
    #[error("failed to manage scratch directory")]
    Scratch(#[source] std::io::Error),

    /// Harness failed to list tests.
    #[error(transparent)]
    Discovery(#[from] HarnessError),

    /// Harness listed no tests.
    #[error("no tests found in {:?}", artifact.display())]
    NoTests { artifact: PathBuf },

    /// Bisection could not run to completion.
    #[error(transparent)]
    Bisect(#[from] BisectError),

    /// Report cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Report cannot be written.
    #[error("failed to write report to {:?}", path.display())]
    WriteReport {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

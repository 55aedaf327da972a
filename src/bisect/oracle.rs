// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Batch classification through the external test harness.
//!
//! The [`HarnessOracle`] answers the question "does this exact subset of tests
//! crash the runner?" by running the subset as one harness batch, and reading
//! what came out of it.
//!
//! # Classification
//!
//! Batch outcomes are judged in the following order:
//!
//! 1. Output contains a failure signature, e.g., "stack overflow", matched
//!    case-insensitively? The batch __reproduces__ the failure.
//! 2. Batch was killed for exceeding the timeout? The batch __reproduces__ the
//!    failure. Stack overflows tend to hang the runner instead of making it
//!    report anything, so a timeout stands in for the crash.
//! 3. Harness exited with failure for any other reason? The batch __does not
//!    reproduce__ the failure. The tail of its output is logged as a warning,
//!    since it may point at a different problem.
//! 4. Harness exited cleanly? The batch __does not reproduce__ the failure.
//!
//! # Filtering
//!
//! Subsets are selected by name through a filter expression. The one
//! exception is a subset equal to the whole discovered suite, which runs
//! without a filter. Large suites produce filters that no command line can
//! hold, and the full suite is always the first thing run.

use crate::{
    bisect::{filter::FilterExpr, CandidateSet, Oracle, Verdict},
    config::OracleSettings,
    harness::{BatchOutcome, BatchStatus, Harness, HarnessError},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Case-insensitive matcher for failure signatures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SignatureMatcher {
    signatures: Vec<String>,
}

impl SignatureMatcher {
    /// Construct new signature matcher.
    ///
    /// Blank signatures are ignored, because they would match anything.
    pub fn new(signatures: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let signatures = signatures
            .into_iter()
            .map(|signature| signature.as_ref().trim().to_lowercase())
            .filter(|signature| !signature.is_empty())
            .collect();

        Self { signatures }
    }

    /// Find first signature contained in output.
    pub fn find(&self, output: &str) -> Option<&str> {
        let output = output.to_lowercase();
        self.signatures
            .iter()
            .find(|signature| output.contains(signature.as_str()))
            .map(String::as_str)
    }
}

/// Judge a finished batch.
///
/// Pure function of the batch outcome, see the [module level
/// documentation](self) for the rules.
pub fn classify(outcome: &BatchOutcome, matcher: &SignatureMatcher) -> Verdict {
    if matcher.find(&outcome.output).is_some() {
        return Verdict::Reproduces;
    }

    match outcome.status {
        BatchStatus::TimedOut => Verdict::Reproduces,
        BatchStatus::Failed { .. } | BatchStatus::Passed => Verdict::DoesNotReproduce,
    }
}

/// Oracle that runs subsets through the external test harness.
#[derive(Debug)]
pub struct HarnessOracle {
    harness: Harness,
    artifact: PathBuf,
    scratch: PathBuf,
    matcher: SignatureMatcher,
    timeout: Option<Duration>,
    output_tail: usize,
    discovered: Option<CandidateSet>,
    batches: usize,
}

impl HarnessOracle {
    /// Construct new harness oracle.
    ///
    /// Batch output is captured inside `scratch`. Warns if the oracle settings
    /// disable the batch timeout, since a hanging batch will then block the
    /// whole run.
    pub fn new(
        harness: Harness,
        artifact: impl Into<PathBuf>,
        scratch: impl AsRef<Path>,
        settings: &OracleSettings,
    ) -> Self {
        let timeout = settings.timeout();
        if timeout.is_none() {
            warn!("batch timeout disabled, hanging batches will run untimed");
        }

        Self {
            harness,
            artifact: artifact.into(),
            scratch: scratch.as_ref().into(),
            matcher: SignatureMatcher::new(&settings.signatures),
            timeout,
            output_tail: settings.output_tail,
            discovered: None,
            batches: 0,
        }
    }

    /// Run subsets equal to the discovered suite without a filter.
    pub fn with_discovered(mut self, discovered: CandidateSet) -> Self {
        self.discovered = Some(discovered);
        self
    }

    /// Number of harness batches run so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    fn report(&self, outcome: &BatchOutcome, verdict: Verdict) {
        if let Some(signature) = self.matcher.find(&outcome.output) {
            info!("batch {} reproduces: matched {signature:?}", self.batches);
            return;
        }

        match outcome.status {
            BatchStatus::TimedOut => {
                info!(
                    "batch {} reproduces: timed out after {:?}",
                    self.batches, outcome.elapsed
                );
            }
            BatchStatus::Failed { code } => {
                warn!(
                    "batch {} failed for another reason (exit code {code:?}), last output:\n{}",
                    self.batches,
                    outcome.tail(self.output_tail)
                );
            }
            BatchStatus::Passed => {
                debug!("batch {} passed", self.batches);
            }
        }
        debug!("batch {} judged {verdict:?}", self.batches);
    }
}

impl Oracle for HarnessOracle {
    async fn evaluate(&mut self, subset: &CandidateSet) -> Result<Verdict> {
        if subset.is_empty() {
            debug!("empty subset, nothing to run");
            return Ok(Verdict::Inconclusive);
        }

        self.batches += 1;
        let filter = match &self.discovered {
            Some(discovered) if discovered == subset => None,
            _ => Some(FilterExpr::any_of(self.harness.filter_property(), subset)),
        };

        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template(
            "{elapsed_precise:.green}  {spinner:.yellow}  {msg}",
        )?);
        bar.set_message(format!("batch {} ({} tests)", self.batches, subset.len()));
        bar.enable_steady_tick(Duration::from_millis(100));

        let outcome = self
            .harness
            .run_batch(&self.artifact, filter.as_ref(), &self.scratch, self.timeout)
            .await;
        bar.finish_and_clear();
        let outcome = outcome?;

        let verdict = classify(&outcome, &self.matcher);
        self.report(&outcome, verdict);

        Ok(verdict)
    }
}

/// Oracle error types.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Harness could not run batch.
    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// Style template cannot be set for progress spinner.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
type Result<T, E = OracleError> = std::result::Result<T, E>;

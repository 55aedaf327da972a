// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External test harness invocation.
//!
//! Stackbisect never runs tests by itself. Instead it drives an external test
//! harness, `dotnet test` by default, through two operations: __discovery__,
//! which lists every test case an artifact contains, and __batch runs__, which
//! execute a filtered subset of those test cases in one harness process.
//!
//! # Output Capture
//!
//! Batch output is not piped back into the current process. Both stdout and
//! stderr of the harness are redirected into one capture file inside a
//! caller-owned scratch directory, which keeps the two streams interleaved in
//! the order the harness wrote them. Test hosts spawned by the harness inherit
//! the capture file, so a crashed or killed harness cannot leave us blocked on
//! an open pipe. The capture file is removed before a batch run returns.

use crate::{
    bisect::{filter::FilterExpr, TestCase},
    config::{HarnessSettings, ARTIFACT_PLACEHOLDER, FILTER_PLACEHOLDER},
};

use std::{
    collections::HashSet,
    io::ErrorKind,
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

/// Handle to external test harness.
#[derive(Debug, Clone)]
pub struct Harness {
    settings: HarnessSettings,
}

impl Harness {
    /// Construct new harness handle.
    pub fn new(settings: HarnessSettings) -> Self {
        Self { settings }
    }

    /// Test property each filter term matches against.
    pub fn filter_property(&self) -> &str {
        self.settings.filter_property.as_str()
    }

    /// List all test cases contained in target artifact.
    ///
    /// Runs the harness with the discovery arguments, and parses its stdout as
    /// one test name per line. Order of first appearance is preserved. If
    /// `timeout` elapses, the harness is killed along with everything it
    /// spawned.
    ///
    /// # Errors
    ///
    /// - Return [`HarnessError::Spawn`] if harness cannot be invoked.
    /// - Return [`HarnessError::DiscoveryTimedOut`] if harness exceeds the
    ///   timeout.
    /// - Return [`HarnessError::Discovery`] if harness exits with failure.
    #[instrument(skip(self, artifact), level = "debug")]
    pub async fn discover(
        &self,
        artifact: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Vec<TestCase>> {
        let args = expand_args(&self.settings.discover_args, artifact.as_ref(), None);
        info!("discover tests in {:?}", artifact.as_ref().display());
        debug!("{} {}", self.settings.program, args.join(" "));

        let child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.spawn_error(err, None))?;
        let _group = ProcessGroup::of(&child);

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| HarnessError::DiscoveryTimedOut {
                    program: self.settings.program.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(HarnessError::Wait)?;

        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
            return Err(HarnessError::Discovery {
                program: self.settings.program.clone(),
                code: output.status.code(),
                output: format!("{stdout}{stderr}").trim_end().to_string(),
            });
        }

        let tests = parse_test_listing(&stdout, self.settings.listing_marker.as_deref());
        debug!("discovered {} tests", tests.len());

        Ok(tests)
    }

    /// Run one batch of tests.
    ///
    /// A batch with a filter runs through the run arguments, a batch without
    /// one runs every test through the run-all arguments. Output is captured
    /// into a transient file inside `scratch` that is removed before
    /// returning. If `timeout` elapses, the harness is killed, and the batch
    /// is reported as [`BatchStatus::TimedOut`]. Without a timeout the batch
    /// runs for as long as the harness does.
    ///
    /// The harness leads its own process group. Once a batch is over, timed
    /// out or not, the whole group is killed, so test hosts left behind by the
    /// harness never overlap the next batch.
    ///
    /// # Errors
    ///
    /// - Return [`HarnessError::Capture`] if capture file cannot be managed.
    /// - Return [`HarnessError::FilterTooLong`] if the filter does not fit on
    ///   the command line.
    /// - Return [`HarnessError::Spawn`] if harness cannot be invoked.
    /// - Return [`HarnessError::Wait`] if harness process cannot be awaited.
    #[instrument(skip(self, artifact, filter, scratch), level = "debug")]
    pub async fn run_batch(
        &self,
        artifact: impl AsRef<Path>,
        filter: Option<&FilterExpr>,
        scratch: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<BatchOutcome> {
        let templates = match filter {
            Some(_) => &self.settings.run_args,
            None => &self.settings.run_all_args,
        };
        let args = expand_args(templates, artifact.as_ref(), filter);
        debug!("{} {}", self.settings.program, args.join(" "));

        // INVARIANT: Capture file is deleted when dropped, on every return path.
        let capture = tempfile::Builder::new()
            .prefix("batch-")
            .suffix(".log")
            .tempfile_in(scratch.as_ref())
            .map_err(HarnessError::Capture)?;
        let stdout = capture.as_file().try_clone().map_err(HarnessError::Capture)?;
        let stderr = capture.as_file().try_clone().map_err(HarnessError::Capture)?;

        let start = Instant::now();
        let mut child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.spawn_error(err, filter))?;
        let mut group = ProcessGroup::of(&child);

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status.map_err(HarnessError::Wait)?),
                Err(_) => {
                    warn!("batch exceeded {}s timeout, killing harness", limit.as_secs());
                    group.kill();
                    if let Err(err) = child.kill().await {
                        warn!("failed to kill harness: {err}");
                    }
                    None
                }
            },
            None => Some(child.wait().await.map_err(HarnessError::Wait)?),
        };
        group.kill();
        let elapsed = start.elapsed();

        let output = tokio::fs::read(capture.path())
            .await
            .map_err(HarnessError::Capture)?;
        let output = String::from_utf8_lossy(output.as_slice()).into_owned();

        let status = match status {
            None => BatchStatus::TimedOut,
            Some(status) if status.success() => BatchStatus::Passed,
            Some(status) => BatchStatus::Failed {
                code: status.code(),
            },
        };
        debug!("batch finished with {status:?} after {elapsed:?}");

        Ok(BatchOutcome {
            status,
            output,
            elapsed,
        })
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.settings.program);
        command.args(args);
        if let Some(dir) = &self.settings.working_dir {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        command.process_group(0);

        command
    }

    fn spawn_error(&self, source: std::io::Error, filter: Option<&FilterExpr>) -> HarnessError {
        match filter {
            Some(filter) if source.kind() == ErrorKind::ArgumentListTooLong => {
                HarnessError::FilterTooLong {
                    program: self.settings.program.clone(),
                    length: filter.as_str().len(),
                }
            }
            _ => HarnessError::Spawn {
                source,
                program: self.settings.program.clone(),
            },
        }
    }
}

/// Process group led by a spawned harness.
///
/// Killing the group reaches every process the harness spawned that did not
/// move into a group of its own. Killed at the latest when dropped.
#[derive(Debug)]
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::{
            errno::Errno,
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };

        let Some(leader) = self.leader.take() else {
            return;
        };
        let Ok(pgid) = i32::try_from(leader) else {
            return;
        };

        // ESRCH: nothing left in the group.
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!("failed to kill harness process group {pgid}: {err}"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Outcome of a single batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// How the harness process ended.
    pub status: BatchStatus,

    /// Combined stdout and stderr of harness.
    pub output: String,

    /// Wall-clock duration of batch.
    pub elapsed: Duration,
}

impl BatchOutcome {
    /// Last `count` lines of captured output.
    pub fn tail(&self, count: usize) -> String {
        let lines = self.output.lines().collect::<Vec<_>>();
        let start = lines.len().saturating_sub(count);
        lines[start..].join("\n")
    }
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Harness exited successfully.
    Passed,

    /// Harness exited with failure, or was terminated by a signal.
    Failed { code: Option<i32> },

    /// Harness was killed after exceeding the timeout.
    TimedOut,
}

/// Parse harness discovery output into test cases.
///
/// If `marker` is given, only lines after the first line equal to it (ignoring
/// surrounding whitespace) are considered, and an absent marker means no tests
/// were listed. Lines are trimmed, blank lines skipped, and duplicates dropped.
pub fn parse_test_listing(output: &str, marker: Option<&str>) -> Vec<TestCase> {
    let mut lines = output.lines();
    if let Some(marker) = marker {
        let marker = marker.trim();
        if !lines.any(|line| line.trim() == marker) {
            return Vec::new();
        }
    }

    let mut seen = HashSet::new();
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(TestCase::new)
        .collect()
}

/// Substitute placeholders in harness argument templates.
pub(crate) fn expand_args(
    templates: &[String],
    artifact: &Path,
    filter: Option<&FilterExpr>,
) -> Vec<String> {
    let artifact = artifact.to_string_lossy();
    templates
        .iter()
        .map(|arg| {
            let arg = arg.replace(ARTIFACT_PLACEHOLDER, artifact.as_ref());
            match filter {
                Some(filter) => arg.replace(FILTER_PLACEHOLDER, filter.as_str()),
                None => arg,
            }
        })
        .collect()
}

/// Harness invocation error types.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Harness binary cannot be invoked at all.
    #[error("failed to invoke test harness {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Harness process cannot be awaited.
    #[error("failed to wait on test harness")]
    Wait(#[source] std::io::Error),

    /// Batch capture file cannot be created or read.
    #[error("failed to manage batch capture file")]
    Capture(#[source] std::io::Error),

    /// Filter expression exceeds the command line length limit.
    #[error(
        "filter expression of {length} bytes is too long for the command line of {program:?}, \
         batch has too many tests to select by name"
    )]
    FilterTooLong { program: String, length: usize },

    /// Harness did not finish listing tests in time.
    #[error("test discovery through {program:?} exceeded {}s timeout", timeout.as_secs())]
    DiscoveryTimedOut { program: String, timeout: Duration },

    /// Harness failed to list tests.
    #[error("test discovery through {program:?} failed with exit code {code:?}:\n{output}")]
    Discovery {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

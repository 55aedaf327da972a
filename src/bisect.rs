// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bisection of failing test batches.
//!
//! Some crashes, stack overflows in particular, take the whole test runner
//! down with them. The runner reports nothing useful about which test was
//! executing when it died, so the only way to find the offender is to run
//! smaller and smaller batches until one test is left.
//!
//! # Algorithm
//!
//! Stackbisect uses a restricted form of delta debugging. The current
//! __candidate set__ is split into two halves, where odd sized sets put the
//! extra test into the first half. The first half is handed to the
//! [`Oracle`]. If it reproduces the failure, bisection continues with it, and
//! the second half is never run. Otherwise the second half is tried. If
//! neither half reproduces the failure on its own, bisection stops, because
//! the failure needs tests from both halves in combination.
//!
//! Once a single test is left, it is run one more time by itself. A test that
//! reproduces the failure alone is a __confirmed__ culprit. A test that does
//! not is reported as __unconfirmed__, which usually means the failure depends
//! on test order or interaction with other tests, or that the harness is
//! flaky. Nothing is ever retried.
//!
//! # See Also
//!
//! 1. Zeller, A., Hildebrandt, R. "Simplifying and Isolating Failure-Inducing
//!    Input". IEEE Transactions on Software Engineering, 2002.
//! 2. [`oracle`]

pub mod filter;
pub mod oracle;

use crate::bisect::oracle::OracleError;

use serde::Serialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    slice::Iter,
};
use tracing::{debug, info, instrument, warn};

/// Fully qualified name of a test case.
///
/// Opaque to stackbisect. Only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TestCase(String);

impl TestCase {
    /// Construct new test case.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Treat test case name as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TestCase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl From<&str> for TestCase {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TestCase {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Ordered working set of test cases.
///
/// # Invariant
///
/// - Never edited in place. Splitting consumes the set, and hands out two new
///   ones.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CandidateSet(Vec<TestCase>);

impl CandidateSet {
    /// Construct new candidate set.
    pub fn new(tests: impl IntoIterator<Item = impl Into<TestCase>>) -> Self {
        Self(tests.into_iter().map(Into::into).collect())
    }

    /// Number of test cases in set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if set has no test cases.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate through test cases in order.
    pub fn iter(&self) -> Iter<'_, TestCase> {
        self.0.iter()
    }

    /// Split set into two halves.
    ///
    /// First half receives `ceil(len / 2)` test cases.
    pub fn split(self) -> (Self, Self) {
        let half = self.0.len().div_ceil(2);
        let mut first = self.0;
        let second = first.split_off(half);
        (Self(first), Self(second))
    }

    fn into_single(mut self) -> Option<TestCase> {
        match self.0.len() {
            1 => self.0.pop(),
            _ => None,
        }
    }
}

impl FromIterator<TestCase> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = TestCase>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a TestCase;
    type IntoIter = Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Display for CandidateSet {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let names = self.iter().map(TestCase::as_str).collect::<Vec<_>>();
        write!(fmt, "[{}]", names.join(", "))
    }
}

/// Judgement of an oracle about one subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Subset reproduces the failure.
    Reproduces,

    /// Subset ran without reproducing the failure.
    DoesNotReproduce,

    /// Nothing could be judged, e.g., subset was empty.
    Inconclusive,
}

impl Verdict {
    /// Check if verdict counts as reproducing the failure.
    pub fn reproduces(self) -> bool {
        matches!(self, Self::Reproduces)
    }
}

/// Decide whether a subset of tests reproduces the failure.
///
/// Implementors are queried strictly one call at a time.
#[allow(async_fn_in_trait)]
pub trait Oracle {
    /// Evaluate target subset.
    ///
    /// # Errors
    ///
    /// - Return [`OracleError`] if the subset could not be evaluated at all.
    ///   Verdicts are never errors.
    async fn evaluate(&mut self, subset: &CandidateSet) -> Result<Verdict, OracleError>;
}

/// Terminal outcome of bisection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BisectionResult {
    /// Single test that reproduces the failure by itself.
    Confirmed { culprit: TestCase },

    /// Single test left over that did not reproduce the failure by itself.
    Unconfirmed { candidate: TestCase },

    /// Neither half reproduced the failure on its own.
    Combination {
        first_half: CandidateSet,
        second_half: CandidateSet,
    },
}

impl BisectionResult {
    /// Isolated test case, if bisection got down to one.
    pub fn isolated(&self) -> Option<&TestCase> {
        match self {
            Self::Confirmed { culprit } => Some(culprit),
            Self::Unconfirmed { candidate } => Some(candidate),
            Self::Combination { .. } => None,
        }
    }
}

impl Display for BisectionResult {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Confirmed { culprit } => {
                write!(fmt, "culprit: {culprit} (reproduces by itself)")
            }
            Self::Unconfirmed { candidate } => write!(
                fmt,
                "candidate: {candidate} (does not reproduce by itself, issue might depend on test order or interaction)"
            ),
            Self::Combination {
                first_half,
                second_half,
            } => {
                writeln!(
                    fmt,
                    "failure may require both halves in combination, neither reproduces alone"
                )?;
                writeln!(fmt, "first half:")?;
                for test in first_half {
                    writeln!(fmt, "  {test}")?;
                }
                write!(fmt, "second half:")?;
                for test in second_half {
                    write!(fmt, "\n  {test}")?;
                }

                Ok(())
            }
        }
    }
}

/// Binary search over a candidate set through an [`Oracle`].
#[derive(Debug)]
pub struct Bisector<O>
where
    O: Oracle,
{
    oracle: O,
    calls: usize,
}

impl<O> Bisector<O>
where
    O: Oracle,
{
    /// Construct new bisector.
    pub fn new(oracle: O) -> Self {
        Self { oracle, calls: 0 }
    }

    /// Number of oracle calls made so far.
    pub fn oracle_calls(&self) -> usize {
        self.calls
    }

    /// Give back the oracle.
    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Verify initial set reproduces the failure, then bisect it.
    ///
    /// # Errors
    ///
    /// - Return [`BisectError::EmptyCandidateSet`] if set is empty.
    /// - Return [`BisectError::InitialSetDoesNotReproduce`] if the full set
    ///   does not reproduce the failure.
    /// - Return [`BisectError::Oracle`] if any oracle call fails.
    pub async fn run(&mut self, initial: CandidateSet) -> Result<BisectionResult> {
        self.confirm_initial(&initial).await?;
        self.bisect(initial).await
    }

    /// Check that the full set reproduces the failure.
    ///
    /// # Errors
    ///
    /// - Return [`BisectError::EmptyCandidateSet`] if set is empty.
    /// - Return [`BisectError::InitialSetDoesNotReproduce`] if oracle judges
    ///   anything but [`Verdict::Reproduces`].
    /// - Return [`BisectError::Oracle`] if the oracle call fails.
    #[instrument(skip(self, initial), level = "debug")]
    pub async fn confirm_initial(&mut self, initial: &CandidateSet) -> Result<()> {
        if initial.is_empty() {
            return Err(BisectError::EmptyCandidateSet);
        }

        info!("check that all {} tests reproduce the failure", initial.len());
        let verdict = self.query(initial).await?;
        if !verdict.reproduces() {
            return Err(BisectError::InitialSetDoesNotReproduce { verdict });
        }

        Ok(())
    }

    /// Bisect candidate set down to a minimal failing subset.
    ///
    /// Assumes the full set reproduces the failure. See [`Bisector::run`] to
    /// have that checked first.
    ///
    /// # Errors
    ///
    /// - Return [`BisectError::EmptyCandidateSet`] if set is empty.
    /// - Return [`BisectError::Oracle`] if any oracle call fails.
    #[instrument(skip(self, initial), level = "debug")]
    pub async fn bisect(&mut self, initial: CandidateSet) -> Result<BisectionResult> {
        if initial.is_empty() {
            return Err(BisectError::EmptyCandidateSet);
        }

        let mut current = initial;
        let mut round = 0;
        while current.len() > 1 {
            round += 1;
            let (first, second) = current.split();
            info!(
                "round {round}: split into {} and {} tests",
                first.len(),
                second.len()
            );

            if self.query(&first).await?.reproduces() {
                debug!("first half reproduces: {first}");
                current = first;
                continue;
            }

            if self.query(&second).await?.reproduces() {
                debug!("second half reproduces: {second}");
                current = second;
                continue;
            }

            warn!("neither half reproduces the failure on its own, stopping");
            return Ok(BisectionResult::Combination {
                first_half: first,
                second_half: second,
            });
        }

        let single = current.into_single().ok_or(BisectError::EmptyCandidateSet)?;
        info!("narrowed down to {single}, verify it by itself");
        let verified = CandidateSet::new([single.clone()]);
        match self.query(&verified).await? {
            Verdict::Reproduces => Ok(BisectionResult::Confirmed { culprit: single }),
            verdict => {
                warn!("{single} alone judged {verdict:?}");
                Ok(BisectionResult::Unconfirmed { candidate: single })
            }
        }
    }

    async fn query(&mut self, subset: &CandidateSet) -> Result<Verdict> {
        self.calls += 1;
        let verdict = self.oracle.evaluate(subset).await?;
        debug!("oracle call {}: {} tests judged {verdict:?}", self.calls, subset.len());

        Ok(verdict)
    }
}

/// Bisection error types.
#[derive(Debug, thiserror::Error)]
pub enum BisectError {
    /// Nothing to bisect.
    #[error("cannot bisect an empty set of tests")]
    EmptyCandidateSet,

    /// Full set of tests does not reproduce the failure to begin with.
    #[error("full set of tests does not reproduce the failure (judged {verdict:?})")]
    InitialSetDoesNotReproduce { verdict: Verdict },

    /// Oracle could not evaluate a subset.
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Friendly result alias :3
pub type Result<T, E = BisectError> = std::result::Result<T, E>;

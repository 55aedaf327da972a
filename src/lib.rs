// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Isolate the test that crashes the test runner.
//!
//! Stackbisect takes a test artifact whose test run dies, e.g., through a stack
//! overflow that brings down the whole test host, and bisects its tests down to
//! the one responsible. Tests are run in batches through an external test
//! harness, `dotnet test` by default, and each batch is judged by its output,
//! its exit status, and whether it finished within its time budget.
//!
//! # See Also
//!
//! 1. [`bisect`] for the search itself.
//! 2. [`session`] for a full run against a test artifact.

pub mod bisect;
pub mod config;
pub mod harness;
pub mod path;
pub mod session;

pub use bisect::{BisectionResult, Bisector, CandidateSet, Oracle, TestCase, Verdict};
pub use config::Config;
pub use session::{Report, Session};

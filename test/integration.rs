// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{overflow_when, HarnessFixture};

use anyhow::Result;
use pretty_assertions::assert_eq;
use stackbisect::{
    bisect::{filter::FilterExpr, oracle::HarnessOracle, BisectError},
    harness::{BatchStatus, Harness, HarnessError},
    session::SessionError,
    BisectionResult, CandidateSet, Oracle, Session, TestCase, Verdict,
};
use std::{
    fs::read_dir,
    time::{Duration, Instant},
};

const SUITE: [&str; 4] = ["Suite.Alpha", "Suite.Bravo", "Suite.Charlie", "Suite.Delta"];

#[tokio::test]
async fn isolate_overflowing_test() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, overflow_when("Suite.Charlie"))?;
    let session = Session::open(fixture.config(30), fixture.artifact())?;

    let report = session.bisect().await?;
    assert_eq!(report.discovered, 4);
    assert_eq!(
        report.result,
        BisectionResult::Confirmed {
            culprit: TestCase::new("Suite.Charlie")
        }
    );
    // Initial check, both halves of first round, first half of second round,
    // and verification.
    assert_eq!(report.oracle_calls, 5);

    // INVARIANT: No capture files left behind.
    assert_eq!(read_dir(session.scratch_path())?.count(), 0);

    let scratch = session.scratch_path().to_path_buf();
    drop(session);
    assert!(!scratch.exists());

    Ok(())
}

#[tokio::test]
async fn stop_when_tests_only_fail_together() -> Result<()> {
    let run_body = r#"    case "$filter" in
        "" | *Suite.Alpha*Suite.Delta*)
            echo "Unhandled exception. System.StackOverflowException" >&2
            exit 134 ;;
    esac
    echo "Passed!""#;
    let fixture = HarnessFixture::new(&SUITE, run_body)?;
    let session = Session::open(fixture.config(30), fixture.artifact())?;

    let report = session.bisect().await?;
    assert_eq!(
        report.result,
        BisectionResult::Combination {
            first_half: CandidateSet::new(["Suite.Alpha", "Suite.Bravo"]),
            second_half: CandidateSet::new(["Suite.Charlie", "Suite.Delta"]),
        }
    );
    assert_eq!(report.oracle_calls, 3);

    Ok(())
}

#[tokio::test]
async fn timeout_counts_as_reproduction() -> Result<()> {
    let run_body = r#"    case "$filter" in
        "" | *Suite.Bravo*)
            exec sleep 30 ;;
    esac
    echo "Passed!""#;
    let fixture = HarnessFixture::new(&SUITE[..2], run_body)?;
    let session = Session::open(fixture.config(1), fixture.artifact())?;

    let report = session.bisect().await?;
    assert_eq!(
        report.result,
        BisectionResult::Confirmed {
            culprit: TestCase::new("Suite.Bravo")
        }
    );

    Ok(())
}

#[tokio::test]
async fn bisect_without_timeout() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, overflow_when("Suite.Charlie"))?;
    let config = fixture.config(0);
    assert_eq!(config.oracle.timeout(), None);
    let session = Session::open(config, fixture.artifact())?;

    let report = session.bisect().await?;
    assert_eq!(
        report.result,
        BisectionResult::Confirmed {
            culprit: TestCase::new("Suite.Charlie")
        }
    );
    assert_eq!(report.oracle_calls, 5);
    assert_eq!(read_dir(session.scratch_path())?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn bisect_suite_too_large_for_one_filter() -> Result<()> {
    let names = (0..3000)
        .map(|index| format!("Company.Product.Module.Feature.Tests.Test_Method_{index:05}"))
        .collect::<Vec<_>>();
    let suite = names.iter().map(String::as_str).collect::<Vec<_>>();
    let fixture = HarnessFixture::new(&suite, overflow_when(suite[2999]))?;
    let config = fixture.config(30);

    // Selecting every test by name cannot fit into a single argument.
    let tests = CandidateSet::new(suite.iter().copied());
    let filter = FilterExpr::any_of("FullyQualifiedName", &tests);
    let harness = Harness::new(config.harness.clone());
    let result = harness
        .run_batch(fixture.artifact(), Some(&filter), fixture.dir(), None)
        .await;
    assert!(matches!(result, Err(HarnessError::FilterTooLong { .. })));

    let session = Session::open(config, fixture.artifact())?;
    let report = session.bisect().await?;
    assert_eq!(report.discovered, 3000);
    assert_eq!(
        report.result,
        BisectionResult::Confirmed {
            culprit: TestCase::new(suite[2999])
        }
    );

    Ok(())
}

#[tokio::test]
async fn timed_out_batch_is_killed() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, "    exec sleep 30")?;
    let config = fixture.config(1);
    let harness = Harness::new(config.harness.clone());
    let filter = FilterExpr::any_of("FullyQualifiedName", [TestCase::new("Suite.Alpha")].iter());

    let outcome = harness
        .run_batch(
            fixture.artifact(),
            Some(&filter),
            fixture.dir(),
            Some(Duration::from_secs(1)),
        )
        .await?;
    assert_eq!(outcome.status, BatchStatus::TimedOut);
    assert!(outcome.elapsed < Duration::from_secs(30));

    Ok(())
}

#[tokio::test]
async fn timed_out_batch_kills_spawned_processes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("survivor");
    let run_body = format!("    (sleep 3; touch \"{}\") &\n    wait", marker.display());
    let fixture = HarnessFixture::new(&SUITE, run_body)?;
    let harness = Harness::new(fixture.config(1).harness);
    let filter = FilterExpr::any_of("FullyQualifiedName", [TestCase::new("Suite.Alpha")].iter());

    let outcome = harness
        .run_batch(
            fixture.artifact(),
            Some(&filter),
            fixture.dir(),
            Some(Duration::from_secs(1)),
        )
        .await?;
    assert_eq!(outcome.status, BatchStatus::TimedOut);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists());

    Ok(())
}

#[tokio::test]
async fn finished_batch_leaves_no_processes_behind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("survivor");
    let run_body = format!(
        "    (sleep 2; touch \"{}\") &\n    echo \"Passed!\"",
        marker.display()
    );
    let fixture = HarnessFixture::new(&SUITE, run_body)?;
    let harness = Harness::new(fixture.config(30).harness);

    let outcome = harness
        .run_batch(
            fixture.artifact(),
            None,
            fixture.dir(),
            Some(Duration::from_secs(30)),
        )
        .await?;
    assert_eq!(outcome.status, BatchStatus::Passed);
    assert!(outcome.output.contains("Passed!"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists());

    Ok(())
}

#[tokio::test]
async fn other_failures_do_not_reproduce() -> Result<()> {
    let run_body = r#"    echo "Failed Suite.Bravo"
    echo "  Assert.Equal() Failure"
    exit 1"#;
    let fixture = HarnessFixture::new(&SUITE, run_body)?;
    let config = fixture.config(30);
    let mut oracle = HarnessOracle::new(
        Harness::new(config.harness.clone()),
        fixture.artifact(),
        fixture.dir(),
        &config.oracle,
    );

    let verdict = oracle.evaluate(&CandidateSet::new(SUITE)).await?;
    assert_eq!(verdict, Verdict::DoesNotReproduce);
    assert_eq!(oracle.batches(), 1);

    let session = Session::open(config, fixture.artifact())?;
    let result = session.bisect().await;
    assert!(matches!(
        result,
        Err(SessionError::Bisect(BisectError::InitialSetDoesNotReproduce {
            verdict: Verdict::DoesNotReproduce
        }))
    ));

    Ok(())
}

#[tokio::test]
async fn reject_artifact_without_tests() -> Result<()> {
    let fixture = HarnessFixture::new(&[], overflow_when("Suite.Alpha"))?;
    let session = Session::open(fixture.config(30), fixture.artifact())?;

    let result = session.bisect().await;
    assert!(matches!(result, Err(SessionError::NoTests { .. })));

    Ok(())
}

#[tokio::test]
async fn reject_failed_discovery() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, overflow_when("Suite.Alpha"))?;
    let mut config = fixture.config(30);
    config.harness.discover_args = vec!["-c".into(), "echo 'no such artifact' >&2; exit 1".into()];
    let session = Session::open(config, fixture.artifact())?;

    let result = session.bisect().await;
    match result {
        Err(SessionError::Discovery(HarnessError::Discovery { code, output, .. })) => {
            assert_eq!(code, Some(1));
            assert_eq!(output, "no such artifact");
        }
        other => panic!("expected discovery failure, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn reject_hanging_discovery() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, overflow_when("Suite.Alpha"))?;
    let mut config = fixture.config(1);
    config.harness.discover_args = vec!["-c".into(), "exec sleep 30".into()];
    let session = Session::open(config, fixture.artifact())?;

    let start = Instant::now();
    let result = session.discover().await;
    assert!(matches!(
        result,
        Err(SessionError::Discovery(HarnessError::DiscoveryTimedOut { .. }))
    ));
    assert!(start.elapsed() < Duration::from_secs(30));

    Ok(())
}

#[tokio::test]
async fn abort_when_harness_is_missing() -> Result<()> {
    let fixture = HarnessFixture::new(&SUITE, overflow_when("Suite.Alpha"))?;
    let mut config = fixture.config(30);
    config.harness.program = "/nonexistent/stackbisect-harness".into();
    let session = Session::open(config.clone(), fixture.artifact())?;

    let result = session.discover().await;
    assert!(matches!(
        result,
        Err(SessionError::Discovery(HarnessError::Spawn { .. }))
    ));

    let mut oracle = HarnessOracle::new(
        Harness::new(config.harness.clone()),
        fixture.artifact(),
        session.scratch_path(),
        &config.oracle,
    );
    let result = oracle.evaluate(&CandidateSet::new(SUITE)).await;
    assert!(result.is_err());
    assert_eq!(read_dir(session.scratch_path())?.count(), 0);

    Ok(())
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

#[cfg(unix)]
mod integration;

use anyhow::Result;
use stackbisect::config::{Config, HarnessSettings, OracleSettings};
use std::{
    fs::write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Fake test harness living in a temporary directory.
///
/// The harness is a POSIX shell script run through `sh`, so it never needs to
/// be marked executable. Discovery prints a `dotnet test --list-tests` style
/// listing of the given tests. Batch runs execute `run_body` with the filter
/// expression available as `$filter`, which is empty when every test runs.
pub(crate) struct HarnessFixture {
    dir: TempDir,
    artifact: PathBuf,
    script: PathBuf,
}

impl HarnessFixture {
    pub(crate) fn new(tests: &[&str], run_body: impl AsRef<str>) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("Suite.Tests.dll");
        write(&artifact, "")?;

        let listing = tests
            .iter()
            .map(|test| format!("    echo \"    {test}\"\n"))
            .collect::<String>();
        let script = dir.path().join("harness.sh");
        write(
            &script,
            format!(
                "mode=\"$1\"\nartifact=\"$2\"\nfilter=\"$3\"\n\
                 case \"$mode\" in\n\
                 list)\n\
                 \x20   echo \"Test run for $artifact\"\n\
                 \x20   echo \"The following Tests are available:\"\n\
                 {listing}\
                 \x20   ;;\n\
                 run)\n\
                 {}\n\
                 \x20   ;;\n\
                 esac\n",
                run_body.as_ref()
            ),
        )?;

        Ok(Self {
            dir,
            artifact,
            script,
        })
    }

    pub(crate) fn artifact(&self) -> &Path {
        self.artifact.as_path()
    }

    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn config(&self, timeout_secs: u64) -> Config {
        let script = self.script.to_string_lossy().into_owned();
        Config {
            harness: HarnessSettings {
                program: "sh".into(),
                discover_args: vec![script.clone(), "list".into(), "{artifact}".into()],
                run_args: vec![
                    script.clone(),
                    "run".into(),
                    "{artifact}".into(),
                    "{filter}".into(),
                ],
                run_all_args: vec![script, "run".into(), "{artifact}".into()],
                ..HarnessSettings::default()
            },
            oracle: OracleSettings {
                timeout_secs,
                ..OracleSettings::default()
            },
        }
    }
}

/// Shell snippet that crashes like a stack overflow when `test` is in the
/// batch, and passes otherwise.
pub(crate) fn overflow_when(test: &str) -> String {
    format!(
        "    case \"$filter\" in\n\
         \x20   \"\" | *\"FullyQualifiedName={test}\"*)\n\
         \x20       echo \"Stack overflow.\" >&2\n\
         \x20       echo \"   at {test}()\" >&2\n\
         \x20       exit 134 ;;\n\
         \x20   esac\n\
         \x20   echo \"Passed!\""
    )
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, e.g., the configuration file, or the test artifact being
//! bisected.

use std::path::{Path, PathBuf};

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/stackbisect/config.toml` as
/// the default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf, NoWayHome> {
    dirs::config_dir()
        .map(|path| path.join("stackbisect").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Resolve test artifact path.
///
/// A path that exists is returned as-is. This includes directories, since the
/// harness accepts project and solution directories as well as built
/// assemblies. Otherwise the path is treated as a glob pattern, e.g.,
/// `bin/**/Suite.Tests.dll`, that must match exactly one existing entry.
///
/// # Errors
///
/// - Return [`ArtifactError::Pattern`] if glob pattern is malformed.
/// - Return [`ArtifactError::NotFound`] if nothing matches.
/// - Return [`ArtifactError::Ambiguous`] if more than one file matches.
pub fn resolve_artifact(artifact: impl AsRef<str>) -> Result<PathBuf> {
    let artifact = artifact.as_ref();
    if Path::new(artifact).exists() {
        return Ok(PathBuf::from(artifact));
    }

    let mut matches = glob::glob(artifact)?
        .filter_map(std::result::Result::ok)
        .filter(|path| path.exists())
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(ArtifactError::NotFound {
            artifact: artifact.into(),
        }),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort();
            Err(ArtifactError::Ambiguous {
                artifact: artifact.into(),
                matches,
            })
        }
    }
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Artifact resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Artifact is not a valid glob pattern.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Nothing matches artifact.
    #[error("test artifact {artifact:?} not found")]
    NotFound { artifact: String },

    /// Artifact pattern matches more than one entry.
    #[error("test artifact {artifact:?} is ambiguous, matches: {matches:?}")]
    Ambiguous {
        artifact: String,
        matches: Vec<PathBuf>,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ArtifactError> = std::result::Result<T, E>;

//! Build metadata embedded by `build.rs`.
//!
//! Values vergen could not determine (no git checkout, stripped env) read
//! as "unknown".

use std::fmt;

use serde::Serialize;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const UNKNOWN: &str = "unknown";

/// Where and when this binary was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_branch: &'static str,
    pub git_sha: &'static str,
    pub dirty: bool,
    pub built_at: &'static str,
    pub target: &'static str,
}

/// Metadata for the running build.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: PKG_VERSION,
        git_branch: option_env!("VERGEN_GIT_BRANCH").unwrap_or(UNKNOWN),
        git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or(UNKNOWN),
        dirty: option_env!("VERGEN_GIT_DIRTY") == Some("true"),
        built_at: option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or(UNKNOWN),
        target: option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or(UNKNOWN),
    }
}

impl BuildInfo {
    /// Abbreviated commit id.
    pub fn short_sha(&self) -> &'static str {
        &self.git_sha[..7.min(self.git_sha.len())]
    }
}

/// `{version}+{branch}.{sha}`, with `.dirty` appended for modified trees.
impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}.{}", self.version, self.git_branch, self.short_sha())?;
        if self.dirty {
            f.write_str(".dirty")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_version_and_branch() {
        let info = build_info();
        let shown = info.to_string();
        assert!(shown.starts_with(PKG_VERSION));
        assert!(shown.contains(info.git_branch));
    }

    #[test]
    fn dirty_suffix() {
        let info = BuildInfo {
            version: "1.2.3",
            git_branch: "main",
            git_sha: "abcdef0123456",
            dirty: true,
            built_at: UNKNOWN,
            target: UNKNOWN,
        };
        assert_eq!(info.to_string(), "1.2.3+main.abcdef0.dirty");
        assert_eq!(info.short_sha(), "abcdef0");
    }

    #[test]
    fn short_sha_of_unknown() {
        let info = BuildInfo {
            git_sha: UNKNOWN,
            ..build_info()
        };
        assert_eq!(info.short_sha(), UNKNOWN);
    }
}

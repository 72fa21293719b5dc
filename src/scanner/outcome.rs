//! What a scan did

use crate::resource::Version;
use std::fmt;

/// Why a scan ended without checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Checked recently enough; only forced scans go ahead
    IntervalNotElapsed,
    /// Paused pipelines never run checks
    PipelinePaused,
    /// A custom type this one is built on still has no version
    DependencyUnversioned(String),
}

/// Result of one scan that did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The checker found something new; `version` is now current
    Checked { discovered: usize, version: Version },
    /// The checker ran but reported nothing past the current version
    NoNewVersions,
    /// The check script failed; recorded on the entity, retried next tick
    CheckFailed { exit_status: i32 },
    Skipped(SkipReason),
    /// Another process is checking the same config
    LockUnavailable,
}

impl ScanOutcome {
    /// Whether the checker was invoked
    pub fn ran_check(&self) -> bool {
        matches!(
            self,
            Self::Checked { .. } | Self::NoNewVersions | Self::CheckFailed { .. }
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntervalNotElapsed => write!(f, "interval not elapsed"),
            Self::PipelinePaused => write!(f, "pipeline paused"),
            Self::DependencyUnversioned(name) => {
                write!(f, "resource type {} has no version", name)
            }
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checked {
                discovered,
                version,
            } => write!(f, "found {} version(s), now at {}", discovered, version),
            Self::NoNewVersions => write!(f, "no new versions"),
            Self::CheckFailed { exit_status } => {
                write!(f, "check failed with exit status {}", exit_status)
            }
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::LockUnavailable => write!(f, "lock unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let outcome = ScanOutcome::Checked {
            discovered: 3,
            version: Version::from_pairs([("ref", "v3")]),
        };
        assert_eq!(outcome.to_string(), r#"found 3 version(s), now at {"ref":"v3"}"#);
        assert_eq!(
            ScanOutcome::Skipped(SkipReason::DependencyUnversioned("b".into())).to_string(),
            "skipped: resource type b has no version"
        );
    }

    #[test]
    fn ran_check() {
        assert!(ScanOutcome::NoNewVersions.ran_check());
        assert!(ScanOutcome::CheckFailed { exit_status: 1 }.ran_check());
        assert!(!ScanOutcome::LockUnavailable.ran_check());
        assert!(!ScanOutcome::Skipped(SkipReason::PipelinePaused).ran_check());
    }
}

#![allow(clippy::module_name_repetitions)]
//! Session identity allocation.
//!
//! Names are `<base>-<n>` with the smallest free non-negative suffix at
//! allocation time. The pick is a pure function of a point-in-time listing;
//! there is no lock, so two concurrent launches can race to the same name.
//! The launcher detects that at `docker run` time and re-allocates once.

use std::collections::HashSet;
use std::process::Command;

use crate::errors::LaunchError;
use crate::runtime::container_runtime_path;

/// Default base for session names; the suffix makes it unique.
pub const SESSION_BASE: &str = "sandbox";

/// Owned exclusively by the launch in progress; the engine reclaims the
/// name the instant the session exits (`--rm`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionIdentity {
    pub base: String,
    pub suffix: u32,
}

impl SessionIdentity {
    pub fn name(&self) -> String {
        format!("{}-{}", self.base, self.suffix)
    }
}

/// Smallest suffix in 0,1,2,… whose rendered name is absent from
/// `existing`. No stored counter; the listing is the only input.
pub fn first_free_suffix(base: &str, existing: &HashSet<String>) -> SessionIdentity {
    let mut suffix = 0u32;
    while existing.contains(&format!("{base}-{suffix}")) {
        suffix += 1;
    }
    SessionIdentity {
        base: base.to_string(),
        suffix,
    }
}

/// Names known to the engine right now, running and stopped-but-named.
pub fn list_session_names(base: &str) -> Result<HashSet<String>, LaunchError> {
    let docker = container_runtime_path()?;
    let out = Command::new(docker)
        .args(["ps", "-a", "--filter"])
        .arg(format!("name=^{base}-"))
        .args(["--format", "{{.Names}}"])
        .output()?;
    if !out.status.success() {
        return Err(LaunchError::LaunchFailure {
            detail: format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            code: out.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Point-in-time list-then-pick allocation against the live engine.
pub fn allocate(base: &str) -> Result<SessionIdentity, LaunchError> {
    let existing = list_session_names(base)?;
    Ok(first_free_suffix(base, &existing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> HashSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_namespace_allocates_zero() {
        let id = first_free_suffix("sandbox", &HashSet::new());
        assert_eq!(id.name(), "sandbox-0");
    }

    #[test]
    fn gap_is_filled_first() {
        let id = first_free_suffix("sandbox", &names(&["sandbox-0", "sandbox-2"]));
        assert_eq!(id.name(), "sandbox-1");
    }

    #[test]
    fn dense_prefix_appends() {
        let id = first_free_suffix("sandbox", &names(&["sandbox-0", "sandbox-1", "sandbox-2"]));
        assert_eq!(id.name(), "sandbox-3");
    }

    #[test]
    fn foreign_names_are_ignored() {
        let id = first_free_suffix("sandbox", &names(&["sandbox-extra", "other-0", "sandbox"]));
        assert_eq!(id.name(), "sandbox-0");
    }

    // Sequential allocations against a growing namespace always yield the
    // smallest N distinct suffixes, whatever order the set grew in.
    #[test]
    fn n_allocations_cover_smallest_n_suffixes() {
        for n in 1..=16u32 {
            let mut existing = HashSet::new();
            let mut seen = Vec::new();
            for _ in 0..n {
                let id = first_free_suffix("sandbox", &existing);
                assert!(existing.insert(id.name()), "duplicate {}", id.name());
                seen.push(id.suffix);
            }
            let mut sorted = seen.clone();
            sorted.sort_unstable();
            let expected: Vec<u32> = (0..n).collect();
            assert_eq!(sorted, expected);
        }
    }
}

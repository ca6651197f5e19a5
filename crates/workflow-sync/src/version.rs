//! Version tracking and checksum-based conflict detection.
//!
//! Every committed change is described by a [`VersionInfo`]. Two snapshots of
//! the same document are compared with [`detect_conflict`], which decides
//! whether they can be ordered (one side simply wins) or whether they
//! diverged and need an explicit resolution.

use crate::conflict::{ConflictType, SyncConflict};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use web_time::{SystemTime, UNIX_EPOCH};

/// Two edits closer together than this are treated as concurrent.
pub const CONCURRENT_EDIT_WINDOW_MS: u64 = 1000;

/// Which kind of client produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMethod {
    #[default]
    Text,
    Graphical,
    Form,
}

impl Display for EditMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EditMethod::Text => write!(f, "text"),
            EditMethod::Graphical => write!(f, "graphical"),
            EditMethod::Form => write!(f, "form"),
        }
    }
}

/// Snapshot of one committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: u64,
    /// Milliseconds since Unix epoch
    pub timestamp: u64,
    pub client_id: String,
    pub method: EditMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl VersionInfo {
    /// Describe `content` committed now by `client_id`.
    pub fn for_content(
        version: u64,
        client_id: impl Into<String>,
        method: EditMethod,
        content: &str,
    ) -> Self {
        Self {
            version,
            timestamp: now_millis(),
            client_id: client_id.into(),
            method,
            checksum: Some(calculate_checksum(content)),
        }
    }
}

/// How two version snapshots relate when they do not conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    /// Same version, same content
    InSync,
    /// The remote side is ahead; advance local to remote
    RemoteNewer,
    /// The local side is ahead; push local to remote
    LocalNewer,
    /// Same version number but not provably the same content
    Diverged,
}

/// Order two snapshots using version numbers and checksums only.
pub fn compare_versions(local: &VersionInfo, remote: &VersionInfo) -> VersionOrdering {
    if local.version == remote.version && checksums_match(local, remote) == Some(true) {
        return VersionOrdering::InSync;
    }
    if remote.version > local.version {
        return VersionOrdering::RemoteNewer;
    }
    if local.version > remote.version {
        return VersionOrdering::LocalNewer;
    }
    VersionOrdering::Diverged
}

/// Compare two snapshots of `uri` and report a conflict if they diverged.
///
/// Rules are applied in a fixed order. An equal version with differing
/// checksums is always a `data_inconsistency`, so the timestamp window only
/// matters when the checksums cannot be compared.
pub fn detect_conflict(uri: &str, local: &VersionInfo, remote: &VersionInfo) -> Option<SyncConflict> {
    match compare_versions(local, remote) {
        VersionOrdering::InSync | VersionOrdering::RemoteNewer | VersionOrdering::LocalNewer => None,
        VersionOrdering::Diverged => {
            if checksums_match(local, remote) == Some(false) {
                return Some(SyncConflict::between(
                    uri,
                    local,
                    remote,
                    ConflictType::DataInconsistency,
                    format!(
                        "version {} has different content in {} and {} edits",
                        local.version, local.method, remote.method
                    ),
                ));
            }

            // TODO: checksummed content never reaches this window; revisit
            // whether concurrent edits should be checked before the content check.
            if local.timestamp.abs_diff(remote.timestamp) < CONCURRENT_EDIT_WINDOW_MS {
                return Some(SyncConflict::between(
                    uri,
                    local,
                    remote,
                    ConflictType::ConcurrentEdit,
                    format!(
                        "{} and {} edits to version {} within {}ms",
                        local.method, remote.method, local.version, CONCURRENT_EDIT_WINDOW_MS
                    ),
                ));
            }

            None
        }
    }
}

/// `None` when either side has no checksum.
fn checksums_match(local: &VersionInfo, remote: &VersionInfo) -> Option<bool> {
    match (&local.checksum, &remote.checksum) {
        (Some(a), Some(b)) => Some(a == b),
        _ => None,
    }
}

/// Rolling 32-bit hash of the UTF-16 code units of `content`, hex encoded.
///
/// Deterministic and order sensitive. Not collision resistant.
pub fn calculate_checksum(content: &str) -> String {
    let hash = content
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)));
    format!("{:x}", hash)
}

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: u64, timestamp: u64, method: EditMethod, checksum: Option<&str>) -> VersionInfo {
        VersionInfo {
            version,
            timestamp,
            client_id: format!("{}-client", method),
            method,
            checksum: checksum.map(String::from),
        }
    }

    #[test]
    fn test_checksum_deterministic() {
        assert_eq!(calculate_checksum("workflow:"), calculate_checksum("workflow:"));
        assert_ne!(calculate_checksum("ab"), calculate_checksum("ba"));
    }

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(calculate_checksum(""), "0");
        // 'a' = 97
        assert_eq!(calculate_checksum("a"), "61");
        // 97 * 31 + 98 = 3105
        assert_eq!(calculate_checksum("ab"), "c21");
    }

    #[test]
    fn test_checksum_wraps_at_32_bits() {
        let long = "workflow model ".repeat(200);
        let checksum = calculate_checksum(&long);
        assert!(checksum.len() <= 8);
        assert!(u32::from_str_radix(&checksum, 16).is_ok());
    }

    #[test]
    fn test_equal_version_and_checksum_is_in_sync() {
        let local = info(3, 1000, EditMethod::Text, Some("abc"));
        let remote = info(3, 1200, EditMethod::Graphical, Some("abc"));
        assert_eq!(compare_versions(&local, &remote), VersionOrdering::InSync);
        assert!(detect_conflict("file:///a.wf", &local, &remote).is_none());
    }

    #[test]
    fn test_newer_side_wins_without_conflict() {
        let local = info(2, 1000, EditMethod::Text, Some("abc"));
        let remote = info(5, 1000, EditMethod::Graphical, Some("def"));
        assert_eq!(compare_versions(&local, &remote), VersionOrdering::RemoteNewer);
        assert!(detect_conflict("file:///a.wf", &local, &remote).is_none());

        assert_eq!(compare_versions(&remote, &local), VersionOrdering::LocalNewer);
        assert!(detect_conflict("file:///a.wf", &remote, &local).is_none());
    }

    #[test]
    fn test_same_version_different_checksum_is_data_inconsistency() {
        let local = info(3, 1000, EditMethod::Graphical, Some("abc"));
        let remote = info(3, 1500, EditMethod::Text, Some("def"));

        let conflict = detect_conflict("file:///a.wf", &local, &remote).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::DataInconsistency);
        assert_eq!(conflict.local_version, conflict.remote_version);
        assert_eq!(conflict.local_method, EditMethod::Graphical);
        assert_eq!(conflict.remote_method, EditMethod::Text);
        assert_eq!(conflict.uri, "file:///a.wf");
    }

    #[test]
    fn test_data_inconsistency_wins_over_timing() {
        // Far apart in time, still a conflict because content differs
        let local = info(7, 0, EditMethod::Form, Some("abc"));
        let remote = info(7, 60_000, EditMethod::Text, Some("def"));
        let conflict = detect_conflict("file:///a.wf", &local, &remote).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::DataInconsistency);
    }

    #[test]
    fn test_concurrent_edit_without_checksums() {
        let local = info(4, 10_000, EditMethod::Graphical, None);
        let remote = info(4, 10_500, EditMethod::Text, None);
        let conflict = detect_conflict("file:///a.wf", &local, &remote).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::ConcurrentEdit);
        assert_eq!(conflict.local_timestamp, 10_000);
        assert_eq!(conflict.remote_timestamp, 10_500);
    }

    #[test]
    fn test_distant_edits_without_checksums_do_not_conflict() {
        let local = info(4, 10_000, EditMethod::Graphical, None);
        let remote = info(4, 11_000, EditMethod::Text, None);
        assert!(detect_conflict("file:///a.wf", &local, &remote).is_none());
    }

    #[test]
    fn test_one_missing_checksum_falls_through_to_timing() {
        let local = info(4, 10_000, EditMethod::Graphical, Some("abc"));
        let remote = info(4, 10_100, EditMethod::Text, None);
        let conflict = detect_conflict("file:///a.wf", &local, &remote).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::ConcurrentEdit);
    }

    #[test]
    fn test_for_content_attaches_checksum() {
        let info = VersionInfo::for_content(1, "client-a", EditMethod::Text, "workflow:");
        assert_eq!(info.checksum.as_deref(), Some(calculate_checksum("workflow:").as_str()));
        assert!(info.timestamp > 0);
    }

    #[test]
    fn test_version_info_serialization() {
        let info = info(3, 42, EditMethod::Graphical, Some("ff"));
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"clientId\":\"graphical-client\""));
        assert!(json.contains("\"method\":\"graphical\""));
        assert!(json.contains("\"checksum\":\"ff\""));
    }
}

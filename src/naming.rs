use chrono::{DateTime, Utc};

/// Suffix appended to the source snapshot name for the bucket export copy.
/// Downstream consumers of the exported artifact key off this exact string.
pub const EXPORT_SUFFIX: &str = "-s3-export";

/// Daily snapshot name: `<node-id>-<YYYYMMDD>`. Deterministic per (node, day),
/// so a same-day re-run targets the same snapshot name.
pub fn snapshot_name(node_id: &str, at: DateTime<Utc>) -> String {
    format!("{node_id}-{}", at.format("%Y%m%d"))
}

pub fn export_target_name(source: &str) -> String {
    format!("{source}{EXPORT_SUFFIX}")
}

pub fn s3_location(bucket: &str, target: &str) -> String {
    format!("s3://{bucket}/{target}")
}

/// Export copies are the deliverable and must never be auto-deleted.
pub fn is_export_target(name: &str) -> bool {
    name.ends_with(EXPORT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn snapshot_name_is_node_id_plus_date() {
        let at = Utc.with_ymd_and_hms(2026, 8, 23, 4, 30, 0).unwrap();
        assert_eq!(snapshot_name("cache-replica-1", at), "cache-replica-1-20260823");
    }

    #[test]
    fn snapshot_name_is_deterministic_within_a_day() {
        let morning = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 1).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 1, 5, 23, 59, 59).unwrap();
        assert_eq!(
            snapshot_name("node-a", morning),
            snapshot_name("node-a", evening)
        );
    }

    #[test]
    fn export_target_and_location_follow_the_fixed_convention() {
        let target = export_target_name("node-a-20260823");
        assert_eq!(target, "node-a-20260823-s3-export");
        assert_eq!(
            s3_location("backups", &target),
            "s3://backups/node-a-20260823-s3-export"
        );
    }

    #[test]
    fn only_suffixed_names_are_export_targets() {
        assert!(is_export_target("node-a-20260823-s3-export"));
        assert!(!is_export_target("node-a-20260823"));
        assert!(!is_export_target("node-a-s3-export-20260823"));
    }
}

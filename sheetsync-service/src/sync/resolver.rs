//! Routing of detected conflicts under the requested conflict mode.

use crate::models::ConflictMode;
use crate::sync::differ::DetectedConflict;

/// How one conflict is to be handled this pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    /// Local side wins: re-push the local record to the sheet.
    pub apply_local: Vec<DetectedConflict>,
    /// Remote side wins: apply the remote row's business fields locally.
    pub apply_remote: Vec<DetectedConflict>,
    /// Recorded for a human; nothing is applied.
    pub pending: Vec<DetectedConflict>,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Deletion and duplicate conflicts are never auto-resolved: a wrong
    /// pick there loses data, so they stay pending in every mode.
    pub fn plan(conflicts: Vec<DetectedConflict>, mode: ConflictMode) -> ResolutionPlan {
        let mut plan = ResolutionPlan::default();

        for conflict in conflicts {
            let auto_resolvable = !conflict.conflict_type.is_deletion()
                && conflict.conflict_type != crate::models::ConflictType::DuplicateRow;

            match mode {
                ConflictMode::PreferLocal if auto_resolvable => {
                    plan.apply_local.push(conflict)
                }
                ConflictMode::PreferRemote if auto_resolvable => {
                    plan.apply_remote.push(conflict)
                }
                _ => plan.pending.push(conflict),
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictType;
    use uuid::Uuid;

    fn conflict(conflict_type: ConflictType) -> DetectedConflict {
        DetectedConflict {
            transaction_id: Uuid::new_v4(),
            conflict_type,
            local_value: Some("local".to_string()),
            remote_value: Some("remote".to_string()),
            remote_row_index: Some(2),
        }
    }

    #[test]
    fn test_manual_mode_leaves_everything_pending() {
        let plan = ConflictResolver::plan(
            vec![
                conflict(ConflictType::AmountMismatch),
                conflict(ConflictType::CategoryMismatch),
            ],
            ConflictMode::Manual,
        );
        assert_eq!(plan.pending.len(), 2);
        assert!(plan.apply_local.is_empty());
        assert!(plan.apply_remote.is_empty());
    }

    #[test]
    fn test_prefer_local_routes_mismatches() {
        let plan = ConflictResolver::plan(
            vec![
                conflict(ConflictType::AmountMismatch),
                conflict(ConflictType::DeletedRemotely),
            ],
            ConflictMode::PreferLocal,
        );
        assert_eq!(plan.apply_local.len(), 1);
        assert_eq!(plan.pending.len(), 1);
        assert_eq!(
            plan.pending[0].conflict_type,
            ConflictType::DeletedRemotely
        );
    }

    #[test]
    fn test_prefer_remote_routes_mismatches() {
        let plan = ConflictResolver::plan(
            vec![conflict(ConflictType::CategoryMismatch)],
            ConflictMode::PreferRemote,
        );
        assert_eq!(plan.apply_remote.len(), 1);
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn test_duplicates_always_pending() {
        for mode in [
            ConflictMode::Manual,
            ConflictMode::PreferLocal,
            ConflictMode::PreferRemote,
        ] {
            let plan = ConflictResolver::plan(vec![conflict(ConflictType::DuplicateRow)], mode);
            assert_eq!(plan.pending.len(), 1);
        }
    }
}

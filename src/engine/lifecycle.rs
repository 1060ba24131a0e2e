// ==========================================
// 屋面估价引擎 - 估价单生命周期与版本管理
// ==========================================
// 状态流转: DRAFT → SENT → ACCEPTED / DECLINED
//           SENT / ACCEPTED / DECLINED → EXPIRED
// 版本策略: 部署级别二选一 (SupersedeOnCreate / Additive), 不混用
// ==========================================

use crate::domain::estimate::Estimate;
use crate::domain::types::{EstimateStatus, VersioningPolicy};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("非法状态流转: {from} → {to}")]
    InvalidTransition {
        from: EstimateStatus,
        to: EstimateStatus,
    },

    #[error("仅草稿可删除, 当前状态: {status}")]
    DeleteNotAllowed { status: EstimateStatus },
}

/// 状态流转是否合法
pub fn can_transition(from: EstimateStatus, to: EstimateStatus) -> bool {
    use EstimateStatus::*;
    matches!(
        (from, to),
        (Draft, Sent) | (Sent, Accepted) | (Sent, Declined) | (Sent, Expired)
            | (Accepted, Expired)
            | (Declined, Expired)
    )
}

/// 执行状态流转并记录时间戳
pub fn transition(
    estimate: &mut Estimate,
    to: EstimateStatus,
    at: NaiveDateTime,
) -> Result<(), LifecycleError> {
    let from = estimate.status;
    if !can_transition(from, to) {
        return Err(LifecycleError::InvalidTransition { from, to });
    }

    match to {
        EstimateStatus::Sent => estimate.sent_at = Some(at),
        EstimateStatus::Accepted => estimate.accepted_at = Some(at),
        EstimateStatus::Declined => estimate.declined_at = Some(at),
        EstimateStatus::Expired => estimate.expired_at = Some(at),
        EstimateStatus::Draft => {}
    }
    estimate.status = to;
    estimate.updated_at = at;

    tracing::info!(
        estimate_id = %estimate.estimate_id,
        from = %from,
        to = %to,
        "估价单状态流转"
    );
    Ok(())
}

pub fn ensure_deletable(estimate: &Estimate) -> Result<(), LifecycleError> {
    if estimate.status != EstimateStatus::Draft {
        return Err(LifecycleError::DeleteNotAllowed {
            status: estimate.status,
        });
    }
    Ok(())
}

// ==========================================
// 版本规划
// ==========================================

/// 新版本规划结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVersionPlan {
    pub version: i32,               // 新版本号 (同一标的内 max + 1)
    pub supersede_ids: Vec<String>, // 需标记为已取代的旧估价单
}

/// 为同一标的规划新版本
///
/// `existing` 为该标的下已有的全部估价单 (任意顺序)。
pub fn plan_new_version(policy: VersioningPolicy, existing: &[Estimate]) -> NewVersionPlan {
    let version = existing.iter().map(|e| e.version).max().unwrap_or(0) + 1;
    let supersede_ids = match policy {
        VersioningPolicy::SupersedeOnCreate => existing
            .iter()
            .filter(|e| !e.is_superseded)
            .map(|e| e.estimate_id.clone())
            .collect(),
        VersioningPolicy::Additive => Vec::new(),
    };
    NewVersionPlan {
        version,
        supersede_ids,
    }
}

/// 解析"当前"估价单
///
/// - SupersedeOnCreate: 未被取代的最高版本
/// - Additive: 最高版本
pub fn resolve_current(policy: VersioningPolicy, estimates: &[Estimate]) -> Option<&Estimate> {
    estimates
        .iter()
        .filter(|e| match policy {
            VersioningPolicy::SupersedeOnCreate => !e.is_superseded,
            VersioningPolicy::Additive => true,
        })
        .max_by_key(|e| e.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::variables::RoofVariables;

    fn estimate(id: &str, version: i32, superseded: bool) -> Estimate {
        let mut e = Estimate::new_draft(id, "lead-1", id, RoofVariables::default());
        e.version = version;
        e.is_superseded = superseded;
        e
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_happy_path_transitions_stamp_times() {
        let mut e = estimate("e1", 1, false);
        let at = now();
        transition(&mut e, EstimateStatus::Sent, at).unwrap();
        assert_eq!(e.status, EstimateStatus::Sent);
        assert_eq!(e.sent_at, Some(at));

        transition(&mut e, EstimateStatus::Accepted, at).unwrap();
        assert_eq!(e.accepted_at, Some(at));

        transition(&mut e, EstimateStatus::Expired, at).unwrap();
        assert_eq!(e.expired_at, Some(at));
        assert_eq!(e.status, EstimateStatus::Expired);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut e = estimate("e1", 1, false);
        assert_eq!(
            transition(&mut e, EstimateStatus::Accepted, now()).unwrap_err(),
            LifecycleError::InvalidTransition {
                from: EstimateStatus::Draft,
                to: EstimateStatus::Accepted,
            }
        );
        assert_eq!(e.status, EstimateStatus::Draft);
        assert!(e.accepted_at.is_none());

        transition(&mut e, EstimateStatus::Sent, now()).unwrap();
        transition(&mut e, EstimateStatus::Declined, now()).unwrap();
        assert!(transition(&mut e, EstimateStatus::Accepted, now()).is_err());
        assert!(transition(&mut e, EstimateStatus::Draft, now()).is_err());
    }

    #[test]
    fn test_draft_cannot_expire() {
        assert!(!can_transition(EstimateStatus::Draft, EstimateStatus::Expired));
        assert!(!can_transition(EstimateStatus::Expired, EstimateStatus::Sent));
    }

    #[test]
    fn test_only_draft_deletable() {
        let mut e = estimate("e1", 1, false);
        assert!(ensure_deletable(&e).is_ok());
        transition(&mut e, EstimateStatus::Sent, now()).unwrap();
        assert_eq!(
            ensure_deletable(&e).unwrap_err(),
            LifecycleError::DeleteNotAllowed {
                status: EstimateStatus::Sent
            }
        );
    }

    #[test]
    fn test_plan_first_version() {
        let plan = plan_new_version(VersioningPolicy::SupersedeOnCreate, &[]);
        assert_eq!(plan.version, 1);
        assert!(plan.supersede_ids.is_empty());
    }

    #[test]
    fn test_plan_supersede_on_create() {
        let existing = vec![
            estimate("e1", 1, true),
            estimate("e2", 2, false),
            estimate("e3", 3, false),
        ];
        let plan = plan_new_version(VersioningPolicy::SupersedeOnCreate, &existing);
        assert_eq!(plan.version, 4);
        assert_eq!(plan.supersede_ids, vec!["e2".to_string(), "e3".to_string()]);
    }

    #[test]
    fn test_plan_additive_keeps_all_live() {
        let existing = vec![estimate("e1", 1, false), estimate("e2", 2, false)];
        let plan = plan_new_version(VersioningPolicy::Additive, &existing);
        assert_eq!(plan.version, 3);
        assert!(plan.supersede_ids.is_empty());
    }

    #[test]
    fn test_resolve_current_by_policy() {
        let estimates = vec![
            estimate("e1", 1, false),
            estimate("e3", 3, true),
            estimate("e2", 2, false),
        ];
        assert_eq!(
            resolve_current(VersioningPolicy::SupersedeOnCreate, &estimates)
                .map(|e| e.estimate_id.as_str()),
            Some("e2")
        );
        assert_eq!(
            resolve_current(VersioningPolicy::Additive, &estimates).map(|e| e.estimate_id.as_str()),
            Some("e3")
        );
        assert!(resolve_current(VersioningPolicy::Additive, &[]).is_none());
    }
}

// ==========================================
// 屋面估价引擎 - 领域类型定义
// ==========================================
// 职责: 估价单状态 / 版本策略等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 估价单状态 (Estimate Status)
// ==========================================
// 流转: DRAFT → SENT → ACCEPTED / DECLINED
//       SENT / ACCEPTED / DECLINED → EXPIRED (外部定时触发)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateStatus {
    Draft,    // 草稿
    Sent,     // 已发送
    Accepted, // 已接受
    Declined, // 已拒绝
    Expired,  // 已过期
}

impl fmt::Display for EstimateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl EstimateStatus {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EstimateStatus::Draft => "DRAFT",
            EstimateStatus::Sent => "SENT",
            EstimateStatus::Accepted => "ACCEPTED",
            EstimateStatus::Declined => "DECLINED",
            EstimateStatus::Expired => "EXPIRED",
        }
    }
}

impl FromStr for EstimateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(EstimateStatus::Draft),
            "SENT" => Ok(EstimateStatus::Sent),
            "ACCEPTED" => Ok(EstimateStatus::Accepted),
            "DECLINED" => Ok(EstimateStatus::Declined),
            "EXPIRED" => Ok(EstimateStatus::Expired),
            other => Err(format!("未知估价单状态: {}", other)),
        }
    }
}

// ==========================================
// 版本策略 (Versioning Policy)
// ==========================================
// 每个部署必须明确选择其一,不允许混用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningPolicy {
    /// 新建即取代: 同一标的的旧估价单全部标记为 superseded
    SupersedeOnCreate,
    /// 叠加版本: 所有版本并存,以版本号区分
    Additive,
}

impl VersioningPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersioningPolicy::SupersedeOnCreate => "supersede_on_create",
            VersioningPolicy::Additive => "additive",
        }
    }
}

impl Default for VersioningPolicy {
    fn default() -> Self {
        VersioningPolicy::Additive
    }
}

impl FromStr for VersioningPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "supersede_on_create" | "supersede-on-create" | "supersede" => {
                Ok(VersioningPolicy::SupersedeOnCreate)
            }
            "additive" => Ok(VersioningPolicy::Additive),
            other => Err(format!("未知版本策略: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_roundtrip() {
        for status in [
            EstimateStatus::Draft,
            EstimateStatus::Sent,
            EstimateStatus::Accepted,
            EstimateStatus::Declined,
            EstimateStatus::Expired,
        ] {
            assert_eq!(status.to_db_str().parse::<EstimateStatus>().unwrap(), status);
        }
        assert!("ARCHIVED".parse::<EstimateStatus>().is_err());
    }

    #[test]
    fn test_versioning_policy_parse() {
        assert_eq!(
            "supersede_on_create".parse::<VersioningPolicy>().unwrap(),
            VersioningPolicy::SupersedeOnCreate
        );
        assert_eq!(" Additive ".parse::<VersioningPolicy>().unwrap(), VersioningPolicy::Additive);
        assert!("latest_wins".parse::<VersioningPolicy>().is_err());
    }
}

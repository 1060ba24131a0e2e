// ==========================================
// 屋面估价引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，把仓储/引擎/导入错误转换为用户可读的错误消息
// 红线: 所有错误信息必须包含显式原因
// ==========================================

use crate::domain::variables::VariableError;
use crate::engine::formula::FormulaError;
use crate::engine::lifecycle::LifecycleError;
use crate::engine::recalc::RecalcError;
use crate::engine::rollup::RollupError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 计算错误
    // ==========================================
    #[error("公式错误: {0}")]
    FormulaError(String),

    #[error("重算失败: {0}")]
    RecalcFailed(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("乐观锁冲突: {0}")]
    OptimisticLockFailure(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 导入 / 校验错误
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("数据验证失败: {reason}")]
    ValidationFailed {
        reason: String,
        violations: Vec<ValidationViolation>,
    },

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::OptimisticLockFailure {
                estimate_id,
                expected,
                actual,
            } => ApiError::OptimisticLockFailure(format!(
                "估价单{}已被其他操作修改（期望revision={}，实际revision={}），请重新读取后重试",
                estimate_id, expected, actual
            )),

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            // 数据质量错误
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从引擎错误转换
// ==========================================
impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { from, to } => ApiError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            LifecycleError::DeleteNotAllowed { .. } => {
                ApiError::BusinessRuleViolation(err.to_string())
            }
        }
    }
}

impl From<RollupError> for ApiError {
    fn from(err: RollupError) -> Self {
        match err {
            RollupError::InvalidPercentage { ref field, .. } => ApiError::ValidationFailed {
                reason: err.to_string(),
                violations: vec![ValidationViolation::new(field, &err.to_string())],
            },
            _ => ApiError::RecalcFailed(err.to_string()),
        }
    }
}

impl From<RecalcError> for ApiError {
    fn from(err: RecalcError) -> Self {
        match err {
            RecalcError::Rollup(inner) => inner.into(),
            other => ApiError::RecalcFailed(other.to_string()),
        }
    }
}

impl From<FormulaError> for ApiError {
    fn from(err: FormulaError) -> Self {
        ApiError::FormulaError(err.to_string())
    }
}

impl From<VariableError> for ApiError {
    fn from(err: VariableError) -> Self {
        ApiError::InvalidInput(err.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Repository(inner) => inner.into(),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// 校验违规详情
// ==========================================

/// 校验违规详情
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationViolation {
    /// 违规字段
    pub field: String,
    /// 违规原因
    pub reason: String,
}

impl ValidationViolation {
    pub fn new(field: &str, reason: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EstimateStatus;

    #[test]
    fn test_lock_failure_message_is_explicit() {
        let err: ApiError = RepositoryError::OptimisticLockFailure {
            estimate_id: "e1".to_string(),
            expected: 3,
            actual: 4,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("e1"));
        assert!(msg.contains("revision=3"));
        assert!(msg.contains("revision=4"));
    }

    #[test]
    fn test_lifecycle_and_rollup_conversion() {
        let err: ApiError = LifecycleError::InvalidTransition {
            from: EstimateStatus::Draft,
            to: EstimateStatus::Accepted,
        }
        .into();
        assert!(matches!(
            err,
            ApiError::InvalidStateTransition { ref from, ref to } if from == "DRAFT" && to == "ACCEPTED"
        ));

        let err: ApiError = RecalcError::Rollup(RollupError::InvalidPercentage {
            field: "tax_pct".to_string(),
            value: 30.0,
            min: 0.0,
            max: 20.0,
        })
        .into();
        match err {
            ApiError::ValidationFailed { violations, .. } => {
                assert_eq!(violations[0].field, "tax_pct");
            }
            other => panic!("期望校验失败, 实际: {:?}", other),
        }
    }
}

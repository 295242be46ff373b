//! 错误类型定义
//!
//! 只有两个启动期错误（分类器不可用、会话创建失败）会让整个功能停用；
//! 单次分类调用的失败在引擎内部按"未命中"恢复，不会中断队列循环。

use thiserror::Error;

use crate::classifier::Availability;

/// Spoiler Shield 错误
#[derive(Debug, Error)]
pub enum ShieldError {
    /// 分类器不处于 ready 状态（可能仍在下载模型或完全不可用）
    #[error("classifier is not ready: {0:?}")]
    ClassifierUnavailable(Availability),

    /// 分类器会话创建失败
    #[error("failed to create classifier session: {0}")]
    SessionCreation(#[source] anyhow::Error),

    /// 单次分类调用失败（引擎按 fail-open 处理）
    #[error("classifier call failed: {0}")]
    Classifier(#[source] anyhow::Error),

    /// 配置读取失败
    #[error("config store error: {0}")]
    Config(#[source] anyhow::Error),
}

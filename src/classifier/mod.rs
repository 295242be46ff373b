//! 分类器接口与适配层
//!
//! 外部分类器是一个不透明能力：接受一段文本提示，异步返回一段
//! 文本回答。适配器负责把"标题是否涉及屏蔽主题"翻译成自然语言
//! 提问，并把回答解释为布尔决策。适配器内部不做重试，单次调用
//! 失败向上传播，由队列引擎按 fail-open 处理。

pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ShieldError;

/// 回答中出现该 token（不区分大小写）即视为命中
const AFFIRMATIVE_TOKEN: &str = "yes";

/// 分类器可用性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// 可以直接创建会话
    Ready,
    /// 模型仍在下载
    Downloading,
    /// 不可用（缺少密钥、环境不支持等）
    Unavailable,
}

/// 外部分类器能力
#[async_trait]
pub trait Classifier: Send + Sync {
    /// 检查可用性；引擎只在 `Ready` 时创建会话，否则整个功能停用
    fn availability(&self) -> Availability;

    /// 创建一个提示会话
    async fn create_session(&self) -> Result<Box<dyn ClassifierSession>>;
}

/// 分类器会话
///
/// 约定：调用可能失败（超时、后端错误），并且外部分类器对并发
/// 请求限速，调用方必须保证同一时刻至多一个未完成的 `prompt`。
#[async_trait]
pub trait ClassifierSession: Send + Sync {
    /// 提交提示，返回文本回答
    async fn prompt(&self, text: &str) -> Result<String>;
}

/// 分类器适配器：持有一个会话，提供布尔分类
pub struct ClassifierAdapter {
    session: Box<dyn ClassifierSession>,
}

impl ClassifierAdapter {
    pub fn new(session: Box<dyn ClassifierSession>) -> Self {
        Self { session }
    }

    /// 构造 yes/no 提问
    pub fn build_prompt(topics: &[String], title: &str) -> String {
        format!(
            "Is the following video title strictly related to any of these topics: \"{}\"? \
             Please answer with only the single word \"yes\" or \"no\". Title: \"{}\"",
            topics.join(", "),
            title
        )
    }

    /// 解释回答：回答任意位置包含肯定 token 即为命中，
    /// 否定、乱码、空回答一律视为未命中
    pub fn is_affirmative(response: &str) -> bool {
        response.to_lowercase().contains(AFFIRMATIVE_TOKEN)
    }

    /// 判断标题是否涉及任一屏蔽主题
    ///
    /// 调用方保证 `topics` 非空（空集合由引擎短路，不会走到这里）。
    pub async fn classify(&self, topics: &[String], title: &str) -> Result<bool, ShieldError> {
        debug_assert!(!topics.is_empty(), "empty topic set must be short-circuited by the engine");

        let prompt = Self::build_prompt(topics, title);
        let response = self
            .session
            .prompt(&prompt)
            .await
            .map_err(ShieldError::Classifier)?;

        Ok(Self::is_affirmative(&response))
    }
}

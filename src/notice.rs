//! 升级提示 - 连续取不到标题时的一次性用户提示
//!
//! 计数器严格超过阈值后渲染一次不阻塞的可关闭提示，之后的越限
//! 全部忽略。关闭提示只影响提示本身，不影响计数器和队列引擎。

use std::sync::Arc;

use tracing::warn;

/// 连续"取不到标题"的默认升级阈值
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 8;

/// 提示正文
const NOTICE_TEXT: &str =
    "Spoiler Shield could not read the titles of several feed items. \
     Affected items will stay blurred until the feed recovers.";

/// 用户可见提示的渲染出口
///
/// 宿主负责真正的横幅渲染与关闭交互，这里只约定"展示一次"。
pub trait NoticeSink: Send + Sync {
    fn show(&self, text: &str);
}

/// 默认实现：写一条 warn 日志
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn show(&self, text: &str) {
        warn!("{}", text);
    }
}

/// 升级提示器（一次性）
pub struct EscalationNotifier {
    sink: Arc<dyn NoticeSink>,
    threshold: u32,
    shown: bool,
}

impl EscalationNotifier {
    pub fn new(sink: Arc<dyn NoticeSink>) -> Self {
        Self {
            sink,
            threshold: DEFAULT_FAILURE_THRESHOLD,
            shown: false,
        }
    }

    /// 设置自定义阈值
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// 观察当前连续失败计数
    ///
    /// 计数严格超过阈值且本会话尚未提示过时触发渲染，返回 `true`。
    pub fn observe(&mut self, consecutive_failures: u32) -> bool {
        if self.shown || consecutive_failures <= self.threshold {
            return false;
        }

        self.shown = true;
        self.sink.show(NOTICE_TEXT);
        true
    }

    /// 本会话是否已经提示过
    pub fn has_shown(&self) -> bool {
        self.shown
    }
}

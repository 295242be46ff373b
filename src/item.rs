//! 条目模型 - 信息流中的一个可分类单元
//!
//! 条目由外部 Item Source 创建并持有，这里只定义访问它的 trait。
//! 状态标记对应原始实现里写在条目上的 data-* 标记："unseen" 不是
//! 一个枚举值，而是尚未写入任何标记（`status()` 返回 `None`）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// 条目处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    /// 已进入待分类队列
    Queued,
    /// 正在被引擎处理（取文本 / 分类中）
    Processing,
    /// 分类完成
    Processed,
    /// 无法提取标题，跳过
    ProcessedNoTitle,
}

/// 信息流条目句柄
///
/// 实现方（宿主）负责条目的生命周期：条目从内容流中消失时直接
/// 丢弃句柄即可，引擎不会显式销毁条目。
pub trait FeedItem: Send + Sync {
    /// 条目的稳定标识，用于队列的去重
    fn id(&self) -> &str;

    /// 提取条目标题文本（已 trim；缺失或为空时返回 `None`）
    fn text(&self) -> Option<String>;

    /// 当前状态标记（从未处理过时为 `None`）
    fn status(&self) -> Option<ItemStatus>;

    /// 写入状态标记
    fn set_status(&self, status: ItemStatus);

    /// 清除状态标记（主题变更后重新分类时使用）
    fn clear_status(&self);

    /// 是否处于模糊（被屏蔽）显示状态
    fn suppressed(&self) -> bool;

    /// 切换模糊显示状态
    fn set_suppressed(&self, suppressed: bool);
}

/// 内存实现，供测试和内嵌宿主使用
pub struct MemoryItem {
    id: String,
    title: Mutex<Option<String>>,
    status: Mutex<Option<ItemStatus>>,
    suppressed: AtomicBool,
}

impl MemoryItem {
    /// 创建带标题的条目
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Mutex::new(Some(title.into())),
            status: Mutex::new(None),
            suppressed: AtomicBool::new(false),
        }
    }

    /// 创建没有标题的条目（标题元素尚未渲染等场景）
    pub fn untitled(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Mutex::new(None),
            status: Mutex::new(None),
            suppressed: AtomicBool::new(false),
        }
    }

    /// 更新标题（模拟内容流的后续渲染）
    pub fn set_title(&self, title: impl Into<String>) {
        *self.title.lock().unwrap() = Some(title.into());
    }
}

impl FeedItem for MemoryItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> Option<String> {
        self.title
            .lock()
            .unwrap()
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn status(&self) -> Option<ItemStatus> {
        *self.status.lock().unwrap()
    }

    fn set_status(&self, status: ItemStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    fn clear_status(&self) {
        *self.status.lock().unwrap() = None;
    }

    fn suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }
}

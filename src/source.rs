//! Item Source - 条目来源的接口约定
//!
//! 概念上对应一个受限于固定结构模式的文档变更监视器：先枚举当前
//! 已存在的候选条目，之后以批次推送新出现的条目。

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::item::FeedItem;

/// 一批新观察到的条目
pub type ItemBatch = Vec<Arc<dyn FeedItem>>;

/// 条目来源
pub trait ItemSource: Send + Sync {
    /// 枚举当前所有已存在的候选条目
    fn initial_items(&self) -> ItemBatch;

    /// 订阅后续新增条目的批次通知
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ItemBatch>;
}

/// 内存实现，供测试和内嵌宿主使用
///
/// `push` / `push_batch` 模拟内容流的异步突发加载。
pub struct MemoryFeed {
    items: Mutex<Vec<Arc<dyn FeedItem>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ItemBatch>>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// 预置初始条目（在 `initial_items` 枚举中返回）
    pub fn seed(&self, item: Arc<dyn FeedItem>) {
        self.items.lock().unwrap().push(item);
    }

    /// 推送单个新条目
    pub fn push(&self, item: Arc<dyn FeedItem>) {
        self.push_batch(vec![item]);
    }

    /// 推送一批新条目
    pub fn push_batch(&self, batch: ItemBatch) {
        self.items.lock().unwrap().extend(batch.iter().cloned());
        // 清理已断开的订阅者
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(batch.clone()).is_ok());
    }

    /// 当前已知条目数
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemSource for MemoryFeed {
    fn initial_items(&self) -> ItemBatch {
        self.items.lock().unwrap().clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ItemBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

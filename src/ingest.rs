//! Ingestion Controller - 条目的发现、默认模糊与重新入队
//!
//! 新条目先默认模糊再入队，分类结果出来之前宁可多遮不可漏遮。
//! 主题集合变更是唯一会让已处理条目重新分类的路径：清掉状态
//! 标记、恢复默认模糊、整体重新入队。
//!
//! 控制器与引擎循环通过邮箱通信，二者从不并发改写共享结构。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::engine::EngineCommand;
use crate::item::{FeedItem, ItemStatus};
use crate::source::{ItemBatch, ItemSource};

/// 条目接入控制器
pub struct IngestController {
    engine_tx: mpsc::UnboundedSender<EngineCommand>,
    /// 会话内见过的所有条目（主题变更时整体重新入队）
    tracked: Vec<Arc<dyn FeedItem>>,
    /// 最近一次生效的主题集合，用来忽略无变化的通知
    topics: Vec<String>,
}

impl IngestController {
    pub fn new(engine_tx: mpsc::UnboundedSender<EngineCommand>, topics: Vec<String>) -> Self {
        Self {
            engine_tx,
            tracked: Vec::new(),
            topics,
        }
    }

    /// 已跟踪的条目数
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// 接收一批新观察到的条目
    ///
    /// 只处理尚未携带状态标记的条目：默认模糊、标记 `Queued`、入队。
    /// 已有标记的条目说明本"代"已经接入过，跳过。
    pub fn admit(&mut self, batch: ItemBatch) {
        let mut fresh: ItemBatch = Vec::new();
        for item in batch {
            if item.status().is_some() {
                continue;
            }
            item.set_suppressed(true);
            item.set_status(ItemStatus::Queued);
            self.tracked.push(item.clone());
            fresh.push(item);
        }

        if !fresh.is_empty() {
            debug!(count = fresh.len(), "New items admitted");
            let _ = self.engine_tx.send(EngineCommand::Enqueue(fresh));
        }
    }

    /// 处理主题集合变更通知
    ///
    /// 引擎侧会清空决策缓存；这里把会话内跟踪到的每个条目（包括
    /// 已经 `Processed` 的）清标记、恢复默认模糊并重新入队。
    pub fn on_topics_changed(&mut self, new_topics: Vec<String>) {
        if new_topics == self.topics {
            return;
        }
        info!(
            topics = new_topics.len(),
            requeued = self.tracked.len(),
            "Blocked topics changed, requeueing all tracked items"
        );
        self.topics = new_topics.clone();
        let _ = self.engine_tx.send(EngineCommand::SetTopics(new_topics));

        for item in &self.tracked {
            item.clear_status();
            item.set_suppressed(true);
            item.set_status(ItemStatus::Queued);
        }
        let _ = self
            .engine_tx
            .send(EngineCommand::Enqueue(self.tracked.clone()));
    }

    /// 接入循环：初始枚举 + 新条目批次 + 主题变更通知
    pub async fn run(
        mut self,
        source: Arc<dyn ItemSource>,
        mut topic_rx: watch::Receiver<Vec<String>>,
        mut stop: watch::Receiver<bool>,
    ) {
        // 先订阅再做初始枚举：反过来会有一个窗口，期间推送的批次
        // 谁也收不到。枚举和批次重叠的条目由状态标记门挡掉。
        let mut batches = source.subscribe();
        self.admit(source.initial_items());

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                Some(batch) = batches.recv() => self.admit(batch),
                changed = topic_rx.changed() => match changed {
                    Ok(()) => {
                        let topics = topic_rx.borrow_and_update().clone();
                        self.on_topics_changed(topics);
                    }
                    // 配置存储已关闭，接入循环没有继续运行的意义
                    Err(_) => break,
                },
            }
        }

        info!("Ingestion controller stopped");
    }
}

//! 队列引擎 - 分类流水线的核心状态机
//!
//! 单消费者：引擎以"处理一个、挂起一段固定延迟、再处理下一个"的
//! 自调度方式运行，而不是紧循环。任一时刻至多一个条目处于处理中，
//! 从而保证对限速的外部分类器至多一个在途调用。
//!
//! 单个条目的任何处理失败都不会终止循环；每个周期结束后总会在
//! 固定延迟后再次尝试推进。
//!
//! 队列按 FIFO 出队。约定上出队顺序不作保证，这里选择 FIFO 是
//! 为了测试可复现。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::cache::DecisionCache;
use crate::classifier::ClassifierAdapter;
use crate::item::{FeedItem, ItemStatus};
use crate::notice::{EscalationNotifier, DEFAULT_FAILURE_THRESHOLD};

/// 引擎节奏配置
///
/// 延迟都可调，单元测试里压到接近零来单步状态机。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 队列为空时的等待
    pub idle_delay: Duration,
    /// 取不到标题后的等待
    pub no_text_delay: Duration,
    /// 短路路径（空主题集合 / 缓存命中）后的等待
    pub short_circuit_delay: Duration,
    /// 真正调用过分类器后的等待
    pub classify_delay: Duration,
    /// 连续取不到标题的升级阈值
    pub failure_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(1000),
            no_text_delay: Duration::from_millis(50),
            short_circuit_delay: Duration::from_millis(500),
            classify_delay: Duration::from_millis(1000),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// 测试用：所有延迟压到 1ms
    pub fn fast() -> Self {
        Self {
            idle_delay: Duration::from_millis(1),
            no_text_delay: Duration::from_millis(1),
            short_circuit_delay: Duration::from_millis(1),
            classify_delay: Duration::from_millis(1),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// 某个周期结果对应的挂起时长
    pub fn delay_for(&self, outcome: CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::Idle => self.idle_delay,
            CycleOutcome::NoText => self.no_text_delay,
            CycleOutcome::EmptyTopics | CycleOutcome::CacheHit { .. } => self.short_circuit_delay,
            CycleOutcome::Classified { .. } | CycleOutcome::FailedOpen => self.classify_delay,
        }
    }
}

/// 引擎邮箱命令
///
/// Ingestion Controller 与引擎循环通过邮箱串行化，二者永远不会
/// 并发改写队列、缓存或计数器。
pub enum EngineCommand {
    /// 入队一批条目（重复入队是空操作）
    Enqueue(Vec<Arc<dyn FeedItem>>),
    /// 替换屏蔽主题集合并清空决策缓存
    SetTopics(Vec<String>),
}

/// 单个处理周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 队列为空
    Idle,
    /// 取不到标题，条目跳过并计数
    NoText,
    /// 主题集合为空，直接取消模糊
    EmptyTopics,
    /// 命中缓存，未调用分类器
    CacheHit { matched: bool },
    /// 调用分类器得到决策
    Classified { matched: bool },
    /// 分类器调用失败，按未命中处理（不写缓存）
    FailedOpen,
}

/// 分类队列引擎
pub struct QueueEngine {
    config: EngineConfig,
    adapter: ClassifierAdapter,
    topics: Vec<String>,
    cache: DecisionCache,
    pending: VecDeque<Arc<dyn FeedItem>>,
    queued_ids: HashSet<String>,
    consecutive_no_title: u32,
    escalation: EscalationNotifier,
}

impl QueueEngine {
    pub fn new(
        adapter: ClassifierAdapter,
        topics: Vec<String>,
        escalation: EscalationNotifier,
    ) -> Self {
        Self::with_config(adapter, topics, escalation, EngineConfig::default())
    }

    pub fn with_config(
        adapter: ClassifierAdapter,
        topics: Vec<String>,
        escalation: EscalationNotifier,
        config: EngineConfig,
    ) -> Self {
        Self {
            config,
            adapter,
            topics,
            cache: DecisionCache::new(),
            pending: VecDeque::new(),
            queued_ids: HashSet::new(),
            consecutive_no_title: 0,
            escalation,
        }
    }

    /// 入队一个条目；已在队列中时是空操作，返回 `false`
    pub fn enqueue(&mut self, item: Arc<dyn FeedItem>) -> bool {
        if !self.queued_ids.insert(item.id().to_string()) {
            return false;
        }
        self.pending.push_back(item);
        true
    }

    /// 应用一条邮箱命令
    pub fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Enqueue(items) => {
                let mut added = 0usize;
                for item in items {
                    if self.enqueue(item) {
                        added += 1;
                    }
                }
                if added > 0 {
                    debug!(added, queued = self.pending.len(), "Items enqueued");
                }
            }
            EngineCommand::SetTopics(topics) => self.set_topics(topics),
        }
    }

    /// 替换屏蔽主题集合
    ///
    /// 旧主题集合下算出的缓存条目在新集合下语义错误，整体清空。
    /// 集合未变化时不动缓存。
    fn set_topics(&mut self, topics: Vec<String>) {
        if topics == self.topics {
            return;
        }
        info!(
            topics = topics.len(),
            dropped_cache_entries = self.cache.len(),
            "Blocked topics changed, decision cache cleared"
        );
        self.cache.clear();
        self.topics = topics;
    }

    /// 当前队列长度
    pub fn queue_len(&self) -> usize {
        self.pending.len()
    }

    /// 当前主题集合
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// 决策缓存（测试用）
    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// 连续取不到标题的当前计数
    pub fn consecutive_no_title(&self) -> u32 {
        self.consecutive_no_title
    }

    /// 执行一个处理周期：至多处理一个条目
    pub async fn cycle(&mut self) -> CycleOutcome {
        let Some(item) = self.pending.pop_front() else {
            return CycleOutcome::Idle;
        };
        self.queued_ids.remove(item.id());
        item.set_status(ItemStatus::Processing);

        let Some(title) = item.text() else {
            item.set_status(ItemStatus::ProcessedNoTitle);
            self.consecutive_no_title += 1;
            debug!(
                item = item.id(),
                consecutive = self.consecutive_no_title,
                "Item has no extractable title, skipped"
            );
            self.escalation.observe(self.consecutive_no_title);
            return CycleOutcome::NoText;
        };
        self.consecutive_no_title = 0;

        if self.topics.is_empty() {
            // 什么都不屏蔽：无条件取消模糊，不碰分类器
            item.set_suppressed(false);
            item.set_status(ItemStatus::Processed);
            return CycleOutcome::EmptyTopics;
        }

        if let Some(matched) = self.cache.get(&title) {
            item.set_suppressed(matched);
            item.set_status(ItemStatus::Processed);
            debug!(item = item.id(), matched, "Decision served from cache");
            return CycleOutcome::CacheHit { matched };
        }

        let outcome = match self.adapter.classify(&self.topics, &title).await {
            Ok(matched) => {
                self.cache.set(title.clone(), matched);
                if matched {
                    info!(item = item.id(), title = %title, "Spoiler detected, item stays blurred");
                }
                CycleOutcome::Classified { matched }
            }
            Err(e) => {
                // fail-open：分类器故障不能让内容无限期模糊下去。
                // 失败不写缓存，分类器恢复后同一标题还有机会重试。
                warn!(item = item.id(), error = %e, "Classifier call failed, failing open");
                CycleOutcome::FailedOpen
            }
        };

        let matched = matches!(outcome, CycleOutcome::Classified { matched: true });
        item.set_suppressed(matched);
        item.set_status(ItemStatus::Processed);
        outcome
    }

    /// 永续的自调度循环：排空邮箱、跑一个周期、按结果挂起
    ///
    /// 周期之间的固定延迟是对限速分类器的保护：邮箱命令到达时
    /// 立即应用，但不提前结束挂起，下一个周期一定等满剩余延迟。
    /// 直到 `stop` 信号触发（或所有发送端关闭）才退出。
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(topics = self.topics.len(), "Queue engine started");

        'run: loop {
            // 先排空积压命令，保证主题变更先于其触发的重新入队可见
            while let Ok(command) = commands.try_recv() {
                self.apply(command);
            }

            let outcome = self.cycle().await;
            let deadline = Instant::now() + self.config.delay_for(outcome);

            loop {
                tokio::select! {
                    _ = stop.changed() => break 'run,
                    command = commands.recv() => match command {
                        Some(command) => self.apply(command),
                        None => break 'run,
                    },
                    _ = sleep_until(deadline) => break,
                }
            }
        }

        info!("Queue engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierSession, ClassifierAdapter};
    use crate::item::MemoryItem;
    use crate::notice::{LogNoticeSink, NoticeSink};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub session answering "Yes" for titles containing a marker word
    struct MarkerSession {
        marker: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClassifierSession for MarkerSession {
        async fn prompt(&self, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains(self.marker) {
                Ok("Yes, this is related.".to_string())
            } else {
                Ok("No.".to_string())
            }
        }
    }

    fn engine_with_marker(
        topics: &[&str],
        marker: &'static str,
    ) -> (QueueEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = ClassifierAdapter::new(Box::new(MarkerSession {
            marker,
            calls: calls.clone(),
        }));
        let escalation = EscalationNotifier::new(Arc::new(LogNoticeSink));
        let engine = QueueEngine::with_config(
            adapter,
            topics.iter().map(|t| t.to_string()).collect(),
            escalation,
            EngineConfig::fast(),
        );
        (engine, calls)
    }

    fn suppressed_item(id: &str, title: &str) -> Arc<MemoryItem> {
        let item = Arc::new(MemoryItem::new(id, title));
        item.set_suppressed(true);
        item.set_status(ItemStatus::Queued);
        item
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let (mut engine, calls) = engine_with_marker(&["show x"], "finale");
        assert_eq!(engine.cycle().await, CycleOutcome::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let (mut engine, _) = engine_with_marker(&["show x"], "finale");
        let item = suppressed_item("a", "Show X finale recap");

        assert!(engine.enqueue(item.clone()));
        assert!(!engine.enqueue(item.clone()));
        assert_eq!(engine.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_match_stays_suppressed_and_is_cached() {
        let (mut engine, calls) = engine_with_marker(&["show x"], "finale");
        let item = suppressed_item("a", "Show X finale recap");
        engine.enqueue(item.clone());

        let outcome = engine.cycle().await;

        assert_eq!(outcome, CycleOutcome::Classified { matched: true });
        assert!(item.suppressed());
        assert_eq!(item.status(), Some(ItemStatus::Processed));
        assert_eq!(engine.cache().get("Show X finale recap"), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_match_unsuppresses() {
        let (mut engine, _) = engine_with_marker(&["show x"], "finale");
        let item = suppressed_item("b", "Unrelated cooking video");
        engine.enqueue(item.clone());

        let outcome = engine.cycle().await;

        assert_eq!(outcome, CycleOutcome::Classified { matched: false });
        assert!(!item.suppressed());
        assert_eq!(item.status(), Some(ItemStatus::Processed));
        assert_eq!(engine.cache().get("Unrelated cooking video"), Some(false));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_classifier_call() {
        let (mut engine, calls) = engine_with_marker(&["show x"], "finale");

        let first = suppressed_item("a", "Show X finale recap");
        engine.enqueue(first.clone());
        engine.cycle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same title under a different item identity
        let second = suppressed_item("a2", "Show X finale recap");
        engine.enqueue(second.clone());
        let outcome = engine.cycle().await;

        assert_eq!(outcome, CycleOutcome::CacheHit { matched: true });
        assert!(second.suppressed());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "cache hit must not call the classifier");
    }

    #[tokio::test]
    async fn test_empty_topics_short_circuit() {
        let (mut engine, calls) = engine_with_marker(&[], "finale");
        let item = suppressed_item("a", "Show X finale recap");
        engine.enqueue(item.clone());

        let outcome = engine.cycle().await;

        assert_eq!(outcome, CycleOutcome::EmptyTopics);
        assert!(!item.suppressed());
        assert_eq!(item.status(), Some(ItemStatus::Processed));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_topics_clears_cache() {
        let (mut engine, _) = engine_with_marker(&["show x"], "finale");
        let item = suppressed_item("a", "Show X finale recap");
        engine.enqueue(item);
        engine.cycle().await;
        assert_eq!(engine.cache().len(), 1);

        engine.apply(EngineCommand::SetTopics(vec!["formula 1".to_string()]));

        assert!(engine.cache().is_empty());
        assert_eq!(engine.topics(), ["formula 1"]);
    }

    #[tokio::test]
    async fn test_unchanged_topics_keep_cache() {
        let (mut engine, _) = engine_with_marker(&["show x"], "finale");
        let item = suppressed_item("a", "Show X finale recap");
        engine.enqueue(item);
        engine.cycle().await;

        engine.apply(EngineCommand::SetTopics(vec!["show x".to_string()]));

        assert_eq!(engine.cache().len(), 1);
    }

    /// Session that always fails
    struct BrokenSession {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClassifierSession for BrokenSession {
        async fn prompt(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("model backend timed out"))
        }
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_open_and_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = ClassifierAdapter::new(Box::new(BrokenSession { calls: calls.clone() }));
        let escalation = EscalationNotifier::new(Arc::new(LogNoticeSink));
        let mut engine = QueueEngine::with_config(
            adapter,
            vec!["show x".to_string()],
            escalation,
            EngineConfig::fast(),
        );

        let item = suppressed_item("a", "Show X finale recap");
        engine.enqueue(item.clone());
        let outcome = engine.cycle().await;

        assert_eq!(outcome, CycleOutcome::FailedOpen);
        assert!(!item.suppressed(), "fail-open must unsuppress");
        assert_eq!(item.status(), Some(ItemStatus::Processed));
        assert!(engine.cache().is_empty(), "failures must not be cached");

        // Re-enqueue: the uncached failure allows a retry
        let retry = suppressed_item("a", "Show X finale recap");
        engine.enqueue(retry);
        engine.cycle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct CountingSink(AtomicUsize);

    impl NoticeSink for CountingSink {
        fn show(&self, _text: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_missing_title_counts_and_escalates_once() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = ClassifierAdapter::new(Box::new(MarkerSession {
            marker: "finale",
            calls,
        }));
        let escalation = EscalationNotifier::new(sink.clone());
        let mut engine = QueueEngine::with_config(
            adapter,
            vec!["show x".to_string()],
            escalation,
            EngineConfig::fast(),
        );

        // 9 consecutive no-title items cross the threshold of 8
        for i in 0..9 {
            let item = Arc::new(MemoryItem::untitled(format!("u{}", i)));
            item.set_status(ItemStatus::Queued);
            engine.enqueue(item.clone());
            assert_eq!(engine.cycle().await, CycleOutcome::NoText);
            assert_eq!(item.status(), Some(ItemStatus::ProcessedNoTitle));
        }
        assert_eq!(engine.consecutive_no_title(), 9);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        // More failures: still exactly one notice
        let item = Arc::new(MemoryItem::untitled("u9"));
        engine.enqueue(item);
        engine.cycle().await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    /// Session that records when each call lands
    struct TimedSession {
        times: Arc<std::sync::Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl ClassifierSession for TimedSession {
        async fn prompt(&self, _text: &str) -> Result<String> {
            self.times.lock().unwrap().push(Instant::now());
            Ok("No.".to_string())
        }
    }

    #[tokio::test]
    async fn test_command_bursts_do_not_shorten_inter_cycle_delay() {
        // Given: an engine with a 100ms post-classify delay
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let adapter = ClassifierAdapter::new(Box::new(TimedSession {
            times: times.clone(),
        }));
        let escalation = EscalationNotifier::new(Arc::new(LogNoticeSink));
        let config = EngineConfig {
            classify_delay: Duration::from_millis(100),
            ..EngineConfig::fast()
        };
        let engine = QueueEngine::with_config(
            adapter,
            vec!["show x".to_string()],
            escalation,
            config,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(rx, stop_rx));

        // When: a burst of items lands 20ms apart, well inside the delay
        for i in 0..3 {
            let item: Arc<dyn FeedItem> =
                Arc::new(MemoryItem::new(format!("i{}", i), format!("Show X part {}", i)));
            tx.send(EngineCommand::Enqueue(vec![item])).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while times.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("classifier calls not observed within deadline");

        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // Then: consecutive classifier calls still honor the full delay
        let times = times.lock().unwrap();
        for pair in times.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(100),
                "calls landed {:?} apart, configured delay is 100ms",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test]
    async fn test_successful_extraction_resets_failure_counter() {
        let (mut engine, _) = engine_with_marker(&["show x"], "finale");

        for i in 0..3 {
            engine.enqueue(Arc::new(MemoryItem::untitled(format!("u{}", i))));
            engine.cycle().await;
        }
        assert_eq!(engine.consecutive_no_title(), 3);

        engine.enqueue(suppressed_item("a", "Unrelated cooking video"));
        engine.cycle().await;
        assert_eq!(engine.consecutive_no_title(), 0);
    }
}

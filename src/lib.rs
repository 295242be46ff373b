//! Spoiler Shield - 监控内容流并自动模糊命中屏蔽主题的条目
//!
//! 核心是分类队列引擎：单消费者工作队列、按标题缓存的分类决策、
//! 与限速 AI 分类器的串行交互、连续失败计数与一次性升级提示，
//! 以及屏蔽主题变更时的响应式重新入队。

pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod item;
pub mod notice;
pub mod shield;
pub mod source;

pub use cache::DecisionCache;
pub use classifier::{Availability, Classifier, ClassifierAdapter, ClassifierSession};
pub use classifier::http::{HttpClassifier, HttpClassifierConfig};
pub use config::{normalize_topics, ConfigStore, FileConfigStore, MemoryConfigStore};
pub use engine::{CycleOutcome, EngineCommand, EngineConfig, QueueEngine};
pub use error::ShieldError;
pub use ingest::IngestController;
pub use item::{FeedItem, ItemStatus, MemoryItem};
pub use notice::{EscalationNotifier, LogNoticeSink, NoticeSink, DEFAULT_FAILURE_THRESHOLD};
pub use shield::{ShieldHandle, SpoilerShield};
pub use source::{ItemSource, MemoryFeed};

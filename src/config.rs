//! Config Store - 屏蔽主题集合的读取与变更通知
//!
//! 统一使用单一键 `spoiler_topics`、单一存储范围（历史上曾有
//! `spoilers` 和 `spoilerTopics` 两套键并存，这里收敛为一个）。
//! 空列表是合法且有意义的状态："什么都不屏蔽"。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

/// 配置文件中的主题列表字段名
pub const CONFIG_KEY: &str = "spoiler_topics";

/// 规范化主题列表：trim、小写、去掉空串
///
/// 与设置界面写入时的规范保持一致，保证同一主题不会因为大小写
/// 或空白差异被视为变更。
pub fn normalize_topics(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    raw.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// 屏蔽主题配置存储
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 读取当前屏蔽主题集合
    async fn blocked_topics(&self) -> Result<Vec<String>>;

    /// 订阅主题集合的变更通知
    fn subscribe(&self) -> watch::Receiver<Vec<String>>;
}

/// 内存实现，供测试和内嵌宿主使用
pub struct MemoryConfigStore {
    tx: watch::Sender<Vec<String>>,
}

impl MemoryConfigStore {
    pub fn new(topics: Vec<String>) -> Self {
        let (tx, _) = watch::channel(normalize_topics(topics));
        Self { tx }
    }

    /// 替换主题集合并通知订阅者（集合未变化时不通知）
    pub fn set_topics(&self, topics: Vec<String>) {
        let topics = normalize_topics(topics);
        self.tx.send_if_modified(|current| {
            if *current == topics {
                false
            } else {
                *current = topics;
                true
            }
        });
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn blocked_topics(&self) -> Result<Vec<String>> {
        Ok(self.tx.borrow().clone())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}

/// JSON 文件实现
///
/// 文件格式：`{ "spoiler_topics": ["show x", "formula 1"] }`。
/// 文件不存在视为空列表。宿主在设置界面写入文件后调用 `reload()`
/// 触发变更通知。
pub struct FileConfigStore {
    path: PathBuf,
    tx: watch::Sender<Vec<String>>,
}

impl FileConfigStore {
    /// 打开指定路径的配置文件
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let topics = Self::read_topics(&path)?;
        info!(path = %path.display(), topics = topics.len(), "Loaded blocked topics");
        let (tx, _) = watch::channel(topics);
        Ok(Self { path, tx })
    }

    /// 打开默认位置 `~/.config/spoiler-shield/config.json`
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path().context("Cannot determine home directory")?;
        Self::open(path)
    }

    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/spoiler-shield/config.json"))
    }

    /// 重新读取文件；集合有变化时通知订阅者
    pub fn reload(&self) -> Result<Vec<String>> {
        let topics = Self::read_topics(&self.path)?;
        let changed = self.tx.send_if_modified(|current| {
            if *current == topics {
                false
            } else {
                *current = topics.clone();
                true
            }
        });
        if changed {
            debug!(topics = topics.len(), "Blocked topics changed on reload");
        }
        Ok(topics)
    }

    fn read_topics(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;

        let raw = value
            .get(CONFIG_KEY)
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|t| t.as_str())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(normalize_topics(raw))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn blocked_topics(&self) -> Result<Vec<String>> {
        Ok(self.tx.borrow().clone())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}

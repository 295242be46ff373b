//! Spoiler Shield 生命周期 - 协作方装配与启动/停止
//!
//! 每个会话构造一次，依赖全部显式注入（分类器、条目来源、配置
//! 存储、提示出口），没有任何环境级全局状态。两个启动期检查失败
//! 会让功能整体停用：分类器不可用、会话创建失败。之后引擎循环
//! 保证单个条目的任何失败都不会停摆。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::classifier::{Availability, Classifier, ClassifierAdapter};
use crate::config::{normalize_topics, ConfigStore};
use crate::engine::{EngineCommand, EngineConfig, QueueEngine};
use crate::error::ShieldError;
use crate::ingest::IngestController;
use crate::notice::{EscalationNotifier, NoticeSink};
use crate::source::ItemSource;

/// 装配入口
pub struct SpoilerShield;

/// 运行中的 shield 的句柄
pub struct ShieldHandle {
    stop_tx: watch::Sender<bool>,
    engine_task: JoinHandle<()>,
    ingest_task: JoinHandle<()>,
    engine_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl ShieldHandle {
    /// 停止引擎和接入循环并等待两个任务退出
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.engine_task.await;
        let _ = self.ingest_task.await;
    }

    /// 直接向引擎邮箱发送命令（宿主侧的手动干预入口）
    pub fn command_sender(&self) -> mpsc::UnboundedSender<EngineCommand> {
        self.engine_tx.clone()
    }
}

impl SpoilerShield {
    /// 启动 shield
    ///
    /// 启动顺序：
    /// 1. 分类器可用性必须是 `Ready`，否则功能整体停用（不模糊任何
    ///    条目，不起任何任务）
    /// 2. 创建分类器会话
    /// 3. 读取初始屏蔽主题集合
    /// 4. 起引擎任务和接入任务，共享同一个停止信号
    pub async fn start(
        classifier: Arc<dyn Classifier>,
        source: Arc<dyn ItemSource>,
        store: Arc<dyn ConfigStore>,
        sink: Arc<dyn NoticeSink>,
        config: EngineConfig,
    ) -> Result<ShieldHandle, ShieldError> {
        let availability = classifier.availability();
        if availability != Availability::Ready {
            error!(
                ?availability,
                "Classifier is not ready, spoiler shield stays disabled"
            );
            return Err(ShieldError::ClassifierUnavailable(availability));
        }

        let session = classifier
            .create_session()
            .await
            .map_err(ShieldError::SessionCreation)?;

        let topics = store
            .blocked_topics()
            .await
            .map_err(ShieldError::Config)?;
        let topics = normalize_topics(topics);
        info!(topics = topics.len(), "Spoiler shield starting");

        let adapter = ClassifierAdapter::new(session);
        let escalation =
            EscalationNotifier::new(sink).with_threshold(config.failure_threshold);
        let engine = QueueEngine::with_config(adapter, topics.clone(), escalation, config);

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let topic_rx = store.subscribe();
        let ingest = IngestController::new(engine_tx.clone(), topics);

        let engine_task = tokio::spawn(engine.run(engine_rx, stop_rx.clone()));
        let ingest_task = tokio::spawn(ingest.run(source, topic_rx, stop_rx));

        Ok(ShieldHandle {
            stop_tx,
            engine_task,
            ingest_task,
            engine_tx,
        })
    }
}

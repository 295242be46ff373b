//! HTTP 分类器 - 基于 messages 风格 API 的分类器实现
//!
//! 用于把 Spoiler Shield 接到任意 Anthropic 兼容的提示接口上。
//! 分类提问很短，默认使用低延迟的小模型即可。
//!
//! API Key 读取优先级：
//! 1. 配置文件 `~/.config/spoiler-shield/config.json`（字段 `api_key`，
//!    可选 `base_url`、`model`）
//! 2. 环境变量 `SPOILER_SHIELD_API_KEY`（可选 `SPOILER_SHIELD_BASE_URL`）
//! 3. 环境变量 `ANTHROPIC_API_KEY`

use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Availability, Classifier, ClassifierSession};

/// 默认 API 基础 URL
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API 版本
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// 默认模型 - 最快最便宜的小模型足够回答 yes/no
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// 默认请求超时（毫秒）
///
/// 引擎不会取消在途调用，一个挂死的请求会卡住整条流水线，
/// 因此超时挂在传输层上。
const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// 默认最大输出 tokens（回答只有一个词）
const DEFAULT_MAX_TOKENS: u32 = 16;

/// HTTP 分类器配置
#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    /// API 密钥
    pub api_key: String,
    /// API 基础 URL（支持代理）
    pub base_url: String,
    /// 模型名称
    pub model: String,
    /// 请求超时（毫秒）
    pub timeout_ms: u64,
    /// 最大输出 tokens
    pub max_tokens: u32,
}

impl Default for HttpClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl HttpClassifierConfig {
    /// 从配置文件和环境变量自动加载，按优先级尝试多个来源
    pub fn auto_load() -> Self {
        // 1. 配置文件 ~/.config/spoiler-shield/config.json
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config/spoiler-shield/config.json");
            if config_path.exists() {
                if let Ok(content) = fs::read_to_string(&config_path) {
                    if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                        let key = config.get("api_key").and_then(|k| k.as_str()).unwrap_or("");
                        if !key.is_empty() {
                            let base_url = config
                                .get("base_url")
                                .and_then(|u| u.as_str())
                                .filter(|u| !u.is_empty())
                                .map(normalize_base_url)
                                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
                            let model = config
                                .get("model")
                                .and_then(|m| m.as_str())
                                .filter(|m| !m.is_empty())
                                .unwrap_or(DEFAULT_MODEL)
                                .to_string();
                            debug!(base_url = %base_url, "Using API key from ~/.config/spoiler-shield/config.json");
                            return Self {
                                api_key: key.to_string(),
                                base_url,
                                model,
                                ..Self::default()
                            };
                        }
                    }
                }
            }
        }

        // 2. 专用环境变量
        if let Ok(key) = std::env::var("SPOILER_SHIELD_API_KEY") {
            if !key.is_empty() {
                let base_url = std::env::var("SPOILER_SHIELD_BASE_URL")
                    .ok()
                    .filter(|u| !u.is_empty())
                    .map(|u| normalize_base_url(&u))
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string());
                debug!("Using SPOILER_SHIELD_API_KEY from environment");
                return Self {
                    api_key: key,
                    base_url,
                    ..Self::default()
                };
            }
        }

        // 3. Anthropic 通用环境变量
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                debug!("Using ANTHROPIC_API_KEY from environment");
                return Self {
                    api_key: key,
                    ..Self::default()
                };
            }
        }

        // 找不到密钥：返回空配置，availability() 会报告 Unavailable
        Self::default()
    }
}

/// 确保 URL 以 /v1/messages 结尾
fn normalize_base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with("/v1/messages") {
        url.to_string()
    } else if url.ends_with("/v1") {
        format!("{}/messages", url)
    } else {
        format!("{}/v1/messages", url)
    }
}

/// Messages API 请求体
#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

/// 消息
#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Messages API 响应体
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// 内容块
#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

/// API 错误响应
#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// HTTP 分类器
pub struct HttpClassifier {
    config: HttpClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: HttpClassifierConfig) -> Self {
        Self { config }
    }

    /// 从自动加载的配置创建
    pub fn from_env() -> Self {
        Self::new(HttpClassifierConfig::auto_load())
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn availability(&self) -> Availability {
        if self.config.api_key.is_empty() {
            Availability::Unavailable
        } else {
            Availability::Ready
        }
    }

    async fn create_session(&self) -> Result<Box<dyn ClassifierSession>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .build()
            .map_err(|e| anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Box::new(HttpSession {
            client,
            config: self.config.clone(),
        }))
    }
}

/// HTTP 会话
struct HttpSession {
    client: reqwest::Client,
    config: HttpClassifierConfig,
}

#[async_trait]
impl ClassifierSession for HttpSession {
    async fn prompt(&self, text: &str) -> Result<String> {
        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: text.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Cannot read response body: {}", e))?;

        if !status.is_success() {
            // 尝试解出结构化错误信息
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(anyhow!("API error ({}): {}", status, err.error.message));
            }
            return Err(anyhow!("API error ({}): {}", status, body));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| anyhow!("Cannot parse response: {}", e))?;

        let answer = parsed
            .content
            .iter()
            .find(|block| block.content_type == "text")
            .and_then(|block| block.text.clone())
            .ok_or_else(|| anyhow!("No text content in response"))?;

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://proxy.example.com"),
            "https://proxy.example.com/v1/messages"
        );
        assert_eq!(
            normalize_base_url("https://proxy.example.com/v1/"),
            "https://proxy.example.com/v1/messages"
        );
        assert_eq!(
            normalize_base_url("https://proxy.example.com/v1/messages"),
            "https://proxy.example.com/v1/messages"
        );
    }

    #[test]
    fn test_availability_requires_api_key() {
        let missing = HttpClassifier::new(HttpClassifierConfig::default());
        assert_eq!(missing.availability(), Availability::Unavailable);

        let ready = HttpClassifier::new(HttpClassifierConfig {
            api_key: "sk-test".to_string(),
            ..HttpClassifierConfig::default()
        });
        assert_eq!(ready.availability(), Availability::Ready);
    }
}

//! 决策缓存 - 按标题文本缓存分类结果
//!
//! 缓存条目只在计算它时的屏蔽主题集合下有效：主题集合一旦变更，
//! 旧条目不只是过期而是语义错误，必须整体清空。不做淘汰，键的
//! 数量受可见内容流规模约束，且每次主题变更都会整体清空。

use std::collections::HashMap;

/// 标题文本 -> 是否命中屏蔽主题
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: HashMap<String, bool>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 查询缓存的决策
    pub fn get(&self, title: &str) -> Option<bool> {
        self.entries.get(title).copied()
    }

    /// 写入决策
    pub fn set(&mut self, title: impl Into<String>, matched: bool) {
        self.entries.insert(title.into(), matched);
    }

    /// 整体清空（主题集合变更时调用）
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

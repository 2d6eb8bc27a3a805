//! 规则来源
//!
//! 规则源每个处理周期调用一次，返回已按优先级排序的启用规则快照，
//! 以及加载时被拒绝的规则。引擎不跨周期缓存规则。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::compiler::{prioritize, validate_rule_set};
use crate::error::{Result, RuleError};
use crate::loader::parse_rules;
use crate::models::Rule;

/// 一次加载得到的规则快照
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    /// 启用的规则，按优先级降序、ID 升序
    pub rules: Vec<Rule>,
    /// 无法解析而被排除的规则，均为 `RuleError::Rule`
    pub rejected: Vec<RuleError>,
}

impl RuleSnapshot {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            rejected: Vec::new(),
        }
    }

    pub fn with_rejected(mut self, rejected: Vec<RuleError>) -> Self {
        self.rejected = rejected;
        self
    }
}

/// 规则源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn active_rules(&self) -> Result<RuleSnapshot>;
}

/// 内存规则存储
#[derive(Clone, Default)]
pub struct RuleStore {
    rules: Arc<DashMap<i64, Rule>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 加载或替换规则
    #[instrument(skip(self, rule), fields(rule_id = rule.id, rule_name = %rule.name))]
    pub fn upsert(&self, rule: Rule) -> Result<()> {
        validate_rule_set(std::slice::from_ref(&rule))?;

        let rule_id = rule.id;
        if self.rules.insert(rule_id, rule).is_some() {
            info!("规则已更新: {}", rule_id);
        } else {
            info!("规则已加载: {}", rule_id);
        }
        Ok(())
    }

    /// 批量加载，单条失败不影响其他规则
    pub fn load_batch(&self, rules: Vec<Rule>) -> Vec<RuleError> {
        let total = rules.len();
        let errors: Vec<RuleError> = rules
            .into_iter()
            .filter_map(|rule| self.upsert(rule).err())
            .collect();

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }
        info!("批量加载完成: {} 成功, {} 失败", total - errors.len(), errors.len());
        errors
    }

    #[instrument(skip(self))]
    pub fn remove(&self, rule_id: i64) -> Result<Rule> {
        match self.rules.remove(&rule_id) {
            Some((_, rule)) => {
                info!("规则已删除: {}", rule_id);
                Ok(rule)
            }
            None => {
                warn!("删除不存在的规则: {}", rule_id);
                Err(RuleError::Rule(format!("规则不存在: {}", rule_id)))
            }
        }
    }

    pub fn get(&self, rule_id: i64) -> Option<Rule> {
        self.rules.get(&rule_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, rule_id: i64) -> bool {
        self.rules.contains_key(&rule_id)
    }

    pub fn clear(&self) {
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 当前启用规则的快照（已排序）
    pub fn snapshot(&self) -> Vec<Rule> {
        let active: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.value().clone())
            .collect();
        prioritize(&active).into_iter().cloned().collect()
    }
}

#[async_trait]
impl RuleSource for RuleStore {
    async fn active_rules(&self) -> Result<RuleSnapshot> {
        Ok(RuleSnapshot::new(self.snapshot()))
    }
}

/// JSON 文件规则源，每次调用重新读取文件
#[derive(Debug, Clone)]
pub struct JsonFileRuleSource {
    path: PathBuf,
}

impl JsonFileRuleSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleSource for JsonFileRuleSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn active_rules(&self) -> Result<RuleSnapshot> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        let (rules, errors) = parse_rules(&json)?;

        for e in &errors {
            warn!(error = %e, "规则文件中存在无法解析的规则");
        }

        let active: Vec<Rule> = rules.into_iter().filter(|r| r.is_active).collect();

        info!(count = active.len(), rejected = errors.len(), "规则快照已加载");
        let rules = prioritize(&active).into_iter().cloned().collect();
        Ok(RuleSnapshot::new(rules).with_rejected(errors))
    }
}

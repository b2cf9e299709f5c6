use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::admin;

/**
 * \brief 聊天消息,与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色:user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    /** \brief 构造用户消息。 */
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /** \brief 构造助手消息。 */
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 持久化的 Provider 注册表:三张并列映射加管理员口令哈希。
 * \details 与 settings.json 的四个顶层字段一一对应。IndexMap 保持插入顺序,
 *          Provider 的展示顺序即注册顺序。API Key 明文存储是既有文件格式的
 *          已知弱点,为保持兼容而保留。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /** \brief Provider 名 -> API 基地址 */
    pub base_urls: IndexMap<String, String>,
    /** \brief Provider 名 -> API Key */
    pub api_keys: IndexMap<String, String>,
    /** \brief Provider 名 -> 模型列表(保持录入顺序) */
    pub models: IndexMap<String, Vec<String>>,
    /** \brief 管理员口令的十六进制 SHA-256 哈希 */
    pub admin_password: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_urls: IndexMap::new(),
            api_keys: IndexMap::new(),
            models: IndexMap::new(),
            admin_password: admin::default_secret_hash(),
        }
    }
}

/**
 * \brief 一个可选择的 (Provider, 模型) 组合。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub provider: String,
    pub model: String,
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.provider, self.model)
    }
}

//! 连接配置档案

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 已保存的连接档案（config 路径 + 私钥密码）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SavedProfile {
    pub config_path: String,
    #[serde(default)]
    pub password: String,
    /// 显示名称（config 文件名），持久化时不写入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SavedProfile {
    pub fn new(config_path: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            password: password.into(),
            name: None,
        }
    }

    /// 填充显示名称
    pub fn with_display_name(mut self) -> Self {
        if self.name.is_none() && !self.config_path.is_empty() {
            self.name = Some(display_name(&self.config_path));
        }
        self
    }
}

/// 取路径的文件名作为显示名称
pub fn display_name(config_path: &str) -> String {
    Path::new(config_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

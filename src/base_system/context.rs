//! 插件配置结构（PluginConfig）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息与文件名清理工具。

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    // 开关配置
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub admin_ids: Vec<String>,

    // 限额配置
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_max_chapter_limit")]
    pub max_chapter_limit: usize,

    // 下载配置
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_api_concurrency")]
    pub api_concurrency: usize,
    #[serde(default = "default_output_format")]
    pub output_format: String,

    // 调试配置
    #[serde(default = "default_false")]
    pub debug: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_ids: Vec::new(),
            daily_limit: default_daily_limit(),
            max_chapter_limit: default_max_chapter_limit(),
            download_dir: default_download_dir(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            api_concurrency: default_api_concurrency(),
            output_format: default_output_format(),
            debug: false,
        }
    }
}

impl PluginConfig {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }

    /// 并发度下限为 1，避免零宽波次导致死循环。
    pub fn effective_concurrency(&self) -> usize {
        self.api_concurrency.max(1)
    }
}

impl ConfigSpec for PluginConfig {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 9] = [
            FieldMeta {
                name: "enabled",
                description: "是否启用插件",
            },
            FieldMeta {
                name: "admin_ids",
                description: "管理员 QQ 号列表（不受每日下载次数限制）",
            },
            FieldMeta {
                name: "daily_limit",
                description: "普通用户每日下载次数上限",
            },
            FieldMeta {
                name: "max_chapter_limit",
                description: "单本书允许下载的最大章节数",
            },
            FieldMeta {
                name: "download_dir",
                description: "成品文件的保存目录",
            },
            FieldMeta {
                name: "max_concurrent_tasks",
                description: "全局同时进行的下载任务数上限",
            },
            FieldMeta {
                name: "api_concurrency",
                description: "章节抓取的并发波次大小",
            },
            FieldMeta {
                name: "output_format",
                description: "输出格式：txt / html / epub（epub 暂以 txt 代替）",
            },
            FieldMeta {
                name: "debug",
                description: "是否输出调试级日志",
            },
        ];
        &FIELDS
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_daily_limit() -> u32 {
    5
}

fn default_max_chapter_limit() -> usize {
    500
}

fn default_download_dir() -> String {
    "./novels".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_api_concurrency() -> usize {
    350
}

fn default_output_format() -> String {
    "txt".to_string()
}

pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            // Convert forbidden Windows filename characters to Chinese equivalents
            ':' => '：',
            '"' => '“',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if (c as u32) < 32 => replacement.chars().next().unwrap_or('_'),
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let upper = cleaned.to_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 避免在多字节 UTF-8 字符（如中文）中间截断导致 panic
        let mut end = max_len;
        while !cleaned.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            cleaned.push_str("unnamed");
        }
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PluginConfig::default();
        assert!(cfg.enabled);
        assert!(cfg.admin_ids.is_empty());
        assert_eq!(cfg.daily_limit, 5);
        assert_eq!(cfg.max_chapter_limit, 500);
        assert_eq!(cfg.download_dir, "./novels");
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert_eq!(cfg.api_concurrency, 350);
        assert_eq!(cfg.output_format, "txt");
        assert!(!cfg.debug);
    }

    #[test]
    fn concurrency_floor_is_one() {
        let mut cfg = PluginConfig::default();
        cfg.api_concurrency = 0;
        assert_eq!(cfg.effective_concurrency(), 1);
    }

    #[test]
    fn safe_fs_name_replaces_forbidden_chars() {
        assert_eq!(safe_fs_name("a/b:c?", "_", 120), "a、b：c？");
        assert_eq!(safe_fs_name("CON", "_", 120), "_CON");
        assert_eq!(safe_fs_name("  . ", "_", 120), "unnamed");
    }

    #[test]
    fn safe_fs_name_truncates_on_char_boundary() {
        let name = "长".repeat(100);
        let cut = safe_fs_name(&name, "_", 10);
        assert!(cut.len() <= 10);
        assert!(!cut.is_empty());
    }
}

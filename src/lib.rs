//! 七猫小说下载插件核心。
//!
//! 面向消息机器人宿主的库：解析聊天指令，完成搜索、下载编排与文档
//! 生成。章节抓取按固定宽度的并发波次推进，单章失败不影响整批，
//! 取消在波次边界生效。宿主只需实现消息收发与群文件投递。

pub mod base_system;
pub mod book_parser;
pub mod download;
pub mod handler;
pub mod plugin;
pub mod qimao;

pub use base_system::context::PluginConfig;
pub use download::error::DownloadError;
pub use download::models::{BookBrief, BookInfo, DownloadState, DownloadStatus};
pub use download::orchestrator::DownloadOrchestrator;
pub use download::ports::{ChapterFetchClient, DeliverySink};
pub use plugin::PluginState;
pub use qimao::client::QimaoClient;

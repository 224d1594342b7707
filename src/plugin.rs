//! 插件上下文。
//!
//! 持有配置、任务登记表、限额计数与编排器，处理一条消息并产出回复
//! 文本序列。宿主负责消息总线与生命周期钩子的接线。

use std::sync::Arc;

use tracing::{info, warn};

use crate::base_system::context::PluginConfig;
use crate::base_system::user_quota::UserQuota;
use crate::download::error::DownloadError;
use crate::download::orchestrator::DownloadOrchestrator;
use crate::download::ports::{ChapterFetchClient, DeliverySink};
use crate::download::registry::TaskRegistry;
use crate::handler::{
    Command, help_text, parse_command, render_book_card, render_completion, render_progress,
    render_search_results,
};

pub struct PluginState {
    config: PluginConfig,
    client: Arc<dyn ChapterFetchClient>,
    quota: UserQuota,
    registry: Arc<TaskRegistry>,
    orchestrator: DownloadOrchestrator,
}

impl PluginState {
    pub fn new(
        config: PluginConfig,
        client: Arc<dyn ChapterFetchClient>,
        delivery: Arc<dyn DeliverySink>,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let orchestrator = DownloadOrchestrator::new(
            client.clone(),
            delivery,
            registry.clone(),
            config.clone(),
        );
        Self {
            quota: UserQuota::new(config.daily_limit),
            config,
            client,
            registry,
            orchestrator,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// 处理一条消息，返回要按顺序发出的回复。非指令消息返回空。
    pub async fn handle_message(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        is_group_owner: bool,
        message: &str,
    ) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let Some(command) = parse_command(message) else {
            return Vec::new();
        };

        match command {
            Command::Search(keyword) => self.handle_search(&keyword).await,
            Command::Detail(book_id) => self.handle_detail(&book_id).await,
            Command::Download(book_id) => {
                if book_id.is_empty() {
                    return vec!["❌ 请输入书籍ID\n用法: 下载小说 书籍ID".to_string()];
                }
                self.handle_download(user_id, group_id, is_group_owner, &book_id)
                    .await
            }
            Command::LinkDownload(book_id) => {
                let mut replies =
                    vec!["🔗 检测到七猫小说链接，正在获取书籍信息...".to_string()];
                replies.extend(
                    self.handle_download(user_id, group_id, is_group_owner, &book_id)
                        .await,
                );
                replies
            }
            Command::Progress => self.handle_progress(user_id),
            Command::Cancel => self.handle_cancel(user_id),
            Command::Help => vec![help_text()],
        }
    }

    /// 停用收尾：取消并清空全部在途任务。
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!(target: "plugin", cancelled, "停用时取消在途任务");
        }
    }

    async fn handle_search(&self, keyword: &str) -> Vec<String> {
        if keyword.is_empty() {
            return vec!["❌ 请输入搜索关键词\n用法: 搜索小说 书名".to_string()];
        }
        match self.client.search_books(keyword).await {
            Ok(results) if results.is_empty() => vec!["❌ 未找到相关小说".to_string()],
            Ok(results) => vec![render_search_results(&results)],
            Err(e) => {
                warn!(target: "plugin", keyword, error = %e, "搜索失败");
                vec!["❌ 搜索失败，请稍后重试".to_string()]
            }
        }
    }

    async fn handle_detail(&self, book_id: &str) -> Vec<String> {
        if book_id.is_empty() {
            return vec!["❌ 请输入书籍ID\n用法: 小说详情 书籍ID".to_string()];
        }
        match self.client.fetch_book_info(book_id).await {
            Ok(Some(book)) => vec![render_book_card(&book, false)],
            Ok(None) => vec!["❌ 未找到该小说".to_string()],
            Err(e) => {
                warn!(target: "plugin", book_id, error = %e, "获取详情失败");
                vec!["❌ 获取详情失败，请稍后重试".to_string()]
            }
        }
    }

    async fn handle_download(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        is_group_owner: bool,
        book_id: &str,
    ) -> Vec<String> {
        let privileged = is_group_owner || self.config.is_admin(user_id);
        if let Err(reason) = self.quota.can_download(user_id, privileged) {
            return vec![format!("❌ {reason}")];
        }
        if self.registry.get(user_id).is_some() {
            return vec![
                "❌ 您已有正在进行的下载任务\n发送 \"下载进度\" 查看进度".to_string(),
            ];
        }
        if self.registry.len() >= self.config.max_concurrent_tasks {
            return vec!["❌ 当前下载任务较多，请稍后再试".to_string()];
        }

        let book = match self.client.fetch_book_info(book_id).await {
            Ok(Some(book)) => book,
            Ok(None) => return vec!["❌ 未找到该小说".to_string()],
            Err(e) => {
                warn!(target: "plugin", book_id, error = %e, "获取书籍信息失败");
                return vec!["❌ 未找到该小说".to_string()];
            }
        };

        let mut replies = vec![render_book_card(&book, true)];

        match self
            .orchestrator
            .start(user_id, group_id, book_id, None)
            .await
        {
            Ok(task) => {
                self.quota.record_download(user_id);
                let used = self.quota.used_today(user_id);
                info!(target: "plugin", user_id, used, limit = self.config.daily_limit, "记一次下载额度");
                replies.push(render_completion(
                    &task.book,
                    &task.status(),
                    &self.config.output_format,
                ));
            }
            // 用户主动取消时回执已在取消入口发出
            Err(DownloadError::Cancelled) => {}
            Err(e) => replies.push(format!("❌ 下载失败: {e}")),
        }

        replies
    }

    fn handle_progress(&self, user_id: &str) -> Vec<String> {
        match self.registry.get(user_id) {
            Some(task) => vec![render_progress(&task.book, &task.status())],
            None => vec!["❌ 当前没有下载任务".to_string()],
        }
    }

    fn handle_cancel(&self, user_id: &str) -> Vec<String> {
        if self.orchestrator.cancel(user_id) {
            vec!["✅ 已取消下载".to_string()]
        } else {
            vec!["❌ 当前没有下载任务".to_string()]
        }
    }
}

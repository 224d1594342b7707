//! 下载编排器。
//!
//! 驱动一次下载的完整流水线：解析元数据与目录、登记任务、按固定宽度的
//! 并发波次抓取章节、组装文档、投递成品并收尾。取消只在波次边界生效，
//! 已发起的波次总是跑完。

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info};

use crate::base_system::context::PluginConfig;
use crate::book_parser::generator::generate_document;

use super::error::DownloadError;
use super::models::{BookInfo, ChapterRef, DownloadStatus, DownloadTask};
use super::ports::{ChapterFetchClient, DeliverySink};
use super::registry::TaskRegistry;

/// 任务进入终态时调用一次，携带最终状态快照。
pub type ProgressCallback = Box<dyn Fn(DownloadStatus) + Send + Sync>;

pub struct DownloadOrchestrator {
    client: Arc<dyn ChapterFetchClient>,
    delivery: Arc<dyn DeliverySink>,
    registry: Arc<TaskRegistry>,
    config: PluginConfig,
}

impl DownloadOrchestrator {
    pub fn new(
        client: Arc<dyn ChapterFetchClient>,
        delivery: Arc<dyn DeliverySink>,
        registry: Arc<TaskRegistry>,
        config: PluginConfig,
    ) -> Self {
        Self {
            client,
            delivery,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// 启动一次下载并驱动到终态。
    ///
    /// 登记之前的失败（元数据/目录/章节数上限/占用）不留任何痕迹；
    /// 登记之后的失败会标记终态、触发回调、注销登记，然后向上抛出。
    pub async fn start(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        book_id: &str,
        on_finish: Option<ProgressCallback>,
    ) -> Result<Arc<DownloadTask>, DownloadError> {
        let (book, chapters) = self.resolve_book(book_id).await?;

        info!(
            target: "download",
            user_id,
            book_id,
            book = %book.book_name,
            chapters = chapters.len(),
            "开始下载任务"
        );

        let task = Arc::new(DownloadTask::new(user_id, group_id, book, chapters));
        self.registry.try_insert(user_id, task.clone())?;

        match self.run_task(&task).await {
            Ok(()) => {
                task.mark_completed();
                let status = task.status();
                info!(
                    target: "download",
                    user_id,
                    book = %task.book.book_name,
                    downloaded = status.downloaded_chapters,
                    failed = status.failed_chapters,
                    "下载任务完成"
                );
                if let Some(cb) = &on_finish {
                    cb(status);
                }
                self.registry.remove_task(user_id, &task);
                Ok(task)
            }
            Err(DownloadError::Cancelled) => {
                // 用户经取消入口停止的任务已是 cancelled 终态，此处不再改写；
                // 其它途径置位的取消标记按固定文案落为 failed
                task.mark_failed(DownloadError::Cancelled.to_string());
                self.registry.remove_task(user_id, &task);
                info!(target: "download", user_id, book = %task.book.book_name, "下载任务已取消");
                if let Some(cb) = &on_finish {
                    cb(task.status());
                }
                Err(DownloadError::Cancelled)
            }
            Err(e) => {
                task.mark_failed(e.to_string());
                error!(target: "download", user_id, book = %task.book.book_name, error = %e, "下载任务失败");
                if let Some(cb) = &on_finish {
                    cb(task.status());
                }
                self.registry.remove_task(user_id, &task);
                Err(e)
            }
        }
    }

    /// 取消指定用户的在途任务。
    pub fn cancel(&self, user_id: &str) -> bool {
        self.registry.cancel(user_id)
    }

    /// 查询在途任务的进度快照，无任务时返回 `None`。查询不产生副作用。
    pub fn get_status(&self, user_id: &str) -> Option<DownloadStatus> {
        self.registry.get(user_id).map(|task| task.status())
    }

    /// 元数据与目录解析。此阶段的失败发生在登记之前。
    async fn resolve_book(
        &self,
        book_id: &str,
    ) -> Result<(BookInfo, Vec<ChapterRef>), DownloadError> {
        let book = match self.client.fetch_book_info(book_id).await {
            Ok(Some(book)) => book,
            Ok(None) => return Err(DownloadError::MetadataUnavailable),
            Err(e) => {
                debug!(target: "download", book_id, error = %e, "获取书籍信息失败");
                return Err(DownloadError::MetadataUnavailable);
            }
        };

        let chapters = match self.client.fetch_chapter_list(book_id).await {
            Ok(chapters) if !chapters.is_empty() => chapters,
            Ok(_) => return Err(DownloadError::ChapterListUnavailable),
            Err(e) => {
                debug!(target: "download", book_id, error = %e, "获取章节列表失败");
                return Err(DownloadError::ChapterListUnavailable);
            }
        };

        let limit = self.config.max_chapter_limit;
        if chapters.len() > limit {
            return Err(DownloadError::ChapterLimitExceeded {
                count: chapters.len(),
                limit,
            });
        }

        Ok((book, chapters))
    }

    async fn run_task(&self, task: &Arc<DownloadTask>) -> Result<(), DownloadError> {
        download_chapters(
            self.client.as_ref(),
            task,
            self.config.effective_concurrency(),
        )
        .await?;

        let path = self.generate_file(task)?;
        task.set_file_path(path.clone());

        if let Some(group_id) = task.group_id.as_deref() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("{}.txt", task.book.book_name));
            self.delivery
                .deliver(group_id, &path, &file_name)
                .await
                .map_err(|e| DownloadError::Delivery(e.to_string()))?;
        }

        Ok(())
    }

    fn generate_file(&self, task: &Arc<DownloadTask>) -> Result<PathBuf, DownloadError> {
        let chapters = task.chapters_snapshot();
        let path = generate_document(
            &task.book,
            &chapters,
            PathBuf::from(&self.config.download_dir).as_path(),
            &self.config.output_format,
        )?;
        Ok(path)
    }
}

/// 按固定宽度的波次抓取全部章节。
///
/// 波次内的抓取并发执行并全部等完；波次之间严格串行。取消标记只在
/// 波次边界检查。单章失败只记录错误，不会中断整批。
pub(crate) async fn download_chapters(
    client: &dyn ChapterFetchClient,
    task: &Arc<DownloadTask>,
    chunk_size: usize,
) -> Result<(), DownloadError> {
    let total = task.total_chapters();
    let indices: Vec<usize> = (0..total).collect();

    for chunk in indices.chunks(chunk_size) {
        if task.cancel_requested() {
            return Err(DownloadError::Cancelled);
        }

        let futures = chunk.iter().map(|&index| async move {
            let Some(chapter_id) = task.chapter_id_at(index) else {
                return;
            };
            match client
                .fetch_chapter_content(&task.book.book_id, &chapter_id)
                .await
            {
                Ok(content) => task.record_success(index, content),
                Err(e) => {
                    debug!(target: "download", chapter_id, error = %e, "章节抓取失败");
                    task.record_failure(index, e.to_string());
                }
            }
        });
        join_all(futures).await;

        debug!(
            target: "download",
            book = %task.book.book_name,
            done = task.status().downloaded_chapters,
            total,
            "波次完成"
        );
    }

    Ok(())
}

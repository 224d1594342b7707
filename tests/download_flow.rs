//! 下载编排端到端测试：内存客户端驱动完整流水线。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use qimao_novel_bot::base_system::context::PluginConfig;
use qimao_novel_bot::download::error::DownloadError;
use qimao_novel_bot::download::models::{BookBrief, BookInfo, ChapterRef, DownloadState};
use qimao_novel_bot::download::orchestrator::DownloadOrchestrator;
use qimao_novel_bot::download::ports::{ChapterFetchClient, DeliverySink};
use qimao_novel_bot::download::registry::TaskRegistry;
use qimao_novel_bot::plugin::PluginState;

struct MockClient {
    chapter_count: usize,
    failing: HashSet<usize>,
    /// 每章抓取前的延迟（毫秒），长度不足时视为 0
    delays_ms: Vec<u64>,
    /// 有值时每次抓取都要先取到一个许可
    gate: Option<Arc<Semaphore>>,
    fetch_calls: AtomicUsize,
    fetched_order: Mutex<Vec<usize>>,
}

impl MockClient {
    fn new(chapter_count: usize) -> Self {
        Self {
            chapter_count,
            failing: HashSet::new(),
            delays_ms: Vec::new(),
            gate: None,
            fetch_calls: AtomicUsize::new(0),
            fetched_order: Mutex::new(Vec::new()),
        }
    }

    fn with_failing(mut self, indices: &[usize]) -> Self {
        self.failing = indices.iter().copied().collect();
        self
    }

    fn with_delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.delays_ms = delays_ms;
        self
    }

    fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChapterFetchClient for MockClient {
    async fn search_books(&self, _keyword: &str) -> Result<Vec<BookBrief>> {
        Ok(vec![BookBrief {
            book_id: "100".to_string(),
            book_name: "测试之书".to_string(),
            author: "测试作者".to_string(),
            finished: true,
        }])
    }

    async fn fetch_book_info(&self, book_id: &str) -> Result<Option<BookInfo>> {
        if book_id == "missing" {
            return Ok(None);
        }
        Ok(Some(BookInfo {
            book_id: book_id.to_string(),
            book_name: "测试之书".to_string(),
            author: "测试作者".to_string(),
            source: "七猫".to_string(),
            status: "已完结".to_string(),
            summary: Some("一本用来测试的书".to_string()),
            word_count: Some("12.3万字".to_string()),
            cover_url: None,
            category: Some("测试".to_string()),
        }))
    }

    async fn fetch_chapter_list(&self, _book_id: &str) -> Result<Vec<ChapterRef>> {
        Ok((0..self.chapter_count)
            .map(|i| ChapterRef {
                index: i,
                chapter_id: format!("c{i}"),
                title: format!("第{}章", i + 1),
                sort: i as i64,
            })
            .collect())
    }

    async fn fetch_chapter_content(&self, _book_id: &str, chapter_id: &str) -> Result<String> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = chapter_id.trim_start_matches('c').parse()?;

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await?;
            permit.forget();
        }
        if let Some(delay) = self.delays_ms.get(index).copied()
            && delay > 0
        {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.fetched_order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(index);

        if self.failing.contains(&index) {
            return Err(anyhow!("模拟网络错误: {chapter_id}"));
        }
        Ok(format!("第{}章的正文内容。", index + 1))
    }
}

#[derive(Default)]
struct MockDelivery {
    fail: bool,
    delivered: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeliverySink for MockDelivery {
    async fn deliver(&self, group_id: &str, _file_path: &Path, file_name: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("群文件接口超时"));
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((group_id.to_string(), file_name.to_string()));
        Ok(())
    }
}

fn test_config(download_dir: &Path, api_concurrency: usize) -> PluginConfig {
    let mut config = PluginConfig::default();
    config.download_dir = download_dir.to_string_lossy().to_string();
    config.api_concurrency = api_concurrency;
    config
}

fn orchestrator(
    client: Arc<MockClient>,
    delivery: Arc<MockDelivery>,
    config: PluginConfig,
) -> (DownloadOrchestrator, Arc<TaskRegistry>) {
    let registry = Arc::new(TaskRegistry::new());
    let orch = DownloadOrchestrator::new(client, delivery, registry.clone(), config);
    (orch, registry)
}

#[tokio::test]
async fn full_download_completes_and_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(10));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, registry) = orchestrator(client.clone(), delivery.clone(), test_config(dir.path(), 3));

    let task = orch.start("u1", Some("g1"), "100", None).await.unwrap();

    let status = task.status();
    assert_eq!(status.state, DownloadState::Completed);
    assert_eq!(status.downloaded_chapters, 10);
    assert_eq!(status.failed_chapters, 0);
    assert_eq!(status.progress, 100.0);
    assert!(status.end_time_ms.is_some());
    assert_eq!(client.calls(), 10);

    // 成品已写盘并完成投递
    let path = task.file_path().unwrap();
    assert!(path.exists());
    let delivered = delivery.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "g1");

    // 任务完成后登记表清空
    assert!(registry.is_empty());
}

#[tokio::test]
async fn chapter_order_is_stable_under_uneven_latency() {
    let dir = tempfile::tempdir().unwrap();
    // 越靠前的章节越慢，并发抓取时完成顺序与目录顺序相反
    let delays: Vec<u64> = (0..6).map(|i| (6 - i) * 20).collect();
    let client = Arc::new(MockClient::new(6).with_delays(delays));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, _) = orchestrator(client.clone(), delivery, test_config(dir.path(), 6));

    let task = orch.start("u1", None, "100", None).await.unwrap();

    // 完成顺序确实乱了
    let order = client.fetched_order.lock().unwrap().clone();
    assert_ne!(order, (0..6).collect::<Vec<_>>());

    // 成品仍按目录顺序组装
    let text = std::fs::read_to_string(task.file_path().unwrap()).unwrap();
    let positions: Vec<usize> = (0..6)
        .map(|i| text.find(&format!("第{}章的正文内容", i + 1)).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}

#[tokio::test]
async fn partial_failure_still_completes_with_gap() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(5).with_failing(&[2]));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, _) = orchestrator(client, delivery, test_config(dir.path(), 5));

    let task = orch.start("u1", None, "100", None).await.unwrap();

    let status = task.status();
    assert_eq!(status.state, DownloadState::Completed);
    assert_eq!(status.downloaded_chapters, 4);
    assert_eq!(status.failed_chapters, 1);

    let text = std::fs::read_to_string(task.file_path().unwrap()).unwrap();
    assert!(text.contains("第2章的正文内容"));
    assert!(!text.contains("第3章的正文内容"));
    assert!(text.contains("第4章的正文内容"));
}

#[tokio::test]
async fn chapter_limit_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(501));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, registry) = orchestrator(client.clone(), delivery, test_config(dir.path(), 350));

    let err = orch.start("u1", None, "100", None).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::ChapterLimitExceeded {
            count: 501,
            limit: 500
        }
    ));
    assert_eq!(err.to_string(), "章节数超过限制 (501/500)");

    // 未登记、未抓取、未写盘
    assert!(registry.is_empty());
    assert_eq!(client.calls(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_book_is_a_clean_failure() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(3));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, registry) = orchestrator(client, delivery, test_config(dir.path(), 3));

    let err = orch.start("u1", None, "missing", None).await.unwrap_err();
    assert!(matches!(err, DownloadError::MetadataUnavailable));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn second_start_for_same_user_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient::new(4).with_gate(gate.clone()));
    let delivery = Arc::new(MockDelivery::default());
    let config = test_config(dir.path(), 2);
    let registry = Arc::new(TaskRegistry::new());
    let orch = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        delivery,
        registry.clone(),
        config,
    ));

    let first = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    // 等第一个任务完成登记并发出首个波次
    while client.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = orch.start("u1", None, "100", None).await.unwrap_err();
    assert!(matches!(err, DownloadError::AlreadyDownloading));

    gate.add_permits(64);
    let task = first.await.unwrap().unwrap();
    assert_eq!(task.status().state, DownloadState::Completed);
}

#[tokio::test]
async fn cancel_takes_effect_at_chunk_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient::new(9).with_gate(gate.clone()));
    let delivery = Arc::new(MockDelivery::default());
    let registry = Arc::new(TaskRegistry::new());
    let orch = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        delivery,
        registry.clone(),
        test_config(dir.path(), 3),
    ));

    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    // 第一个波次的 3 个抓取单元已发出并卡在闸门上
    while client.calls() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(orch.cancel("u1"));
    // 放行闸门，让在途波次跑完
    gate.add_permits(64);

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, DownloadError::Cancelled));

    // 在途波次完整结束，后续波次从未发出
    assert_eq!(client.calls(), 3);
    assert!(registry.is_empty());
    assert!(orch.get_status("u1").is_none());
}

#[tokio::test]
async fn cancelled_run_cleanup_spares_successor_task() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient::new(6).with_gate(gate.clone()));
    let delivery = Arc::new(MockDelivery::default());
    let registry = Arc::new(TaskRegistry::new());
    let orch = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        delivery,
        registry.clone(),
        test_config(dir.path(), 3),
    ));

    // 任务 A 的首个波次卡在闸门上时取消，同名用户立即登记任务 B
    let a = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    while client.calls() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(orch.cancel("u1"));

    let b = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    while client.calls() < 6 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // 恰好放行两个在途波次：A 在波次边界观察到取消并收尾，
    // B 的第二个波次继续卡在闸门上
    gate.add_permits(6);
    let err = a.await.unwrap().unwrap_err();
    assert!(matches!(err, DownloadError::Cancelled));

    // A 的收尾不得注销仍在运行的 B
    assert!(registry.get("u1").is_some());
    assert!(orch.get_status("u1").is_some());

    gate.add_permits(64);
    let task_b = b.await.unwrap().unwrap();
    assert_eq!(task_b.status().state, DownloadState::Completed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn all_chapters_failing_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(4).with_failing(&[0, 1, 2, 3]));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, registry) = orchestrator(client, delivery, test_config(dir.path(), 2));

    // 全部章节失败仍走完整批并以 completed 收尾（宽松完成语义）
    let task = orch.start("u1", None, "100", None).await.unwrap();

    let status = task.status();
    assert_eq!(status.state, DownloadState::Completed);
    assert_eq!(status.downloaded_chapters, 0);
    assert_eq!(status.failed_chapters, 4);
    assert_eq!(status.progress, 0.0);
    assert!(registry.is_empty());

    // 成品只剩头部信息，没有任何正文
    let text = std::fs::read_to_string(task.file_path().unwrap()).unwrap();
    assert!(text.contains("《测试之书》"));
    assert!(text.contains("作者：测试作者"));
    assert!(!text.contains("正文内容"));
    assert!(!text.contains("第1章"));
}

#[tokio::test]
async fn cancel_flag_without_cancel_command_maps_to_failed() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient::new(6).with_gate(gate.clone()));
    let delivery = Arc::new(MockDelivery::default());
    let registry = Arc::new(TaskRegistry::new());
    let orch = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        delivery,
        registry.clone(),
        test_config(dir.path(), 2),
    ));

    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    while client.calls() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // 直接置取消标记，不经取消入口（终态由编排器落为 failed + 固定文案）
    let task = registry.get("u1").unwrap();
    task.request_cancel();
    gate.add_permits(64);

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, DownloadError::Cancelled));

    let status = task.status();
    assert_eq!(status.state, DownloadState::Failed);
    assert_eq!(status.error.as_deref(), Some("下载已取消"));
    // 在途波次的 2 章已完成，其余从未尝试
    assert_eq!(status.downloaded_chapters, 2);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn status_query_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient::new(4).with_gate(gate.clone()));
    let delivery = Arc::new(MockDelivery::default());
    let registry = Arc::new(TaskRegistry::new());
    let orch = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        delivery,
        registry.clone(),
        test_config(dir.path(), 2),
    ));

    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start("u1", None, "100", None).await })
    };
    while client.calls() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = orch.get_status("u1").unwrap();
    assert_eq!(status.state, DownloadState::Downloading);
    assert_eq!(status.total_chapters, 4);
    // 连续查询结果一致
    assert_eq!(orch.get_status("u1").unwrap().total_chapters, 4);

    gate.add_permits(64);
    handle.await.unwrap().unwrap();
    assert!(orch.get_status("u1").is_none());
}

#[tokio::test]
async fn delivery_failure_marks_task_failed() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(3));
    let delivery = Arc::new(MockDelivery {
        fail: true,
        delivered: Mutex::new(Vec::new()),
    });
    let (orch, registry) = orchestrator(client, delivery, test_config(dir.path(), 3));

    let err = orch.start("u1", Some("g1"), "100", None).await.unwrap_err();
    assert!(matches!(err, DownloadError::Delivery(_)));
    assert!(err.to_string().starts_with("上传群文件失败"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn finish_callback_fires_once_with_terminal_status() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(4));
    let delivery = Arc::new(MockDelivery::default());
    let (orch, _) = orchestrator(client, delivery, test_config(dir.path(), 2));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    orch.start(
        "u1",
        None,
        "100",
        Some(Box::new(move |status| {
            seen_cb
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(status);
        })),
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].state, DownloadState::Completed);
    assert_eq!(seen[0].downloaded_chapters, 4);
}

#[tokio::test]
async fn plugin_download_command_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(6));
    let delivery = Arc::new(MockDelivery::default());
    let state = PluginState::new(test_config(dir.path(), 3), client, delivery);

    let replies = state
        .handle_message("u1", Some("g1"), false, "下载小说 100")
        .await;
    assert_eq!(replies.len(), 2);
    assert!(replies[0].contains("测试之书"));
    assert!(replies[0].contains("开始下载中"));
    assert!(replies[1].contains("✅ 下载完成！"));
    assert!(replies[1].contains("📖 章节: 6 章"));
    assert!(replies[1].contains("格式: TXT"));
}

#[tokio::test]
async fn plugin_quota_denies_after_daily_limit() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(2));
    let delivery = Arc::new(MockDelivery::default());
    let mut config = test_config(dir.path(), 2);
    config.daily_limit = 1;
    let state = PluginState::new(config, client, delivery);

    let first = state.handle_message("u1", None, false, "下载小说 100").await;
    assert!(first.last().unwrap().contains("下载完成"));

    let second = state.handle_message("u1", None, false, "下载小说 100").await;
    assert_eq!(second.len(), 1);
    assert!(second[0].contains("今日下载次数已用完"));

    // 群主不受限
    let owner = state.handle_message("u2", None, true, "下载小说 100").await;
    assert!(owner.last().unwrap().contains("下载完成"));
}

#[tokio::test]
async fn plugin_progress_and_cancel_replies() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockClient::new(2));
    let delivery = Arc::new(MockDelivery::default());
    let state = PluginState::new(test_config(dir.path(), 2), client, delivery);

    let none = state.handle_message("u1", None, false, "下载进度").await;
    assert_eq!(none, vec!["❌ 当前没有下载任务".to_string()]);

    let cancel = state.handle_message("u1", None, false, "取消下载").await;
    assert_eq!(cancel, vec!["❌ 当前没有下载任务".to_string()]);

    let help = state.handle_message("u1", None, false, "小说帮助").await;
    assert!(help[0].contains("小说下载插件"));

    let search = state.handle_message("u1", None, false, "搜索小说 测试").await;
    assert!(search[0].contains("测试之书"));
}

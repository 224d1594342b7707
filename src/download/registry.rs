//! 单用户单任务的下载登记表。
//!
//! 以请求者 id 为键；同一用户同一时刻至多一个任务。登记与查重在同一把锁内
//! 完成，并发的重复请求只会有一个成功。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use super::error::DownloadError;
use super::models::DownloadTask;

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Arc<DownloadTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子登记：槽位已被占用时整体失败，不做任何修改。
    pub fn try_insert(&self, user_id: &str, task: Arc<DownloadTask>) -> Result<(), DownloadError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.contains_key(user_id) {
            return Err(DownloadError::AlreadyDownloading);
        }
        tasks.insert(user_id.to_string(), task);
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<DownloadTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    /// 按身份注销：仅当槽位里还是同一个任务实例时才移除。
    /// 已取消任务收尾时同名用户可能已登记了新任务，按键删除会误伤后继者。
    pub fn remove_task(&self, user_id: &str, task: &Arc<DownloadTask>) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.get(user_id) {
            Some(existing) if Arc::ptr_eq(existing, task) => {
                tasks.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// 取消指定用户的任务：置取消标记、标记终态并移除登记。
    /// 编排循环在块边界看到标记后自行收尾。
    pub fn cancel(&self, user_id: &str) -> bool {
        let task = {
            self.tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(user_id)
        };
        match task {
            Some(task) => {
                task.request_cancel();
                task.mark_cancelled();
                info!(target: "download", user_id, book = %task.book.book_name, "下载任务已取消");
                true
            }
            None => false,
        }
    }

    /// 插件停用时的兜底：取消并清空所有在途任务。
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, Arc<DownloadTask>)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().collect()
        };
        for (user_id, task) in &drained {
            task.request_cancel();
            task.mark_cancelled();
            info!(target: "download", user_id, "停用清理：任务已取消");
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

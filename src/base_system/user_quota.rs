//! 用户每日下载限额。
//!
//! 内存计数，按自然日滚动清零。持久化由宿主负责，这里只做会话内的
//! 快速判定。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 86_400;

pub struct UserQuota {
    daily_limit: u32,
    // user_id -> (记账日, 当日已用次数)
    counts: Mutex<HashMap<String, (u64, u32)>>,
}

impl UserQuota {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// 判定是否还能下载。管理员与群主（`privileged`）不受限额约束。
    /// 拒绝时返回面向用户的原因文本。
    pub fn can_download(&self, user_id: &str, privileged: bool) -> Result<(), String> {
        self.can_download_at(current_day(), user_id, privileged)
    }

    /// 下载启动成功后记一次账。
    pub fn record_download(&self, user_id: &str) {
        self.record_at(current_day(), user_id);
    }

    pub fn used_today(&self, user_id: &str) -> u32 {
        let day = current_day();
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .filter(|(d, _)| *d == day)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    fn can_download_at(&self, day: u64, user_id: &str, privileged: bool) -> Result<(), String> {
        if privileged {
            return Ok(());
        }
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let used = counts
            .get(user_id)
            .filter(|(d, _)| *d == day)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        if used >= self.daily_limit {
            return Err(format!(
                "今日下载次数已用完 ({}/{})，明天再来吧",
                used, self.daily_limit
            ));
        }
        Ok(())
    }

    fn record_at(&self, day: u64, user_id: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(user_id.to_string()).or_insert((day, 0));
        if entry.0 != day {
            // 跨日清零
            *entry = (day, 0);
        }
        entry.1 += 1;
    }
}

fn current_day() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / SECS_PER_DAY
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

/// 脏标记：坐席及其被标记的时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyMarker {
    pub agent_id: String,
    pub marked_at: DateTime<Utc>,
}

/// 进程内脏坐席登记表
///
/// 采集管道在坐席数据变化时调用 [`DirtySet::mark_dirty`]；增量运行通过
/// [`DirtySet::drain_all`] 原子地取走全部标记。所有操作都在同一把锁内完成，
/// 与 drain 并发的标记要么被本次取走，要么留给下一次运行，不会丢失。
#[derive(Debug, Default)]
pub struct DirtySet {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // 临界区内没有可能 panic 的操作，中毒时数据依然完整
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 标记坐席为脏，已存在时刷新时间戳
    pub fn mark_dirty(&self, agent_id: impl Into<String>) {
        self.mark_dirty_at(agent_id, Utc::now());
    }

    /// 以指定时间标记坐席为脏，时间戳只会前进
    pub fn mark_dirty_at(&self, agent_id: impl Into<String>, marked_at: DateTime<Utc>) {
        let agent_id = agent_id.into();
        let mut entries = self.entries();
        let entry = entries.entry(agent_id).or_insert(marked_at);
        if *entry < marked_at {
            *entry = marked_at;
        }
    }

    /// 原子地清空并返回全部标记，按标记时间排序
    pub fn drain_markers(&self) -> Vec<DirtyMarker> {
        let drained = std::mem::take(&mut *self.entries());

        let mut markers: Vec<DirtyMarker> = drained
            .into_iter()
            .map(|(agent_id, marked_at)| DirtyMarker {
                agent_id,
                marked_at,
            })
            .collect();
        markers.sort_by(|a, b| {
            a.marked_at
                .cmp(&b.marked_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        debug!("取走 {} 个脏坐席标记", markers.len());
        markers
    }

    /// 原子地清空并返回全部脏坐席
    pub fn drain_all(&self) -> Vec<String> {
        self.drain_markers()
            .into_iter()
            .map(|marker| marker.agent_id)
            .collect()
    }

    /// 将坐席放回集合，已有更新的标记时保持不变
    pub fn restore<S: AsRef<str>>(&self, agent_ids: &[S]) {
        let now = Utc::now();
        let mut entries = self.entries();
        for agent_id in agent_ids {
            entries.entry(agent_id.as_ref().to_string()).or_insert(now);
        }
    }

    /// 聚合成功后清除标记
    ///
    /// 只清除在 `processed_from`（该坐席开始聚合的时刻）之前或同时打下的标记；
    /// 之后的新标记保留，坐席在下一轮继续参与聚合。返回是否清除。
    pub fn clear_processed(&self, agent_id: &str, processed_from: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        match entries.get(agent_id) {
            Some(marked_at) if *marked_at <= processed_from => {
                entries.remove(agent_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries().contains_key(agent_id)
    }

    pub fn marked_at(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.entries().get(agent_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

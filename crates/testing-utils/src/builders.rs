//! Test data builders

use chrono::{DateTime, Utc};
use stats_core::{EventKind, RawEvent};

/// Builder for creating test RawEvent entities
pub struct RawEventBuilder {
    event: RawEvent,
}

impl RawEventBuilder {
    pub fn new(agent_id: &str) -> Self {
        Self {
            event: RawEvent {
                id: 0,
                agent_id: agent_id.to_string(),
                kind: EventKind::Message.as_str().to_string(),
                brand: None,
                job_id: None,
                occurred_at: Utc::now(),
            },
        }
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.event.kind = kind.as_str().to_string();
        self
    }

    /// 写入任意事件类型原文，用于构造格式错误的源数据
    pub fn with_raw_kind(mut self, kind: &str) -> Self {
        self.event.kind = kind.to_string();
        self
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.event.brand = Some(brand.to_string());
        self
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.event.job_id = Some(job_id.to_string());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.event.occurred_at = occurred_at;
        self
    }

    pub fn build(self) -> RawEvent {
        self.event
    }
}

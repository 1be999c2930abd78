use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StatsError;

/// 不区分品牌/岗位的汇总行分组键
pub const ALL_GROUP_KEY: &str = "*";

/// 原始招聘事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    CandidateMatched,
    InterviewBooked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::CandidateMatched => "candidate_matched",
            EventKind::InterviewBooked => "interview_booked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventKind::Message),
            "candidate_matched" => Ok(EventKind::CandidateMatched),
            "interview_booked" => Ok(EventKind::InterviewBooked),
            other => Err(StatsError::Aggregation(format!("未知事件类型: {other}"))),
        }
    }
}

/// 外部采集管道写入的原始事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub id: i64,
    pub agent_id: String,
    /// 事件类型原文，聚合时解析为 [`EventKind`]
    pub kind: String,
    pub brand: Option<String>,
    pub job_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl RawEvent {
    /// 品牌/岗位维度的分组键，两者都缺失时返回 `None`
    pub fn dimension_key(&self) -> Option<String> {
        if self.brand.is_none() && self.job_id.is_none() {
            return None;
        }
        Some(format!(
            "brand:{}|job:{}",
            self.brand.as_deref().unwrap_or(ALL_GROUP_KEY),
            self.job_id.as_deref().unwrap_or(ALL_GROUP_KEY)
        ))
    }
}

/// 聚合计数
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatCounters {
    pub messages_handled: i64,
    pub candidates_matched: i64,
    pub interviews_booked: i64,
    pub total_events: i64,
}

impl StatCounters {
    pub fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Message => self.messages_handled += 1,
            EventKind::CandidateMatched => self.candidates_matched += 1,
            EventKind::InterviewBooked => self.interviews_booked += 1,
        }
        self.total_events += 1;
    }
}

/// 坐席按北京自然日的统计聚合行
///
/// 唯一键为 (agent_id, bucket_date, group_key)。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatAggregate {
    pub agent_id: String,
    pub bucket_date: NaiveDate,
    pub group_key: String,
    pub counters: StatCounters,
    pub last_computed_at: DateTime<Utc>,
}

impl AgentStatAggregate {
    pub fn is_all_group(&self) -> bool {
        self.group_key == ALL_GROUP_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(brand: Option<&str>, job: Option<&str>) -> RawEvent {
        RawEvent {
            id: 1,
            agent_id: "a1".to_string(),
            kind: "message".to_string(),
            brand: brand.map(str::to_string),
            job_id: job.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!("message".parse::<EventKind>().unwrap(), EventKind::Message);
        assert_eq!(
            "interview_booked".parse::<EventKind>().unwrap(),
            EventKind::InterviewBooked
        );
        assert!("MESSAGE".parse::<EventKind>().is_err());
        assert_eq!(EventKind::CandidateMatched.to_string(), "candidate_matched");
    }

    #[test]
    fn test_dimension_key() {
        assert_eq!(event(None, None).dimension_key(), None);
        assert_eq!(
            event(Some("kfc"), None).dimension_key().as_deref(),
            Some("brand:kfc|job:*")
        );
        assert_eq!(
            event(Some("kfc"), Some("j9")).dimension_key().as_deref(),
            Some("brand:kfc|job:j9")
        );
    }

    #[test]
    fn test_counters_record() {
        let mut counters = StatCounters::default();
        counters.record(EventKind::Message);
        counters.record(EventKind::Message);
        counters.record(EventKind::InterviewBooked);
        assert_eq!(counters.messages_handled, 2);
        assert_eq!(counters.interviews_booked, 1);
        assert_eq!(counters.candidates_matched, 0);
        assert_eq!(counters.total_events, 3);
    }
}

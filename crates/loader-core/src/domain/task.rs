//! 작업 원장 항목과 상태 전이.
//!
//! `STARTED -> PROCESSING(선택) -> SUCCESS | FAILED`. 종료 상태는 한 번만 설정됩니다.

use crate::error::{LoaderError, LoaderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 작업 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Started,
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Started => "STARTED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTED" => Ok(TaskStatus::Started),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("알 수 없는 작업 상태: {}", s)),
        }
    }
}

/// `<PREFIX>_` 뒤에 UUID 앞 8자리를 붙인 작업 ID를 생성합니다.
pub fn generate_task_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid[..8])
}

/// 장시간 작업 한 건의 원장 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogEntry {
    pub task_id: String,
    /// 작업을 시작한 연산 이름 (예: "load-minute")
    pub endpoint: String,
    pub status: TaskStatus,
    pub message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl TaskLogEntry {
    pub fn started(
        task_id: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            endpoint: endpoint.into(),
            status: TaskStatus::Started,
            message: message.into(),
            start_time: now,
            end_time: None,
            duration_ms: None,
        }
    }

    /// 진행 중 상태로 바꾸고 메시지를 갱신합니다.
    pub fn mark_processing(&mut self, message: impl Into<String>) -> LoaderResult<()> {
        if self.status.is_terminal() {
            return Err(LoaderError::InvalidState(format!(
                "{} 작업은 이미 {} 상태입니다",
                self.task_id, self.status
            )));
        }
        self.status = TaskStatus::Processing;
        self.message = message.into();
        Ok(())
    }

    /// 종료 상태와 종료 시각, 소요 시간을 설정합니다.
    pub fn close(
        &mut self,
        status: TaskStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> LoaderResult<()> {
        if !status.is_terminal() {
            return Err(LoaderError::InvalidState(format!(
                "{}는 종료 상태가 아닙니다",
                status
            )));
        }
        if self.status.is_terminal() {
            return Err(LoaderError::InvalidState(format!(
                "{} 작업은 이미 {} 상태입니다",
                self.task_id, self.status
            )));
        }
        let end = now.max(self.start_time);
        self.status = status;
        self.message = message.into();
        self.end_time = Some(end);
        self.duration_ms = Some((end - self.start_time).num_milliseconds());
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

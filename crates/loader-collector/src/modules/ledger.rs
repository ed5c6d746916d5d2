//! 작업 원장 서비스.
//!
//! 적재/집계 실행의 시작, 진행, 종료를 기록합니다. 기록 실패는 로그만 남기고
//! 실행 자체를 실패시키지 않습니다.

use crate::Result;
use chrono::{DateTime, Utc};
use loader_core::{generate_task_id, TaskLogEntry, TaskStatus};
use loader_data::TaskLogStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// 작업 원장.
#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn TaskLogStore>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn TaskLogStore>) -> Self {
        Self { store }
    }

    /// 새 작업 ID를 발급하고 STARTED 항목을 기록합니다.
    pub async fn start(&self, prefix: &str, endpoint: &str, message: &str) -> String {
        let task_id = generate_task_id(prefix);
        let entry = TaskLogEntry::started(&task_id, endpoint, message, Utc::now());
        match self.store.insert(&entry).await {
            Ok(()) => debug!(task_id = %task_id, endpoint, "작업 시작 기록"),
            Err(e) => warn!(task_id = %task_id, error = %e, "작업 시작 기록 실패"),
        }
        task_id
    }

    /// 진행 메시지를 기록합니다 (PROCESSING).
    pub async fn progress(&self, task_id: &str, message: &str) {
        if let Err(e) = self.store.mark_processing(task_id, message).await {
            warn!(task_id, error = %e, "작업 진행 기록 실패");
        }
    }

    pub async fn complete(&self, task_id: &str, message: &str) -> Option<TaskLogEntry> {
        self.finish(task_id, TaskStatus::Success, message).await
    }

    pub async fn fail(&self, task_id: &str, message: &str) -> Option<TaskLogEntry> {
        self.finish(task_id, TaskStatus::Failed, message).await
    }

    async fn finish(&self, task_id: &str, status: TaskStatus, message: &str) -> Option<TaskLogEntry> {
        match self.store.close(task_id, status, message, Utc::now()).await {
            Ok(entry) => {
                debug!(
                    task_id,
                    status = %entry.status,
                    duration_ms = entry.duration_ms,
                    "작업 종료 기록"
                );
                Some(entry)
            }
            Err(e) => {
                warn!(task_id, status = %status, error = %e, "작업 종료 기록 실패");
                None
            }
        }
    }

    pub async fn find(&self, task_id: &str) -> Result<Option<TaskLogEntry>> {
        Ok(self.store.find(task_id).await?)
    }

    pub async fn by_status(&self, status: TaskStatus) -> Result<Vec<TaskLogEntry>> {
        Ok(self.store.by_status(status).await?)
    }

    /// STARTED 또는 PROCESSING 상태인 작업.
    pub async fn active(&self) -> Result<Vec<TaskLogEntry>> {
        Ok(self.store.active().await?)
    }

    pub async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TaskLogEntry>> {
        Ok(self.store.in_range(from, to).await?)
    }
}

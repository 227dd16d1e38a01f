//! 内存工作者队列实现
//! Memory worker queue implementation
//!
//! 使用内存存储与广播频道模拟外部代理队列；测试通过 complete/fail
//! 辅助方法扮演工作者
//! Simulates the external broker queue with in-memory storage and a broadcast
//! channel; tests play the worker through the complete/fail helpers

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::base::{
  CompletionEvent, CompletionStream, EnqueueOptions, JobHandle, JobSnapshot, JobState, WorkerQueue,
};
use crate::error::Result;
use crate::job::{Document, ScrapeJob};

/// 队列中的作业数据
/// Job data in the queue
#[derive(Clone)]
struct QueuedJob {
  state: JobState,
  documents: Option<Vec<Document>>,
  error: Option<String>,
  zero_data_retention: bool,
  #[allow(dead_code)]
  priority: i32,
}

/// 内存工作者队列
/// Memory worker queue
pub struct MemoryWorkerQueue {
  storage: Arc<RwLock<HashMap<String, QueuedJob>>>,
  /// 完成事件发送器，按作业 ID 广播
  /// Completion event sender, broadcast by job ID
  completion_tx: broadcast::Sender<(String, CompletionEvent)>,
}

impl Default for MemoryWorkerQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryWorkerQueue {
  /// 创建新的内存工作者队列
  /// Create a new memory worker queue
  pub fn new() -> Self {
    let (completion_tx, _) = broadcast::channel(1024);
    Self {
      storage: Arc::new(RwLock::new(HashMap::new())),
      completion_tx,
    }
  }

  /// 队列中的作业数
  /// Number of jobs in the queue
  pub async fn len(&self) -> usize {
    self.storage.read().await.len()
  }

  /// 队列是否为空
  /// Whether the queue is empty
  pub async fn is_empty(&self) -> bool {
    self.storage.read().await.is_empty()
  }

  /// 将作业标记为处理中
  /// Mark a job as being processed
  pub async fn set_active(&self, job_id: &str) {
    if let Some(job) = self.storage.write().await.get_mut(job_id) {
      job.state = JobState::Active;
    }
  }

  /// 以内联结果完成作业
  /// Complete a job with inline results
  pub async fn complete(&self, job_id: &str, documents: Vec<Document>) {
    self.finish(job_id, Some(documents), None).await;
  }

  /// 以越界存储完成作业：结果为空，调用方需回退到外部存储
  /// Complete a job out-of-band: the inline result is empty and the caller
  /// must fall back to the blob store
  pub async fn complete_out_of_band(&self, job_id: &str) {
    self.finish(job_id, None, None).await;
  }

  /// 以错误载荷使作业失败
  /// Fail a job with an error payload
  pub async fn fail(&self, job_id: &str, error: &str) {
    self.finish(job_id, None, Some(error.to_string())).await;
  }

  async fn finish(&self, job_id: &str, documents: Option<Vec<Document>>, error: Option<String>) {
    {
      let mut storage = self.storage.write().await;
      let Some(job) = storage.get_mut(job_id) else {
        return;
      };
      job.state = if error.is_some() {
        JobState::Failed
      } else {
        JobState::Completed
      };
      job.documents = documents.clone();
      job.error = error.clone();
    }
    let event = match error {
      Some(error) => CompletionEvent::Failed { error },
      None => CompletionEvent::Completed { documents },
    };
    // 没有订阅者时发送失败是正常情况
    // A send failure just means nobody is subscribed
    let _ = self.completion_tx.send((job_id.to_string(), event));
  }
}

#[async_trait]
impl WorkerQueue for MemoryWorkerQueue {
  async fn enqueue(&self, job: &ScrapeJob, opts: &EnqueueOptions) -> Result<JobHandle> {
    let mut storage = self.storage.write().await;
    storage.insert(
      job.id.clone(),
      QueuedJob {
        state: JobState::Waiting,
        documents: None,
        error: None,
        zero_data_retention: job.zero_data_retention,
        priority: opts.priority,
      },
    );
    Ok(JobHandle {
      job_id: job.id.clone(),
    })
  }

  async fn snapshot(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
    let storage = self.storage.read().await;
    Ok(storage.get(job_id).map(|job| JobSnapshot {
      state: job.state,
      documents: job.documents.clone(),
      error: job.error.clone(),
      zero_data_retention: job.zero_data_retention,
    }))
  }

  async fn subscribe(&self, job_id: &str) -> Result<CompletionStream> {
    let rx = self.completion_tx.subscribe();
    let job_id = job_id.to_string();
    let stream = futures::stream::unfold((rx, job_id), |(mut rx, job_id)| async move {
      loop {
        match rx.recv().await {
          Ok((id, event)) if id == job_id => return Some((event, (rx, job_id))),
          Ok(_) => continue,
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => return None,
        }
      }
    });
    Ok(Box::new(Box::pin(stream)))
  }
}

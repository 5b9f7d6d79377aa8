//! In-memory [`RemoteService`] implementation for tests and offline demos.
//!
//! Objects live in a `Vec` behind `std::sync::Mutex`. Download URLs use a
//! `memory://` scheme that resolves back into the stored content map.
//! Failures can be queued per operation to exercise error paths, and an
//! operation can be slowed down to observe in-flight states.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::{parse_job_id, RemoteService};
use crate::error::{ResearchError, Result};
use crate::models::{DownloadUrl, JobId, JobStatus, RawObject};

const MEMORY_SCHEME: &str = "memory://";

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Get,
    Create,
    Delete,
    DownloadUrl,
    Fetch,
    Execute,
    JobStatus,
}

#[derive(Default)]
struct State {
    objects: Vec<RawObject>,
    contents: HashMap<String, String>,
    failures: HashMap<Op, VecDeque<ResearchError>>,
    tasks: Vec<String>,
    job_status: Option<String>,
    calls: HashMap<Op, u32>,
    delays: HashMap<Op, Duration>,
}

/// Shared fake of the remote object store.
#[derive(Default)]
pub struct InMemoryService {
    state: Mutex<State>,
    next_job: AtomicU32,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add an object, optionally with the markdown its content source serves.
    pub fn insert(&self, object: RawObject, content: Option<&str>) {
        let mut state = self.lock();
        if let (Some(source), Some(text)) = (
            object.content.as_ref().and_then(|c| c.source.clone()),
            content,
        ) {
            state.contents.insert(source, text.to_string());
        }
        state.objects.push(object);
    }

    /// Make the next call to `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Op, err: ResearchError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Every later call to `op` sleeps for `delay` before it is served.
    pub fn delay(&self, op: Op, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Status string returned by `job_status` from now on.
    pub fn set_job_status(&self, status: &str) {
        self.lock().job_status = Some(status.to_string());
    }

    /// Tasks received through `execute_async`, in order.
    pub fn submitted_tasks(&self) -> Vec<String> {
        self.lock().tasks.clone()
    }

    /// How often `op` was invoked, failures included.
    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    async fn pause(&self, op: Op) {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn enter(&self, op: Op) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(state)
    }
}

fn not_found() -> ResearchError {
    ResearchError::Api {
        status: 404,
        message: "Not Found".to_string(),
    }
}

#[async_trait]
impl RemoteService for InMemoryService {
    async fn list_objects(&self, limit: u32, offset: u32) -> Result<Vec<RawObject>> {
        self.pause(Op::List).await;
        let state = self.enter(Op::List)?;
        Ok(state
            .objects
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_object(&self, id: &str) -> Result<RawObject> {
        self.pause(Op::Get).await;
        let state = self.enter(Op::Get)?;
        state
            .objects
            .iter()
            .find(|o| o.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn create_object(&self, payload: Value) -> Result<RawObject> {
        self.pause(Op::Create).await;
        let mut state = self.enter(Op::Create)?;
        let mut object: RawObject = serde_json::from_value(payload.clone())
            .map_err(|e| ResearchError::Decode(e.to_string()))?;
        let id = format!("obj-{}", state.objects.len() + 1);
        object.id = Some(id.clone());

        // Inline markdown is stored under a synthetic content source.
        if let Some(text) = payload
            .get("content")
            .and_then(|c| c.get("source"))
            .and_then(|s| s.as_str())
        {
            let source = format!("content/{}", id);
            state.contents.insert(source.clone(), text.to_string());
            if let Some(content) = object.content.as_mut() {
                content.source = Some(source);
            }
        }
        state.objects.push(object.clone());
        Ok(object)
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        self.pause(Op::Delete).await;
        let mut state = self.enter(Op::Delete)?;
        let before = state.objects.len();
        state.objects.retain(|o| o.id.as_deref() != Some(id));
        if state.objects.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn request_download_url(&self, content_source: &str) -> Result<DownloadUrl> {
        self.pause(Op::DownloadUrl).await;
        let state = self.enter(Op::DownloadUrl)?;
        if !state.contents.contains_key(content_source) {
            return Err(not_found());
        }
        Ok(DownloadUrl {
            url: format!("{}{}", MEMORY_SCHEME, content_source),
        })
    }

    async fn fetch_content(&self, url: &str) -> Result<String> {
        self.pause(Op::Fetch).await;
        let state = self.enter(Op::Fetch)?;
        url.strip_prefix(MEMORY_SCHEME)
            .and_then(|source| state.contents.get(source))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn execute_async(&self, task: &str) -> Result<JobId> {
        self.pause(Op::Execute).await;
        let mut state = self.enter(Op::Execute)?;
        state.tasks.push(task.to_string());
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        parse_job_id(&serde_json::json!({ "job_id": format!("job-{}", n) }))
    }

    async fn job_status(&self, _job_id: &JobId) -> Result<JobStatus> {
        self.pause(Op::JobStatus).await;
        let state = self.enter(Op::JobStatus)?;
        Ok(JobStatus {
            status: state.job_status.clone().or_else(|| Some("running".into())),
        })
    }
}

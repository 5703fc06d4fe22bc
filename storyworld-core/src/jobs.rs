//! Generation jobs and their progress streams.
//!
//! Every job gets a broadcast channel. Observers may subscribe at any time
//! and see progress from that point on (events are dropped when nobody is
//! listening). The terminal event is delivered exactly once to every
//! subscriber, including one that attaches after the job finished, for as
//! long as the board retains the job.

use crate::pipeline::GeneratedChapter;
use crate::slug::WorldSlug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Init,
    Text,
    Extraction,
    Image,
    Saving,
    Complete,
    Error,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Complete | JobStage::Error)
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStage::Init => "init",
            JobStage::Text => "text",
            JobStage::Extraction => "extraction",
            JobStage::Image => "image",
            JobStage::Saving => "saving",
            JobStage::Complete => "complete",
            JobStage::Error => "error",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: JobStage,
    pub percent: u8,
    pub message: String,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Box<GeneratedChapter>),
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressEvent),
    Finished(JobOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Generate,
    Reroll(u32),
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub world: WorldSlug,
    pub kind: JobKind,
    pub stage: JobStage,
    pub percent: u8,
    pub message: String,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
}

struct JobEntry {
    sender: broadcast::Sender<JobEvent>,
    snapshot: JobSnapshot,
    finished_at: Option<Instant>,
}

/// Registry of live and recently finished jobs.
#[derive(Clone)]
pub struct JobBoard {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    capacity: usize,
    retention: Duration,
}

impl fmt::Debug for JobBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBoard")
            .field("jobs", &self.lock().len())
            .field("capacity", &self.capacity)
            .field("retention", &self.retention)
            .finish()
    }
}

impl JobBoard {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new job in the `init` stage.
    pub fn create(&self, world: WorldSlug, kind: JobKind) -> JobHandle {
        self.reap();
        let id = JobId::new();
        let (sender, _) = broadcast::channel(self.capacity);
        let snapshot = JobSnapshot {
            id,
            world,
            kind,
            stage: JobStage::Init,
            percent: 0,
            message: "Queued".to_string(),
            outcome: None,
            created_at: Utc::now(),
        };
        self.lock().insert(
            id,
            JobEntry {
                sender,
                snapshot,
                finished_at: None,
            },
        );
        JobHandle {
            id,
            board: self.clone(),
        }
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.lock().get(&id).map(|e| e.snapshot.clone())
    }

    /// Attach an observer. `None` once the job is unknown or reaped.
    pub fn subscribe(&self, id: JobId) -> Option<JobSubscription> {
        self.reap();
        let jobs = self.lock();
        let entry = jobs.get(&id)?;
        let subscription = match &entry.snapshot.outcome {
            Some(outcome) => JobSubscription {
                id,
                board: self.clone(),
                pending: Some(outcome.clone()),
                receiver: None,
                finished: false,
            },
            None => JobSubscription {
                id,
                board: self.clone(),
                pending: None,
                receiver: Some(entry.sender.subscribe()),
                finished: false,
            },
        };
        Some(subscription)
    }

    /// Jobs that have not reached a terminal stage.
    pub fn active(&self) -> Vec<JobSnapshot> {
        self.lock()
            .values()
            .filter(|e| e.snapshot.outcome.is_none())
            .map(|e| e.snapshot.clone())
            .collect()
    }

    /// Drop finished jobs older than the retention period.
    pub fn reap(&self) -> usize {
        let retention = self.retention;
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, e| e.finished_at.map_or(true, |at| at.elapsed() < retention));
        let reaped = before - jobs.len();
        if reaped > 0 {
            debug!(reaped, "reaped finished jobs");
        }
        reaped
    }
}

/// Write side of one job, held by the pipeline.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    board: JobBoard,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Publish a stage transition. Stages only move forward; a regression or
    /// an update after the terminal event is ignored and returns `false`.
    pub fn advance(&self, stage: JobStage, percent: u8, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut jobs = self.board.lock();
        let Some(entry) = jobs.get_mut(&self.id) else {
            return false;
        };
        let current = entry.snapshot.stage;
        if current.is_terminal() || stage.is_terminal() || stage < current {
            warn!(job = %self.id, from = %current, to = %stage, "rejected stage transition");
            return false;
        }

        entry.snapshot.stage = stage;
        entry.snapshot.percent = percent.min(100).max(entry.snapshot.percent);
        entry.snapshot.message = message.clone();
        debug!(job = %self.id, stage = %stage, percent, "{message}");
        // No receivers is fine: events are simply dropped.
        let _ = entry.sender.send(JobEvent::Progress(ProgressEvent {
            job_id: self.id,
            stage,
            percent: entry.snapshot.percent,
            message,
        }));
        true
    }

    pub fn complete(&self, chapter: GeneratedChapter) -> bool {
        let message = match chapter.warnings.len() {
            0 => format!("Chapter {} complete", chapter.chapter.number),
            n => format!("Chapter {} complete with {n} warning(s)", chapter.chapter.number),
        };
        self.finish(
            JobStage::Complete,
            message,
            JobOutcome::Completed(Box::new(chapter)),
        )
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish(JobStage::Error, error.clone(), JobOutcome::Failed { error })
    }

    fn finish(&self, stage: JobStage, message: String, outcome: JobOutcome) -> bool {
        let mut jobs = self.board.lock();
        let Some(entry) = jobs.get_mut(&self.id) else {
            return false;
        };
        if entry.snapshot.outcome.is_some() {
            warn!(job = %self.id, "job already finished");
            return false;
        }

        entry.snapshot.stage = stage;
        if stage == JobStage::Complete {
            entry.snapshot.percent = 100;
        }
        entry.snapshot.message = message.clone();
        entry.snapshot.outcome = Some(outcome.clone());
        entry.finished_at = Some(Instant::now());

        let _ = entry.sender.send(JobEvent::Progress(ProgressEvent {
            job_id: self.id,
            stage,
            percent: entry.snapshot.percent,
            message,
        }));
        let _ = entry.sender.send(JobEvent::Finished(outcome));
        true
    }
}

/// Read side of one job for one observer.
pub struct JobSubscription {
    id: JobId,
    board: JobBoard,
    pending: Option<JobOutcome>,
    receiver: Option<broadcast::Receiver<JobEvent>>,
    finished: bool,
}

impl JobSubscription {
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Next event, or `None` after the terminal event has been returned.
    pub async fn next(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        if let Some(outcome) = self.pending.take() {
            self.finished = true;
            return Some(JobEvent::Finished(outcome));
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if matches!(event, JobEvent::Finished(_)) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(job = %self.id, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return self
                        .board
                        .snapshot(self.id)
                        .and_then(|s| s.outcome)
                        .map(JobEvent::Finished);
                }
            }
        }
    }

    /// Drain progress and return the terminal outcome.
    pub async fn wait(mut self) -> Option<JobOutcome> {
        while let Some(event) = self.next().await {
            if let JobEvent::Finished(outcome) = event {
                return Some(outcome);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Chapter, ChapterMeta};

    fn board() -> JobBoard {
        JobBoard::new(16, Duration::from_secs(60))
    }

    fn slug() -> WorldSlug {
        WorldSlug::parse("harbor").unwrap()
    }

    fn generated() -> GeneratedChapter {
        GeneratedChapter {
            chapter: Chapter::new(1, "Fog", ChapterMeta::default()),
            markdown: "# Fog".into(),
            warnings: vec![],
            rerolled: false,
        }
    }

    #[tokio::test]
    async fn test_progress_then_terminal() {
        let board = board();
        let job = board.create(slug(), JobKind::Generate);
        let mut sub = board.subscribe(job.id()).unwrap();

        assert!(job.advance(JobStage::Text, 10, "Writing"));
        assert!(job.complete(generated()));

        let mut stages = Vec::new();
        let mut terminal = 0;
        while let Some(event) = sub.next().await {
            match event {
                JobEvent::Progress(p) => stages.push(p.stage),
                JobEvent::Finished(JobOutcome::Completed(c)) => {
                    terminal += 1;
                    assert_eq!(c.chapter.title, "Fog");
                }
                JobEvent::Finished(other) => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(stages, vec![JobStage::Text, JobStage::Complete]);
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_once() {
        let board = board();
        let job = board.create(slug(), JobKind::Generate);
        job.fail("boom");

        let mut sub = board.subscribe(job.id()).unwrap();
        assert_eq!(
            sub.next().await,
            Some(JobEvent::Finished(JobOutcome::Failed {
                error: "boom".into()
            }))
        );
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn test_stage_never_regresses() {
        let board = board();
        let job = board.create(slug(), JobKind::Reroll(2));
        assert!(job.advance(JobStage::Extraction, 50, "Parsing"));
        assert!(!job.advance(JobStage::Text, 20, "Back"));
        assert!(job.advance(JobStage::Extraction, 55, "Still parsing"));
        assert!(!job.advance(JobStage::Complete, 100, "Not via advance"));

        job.fail("stop");
        assert!(!job.advance(JobStage::Saving, 90, "After end"));
        assert!(!job.complete(generated()));

        let snapshot = board.snapshot(job.id()).unwrap();
        assert_eq!(snapshot.stage, JobStage::Error);
        assert_eq!(snapshot.kind, JobKind::Reroll(2));
    }

    #[tokio::test]
    async fn test_reap_after_retention() {
        let board = JobBoard::new(4, Duration::ZERO);
        let running = board.create(slug(), JobKind::Generate);
        let done = board.create(slug(), JobKind::Generate);
        done.complete(generated());

        assert_eq!(board.reap(), 1);
        assert!(board.snapshot(done.id()).is_none());
        assert!(board.subscribe(done.id()).is_none());
        assert_eq!(board.active().len(), 1);
        assert_eq!(board.active()[0].id, running.id());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_still_sees_terminal() {
        let board = JobBoard::new(2, Duration::from_secs(60));
        let job = board.create(slug(), JobKind::Generate);
        let sub = board.subscribe(job.id()).unwrap();
        for percent in 0..20 {
            job.advance(JobStage::Text, percent, "tick");
        }
        job.complete(generated());
        assert!(matches!(sub.wait().await, Some(JobOutcome::Completed(_))));
    }
}

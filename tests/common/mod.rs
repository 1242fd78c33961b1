#![allow(dead_code)]

use bulk_annotator::annotator::{Annotator, AnnotatorError, AnnotatorFactory, HandleError};
use bulk_annotator::dispatcher::{DispatchSettings, Dispatcher};
use bulk_annotator::reliability::RetryPolicy;
use bulk_annotator::store::ResultStore;
use bulk_annotator::{AnnotationOutcome, CategorySchema, Orchestrator, Record, RecordId, ScoreSet};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const CATEGORIES: [&str; 2] = ["TOXICITY", "INSULT"];

pub fn schema() -> CategorySchema {
    CategorySchema::new(CATEGORIES)
}

pub fn text_for(id: u64) -> String {
    format!("comment {id}")
}

/// Records `0..n` whose text is `comment {id}`.
pub fn records(n: u64) -> Vec<Record> {
    (0..n).map(|id| Record::new(id, text_for(id))).collect()
}

pub fn ids(raw: &[u64]) -> BTreeSet<RecordId> {
    raw.iter().map(|id| RecordId::from(*id)).collect()
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
        jitter: false,
    }
}

pub fn settings(workers: usize, shards: usize, max_attempts: u32) -> DispatchSettings {
    DispatchSettings {
        workers,
        shards,
        policy: fast_policy(max_attempts),
        pacing: Duration::ZERO,
        schema: schema(),
    }
}

pub async fn orchestrator(
    dir: &Path,
    factory: ScriptedFactory,
    settings: DispatchSettings,
    max_rounds: Option<u32>,
) -> Orchestrator<ScriptedFactory> {
    let store = ResultStore::open(dir).await.unwrap();
    Orchestrator::new(Dispatcher::new(Arc::new(factory), store, settings), max_rounds)
}

pub async fn stored_outcomes(dir: &Path) -> Vec<AnnotationOutcome> {
    ResultStore::open_with_run_id(dir, "reader")
        .await
        .unwrap()
        .load_outcomes()
        .await
        .unwrap()
}

pub fn outcomes_for(outcomes: &[AnnotationOutcome], id: u64) -> Vec<&AnnotationOutcome> {
    let id = RecordId::from(id);
    outcomes.iter().filter(|o| o.id == id).collect()
}

/// Behaviour keyed by record text.
#[derive(Debug, Clone, Default)]
struct Script {
    transient: HashMap<String, u32>,
    permanent: HashSet<String>,
    hang: HashSet<String>,
    panic_on: HashSet<String>,
    failing_shard: Option<usize>,
    delay: Option<Duration>,
}

/// Everything the annotators saw, shared with the test after the factory moves.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<HashMap<String, u32>>,
    sequence: Mutex<Vec<(usize, String)>>,
    handles: Mutex<Vec<usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl CallLog {
    fn record(&self, shard: usize, text: &str) -> u32 {
        self.sequence.lock().push((shard, text.to_string()));
        let mut calls = self.calls.lock();
        let count = calls.entry(text.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn calls(&self, id: u64) -> u32 {
        self.calls.lock().get(&text_for(id)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    pub fn seen_texts(&self) -> HashSet<String> {
        self.calls.lock().keys().cloned().collect()
    }

    /// Texts submitted by `shard`, in submission order.
    pub fn sequence_for(&self, shard: usize) -> Vec<String> {
        self.sequence
            .lock()
            .iter()
            .filter(|(s, _)| *s == shard)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn handles_created(&self) -> Vec<usize> {
        self.handles.lock().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    script: Arc<Script>,
    log: Arc<CallLog>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<CallLog> {
        self.log.clone()
    }

    /// The first `times` calls for record `id` fail transiently.
    pub fn fail_transiently(mut self, id: u64, times: u32) -> Self {
        Arc::make_mut(&mut self.script)
            .transient
            .insert(text_for(id), times);
        self
    }

    pub fn reject(mut self, id: u64) -> Self {
        Arc::make_mut(&mut self.script)
            .permanent
            .insert(text_for(id));
        self
    }

    pub fn hang(mut self, id: u64) -> Self {
        Arc::make_mut(&mut self.script).hang.insert(text_for(id));
        self
    }

    pub fn panic_on(mut self, id: u64) -> Self {
        Arc::make_mut(&mut self.script).panic_on.insert(text_for(id));
        self
    }

    pub fn fail_shard(mut self, shard: usize) -> Self {
        Arc::make_mut(&mut self.script).failing_shard = Some(shard);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        Arc::make_mut(&mut self.script).delay = Some(delay);
        self
    }
}

impl AnnotatorFactory for ScriptedFactory {
    type Handle = ScriptedAnnotator;

    fn create(&self, shard: usize) -> Result<ScriptedAnnotator, HandleError> {
        if self.script.failing_shard == Some(shard) {
            return Err(HandleError {
                shard,
                reason: "quota exhausted".to_string(),
            });
        }
        self.log.handles.lock().push(shard);
        Ok(ScriptedAnnotator {
            shard,
            script: self.script.clone(),
            log: self.log.clone(),
        })
    }
}

pub struct ScriptedAnnotator {
    shard: usize,
    script: Arc<Script>,
    log: Arc<CallLog>,
}

impl Annotator for ScriptedAnnotator {
    async fn analyze(&mut self, text: &str) -> Result<ScoreSet, AnnotatorError> {
        let call = self.log.record(self.shard, text);

        if self.script.panic_on.contains(text) {
            panic!("scripted panic for {text}");
        }
        if self.script.hang.contains(text) {
            std::future::pending::<()>().await;
        }
        let active = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.log.active.fetch_sub(1, Ordering::SeqCst);

        if self.script.permanent.contains(text) {
            return Err(AnnotatorError::Permanent("text rejected".to_string()));
        }
        if let Some(&failures) = self.script.transient.get(text)
            && call <= failures
        {
            return Err(AnnotatorError::Transient(format!("busy (call {call})")));
        }

        Ok(CATEGORIES
            .iter()
            .map(|category| (category.to_string(), 0.25))
            .collect())
    }
}

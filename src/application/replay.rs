//! Scenario replay: drive the admission engine from a JSON-lines script.
//!
//! Each non-blank line is one step. Lines starting with `#` are comments.
//!
//! ```text
//! {"at": 1700000000, "request": {"uri": "https://example.com/", "page": {"page_id": 1, "lifetime_seconds": 3600}}, "content": "<html></html>"}
//! {"at": 1700000060, "flush": "pageId:1"}
//! ```
//!
//! `at` moves the replay clock before the step runs; it never has to be monotonic.

use std::io::BufRead;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{
    Admission, AdmissionEngine, AdmissionHooks, CacheConfig, CacheKey, CacheStore, Clock,
    EntryContent, Explanation, FixedClock, InMemoryStore, RequestContext, StoreHandle, Tag,
    Timestamp, tags,
};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read scenario line {line}: {source}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario step on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One line of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScenarioStep {
    Flush {
        flush: Tag,
        #[serde(default)]
        at: Option<Timestamp>,
    },
    Request {
        request: RequestContext,
        #[serde(default)]
        content: String,
        /// Tags the renderer records while producing `content`.
        #[serde(default)]
        rendered_tags: Vec<Tag>,
        #[serde(default)]
        at: Option<Timestamp>,
    },
}

/// Result of one replayed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepReport {
    Admission {
        line: usize,
        at: Timestamp,
        uri: String,
        outcome: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<CacheKey>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<Explanation>,
    },
    Flush {
        line: usize,
        at: Timestamp,
        tag: Tag,
        removed: usize,
    },
}

impl StepReport {
    fn admission(line: usize, at: Timestamp, uri: String, admission: Admission) -> Self {
        let outcome = admission.outcome();
        let (key, ttl_seconds, explanation) = match admission {
            Admission::Cached { key, ttl_seconds } => (Some(key), Some(ttl_seconds), None),
            Admission::Explained { key, explanation } => (Some(key), None, Some(explanation)),
            other => (other.key().cloned(), None, None),
        };

        Self::Admission {
            line,
            at,
            uri,
            outcome,
            key,
            ttl_seconds,
            explanation,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Admission { outcome, .. } => outcome,
            Self::Flush { .. } => "flushed",
        }
    }
}

/// Store contents after a replay.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub entries: Vec<EntrySummary>,
    pub tags: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub key: CacheKey,
    pub kind: &'static str,
    pub expires_at: Timestamp,
    pub valid: bool,
    pub tags: Vec<Tag>,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

/// An engine over an in-memory store, driven by a settable clock.
pub struct Replay {
    clock: Arc<FixedClock>,
    store: Arc<InMemoryStore>,
    engine: AdmissionEngine,
}

impl Replay {
    pub fn new(config: &CacheConfig, start: Timestamp) -> Self {
        let clock = Arc::new(FixedClock::new(start));
        let store = Arc::new(InMemoryStore::new(config, clock.clone()));
        let hooks = AdmissionHooks::from_config(config, clock.clone());
        let engine = AdmissionEngine::new(StoreHandle::Available(store.clone()), clock.clone(), hooks);

        Self {
            clock,
            store,
            engine,
        }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Replay every step in `reader`, stopping at the first unreadable or malformed line.
    pub async fn run<R: BufRead>(&self, reader: R) -> Result<Vec<StepReport>, ReplayError> {
        let mut reports = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = line.map_err(|source| ReplayError::Io {
                line: line_number,
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let step: ScenarioStep =
                serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
                    line: line_number,
                    source,
                })?;
            reports.push(self.apply(line_number, step).await);
        }

        info!(steps = reports.len(), "Scenario replayed");
        Ok(reports)
    }

    /// Run a single step.
    pub async fn apply(&self, line: usize, step: ScenarioStep) -> StepReport {
        match step {
            ScenarioStep::Flush { flush, at } => {
                self.move_clock(at);
                let removed = self.store.flush_by_tag(&flush);
                StepReport::Flush {
                    line,
                    at: self.clock.now(),
                    tag: flush,
                    removed,
                }
            }
            ScenarioStep::Request {
                mut request,
                content,
                rendered_tags,
                at,
            } => {
                self.move_clock(at);
                let (content, collected) =
                    tags::with_collector(render(content, rendered_tags)).await;
                request.tags.extend(collected);

                let admission = self.engine.process(&request, content);
                StepReport::admission(line, self.clock.now(), request.uri, admission)
            }
        }
    }

    pub fn summary(&self) -> StoreSummary {
        let now = self.clock.now();
        let entries = self
            .store
            .entries()
            .into_iter()
            .map(|stored| {
                let valid = stored.is_valid_at(now);
                let explanation = stored.explanation().cloned();
                let (kind, bytes) = match &stored.entry.content {
                    EntryContent::Page(body) => ("page", body.len()),
                    EntryContent::Explanation(_) => ("explanation", 0),
                };
                EntrySummary {
                    key: stored.entry.key,
                    kind,
                    expires_at: stored.expires_at,
                    valid,
                    tags: stored.entry.tags.into_iter().collect(),
                    bytes,
                    explanation,
                }
            })
            .collect();

        StoreSummary {
            entries,
            tags: self.store.tag_count(),
        }
    }

    fn move_clock(&self, at: Option<Timestamp>) {
        if let Some(at) = at {
            debug!(at, "Replay clock moved");
            self.clock.set(at);
        }
    }
}

async fn render(content: String, rendered_tags: Vec<Tag>) -> Bytes {
    for tag in rendered_tags {
        tags::record(tag);
    }
    Bytes::from(content)
}

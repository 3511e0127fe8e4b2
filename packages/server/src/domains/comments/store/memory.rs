use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domains::comments::models::CommentRecord;
use crate::kernel::clock::{Clock, SystemClock};
use crate::kernel::{BaseCommentStore, TextAnalysis};

type NaturalKey = (i64, i64, i64);

#[derive(Default)]
struct State {
    records: HashMap<Uuid, CommentRecord>,
    by_key: BTreeMap<NaturalKey, Uuid>,
}

/// Comment store for single-process runs and tests.
pub struct InMemoryCommentStore {
    state: RwLock<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Every stored record, in natural-key order.
    pub async fn all(&self) -> Vec<CommentRecord> {
        let state = self.state.read().await;
        state
            .by_key
            .values()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }
}

impl Default for InMemoryCommentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseCommentStore for InMemoryCommentStore {
    async fn upsert_many(&self, records: &[CommentRecord]) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let key = record.natural_key();
            let id = match state.by_key.get(&key).copied() {
                Some(existing) => {
                    let stored = state
                        .records
                        .get_mut(&existing)
                        .ok_or_else(|| anyhow!("comment index points at missing record"))?;
                    stored.author_id = record.author_id;
                    stored.text = record.text.clone();
                    stored.like_count = record.like_count;
                    stored.task_id = record.task_id.or(stored.task_id);
                    existing
                }
                None => {
                    let mut stored = record.clone();
                    stored.keywords = None;
                    stored.sentiment = None;
                    stored.analyzed_at = None;
                    state.by_key.insert(key, stored.id);
                    state.records.insert(stored.id, stored);
                    record.id
                }
            };
            ids.push(id);
        }

        Ok(ids)
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<CommentRecord>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn save_analysis(&self, id: Uuid, analysis: &TextAnalysis) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("comment {} not found", id))?;
        record.apply_analysis(analysis, now);
        Ok(())
    }

    async fn ids_for_owners(&self, owner_ids: &[i64]) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .iter()
            .filter(|((owner_id, _, _), _)| owner_ids.contains(owner_id))
            .map(|(_, id)| *id)
            .collect())
    }

    async fn ids_for_task(&self, task_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .values()
            .filter(|id| {
                state
                    .records
                    .get(*id)
                    .map(|record| record.task_id == Some(task_id))
                    .unwrap_or(false)
            })
            .copied()
            .collect())
    }
}

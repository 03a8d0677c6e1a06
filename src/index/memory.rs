//! In-memory HNSW backend with a JSON snapshot.
//!
//! State lives behind a `std::sync::RwLock`; no lock is held across an
//! await. The snapshot is written to a sibling temp file and renamed over
//! `index.json`, so a crash leaves either the old or the new snapshot.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{rank, Hnsw, IndexEntry, IndexSpec, SearchHit, VectorIndex};
use crate::error::{RagError, Result};

/// Rebuild the graph once more than this fraction of its slots is deleted.
const MAX_DEAD_FRACTION: f32 = 0.25;

struct State {
    graph: Hnsw,
    /// Indexed by graph slot; `None` once deleted.
    slots: Vec<Option<IndexEntry>>,
    by_chunk: HashMap<String, usize>,
}

impl State {
    fn empty(m: usize, ef_construction: usize) -> Self {
        Self {
            graph: Hnsw::new(m, ef_construction),
            slots: Vec::new(),
            by_chunk: HashMap::new(),
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        if let Some(old) = self.by_chunk.remove(&entry.chunk_id) {
            self.remove_slot(old);
        }
        let slot = self.graph.insert(entry.vector.clone());
        debug_assert_eq!(slot, self.slots.len());
        self.by_chunk.insert(entry.chunk_id.clone(), slot);
        self.slots.push(Some(entry));
    }

    fn remove_slot(&mut self, slot: usize) {
        self.graph.delete(slot);
        if let Some(cell) = self.slots.get_mut(slot) {
            *cell = None;
        }
    }

    fn live(&self) -> impl Iterator<Item = &IndexEntry> {
        self.slots.iter().flatten()
    }
}

pub struct MemoryIndex {
    spec: IndexSpec,
    path: PathBuf,
    m: usize,
    ef_construction: usize,
    state: RwLock<State>,
    persist_lock: tokio::sync::Mutex<()>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    #[serde(flatten)]
    spec: &'a IndexSpec,
    entries: Vec<&'a IndexEntry>,
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(flatten)]
    spec: IndexSpec,
    entries: Vec<IndexEntry>,
}

impl MemoryIndex {
    pub fn new(spec: IndexSpec, path: PathBuf, m: usize, ef_construction: usize) -> Self {
        Self {
            spec,
            path,
            m,
            ef_construction,
            state: RwLock::new(State::empty(m, ef_construction)),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| RagError::index("index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| RagError::index("index lock poisoned"))
    }

    fn rebuild(&self, entries: Vec<IndexEntry>) -> State {
        let mut state = State::empty(self.m, self.ef_construction);
        for entry in entries {
            state.insert(entry);
        }
        state
    }

    fn compact_if_needed(&self, state: &mut State) {
        let total = state.graph.len();
        if total == 0 {
            return;
        }
        let dead = state.graph.deleted_count();
        if dead as f32 / total as f32 > MAX_DEAD_FRACTION {
            debug!(dead, total, "rebuilding HNSW graph");
            let live: Vec<IndexEntry> = state.slots.drain(..).flatten().collect();
            *state = self.rebuild(live);
        }
    }

    fn brute_force(state: &State, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = state
            .live()
            .map(|e| SearchHit {
                chunk_id: e.chunk_id.clone(),
                score: dot(&e.vector, query),
                metadata: e.metadata.clone(),
            })
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        hits
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let s: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    s.clamp(-1.0, 1.0)
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    async fn add_batch(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.spec.check_vector(&entry.vector)?;
        }
        let mut state = self.write()?;
        for entry in entries {
            state.insert(entry);
        }
        self.compact_if_needed(&mut state);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.spec.check_vector(query)?;
        let state = self.read()?;
        let want = k.min(state.by_chunk.len());
        if want == 0 {
            return Ok(Vec::new());
        }

        let found = state.graph.search(query, want, self.ef_construction);
        if found.len() < want {
            // The graph lost reachability to some live nodes.
            warn!(found = found.len(), want, "HNSW search short, scanning exhaustively");
            return Ok(Self::brute_force(&state, query, want));
        }

        let mut hits: Vec<SearchHit> = found
            .into_iter()
            .filter_map(|(slot, _)| state.slots.get(slot).and_then(|e| e.as_ref()))
            .map(|e| SearchHit {
                chunk_id: e.chunk_id.clone(),
                score: dot(&e.vector, query),
                metadata: e.metadata.clone(),
            })
            .collect();
        rank(&mut hits);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let doomed: Vec<(String, usize)> = state
            .live()
            .filter(|e| e.metadata.document_id == document_id)
            .filter_map(|e| state.by_chunk.get(&e.chunk_id).map(|s| (e.chunk_id.clone(), *s)))
            .collect();

        for (chunk_id, slot) in &doomed {
            state.by_chunk.remove(chunk_id);
            state.remove_slot(*slot);
        }
        self.compact_if_needed(&mut state);
        Ok(doomed.len())
    }

    async fn clear(&self) -> Result<()> {
        *self.write()? = State::empty(self.m, self.ef_construction);
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let json = {
            let state = self.read()?;
            serde_json::to_vec(&SnapshotRef {
                spec: &self.spec,
                entries: state.live().collect(),
            })?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = json.len(), "index snapshot written");
        Ok(())
    }

    async fn load(&self, tracked: &HashSet<String>) -> Result<usize> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.write()? = State::empty(self.m, self.ef_construction);
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        self.spec.check(&snapshot.spec)?;

        let total = snapshot.entries.len();
        let mut kept = Vec::with_capacity(total);
        for entry in snapshot.entries {
            if entry.vector.len() != self.spec.dims {
                return Err(RagError::IndexCorruption(format!(
                    "vector {} has {} dimensions, index has {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    self.spec.dims
                )));
            }
            if tracked.contains(&entry.metadata.document_id) {
                kept.push(entry);
            }
        }
        let dropped = total - kept.len();

        let state = self.rebuild(kept);
        info!(
            vectors = state.by_chunk.len(),
            dropped,
            "loaded index snapshot"
        );
        *self.write()? = state;
        Ok(dropped)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.by_chunk.len())
    }

    async fn document_vector_counts(&self) -> Result<HashMap<String, usize>> {
        let state = self.read()?;
        let mut counts = HashMap::new();
        for entry in state.live() {
            *counts.entry(entry.metadata.document_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

//! In-memory cache of aggregated timelines.
//!
//! Entries live until a mutation on the same lead invalidates them. There is
//! no TTL. Concurrent rebuilds of one lead are not coalesced; the last
//! writer wins.
//!
//! Each lead carries a generation that `invalidate` bumps. A build records
//! the generation it started under and is only stored if no invalidation
//! happened in between, so a rebuild racing a mutation cannot park a stale
//! timeline in the cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::lead::{LeadError, LeadRef};
use super::timeline::{self, Timeline, TimelineSource};

#[derive(Default)]
struct Entries {
    timelines: HashMap<LeadRef, Arc<Timeline>>,
    generations: HashMap<LeadRef, u64>,
}

impl Entries {
    fn generation(&self, lead: LeadRef) -> u64 {
        self.generations.get(&lead).copied().unwrap_or(0)
    }
}

#[derive(Clone, Default)]
pub struct TimelineCache {
    entries: Arc<RwLock<Entries>>,
}

impl TimelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, lead: LeadRef) -> Option<Arc<Timeline>> {
        self.entries.read().await.timelines.get(&lead).cloned()
    }

    /// Invalidations seen so far for `lead`.
    pub async fn generation(&self, lead: LeadRef) -> u64 {
        self.entries.read().await.generation(lead)
    }

    /// Store `timeline` if its lead is still at `generation`. The timeline
    /// is returned either way.
    pub async fn insert(&self, timeline: Timeline, generation: u64) -> Arc<Timeline> {
        let timeline = Arc::new(timeline);
        let lead = timeline.lead.id;
        let mut entries = self.entries.write().await;
        if entries.generation(lead) == generation {
            entries.timelines.insert(lead, Arc::clone(&timeline));
        } else {
            debug!(%lead, "timeline invalidated during build; not cached");
        }
        timeline
    }

    /// Return the cached timeline, or build and store one. `bypass` forces
    /// a rebuild even when an entry exists.
    ///
    /// # Errors
    ///
    /// Propagates the lead lookup failure from [`timeline::build_timeline`].
    pub async fn get_or_build(
        &self,
        source: &dyn TimelineSource,
        lead: LeadRef,
        batch_size: i64,
        bypass: bool,
    ) -> Result<Arc<Timeline>, LeadError> {
        let generation = {
            let entries = self.entries.read().await;
            if !bypass {
                if let Some(hit) = entries.timelines.get(&lead) {
                    debug!(%lead, "timeline cache hit");
                    return Ok(Arc::clone(hit));
                }
            }
            entries.generation(lead)
        };
        let built = timeline::build_timeline(source, lead, batch_size).await?;
        Ok(self.insert(built, generation).await)
    }

    pub async fn invalidate(&self, lead: LeadRef) {
        let mut entries = self.entries.write().await;
        *entries.generations.entry(lead).or_insert(0) += 1;
        if entries.timelines.remove(&lead).is_some() {
            debug!(%lead, "timeline cache invalidated");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.timelines.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.timelines.is_empty()
    }
}

#[cfg(test)]
#[path = "timeline_cache_test.rs"]
mod tests;

//! Index classification, multi-map reconciliation and the sysmeta walk.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::debug;

use super::ResourceMapResolver;
use crate::error::FetchError;
use crate::events::EventMeta;
use crate::index::{IndexField, IndexQuery};
use crate::tracker::Direction;

/// What the index said about one PID
#[derive(Debug, Default)]
pub(super) struct IndexOutcome {
    pub rm: Option<String>,
    pub meta: EventMeta,
}

#[derive(Debug, Default)]
pub(super) struct WalkOutcome {
    pub rm: Option<String>,
    pub meta: EventMeta,
}

impl ResourceMapResolver {
    /// Query the index for `pid` and classify the answer.
    ///
    /// A resource map resolves to itself. A single linked map is accepted
    /// unless the document is data or the PID is a series id.
    pub(super) async fn search_index(&self, pid: &str) -> Result<IndexOutcome, FetchError> {
        let docs = self
            .index
            .query(&IndexQuery::IdOrSeriesId(pid.to_string()), IndexField::resolution_set())
            .await?;
        if docs.is_empty() {
            return Ok(IndexOutcome::default());
        }

        let mut rms: Vec<String> = Vec::new();
        for rm in docs.iter().flat_map(|d| d.resource_map.iter()) {
            if !rm.is_empty() && !rms.contains(rm) {
                rms.push(rm.clone());
            }
        }
        let meta = EventMeta {
            is_sid: docs.iter().any(|d| d.series_id.as_deref() == Some(pid)),
            is_data: docs.iter().any(|d| d.is_data()),
            is_rm: docs.iter().any(|d| d.is_resource_map()),
            rms,
            ..EventMeta::default()
        };

        let rm = if meta.is_rm {
            Some(pid.to_string())
        } else if meta.rms.len() == 1 && !meta.is_data && !meta.is_sid {
            meta.rms.first().cloned()
        } else {
            None
        };
        Ok(IndexOutcome { rm, meta })
    }

    /// Pick one map out of several when they are versions of each other and
    /// exactly one is not obsoleted
    pub(super) async fn reconcile_rms(&self, rms: &[String]) -> (Option<String>, EventMeta) {
        let mut meta = EventMeta::default();
        let adjacent = join_all(rms.iter().map(|rm| self.tracker.get_adjacent(rm))).await;

        let mut linked: HashSet<&str> = HashSet::new();
        let mut tips: Vec<&str> = Vec::new();
        for (rm, neighbors) in rms.iter().zip(&adjacent) {
            let Ok(neighbors) = neighbors else {
                meta.multiple_rms_not_versions = true;
                return (None, meta);
            };
            linked.extend(neighbors.prev.as_deref());
            linked.extend(neighbors.next.as_deref());
            if neighbors.next.is_none() {
                tips.push(rm.as_str());
            }
        }

        if !rms.iter().all(|rm| linked.contains(rm.as_str())) {
            meta.multiple_rms_not_versions = true;
            return (None, meta);
        }

        match tips.as_slice() {
            [tip] => (Some(tip.to_string()), meta),
            _ => {
                meta.multiple_rms_all_obsoleted = true;
                (None, meta)
            }
        }
    }

    /// Walk back from `pid` until an ancestor is indexed with a resource map,
    /// then walk that map forward by the same number of steps
    pub(super) async fn walk_sysmeta(&self, pid: &str) -> WalkOutcome {
        let mut meta = EventMeta::default();
        let limit = self.config.max_steps.min(self.tracker.max_chain_hops());
        let mut steps = 0;
        let mut ancestor_rm = None;

        while steps < limit {
            steps += 1;
            let ancestor = match self.tracker.get_nth(pid, -(steps as i64), false).await {
                Ok(ancestor) => ancestor,
                Err(err) => {
                    meta.chain_errors.push(err.to_string());
                    break;
                }
            };

            let record = self.tracker.record(pid).await;
            if record.is_unauthorized() {
                meta.unauthorized = true;
            }
            meta.chain_errors = record
                .errors
                .iter()
                .map(|e| format!("{} ({}): {}", e.pid, e.error_code, e.error))
                .collect();

            let Some(ancestor) = ancestor else { break };
            meta.past_pids.push(ancestor.clone());

            match self.search_index(&ancestor).await {
                Ok(IndexOutcome { rm: Some(rm), .. }) => {
                    debug!(pid, ancestor = %ancestor, rm = %rm, steps, "found indexed ancestor");
                    ancestor_rm = Some(rm);
                    break;
                }
                Ok(_) => {}
                Err(err) if err.is_unauthorized() => {
                    meta.chain_errors.push(format!("{} ({}): {}", ancestor, err.code(), err.message));
                    meta.unauthorized = true;
                    break;
                }
                Err(err) => debug!(pid, ancestor = %ancestor, error = %err, "index lookup failed during walk"),
            }
        }
        meta.steps_back = Some(steps);

        if meta.unauthorized {
            return WalkOutcome { rm: None, meta };
        }
        let Some(ancestor_rm) = ancestor_rm else {
            return WalkOutcome { rm: None, meta };
        };
        meta.candidate = Some(ancestor_rm.clone());

        // The map's chain must be as long as the document's; anything shorter is a miss
        let rm = match self.tracker.get_nth(&ancestor_rm, steps as i64, false).await {
            Ok(Some(rm)) => Some(rm),
            Ok(None) => {
                let record = self.tracker.record(&ancestor_rm).await;
                let denied: Vec<String> = record
                    .errors
                    .iter()
                    .filter(|e| e.direction == Direction::Forward && e.is_unauthorized())
                    .map(|e| format!("{} ({}): {}", e.pid, e.error_code, e.error))
                    .collect();
                if denied.is_empty() {
                    debug!(pid, rm = %ancestor_rm, steps, "resource map chain shorter than document chain");
                } else {
                    meta.unauthorized = true;
                    meta.chain_errors.extend(denied);
                }
                None
            }
            Err(err) => {
                meta.chain_errors.push(err.to_string());
                None
            }
        };
        WalkOutcome { rm, meta }
    }
}

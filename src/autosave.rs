//! Auto-save coalescing and quick save.
//!
//! Games call [`AutoSaveCoalescer::queue_auto_save`] as often as they like.
//! Queued payloads sit in memory until a flush, which keeps only the newest
//! payload per (owner, slot) key and writes it to the owner's auto-save slot.
//! The key selects throttling config and coalescing only; a flush never
//! touches any other slot. All state here lives for the process only and is
//! gone after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::EngineSettings;
use crate::error::Result;
use crate::model::{SaveKind, SaveRecord};
use crate::store::{LoadedSave, SaveOptions, SaveStore, SaveUpdate};

const AUTO_SAVE_NAME: &str = "Auto Save";
const QUICK_SAVE_NAME: &str = "Quick Save";

type SlotKey = (String, u32);

/// Auto-save settings for one (owner, slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Epoch millis of the last successful auto-save.
    pub last_fire_at: Option<i64>,
}

/// What happened to a queued payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOutcome {
    Queued,
    Disabled,
    /// The interval has not elapsed since the last auto-save.
    Throttled,
}

/// Counts from one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Distinct keys written (or attempted).
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// Older queued payloads dropped in favor of a newer one for the same key.
    pub coalesced: usize,
}

impl FlushReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}

#[derive(Debug)]
struct PendingAutoSave {
    owner_id: String,
    slot_id: u32,
    data: Value,
    seq: u64,
}

#[derive(Debug, Default)]
struct CoalescerState {
    configs: HashMap<SlotKey, AutoSaveConfig>,
    pending: Vec<PendingAutoSave>,
    next_seq: u64,
}

/// Process-wide auto-save queue. Build once, share by `Arc`.
#[derive(Debug)]
pub struct AutoSaveCoalescer {
    state: Mutex<CoalescerState>,
    default_slot: u32,
    default_interval: Duration,
}

impl AutoSaveCoalescer {
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            state: Mutex::new(CoalescerState::default()),
            default_slot: settings.auto_save_slot,
            default_interval: settings.auto_save_interval(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoalescerState> {
        // The state stays consistent across a panic mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self, owner_id: &str, slot_id: Option<u32>) -> SlotKey {
        (owner_id.to_string(), slot_id.unwrap_or(self.default_slot))
    }

    fn default_config(&self) -> AutoSaveConfig {
        AutoSaveConfig {
            enabled: true,
            interval_ms: duration_ms(self.default_interval),
            last_fire_at: None,
        }
    }

    /// Turn auto-save on for a slot (default: the auto-save slot).
    pub fn enable_auto_save(&self, owner_id: &str, slot_id: Option<u32>, interval: Option<Duration>) {
        let key = self.key(owner_id, slot_id);
        let interval_ms = duration_ms(interval.unwrap_or(self.default_interval));
        let default = self.default_config();

        let mut state = self.lock();
        let config = state.configs.entry(key.clone()).or_insert(default);
        config.enabled = true;
        config.interval_ms = interval_ms;

        info!(owner_id, slot = key.1, interval_ms, "Auto-save enabled");
    }

    /// Turn auto-save off for a slot. Queued payloads are left alone.
    pub fn disable_auto_save(&self, owner_id: &str, slot_id: Option<u32>) {
        let key = self.key(owner_id, slot_id);
        let default = self.default_config();

        let mut state = self.lock();
        state.configs.entry(key.clone()).or_insert(default).enabled = false;

        info!(owner_id, slot = key.1, "Auto-save disabled");
    }

    /// The config for a slot, if one was ever set or fired.
    #[must_use]
    pub fn config(&self, owner_id: &str, slot_id: Option<u32>) -> Option<AutoSaveConfig> {
        self.lock()
            .configs
            .get(&self.key(owner_id, slot_id))
            .copied()
    }

    /// Number of payloads waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Queue a payload for the next flush.
    ///
    /// A slot with no config counts as enabled with the default interval.
    pub fn queue_auto_save(&self, owner_id: &str, data: Value, slot_id: Option<u32>) -> QueueOutcome {
        let key = self.key(owner_id, slot_id);
        let now = chrono::Utc::now().timestamp_millis();

        let mut state = self.lock();
        if let Some(config) = state.configs.get(&key) {
            if !config.enabled {
                return QueueOutcome::Disabled;
            }
            if let Some(last) = config.last_fire_at {
                let elapsed = u64::try_from(now.saturating_sub(last)).unwrap_or(0);
                if elapsed < config.interval_ms {
                    debug!(owner_id, slot = key.1, elapsed, "Auto-save throttled");
                    return QueueOutcome::Throttled;
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(PendingAutoSave {
            owner_id: key.0,
            slot_id: key.1,
            data,
            seq,
        });

        debug!(owner_id, slot = key.1, seq, "Queued auto-save");
        QueueOutcome::Queued
    }

    /// Write the newest queued payload per key to the auto-save slot and
    /// clear the queue.
    ///
    /// A failing key is logged and counted; the rest still flush.
    pub fn flush(&self, store: &mut SaveStore) -> FlushReport {
        let pending = std::mem::take(&mut self.lock().pending);
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return report;
        }

        let total = pending.len();
        let mut latest: HashMap<SlotKey, PendingAutoSave> = HashMap::new();
        for item in pending {
            let key = (item.owner_id.clone(), item.slot_id);
            match latest.get(&key) {
                Some(existing) if existing.seq > item.seq => {}
                _ => {
                    latest.insert(key, item);
                }
            }
        }
        report.coalesced = total - latest.len();
        debug!(queued = total, distinct = latest.len(), "Flushing auto-saves");

        let mut batch: Vec<_> = latest.into_iter().collect();
        batch.sort_by_key(|(_, item)| item.seq);
        let target = store.settings().auto_save_slot;

        for (key, item) in batch {
            report.processed += 1;
            match write_slot(store, &item.owner_id, target, &item.data, SaveKind::Auto) {
                Ok(created) => {
                    if created {
                        report.created += 1;
                    } else {
                        report.updated += 1;
                    }
                    let now = chrono::Utc::now().timestamp_millis();
                    let default = self.default_config();
                    self.lock().configs.entry(key).or_insert(default).last_fire_at = Some(now);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        owner_id = %item.owner_id,
                        key_slot = item.slot_id,
                        slot = target,
                        error = %e,
                        "Auto-save failed"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            coalesced = report.coalesced,
            "Auto-save flush complete"
        );
        report
    }
}

/// Flush `coalescer` into `store` every `cadence` until the task is aborted.
///
/// The first flush happens one full `cadence` after spawning. The store is
/// locked only for the duration of each flush, on a blocking thread.
pub fn spawn_flush_loop(
    coalescer: Arc<AutoSaveCoalescer>,
    store: Arc<Mutex<SaveStore>>,
    cadence: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let coalescer = Arc::clone(&coalescer);
            let store = Arc::clone(&store);
            let flushed = tokio::task::spawn_blocking(move || {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                coalescer.flush(&mut store)
            })
            .await;

            if let Err(e) = flushed {
                error!(error = %e, "Auto-save flush task failed");
            }
        }
    })
}

/// Write to the quick-save slot right away, creating it if needed.
///
/// # Errors
///
/// Returns any write pipeline error.
pub fn quick_save(store: &mut SaveStore, owner_id: &str, data: &Value) -> Result<SaveRecord> {
    let slot = store.settings().quick_save_slot;
    write_slot(store, owner_id, slot, data, SaveKind::Quicksave)?;
    store.get(owner_id, slot)
}

/// Load the quick-save slot.
///
/// # Errors
///
/// Same as [`SaveStore::load`].
pub fn quick_load(store: &mut SaveStore, owner_id: &str) -> Result<LoadedSave> {
    let slot = store.settings().quick_save_slot;
    store.load(owner_id, slot)
}

/// Update-or-create a reserved slot. Returns whether it was created.
fn write_slot(
    store: &mut SaveStore,
    owner_id: &str,
    slot_id: u32,
    data: &Value,
    kind: SaveKind,
) -> Result<bool> {
    let name = match kind {
        SaveKind::Quicksave => QUICK_SAVE_NAME,
        _ => AUTO_SAVE_NAME,
    };

    if store.storage().get_save(owner_id, slot_id)?.is_some() {
        store.update(
            owner_id,
            slot_id,
            SaveUpdate {
                payload: Some(data.clone()),
                slot_name: Some(name.to_string()),
                save_kind: Some(kind),
                ..SaveUpdate::default()
            },
        )?;
        Ok(false)
    } else {
        store.create(
            owner_id,
            slot_id,
            data,
            SaveOptions {
                slot_name: Some(name.to_string()),
                save_kind: Some(kind),
                ..SaveOptions::default()
            },
        )?;
        Ok(true)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use crate::store::tests::{memory_store, payload};
    use serde_json::json;

    fn coalescer() -> AutoSaveCoalescer {
        AutoSaveCoalescer::new(&EngineSettings::default())
    }

    #[test]
    fn test_unconfigured_slot_is_enabled() {
        let c = coalescer();
        assert!(c.config("p1", None).is_none());
        assert_eq!(c.queue_auto_save("p1", payload("A"), None), QueueOutcome::Queued);
        assert_eq!(c.pending_len(), 1);
    }

    #[test]
    fn test_disabled_slot_drops_payload() {
        let c = coalescer();
        c.disable_auto_save("p1", None);
        assert_eq!(c.queue_auto_save("p1", payload("A"), None), QueueOutcome::Disabled);
        assert_eq!(c.pending_len(), 0);

        // Other slots are unaffected.
        assert_eq!(c.queue_auto_save("p1", payload("A"), Some(5)), QueueOutcome::Queued);
    }

    #[test]
    fn test_flush_keeps_latest_per_key() {
        let c = coalescer();
        let mut store = memory_store();

        c.queue_auto_save("p1", payload("first"), None);
        c.queue_auto_save("p1", payload("second"), None);
        c.queue_auto_save("p1", payload("third"), None);
        c.queue_auto_save("p2", payload("other"), None);

        let report = c.flush(&mut store);
        assert_eq!(report.processed, 2);
        assert_eq!(report.created, 2);
        assert_eq!(report.coalesced, 2);
        assert_eq!(c.pending_len(), 0);

        let saved = store.get("p1", 99).unwrap();
        assert_eq!(saved.save_kind, SaveKind::Auto);
        assert_eq!(saved.slot_name, "Auto Save");
        assert_eq!(saved.revision, 1);
        assert_eq!(store.load("p1", 99).unwrap().payload["world_state"]["level"], "third");
        assert!(c.config("p1", None).unwrap().last_fire_at.is_some());
    }

    #[test]
    fn test_flush_never_touches_manual_slot() {
        let c = coalescer();
        let mut store = memory_store();
        store
            .create(
                "p1",
                3,
                &payload("boss"),
                SaveOptions {
                    slot_name: Some("Boss Fight".to_string()),
                    save_kind: Some(SaveKind::Manual),
                    ..SaveOptions::default()
                },
            )
            .unwrap();

        assert_eq!(c.queue_auto_save("p1", payload("auto"), Some(3)), QueueOutcome::Queued);
        let report = c.flush(&mut store);
        assert_eq!(report.created, 1);

        let manual = store.get("p1", 3).unwrap();
        assert_eq!(manual.slot_name, "Boss Fight");
        assert_eq!(manual.save_kind, SaveKind::Manual);
        assert_eq!(manual.revision, 1);
        assert_eq!(store.load("p1", 3).unwrap().payload["world_state"]["level"], "boss");

        let auto = store.get("p1", 99).unwrap();
        assert_eq!(auto.save_kind, SaveKind::Auto);
        assert_eq!(store.load("p1", 99).unwrap().payload["world_state"]["level"], "auto");

        // The key still carries its own throttle state.
        assert!(c.config("p1", Some(3)).unwrap().last_fire_at.is_some());
        assert!(c.config("p1", None).is_none());
    }

    #[test]
    fn test_recent_fire_throttles() {
        let c = coalescer();
        let mut store = memory_store();
        c.queue_auto_save("p1", payload("A"), None);
        c.flush(&mut store);

        assert_eq!(c.queue_auto_save("p1", payload("B"), None), QueueOutcome::Throttled);

        c.enable_auto_save("p1", None, Some(Duration::ZERO));
        assert_eq!(c.queue_auto_save("p1", payload("B"), None), QueueOutcome::Queued);

        let report = c.flush(&mut store);
        assert_eq!(report.updated, 1);
        assert_eq!(store.get("p1", 99).unwrap().revision, 2);
    }

    #[test]
    fn test_failed_key_does_not_abort_flush() {
        let c = coalescer();
        let mut store = memory_store();
        c.queue_auto_save("p1", json!({"version": 2}), Some(1));
        c.queue_auto_save("p1", payload("ok"), Some(2));

        let report = c.flush(&mut store);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(store.load("p1", 99).unwrap().payload["world_state"]["level"], "ok");
        assert!(store.get("p1", 1).is_err());
        assert!(store.get("p1", 2).is_err());
        assert!(c.config("p1", Some(1)).is_none());
        assert!(c.config("p1", Some(2)).is_some());
    }

    #[test]
    fn test_empty_flush() {
        let mut store = memory_store();
        assert!(coalescer().flush(&mut store).is_empty());
    }

    #[test]
    fn test_quick_save_and_load() {
        let mut store = memory_store();
        let first = quick_save(&mut store, "p1", &payload("A")).unwrap();
        assert_eq!(first.slot_id, 98);
        assert_eq!(first.save_kind, SaveKind::Quicksave);
        assert_eq!(first.slot_name, "Quick Save");

        let second = quick_save(&mut store, "p1", &payload("B")).unwrap();
        assert_eq!(second.revision, 2);
        assert_eq!(second.sync_status, SyncStatus::LocalNewer);
        assert_eq!(quick_load(&mut store, "p1").unwrap().payload["world_state"]["level"], "B");
    }

    #[tokio::test]
    async fn test_flush_loop_drains_queue() {
        let c = Arc::new(coalescer());
        let store = Arc::new(Mutex::new(memory_store()));
        c.queue_auto_save("p1", payload("A"), None);

        let handle = spawn_flush_loop(Arc::clone(&c), Arc::clone(&store), Duration::from_millis(20));
        for _ in 0..250 {
            if c.pending_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert_eq!(c.pending_len(), 0);
        // The flush holds the store lock from before it drains the queue.
        assert!(store.lock().unwrap().get("p1", 99).is_ok());
    }
}

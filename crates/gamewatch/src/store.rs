//! Owned, single-writer bridge state: persisted player levels, the
//! per-reset-period dedup sets, and the transient pending vote checks.
//!
//! Only the methods here mutate any of it; concurrent tasks share the
//! whole thing behind one `tokio::sync::Mutex`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use conproto::RosterRecord;
use tracing::{info, warn};

const REMEMBERED_MAX: usize = 2048;

/// A level change observed by a roster refresh, in roster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDelta {
    pub name: String,
    pub old: u32,
    pub new: u32,
}

impl LevelDelta {
    pub fn is_increase(&self) -> bool {
        self.new > self.old
    }
}

/// Durable display-name → level map. Loaded once at startup; every
/// mutation rewrites the whole file through a temp path plus atomic
/// rename so a failed write can never lose the previous state.
#[derive(Debug)]
pub struct LevelStore {
    path: PathBuf,
    levels: HashMap<String, u32>,
}

impl LevelStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let levels = match std::fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<HashMap<String, u32>>(&s) {
                Ok(v) => {
                    info!(players = v.len(), path = %path.display(), "loaded player levels");
                    v
                }
                Err(e) => {
                    warn!(err = %e, path = %path.display(), "levels file unreadable; starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(err = %e, path = %path.display(), "levels file unreadable; starting empty");
                HashMap::new()
            }
        };
        Self { path, levels }
    }

    /// Stored level for a player; new characters start at level 1.
    pub fn get(&self, name: &str) -> u32 {
        self.levels.get(name).copied().unwrap_or(1)
    }

    /// Highest level ever observed across all tracked players, or 1 when
    /// nobody has been seen yet.
    pub fn highest(&self) -> u32 {
        self.levels.values().copied().max().unwrap_or(1)
    }

    pub fn tracked(&self) -> usize {
        self.levels.len()
    }

    /// Fold a roster dump into the store. Players are created on first
    /// sight; changed levels are overwritten and reported in roster
    /// order. A decrease is anomalous in this domain but is recorded all
    /// the same, never dropped.
    pub fn refresh(&mut self, records: &[RosterRecord]) -> Vec<LevelDelta> {
        let mut deltas = Vec::new();
        let mut dirty = false;

        for rec in records {
            let old = self.levels.get(&rec.name).copied();
            match old {
                None => {
                    self.levels.insert(rec.name.clone(), rec.level);
                    dirty = true;
                    // Unseen players default to level 1 for diff purposes.
                    if rec.level != 1 {
                        deltas.push(LevelDelta {
                            name: rec.name.clone(),
                            old: 1,
                            new: rec.level,
                        });
                    }
                }
                Some(prev) if prev != rec.level => {
                    if rec.level < prev {
                        warn!(
                            player = %rec.name,
                            old = prev,
                            new = rec.level,
                            "level decreased; recording anyway"
                        );
                    }
                    self.levels.insert(rec.name.clone(), rec.level);
                    dirty = true;
                    deltas.push(LevelDelta {
                        name: rec.name.clone(),
                        old: prev,
                        new: rec.level,
                    });
                }
                Some(_) => {}
            }
        }

        if dirty {
            self.persist();
        }
        deltas
    }

    /// Overwrite one player's level (confirmed level-up or catchup grant).
    pub fn set(&mut self, name: &str, level: u32) {
        let prev = self.levels.get(name).copied();
        if let Some(prev) = prev {
            if level < prev {
                warn!(player = %name, old = prev, new = level, "level decreased; recording anyway");
            }
        }
        if prev != Some(level) {
            self.levels.insert(name.to_string(), level);
            self.persist();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(err = %e, path = %self.path.display(), "failed to persist player levels");
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut sorted: Vec<(&String, &u32)> = self.levels.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let map: serde_json::Map<String, serde_json::Value> = sorted
            .into_iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
            .collect();
        let s = serde_json::to_string_pretty(&map)?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// A player waiting for an asynchronous external condition (their vote
/// registering on the provider) to become true.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug)]
pub struct BridgeState {
    pub levels: LevelStore,
    thanked: HashSet<u64>,
    announced: HashSet<u64>,
    checked_today: HashSet<u64>,
    pending: HashMap<u64, PendingEntry>,
    remembered: HashMap<u64, String>,
    pub quest_healthy: bool,
    last_reset: Option<NaiveDate>,
}

impl BridgeState {
    pub fn new(levels: LevelStore) -> Self {
        Self {
            levels,
            thanked: HashSet::new(),
            announced: HashSet::new(),
            checked_today: HashSet::new(),
            pending: HashMap::new(),
            remembered: HashMap::new(),
            quest_healthy: false,
            last_reset: None,
        }
    }

    /// Register a player for vote polling; remembered across disconnects
    /// so a returning player is re-armed on spawn.
    pub fn add_pending(&mut self, platform_id: u64, name: &str, now: DateTime<Utc>) {
        self.pending.insert(
            platform_id,
            PendingEntry {
                name: name.to_string(),
                created: now,
            },
        );
        if self.remembered.len() >= REMEMBERED_MAX {
            // Safety cap against unbounded growth; losing re-arm hints is fine.
            self.remembered.clear();
        }
        self.remembered.insert(platform_id, name.to_string());
    }

    pub fn remove_pending(&mut self, platform_id: u64) {
        self.pending.remove(&platform_id);
    }

    /// Drop entries older than `ttl`, returning what was evicted.
    pub fn evict_stale_pending(
        &mut self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Vec<(u64, String)> {
        let stale: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, e)| now.signed_duration_since(e.created) > ttl)
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .map(|id| {
                let e = self.pending.remove(&id).expect("id came from the map");
                (id, e.name)
            })
            .collect()
    }

    pub fn pending_entries(&self) -> Vec<(u64, String)> {
        self.pending
            .iter()
            .map(|(id, e)| (*id, e.name.clone()))
            .collect()
    }

    /// Re-arm the pending check for a returning player who had asked to
    /// vote before disconnecting. Returns the remembered name if armed.
    pub fn rearm_remembered(&mut self, platform_id: u64, now: DateTime<Utc>) -> Option<String> {
        if self.pending.contains_key(&platform_id) || self.checked_today.contains(&platform_id) {
            return None;
        }
        let name = self.remembered.get(&platform_id)?.clone();
        self.pending.insert(
            platform_id,
            PendingEntry {
                name: name.clone(),
                created: now,
            },
        );
        Some(name)
    }

    /// First call for a player in this reset period returns true;
    /// repeats return false. Makes the thank-you PM one-shot.
    pub fn mark_thanked(&mut self, platform_id: u64) -> bool {
        self.thanked.insert(platform_id)
    }

    /// Same, for the global reward announcement.
    pub fn mark_announced(&mut self, platform_id: u64) -> bool {
        self.announced.insert(platform_id)
    }

    pub fn mark_checked(&mut self, platform_id: u64) {
        self.checked_today.insert(platform_id);
    }

    pub fn is_checked(&self, platform_id: u64) -> bool {
        self.checked_today.contains(&platform_id)
    }

    /// Clear every dedup set, in full, once per local day. Returns false
    /// when today's reset already ran, so a timer firing twice inside the
    /// boundary minute is harmless.
    pub fn daily_reset(&mut self, today: NaiveDate) -> bool {
        if self.last_reset == Some(today) {
            return false;
        }
        self.thanked.clear();
        self.announced.clear();
        self.checked_today.clear();
        self.last_reset = Some(today);
        true
    }
}

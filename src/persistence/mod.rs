//! JSON persistence for bot state that must survive between cycles.
//!
//! One document holds three sections keyed by symbol:
//! - `positions`: trailing-stop metadata of open positions
//! - `cool_down`: unix timestamp of the last closure
//! - `ai_memory`: cached news verdicts
//!
//! The document is read fully and rewritten fully (temp file + rename).
//! A lock file next to it keeps two cycles from interleaving.

mod trade_history;

pub use trade_history::{TradeHistory, TradeRecord, TradeSummary};

use crate::strategy::MarketRegime;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Locks older than this are assumed to belong to a crashed run.
const STALE_LOCK_HOURS: i64 = 2;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("another cycle holds the lock {0}")]
    Locked(PathBuf),
}

impl StateError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Trailing-stop metadata of one open position.
///
/// `highest_price` only moves up and `is_risk_free` only flips to true;
/// both are changed exclusively through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMeta {
    highest_price: Decimal,
    atr_at_entry: Decimal,
    #[serde(default)]
    is_risk_free: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry_regime: Option<MarketRegime>,
}

impl PositionMeta {
    /// Metadata for a new position. `initial_high` may be zero as a placeholder.
    pub fn new(atr_at_entry: Decimal, initial_high: Decimal, entry_regime: Option<MarketRegime>) -> Self {
        Self {
            highest_price: initial_high.max(Decimal::ZERO),
            atr_at_entry,
            is_risk_free: false,
            entry_regime,
        }
    }

    pub fn highest_price(&self) -> Decimal {
        self.highest_price
    }

    pub fn atr_at_entry(&self) -> Decimal {
        self.atr_at_entry
    }

    pub fn is_risk_free(&self) -> bool {
        self.is_risk_free
    }

    pub fn entry_regime(&self) -> Option<MarketRegime> {
        self.entry_regime
    }

    /// Raise the high watermark. Returns true when it moved.
    pub fn observe_price(&mut self, price: Decimal) -> bool {
        if price > self.highest_price {
            self.highest_price = price;
            true
        } else {
            false
        }
    }

    /// One-way transition into profit lock. Returns true on the transition itself.
    pub fn mark_risk_free(&mut self) -> bool {
        let changed = !self.is_risk_free;
        self.is_risk_free = true;
        changed
    }
}

/// Cached LLM verdict for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMemory {
    /// Unix seconds of the evaluation
    pub timestamp: i64,
    pub fingerprint: String,
    pub score: u8,
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    #[serde(default)]
    pub positions: BTreeMap<String, PositionMeta>,
    #[serde(default)]
    pub cool_down: BTreeMap<String, i64>,
    #[serde(default)]
    pub ai_memory: BTreeMap<String, AiMemory>,
}

impl BotState {
    /// Whether `symbol` was closed less than `window` ago.
    pub fn is_cooling_down(&self, symbol: &str, now: DateTime<Utc>, window: Duration) -> bool {
        match self.cool_down.get(symbol) {
            Some(&closed_at) => now.timestamp() - closed_at < window.num_seconds(),
            None => false,
        }
    }

    /// Record a closure; a newer closure overwrites an older one.
    pub fn start_cooldown(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.cool_down.insert(symbol.to_string(), now.timestamp());
    }

    /// A cached score whose fingerprint matches and that is younger than `memory`.
    pub fn cached_score(
        &self,
        symbol: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        memory: Duration,
    ) -> Option<u8> {
        let entry = self.ai_memory.get(symbol)?;
        let age = now.timestamp() - entry.timestamp;
        (entry.fingerprint == fingerprint && age < memory.num_seconds()).then_some(entry.score)
    }

    pub fn remember_score(&mut self, symbol: &str, fingerprint: &str, score: u8, now: DateTime<Utc>) {
        self.ai_memory.insert(
            symbol.to_string(),
            AiMemory {
                timestamp: now.timestamp(),
                fingerprint: fingerprint.to_string(),
                score,
            },
        );
    }
}

/// File-backed repository for [`BotState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. A missing file is an empty state.
    pub fn load(&self) -> Result<BotState, StateError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet");
                return Ok(BotState::default());
            }
            Err(e) => return Err(StateError::io(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(BotState::default());
        }
        serde_json::from_str(&text).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Load, or start fresh when the file cannot be used.
    ///
    /// A corrupt file is moved aside to `<file>.corrupt-<unix_ts>` so the next
    /// save does not destroy it.
    pub fn load_or_recover(&self, now: DateTime<Utc>) -> BotState {
        match self.load() {
            Ok(state) => state,
            Err(StateError::Corrupt { path, source }) => {
                let aside = PathBuf::from(format!("{}.corrupt-{}", path.display(), now.timestamp()));
                match fs::rename(&path, &aside) {
                    Ok(()) => error!(
                        error = %source,
                        moved_to = %aside.display(),
                        "State file corrupt, starting from empty state"
                    ),
                    Err(e) => error!(
                        error = %source,
                        rename_error = %e,
                        "State file corrupt and could not be moved aside"
                    ),
                }
                BotState::default()
            }
            Err(e) => {
                error!(error = %e, "State file unreadable, starting from empty state");
                BotState::default()
            }
        }
    }

    /// Rewrite the whole document atomically.
    pub fn save(&self, state: &BotState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let tmp = self.sibling("tmp");
        let json = serde_json::to_string_pretty(state).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut file = fs::File::create(&tmp).map_err(|e| StateError::io(&tmp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StateError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StateError::io(&self.path, e))?;

        debug!(
            positions = state.positions.len(),
            cool_down = state.cool_down.len(),
            ai_memory = state.ai_memory.len(),
            "State saved"
        );
        Ok(())
    }

    /// Take the advisory cycle lock.
    pub fn lock(&self, now: DateTime<Utc>) -> Result<CycleLock, StateError> {
        let path = self.sibling("lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }

        match CycleLock::create(&path, now) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let stale = lock_held_since(&path)
                    .map(|since| now - since > Duration::hours(STALE_LOCK_HOURS))
                    .unwrap_or(false);
                if !stale {
                    return Err(StateError::Locked(path));
                }
                warn!(lock = %path.display(), "Removing stale cycle lock");
                fs::remove_file(&path).map_err(|e| StateError::io(&path, e))?;
                CycleLock::create(&path, now).map_err(|e| StateError::io(&path, e))
            }
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    fn sibling(&self, ext: &str) -> PathBuf {
        PathBuf::from(format!("{}.{}", self.path.display(), ext))
    }
}

/// When the lock was taken: the timestamp written into the file, or the
/// file's modification time when a crashed run left it empty or truncated.
fn lock_held_since(path: &Path) -> Option<DateTime<Utc>> {
    let written = fs::read_to_string(path).ok().and_then(|s| {
        s.split_whitespace()
            .nth(1)
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    });
    written.or_else(|| {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        warn!(lock = %path.display(), "Cycle lock has no timestamp, using file age");
        Some(DateTime::<Utc>::from(modified))
    })
}

/// Held for the duration of one cycle; removes the lock file on drop.
#[derive(Debug)]
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    fn create(path: &Path, now: DateTime<Utc>) -> std::io::Result<Self> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{} {}", std::process::id(), now.timestamp())?;
        info!(lock = %path.display(), "Cycle lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release cycle lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_save_and_load_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("data/state.json"));

        let mut state = BotState::default();
        state.positions.insert(
            "SOL/USD".to_string(),
            PositionMeta::new(dec!(2.5), dec!(150), Some(MarketRegime::Bull)),
        );
        state.start_cooldown("ETH/USD", t0());
        state.remember_score("BTC/USD", "abc", 72, t0());

        store.save(&state).unwrap();
        assert!(!dir.path().join("data/state.json.tmp").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), BotState::default());
    }

    #[test]
    fn test_reads_plain_number_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"positions": {"SOL/USD": {"highest_price": 110.5, "atr_at_entry": 5, "is_risk_free": true}},
                "cool_down": {"ETH/USD": 1714564800}}"#,
        )
        .unwrap();

        let state = StateStore::new(&path).load().unwrap();
        let meta = &state.positions["SOL/USD"];
        assert_eq!(meta.highest_price(), dec!(110.5));
        assert!(meta.is_risk_free());
        assert!(state.ai_memory.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::new(&path);

        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
        let state = store.load_or_recover(t0());

        assert_eq!(state, BotState::default());
        assert!(!path.exists());
        let aside = dir.path().join(format!("state.json.corrupt-{}", t0().timestamp()));
        assert!(aside.exists());
    }

    #[test]
    fn test_high_watermark_never_decreases() {
        let mut meta = PositionMeta::new(dec!(5), Decimal::ZERO, None);
        assert!(meta.observe_price(dec!(100)));
        assert!(meta.observe_price(dec!(110)));
        assert!(!meta.observe_price(dec!(105)));
        assert_eq!(meta.highest_price(), dec!(110));
    }

    #[test]
    fn test_risk_free_is_one_way() {
        let mut meta = PositionMeta::new(dec!(5), dec!(100), None);
        assert!(meta.mark_risk_free());
        assert!(!meta.mark_risk_free());
        assert!(meta.is_risk_free());
    }

    #[test]
    fn test_cooldown_boundary() {
        let mut state = BotState::default();
        let window = Duration::hours(12);
        state.start_cooldown("SOL/USD", t0());

        assert!(state.is_cooling_down("SOL/USD", t0(), window));
        assert!(state.is_cooling_down("SOL/USD", t0() + window - Duration::seconds(1), window));
        assert!(!state.is_cooling_down("SOL/USD", t0() + window, window));
        assert!(!state.is_cooling_down("ETH/USD", t0(), window));
    }

    #[test]
    fn test_cached_score_requires_fingerprint_and_age() {
        let mut state = BotState::default();
        let memory = Duration::hours(4);
        state.remember_score("SOL/USD", "fp1", 81, t0());

        assert_eq!(state.cached_score("SOL/USD", "fp1", t0() + Duration::hours(1), memory), Some(81));
        assert_eq!(state.cached_score("SOL/USD", "fp2", t0() + Duration::hours(1), memory), None);
        assert_eq!(state.cached_score("SOL/USD", "fp1", t0() + Duration::hours(4), memory), None);
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let lock = store.lock(t0()).unwrap();
        assert!(matches!(store.lock(t0()), Err(StateError::Locked(_))));
        drop(lock);
        assert!(store.lock(t0()).is_ok());
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let lock = store.lock(t0()).unwrap();
        std::mem::forget(lock);
        let later = t0() + Duration::hours(STALE_LOCK_HOURS + 1);
        assert!(store.lock(later).is_ok());
    }

    #[test]
    fn test_empty_lock_file_ages_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let lock_path = dir.path().join("state.json.lock");
        fs::write(&lock_path, "").unwrap();

        let now = Utc::now();
        assert!(matches!(store.lock(now), Err(StateError::Locked(_))));

        let lock = store.lock(now + Duration::days(30)).unwrap();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_garbled_lock_file_is_taken_over_once_old() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        fs::write(dir.path().join("state.json.lock"), "12345 not-a-time\n").unwrap();

        let later = Utc::now() + Duration::hours(STALE_LOCK_HOURS + 1);
        assert!(store.lock(later).is_ok());
    }
}

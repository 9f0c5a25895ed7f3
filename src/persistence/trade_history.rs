//! Append-only trade history (JSON Lines), one record per closed position.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Realized outcome of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub qty: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    /// Close reason tag, e.g. "trailing stop"
    pub reason: String,
}

impl TradeRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: &str,
        entry_price: Decimal,
        exit_price: Decimal,
        qty: Decimal,
        reason: &str,
    ) -> Self {
        let pnl = (exit_price - entry_price) * qty;
        let pnl_pct = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            ((exit_price - entry_price) / entry_price * Decimal::ONE_HUNDRED).round_dp(4)
        };
        Self {
            timestamp,
            symbol: symbol.to_string(),
            entry_price,
            exit_price,
            qty,
            pnl: pnl.round_dp(8),
            pnl_pct,
            reason: reason.to_string(),
        }
    }
}

/// Aggregate figures for the status command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeSummary {
    pub trades: usize,
    pub wins: usize,
    pub total_pnl: Decimal,
}

impl TradeSummary {
    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(self.trades) * Decimal::ONE_HUNDRED
        }
    }
}

/// JSON Lines trade log.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    path: PathBuf,
}

impl TradeHistory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one record.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade history {}", self.path.display()))?;
        let line = serde_json::to_string(record).context("Failed to encode trade record")?;
        writeln!(file, "{}", line).context("Failed to append trade record")?;

        debug!(symbol = %record.symbol, pnl = %record.pnl, "Trade recorded");
        Ok(())
    }

    /// Read all records; unparseable lines are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open trade history {}", self.path.display()))
            }
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("Failed to read trade history")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping malformed trade record"),
            }
        }
        Ok(records)
    }

    pub fn summary(&self) -> Result<TradeSummary> {
        let records = self.read_all()?;
        Ok(TradeSummary {
            trades: records.len(),
            wins: records.iter().filter(|r| r.pnl > Decimal::ZERO).count(),
            total_pnl: records.iter().map(|r| r.pnl).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_pnl() {
        let rec = TradeRecord::new(Utc::now(), "SOL/USD", dec!(100), dec!(102), dec!(3), "trailing stop");
        assert_eq!(rec.pnl, dec!(6));
        assert_eq!(rec.pnl_pct, dec!(2));
    }

    #[test]
    fn test_append_and_summarize() {
        let dir = tempfile::tempdir().unwrap();
        let history = TradeHistory::new(dir.path().join("trades.jsonl"));
        assert_eq!(history.summary().unwrap(), TradeSummary::default());

        history
            .append(&TradeRecord::new(Utc::now(), "SOL/USD", dec!(100), dec!(110), dec!(1), "trailing stop"))
            .unwrap();
        history
            .append(&TradeRecord::new(Utc::now(), "ETH/USD", dec!(100), dec!(97), dec!(2), "hard stop"))
            .unwrap();

        let summary = history.summary().unwrap();
        assert_eq!(summary.trades, 2);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.total_pnl, dec!(4));
        assert_eq!(summary.win_rate(), dec!(50));
    }
}

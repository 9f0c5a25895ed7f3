//! Candidate scanner: tradable universe and session movers.

use crate::config::MarketConfig;
use crate::exchange::{Asset, Brokerage, MarketData, Snapshot, SymbolMap};
use crate::utils::pct_change;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// A symbol that moved during the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    /// Session change in percent
    pub change_pct: Decimal,
    /// Session volume in quote currency
    pub volume_usd: Decimal,
}

impl Candidate {
    /// Ranking key.
    pub fn abs_change(&self) -> Decimal {
        self.change_pct.abs()
    }
}

/// Reasons for excluding an asset from the universe.
#[derive(Debug, Clone, Copy)]
enum RejectReason {
    Inactive,
    WrongQuote,
    Denylisted,
}

/// Builds the ranked candidate list for one cycle.
pub struct CandidateScanner {
    quote_currency: String,
    denylist: HashSet<String>,
    batch_size: usize,
}

impl CandidateScanner {
    pub fn new(config: &MarketConfig) -> Self {
        Self {
            quote_currency: config.quote_currency.to_uppercase(),
            denylist: config.denylist.iter().map(|s| s.to_uppercase()).collect(),
            batch_size: config.snapshot_batch_size.max(1),
        }
    }

    /// Filter assets down to tradable symbols quoted in the configured currency.
    pub fn universe(&self, assets: &[Asset]) -> Vec<String> {
        let mut rejected_inactive = 0usize;
        let mut rejected_quote = 0usize;
        let mut rejected_denylist = 0usize;

        let symbols: Vec<String> = assets
            .iter()
            .filter_map(|asset| match self.qualify(asset) {
                Ok(symbol) => Some(symbol),
                Err(reason) => {
                    match reason {
                        RejectReason::Inactive => rejected_inactive += 1,
                        RejectReason::WrongQuote => rejected_quote += 1,
                        RejectReason::Denylisted => rejected_denylist += 1,
                    }
                    None
                }
            })
            .collect();

        debug!(
            universe = symbols.len(),
            rejected_inactive,
            rejected_quote,
            rejected_denylist,
            "Universe filtered"
        );
        symbols
    }

    fn qualify(&self, asset: &Asset) -> Result<String, RejectReason> {
        if !asset.tradable || !asset.status.eq_ignore_ascii_case("active") {
            return Err(RejectReason::Inactive);
        }
        let symbol = SymbolMap::to_pair(&asset.symbol);
        match SymbolMap::quote_asset(&symbol) {
            Some(quote) if quote.eq_ignore_ascii_case(&self.quote_currency) => {}
            _ => return Err(RejectReason::WrongQuote),
        }
        if self.denylist.contains(&SymbolMap::base_asset(&symbol).to_uppercase()) {
            return Err(RejectReason::Denylisted);
        }
        Ok(symbol)
    }

    /// Fetch the universe and snapshots, returning candidates ranked by absolute move.
    ///
    /// A failed snapshot batch is logged and skipped; the other batches still count.
    #[instrument(skip_all)]
    pub async fn scan(
        &self,
        broker: &dyn Brokerage,
        market: &dyn MarketData,
    ) -> Result<Vec<Candidate>> {
        let assets = broker
            .list_tradable_assets()
            .await
            .context("Failed to fetch tradable assets")?;
        let symbols = self.universe(&assets);

        let mut snapshots = HashMap::new();
        let mut failed_batches = 0usize;
        for batch in symbols.chunks(self.batch_size) {
            match market.latest_snapshots(batch).await {
                Ok(found) => snapshots.extend(found),
                Err(e) => {
                    failed_batches += 1;
                    warn!(batch = batch.len(), error = %e, "Snapshot batch failed");
                }
            }
        }

        let candidates = rank(&symbols, &snapshots);
        info!(
            universe = symbols.len(),
            snapshots = snapshots.len(),
            failed_batches,
            candidates = candidates.len(),
            "Scanned market"
        );
        Ok(candidates)
    }
}

/// Rank symbols with a snapshot by absolute session change, largest first.
///
/// The sort is stable, so equal moves keep universe order.
pub fn rank(symbols: &[String], snapshots: &HashMap<String, Snapshot>) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = symbols
        .iter()
        .filter_map(|symbol| {
            let snap = snapshots.get(symbol)?;
            if snap.open <= Decimal::ZERO {
                return None;
            }
            Some(Candidate {
                symbol: symbol.clone(),
                change_pct: pct_change(snap.open, snap.price),
                volume_usd: snap.quote_volume(),
            })
        })
        .collect();
    candidates.sort_by(|a, b| b.abs_change().cmp(&a.abs_change()));
    candidates
}

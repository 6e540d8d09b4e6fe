use crate::error::FeedError;
use crate::session::InboundMessage;
use chrono::{DateTime, TimeZone};
use chrono_tz::Asia::Shanghai;
use chrono_tz::Tz;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use tracing::warn;

/// The fixed instrument set tracked by a run. Column order everywhere
/// downstream follows `Asset::ALL`, never arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Asset {
    Btc,
    Eth,
    Ltc,
}

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Btc, Asset::Eth, Asset::Ltc];

    pub fn symbol(self) -> &'static str {
        match self {
            Asset::Btc => "btcusdt",
            Asset::Eth => "ethusdt",
            Asset::Ltc => "ltcusdt",
        }
    }

    pub fn channel(self) -> String {
        format!("market.{}.kline.60min", self.symbol())
    }

    /// Recovers the owning asset from a reply-subject string by intersecting
    /// its dot-delimited tokens with the known symbol set. Exactly one match
    /// is required.
    pub fn from_channel(channel: &str) -> Result<Asset, FeedError> {
        let tokens: Vec<&str> = channel.split('.').collect();
        let matches: Vec<Asset> = Asset::ALL
            .into_iter()
            .filter(|a| tokens.contains(&a.symbol()))
            .collect();
        match matches.as_slice() {
            [one] => Ok(*one),
            _ => Err(FeedError::AmbiguousAsset {
                channel: channel.to_string(),
                matches: matches.len(),
            }),
        }
    }

    fn index(self) -> usize {
        Asset::ALL.iter().position(|a| *a == self).unwrap()
    }
}

/// Wide-format close prices: one row per timestamp, one column per asset in
/// `Asset::ALL` order. Only timestamps every asset reported survive.
#[derive(Clone, Debug)]
pub struct PriceTable {
    pub timestamps: Vec<DateTime<Tz>>,
    pub rows: Vec<Vec<f64>>,
}

/// Period-over-period fractional changes derived from a `PriceTable`.
/// Always one row shorter than its source (first change is undefined).
#[derive(Clone, Debug)]
pub struct ReturnTable {
    pub timestamps: Vec<DateTime<Tz>>,
    pub rows: Vec<Vec<f64>>,
}

impl ReturnTable {
    pub fn num_assets(&self) -> usize {
        Asset::ALL.len()
    }

    /// Mean periodic return per asset.
    pub fn mean_returns(&self) -> DVector<f64> {
        let n = self.rows.len().max(1) as f64;
        DVector::from_iterator(
            self.num_assets(),
            (0..self.num_assets())
                .map(|j| self.rows.iter().map(|r| r[j]).sum::<f64>() / n),
        )
    }

    /// Cumulative return per asset over the whole window: prod(1 + r) - 1.
    pub fn cumulative_returns(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_assets(),
            (0..self.num_assets())
                .map(|j| self.rows.iter().map(|r| 1.0 + r[j]).product::<f64>() - 1.0),
        )
    }

    /// Sample covariance matrix of the per-period returns (symmetric PSD).
    pub fn covariance(&self) -> DMatrix<f64> {
        let k = self.num_assets();
        let n = self.rows.len();
        let means = self.mean_returns();
        let mut cov = DMatrix::zeros(k, k);
        if n < 2 {
            return cov;
        }
        for i in 0..k {
            for j in i..k {
                let sum: f64 = self
                    .rows
                    .iter()
                    .map(|r| (r[i] - means[i]) * (r[j] - means[j]))
                    .sum();
                let c = sum / (n as f64 - 1.0);
                cov[(i, j)] = c;
                cov[(j, i)] = c;
            }
        }
        cov
    }
}

/// Consolidates the buffered session output into the aligned price and
/// return tables.
///
/// Data messages whose reply subject does not resolve to exactly one known
/// asset are dropped (and logged with the raw channel id); all other buffer
/// entries are ignored here.
pub fn build(buffer: &[InboundMessage]) -> Result<(PriceTable, ReturnTable), FeedError> {
    let mut per_asset: Vec<BTreeMap<i64, f64>> =
        Asset::ALL.iter().map(|_| BTreeMap::new()).collect();

    for msg in buffer {
        let InboundMessage::Data { rep, data } = msg else {
            continue;
        };
        let asset = match Asset::from_channel(rep) {
            Ok(a) => a,
            Err(e) => {
                warn!("dropping candle batch: {}", e);
                continue;
            }
        };
        let column = &mut per_asset[asset.index()];
        for candle in data {
            column.insert(candle.id, candle.close);
        }
    }

    // Keep only timestamps every asset reported; a return across a gap in
    // any one column is meaningless.
    let mut aligned: Vec<i64> = per_asset[0].keys().copied().collect();
    for column in &per_asset[1..] {
        aligned.retain(|ts| column.contains_key(ts));
    }
    if aligned.is_empty() {
        return Err(FeedError::EmptySeries);
    }

    let timestamps: Vec<DateTime<Tz>> = aligned
        .iter()
        .filter_map(|&ts| Shanghai.timestamp_opt(ts, 0).single())
        .collect();
    let rows: Vec<Vec<f64>> = aligned
        .iter()
        .map(|ts| per_asset.iter().map(|col| col[ts]).collect())
        .collect();

    let return_rows: Vec<Vec<f64>> = rows
        .windows(2)
        .map(|w| {
            w[0].iter()
                .zip(w[1].iter())
                .map(|(prev, next)| next / prev - 1.0)
                .collect()
        })
        .collect();
    let return_timestamps = timestamps[1..].to_vec();

    Ok((
        PriceTable { timestamps, rows },
        ReturnTable {
            timestamps: return_timestamps,
            rows: return_rows,
        },
    ))
}

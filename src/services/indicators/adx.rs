//! Average Directional Index (ADX) indicator.

use crate::types::Candle;
use serde::Serialize;

/// Value reported when there is not enough data. Read as "strong trend".
pub const STRONG_TREND_SENTINEL: f64 = 100.0;

/// ADX (Average Directional Index) indicator.
///
/// Measures trend strength (not direction):
/// - Below 20: Weak trend / ranging market
/// - 20-40: Trending
/// - Above 40: Strong trend
///
/// When there are fewer than `2 * period` DX values the latest
/// (instantaneous) DX is reported instead of the smoothed average.
#[derive(Debug, Clone, Copy)]
pub struct Adx {
    period: usize,
}

/// One ADX evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdxReading {
    /// Always within [0, 100].
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    /// False when the sentinel was returned.
    pub sufficient_data: bool,
}

impl AdxReading {
    fn strong_trend() -> Self {
        Self {
            adx: STRONG_TREND_SENTINEL,
            plus_di: 0.0,
            minus_di: 0.0,
            sufficient_data: false,
        }
    }
}

impl Default for Adx {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Minimum candles for a real reading.
    pub fn min_periods(&self) -> usize {
        self.period + 1
    }

    /// Calculate True Range.
    fn true_range(current: &Candle, previous: &Candle) -> f64 {
        let hl = current.high - current.low;
        let hc = (current.high - previous.close).abs();
        let lc = (current.low - previous.close).abs();
        hl.max(hc).max(lc)
    }

    /// Wilder's smoothing: seed with the simple mean, then (prev * (n-1) + x) / n.
    fn wilders_smooth(values: &[f64], period: usize) -> Vec<f64> {
        if values.len() < period {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(values.len() - period + 1);
        let mut smoothed: f64 = values.iter().take(period).sum::<f64>() / period as f64;
        result.push(smoothed);

        for value in values.iter().skip(period) {
            smoothed = (smoothed * (period - 1) as f64 + value) / period as f64;
            result.push(smoothed);
        }

        result
    }

    pub fn calculate(&self, candles: &[Candle]) -> AdxReading {
        if candles.len() < self.min_periods() {
            return AdxReading::strong_trend();
        }

        let mut plus_dm = Vec::with_capacity(candles.len() - 1);
        let mut minus_dm = Vec::with_capacity(candles.len() - 1);
        let mut tr = Vec::with_capacity(candles.len() - 1);

        for pair in candles.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);

            let up_move = current.high - previous.high;
            let down_move = previous.low - current.low;

            plus_dm.push(if up_move > down_move && up_move > 0.0 {
                up_move
            } else {
                0.0
            });
            minus_dm.push(if down_move > up_move && down_move > 0.0 {
                down_move
            } else {
                0.0
            });
            tr.push(Self::true_range(current, previous));
        }

        let smoothed_plus_dm = Self::wilders_smooth(&plus_dm, self.period);
        let smoothed_minus_dm = Self::wilders_smooth(&minus_dm, self.period);
        let smoothed_tr = Self::wilders_smooth(&tr, self.period);

        if smoothed_tr.is_empty() {
            return AdxReading::strong_trend();
        }

        let di = |dm: f64, atr: f64| if atr > 0.0 { dm / atr * 100.0 } else { 0.0 };

        let dx_values: Vec<f64> = smoothed_tr
            .iter()
            .zip(smoothed_plus_dm.iter().zip(&smoothed_minus_dm))
            .map(|(&atr, (&pdm, &mdm))| {
                let plus_di = di(pdm, atr);
                let minus_di = di(mdm, atr);
                let di_sum = plus_di + minus_di;
                if di_sum > 0.0 {
                    (plus_di - minus_di).abs() / di_sum * 100.0
                } else {
                    0.0
                }
            })
            .collect();

        let adx = match Self::wilders_smooth(&dx_values, self.period).last() {
            Some(&smoothed) => smoothed,
            None => dx_values.last().copied().unwrap_or(0.0),
        };

        let last_atr = smoothed_tr.last().copied().unwrap_or(0.0);
        let plus_di = di(smoothed_plus_dm.last().copied().unwrap_or(0.0), last_atr);
        let minus_di = di(smoothed_minus_dm.last().copied().unwrap_or(0.0), last_atr);

        AdxReading {
            adx: if adx.is_finite() { adx.clamp(0.0, 100.0) } else { 0.0 },
            plus_di,
            minus_di,
            sufficient_data: true,
        }
    }
}

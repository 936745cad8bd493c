//! Volume Weighted Average Price (VWAP) indicator.

use crate::types::Candle;

/// VWAP (Volume Weighted Average Price) over a rolling lookback.
///
/// VWAP = Σ(TP * Volume) / Σ(Volume), TP = (high + low + close) / 3
///
/// Falls back to the latest close when the window carries no volume.
#[derive(Debug, Clone, Copy)]
pub struct Vwap {
    period: usize,
}

impl Default for Vwap {
    fn default() -> Self {
        Self { period: 50 }
    }
}

impl Vwap {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    /// VWAP over the most recent `period` candles (or all, if fewer).
    pub fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        let last = candles.last()?;
        let start = candles.len().saturating_sub(self.period);

        let (cum_tp_vol, cum_vol) = candles[start..]
            .iter()
            .filter(|c| c.volume.is_finite() && c.volume > 0.0)
            .fold((0.0, 0.0), |(tp_vol, vol), c| {
                (tp_vol + c.typical_price() * c.volume, vol + c.volume)
            });

        if cum_vol > 0.0 {
            Some(cum_tp_vol / cum_vol)
        } else {
            Some(last.close)
        }
    }
}

/// Technical indicators for the on-demand `coin_detail` operation.

/// One OHLCV candle from the market provider's candle series.
#[derive(Debug, Clone)]
pub struct Candle {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[allow(dead_code)]
    pub volume: f64,
}

/// RSI(14) using Wilder's simple-average formulation over the trailing
/// `period + 1` closes (grounded the same way a streaming RSI service in the
/// retrieval pack computes it over a rolling price window).
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let start = closes.len() - (period + 1);
    let window = &closes[start..];

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Nearest support/resistance estimated from the high/low extrema of the
/// last `lookback` candles.
pub fn support_resistance(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if candles.is_empty() {
        return None;
    }
    let window = &candles[candles.len().saturating_sub(lookback)..];
    let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    Some((support, resistance))
}

pub fn simple_moving_average(closes: &[f64]) -> Option<f64> {
    if closes.is_empty() {
        return None;
    }
    Some(closes.iter().sum::<f64>() / closes.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Hold,
    Watch,
    Sell,
}

impl Signal {
    pub fn label(self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Watch => "WATCH",
            Signal::Sell => "SELL",
        }
    }
}

/// Weighted sum of 24h momentum sign, RSI zone, price-vs-SMA30, and volume
/// level. Each factor contributes a signed score in `[-1, 1]`;
/// the sum is thresholded into one of the four signals.
pub fn compute_signal(
    pct_change_24h: f64,
    rsi_14: Option<f64>,
    price: f64,
    sma_30: Option<f64>,
    volume_level: VolumeLevel,
) -> Signal {
    let momentum = if pct_change_24h > 0.0 {
        1.0
    } else if pct_change_24h < 0.0 {
        -1.0
    } else {
        0.0
    };

    let rsi_score = match rsi_14 {
        Some(r) if r > 70.0 => -1.0, // overbought
        Some(r) if r < 30.0 => 1.0,  // oversold
        Some(_) => 0.0,
        None => 0.0,
    };

    let trend_score = match sma_30 {
        Some(sma) if price > sma => 0.5,
        Some(sma) if price < sma => -0.5,
        _ => 0.0,
    };

    let volume_score = match volume_level {
        VolumeLevel::High => 0.3,
        VolumeLevel::Normal => 0.0,
        VolumeLevel::Low => -0.3,
    };

    let total = momentum * 0.4 + rsi_score * 0.3 + trend_score * 0.2 + volume_score * 0.1;

    if total >= 0.5 {
        Signal::Buy
    } else if total <= -0.5 {
        Signal::Sell
    } else if total > 0.0 {
        Signal::Hold
    } else {
        Signal::Watch
    }
}

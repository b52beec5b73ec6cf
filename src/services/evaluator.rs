//! Condition evaluation: `(alert type, conditions, quote) -> (triggered, reason)`.
//!
//! Stored conditions are a loose JSON bag; [`Condition::parse`] turns them
//! into a typed variant once, and everything after that is an exhaustive
//! match. Comparisons are plain `f64`, no rounding.

use serde::Deserialize;
use serde_json::Value;

use crate::{error::EvalError, models::Quote};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    PriceAbove(f64),
    PriceBelow(f64),
    VolumeAbove(i64),
    VolumeBelow(i64),
    /// Percent move against the reference price. `percent` is positive;
    /// the direction says which way counts.
    PriceChangePct {
        percent: f64,
        direction: ChangeDirection,
    },
    /// Multiple of the reference volume.
    VolumeSpike(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDirection {
    Up,
    Down,
    Either,
}

impl ChangeDirection {
    fn parse(kind: &str, raw: &str) -> Result<Self, EvalError> {
        match raw.trim().to_lowercase().as_str() {
            "up" => Ok(ChangeDirection::Up),
            "down" => Ok(ChangeDirection::Down),
            "either" => Ok(ChangeDirection::Either),
            other => Err(malformed(
                kind,
                format!("invalid direction `{other}`: must be 'up', 'down', or 'either'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub triggered: bool,
    pub reason: String,
}

#[derive(Deserialize)]
struct ThresholdParams {
    threshold: f64,
}

#[derive(Deserialize)]
struct PriceChangeParams {
    percent_change: f64,
    #[serde(default)]
    direction: Option<String>,
}

#[derive(Deserialize)]
struct VolumeSpikeParams {
    volume_multiplier: f64,
}

fn params<T: for<'de> Deserialize<'de>>(kind: &str, raw: &Value) -> Result<T, EvalError> {
    serde_json::from_value(raw.clone()).map_err(|e| EvalError::MalformedConditions {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

fn malformed(kind: &str, reason: impl Into<String>) -> EvalError {
    EvalError::MalformedConditions {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

fn price_threshold(kind: &str, raw: &Value) -> Result<f64, EvalError> {
    let p: ThresholdParams = params(kind, raw)?;
    if !p.threshold.is_finite() || p.threshold <= 0.0 {
        return Err(malformed(kind, "threshold must be a positive number"));
    }
    Ok(p.threshold)
}

fn volume_threshold(kind: &str, raw: &Value) -> Result<i64, EvalError> {
    let p: ThresholdParams = params(kind, raw)?;
    let t = p.threshold;
    if !t.is_finite() || t < 0.0 || t.fract() != 0.0 || t > i64::MAX as f64 {
        return Err(malformed(kind, "threshold must be a non-negative whole number"));
    }
    Ok(t as i64)
}

impl Condition {
    pub fn parse(kind: &str, raw: &Value) -> Result<Self, EvalError> {
        match kind {
            "price_above" => Ok(Condition::PriceAbove(price_threshold(kind, raw)?)),
            "price_below" => Ok(Condition::PriceBelow(price_threshold(kind, raw)?)),
            "volume_above" => Ok(Condition::VolumeAbove(volume_threshold(kind, raw)?)),
            "volume_below" => Ok(Condition::VolumeBelow(volume_threshold(kind, raw)?)),
            "price_change_pct" => {
                let p: PriceChangeParams = params(kind, raw)?;
                let pc = p.percent_change;
                if !pc.is_finite() || pc == 0.0 {
                    return Err(malformed(kind, "percent_change must be a non-zero number"));
                }
                // Without a direction the sign of percent_change decides.
                let direction = match p.direction.as_deref() {
                    Some(d) => {
                        if pc < 0.0 {
                            return Err(malformed(
                                kind,
                                "percent_change must be positive when a direction is given",
                            ));
                        }
                        ChangeDirection::parse(kind, d)?
                    }
                    None if pc > 0.0 => ChangeDirection::Up,
                    None => ChangeDirection::Down,
                };
                Ok(Condition::PriceChangePct {
                    percent: pc.abs(),
                    direction,
                })
            }
            "volume_spike" => {
                let p: VolumeSpikeParams = params(kind, raw)?;
                if !p.volume_multiplier.is_finite() || p.volume_multiplier <= 1.0 {
                    return Err(malformed(kind, "volume_multiplier must be greater than 1"));
                }
                Ok(Condition::VolumeSpike(p.volume_multiplier))
            }
            other => Err(EvalError::UnknownKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Condition::PriceAbove(_) => "price_above",
            Condition::PriceBelow(_) => "price_below",
            Condition::VolumeAbove(_) => "volume_above",
            Condition::VolumeBelow(_) => "volume_below",
            Condition::PriceChangePct { .. } => "price_change_pct",
            Condition::VolumeSpike(_) => "volume_spike",
        }
    }

    pub fn evaluate(&self, quote: &Quote) -> Result<Evaluation, EvalError> {
        let sym = &quote.symbol;

        let (triggered, reason) = match *self {
            Condition::PriceAbove(t) => (
                quote.price > t,
                format!("{sym} crossed above ${t:.2} (current: ${:.2})", quote.price),
            ),
            Condition::PriceBelow(t) => (
                quote.price < t,
                format!("{sym} dropped below ${t:.2} (current: ${:.2})", quote.price),
            ),
            Condition::VolumeAbove(t) => (
                quote.volume > t,
                format!(
                    "{sym} volume exceeded {} (current: {})",
                    format_volume(t as f64),
                    format_volume(quote.volume as f64)
                ),
            ),
            Condition::VolumeBelow(t) => (
                quote.volume < t,
                format!(
                    "{sym} volume dropped below {} (current: {})",
                    format_volume(t as f64),
                    format_volume(quote.volume as f64)
                ),
            ),
            Condition::PriceChangePct { percent, direction } => {
                let change = quote.change_pct().ok_or_else(|| EvalError::MissingReference {
                    kind: "price_change_pct",
                    field: "price",
                    symbol: sym.clone(),
                })?;
                let (hit, threshold) = match direction {
                    ChangeDirection::Up => (change >= percent, format!("+{percent:.2}%")),
                    ChangeDirection::Down => (change <= -percent, format!("-{percent:.2}%")),
                    ChangeDirection::Either => (change.abs() >= percent, format!("±{percent:.2}%")),
                };
                (
                    hit,
                    format!("{sym} moved {change:+.2}% (threshold: {threshold})"),
                )
            }
            Condition::VolumeSpike(m) => {
                let reference = quote
                    .reference_volume
                    .filter(|v| *v > 0)
                    .ok_or_else(|| EvalError::MissingReference {
                        kind: "volume_spike",
                        field: "volume",
                        symbol: sym.clone(),
                    })?;
                let ratio = quote.volume as f64 / reference as f64;
                (
                    quote.volume as f64 >= m * reference as f64,
                    format!("{sym} volume at {ratio:.1}x its reference (threshold: {m:.1}x)"),
                )
            }
        };

        Ok(Evaluation { triggered, reason })
    }
}

/// Parses and evaluates in one step. Errors mean the rule is misconfigured
/// or the quote lacks data the kind needs; either way the rule is skipped.
pub fn evaluate(kind: &str, raw: &Value, quote: &Quote) -> Result<Evaluation, EvalError> {
    Condition::parse(kind, raw)?.evaluate(quote)
}

/// Formats a volume with K/M/B suffixes.
pub fn format_volume(vol: f64) -> String {
    if vol >= 1_000_000_000.0 {
        format!("{:.1}B", vol / 1_000_000_000.0)
    } else if vol >= 1_000_000.0 {
        format!("{:.1}M", vol / 1_000_000.0)
    } else if vol >= 1_000.0 {
        format!("{:.1}K", vol / 1_000.0)
    } else {
        format!("{vol:.0}")
    }
}

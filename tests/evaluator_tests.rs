mod common;

use marketalerts::{
    error::EvalError,
    services::evaluator::{evaluate, format_volume, ChangeDirection, Condition},
};
use serde_json::json;

use common::quote;

#[test]
fn price_above_is_strict() {
    let cond = json!({ "threshold": 150.0 });

    let at = evaluate("price_above", &cond, &quote("AAPL", 150.00, 1_000)).unwrap();
    assert!(!at.triggered);

    let over = evaluate("price_above", &cond, &quote("AAPL", 150.01, 1_000)).unwrap();
    assert!(over.triggered);
    assert_eq!(over.reason, "AAPL crossed above $150.00 (current: $150.01)");
}

#[test]
fn price_below_is_strict() {
    let cond = json!({ "threshold": 150.0 });

    assert!(!evaluate("price_below", &cond, &quote("AAPL", 150.00, 0)).unwrap().triggered);
    assert!(evaluate("price_below", &cond, &quote("AAPL", 149.99, 0)).unwrap().triggered);
}

#[test]
fn volume_thresholds_are_strict() {
    let cond = json!({ "threshold": 1_000_000 });

    assert!(!evaluate("volume_above", &cond, &quote("TSLA", 1.0, 1_000_000)).unwrap().triggered);
    assert!(evaluate("volume_above", &cond, &quote("TSLA", 1.0, 1_000_001)).unwrap().triggered);
    assert!(!evaluate("volume_below", &cond, &quote("TSLA", 1.0, 1_000_000)).unwrap().triggered);
    assert!(evaluate("volume_below", &cond, &quote("TSLA", 1.0, 999_999)).unwrap().triggered);
}

#[test]
fn volume_threshold_accepts_whole_float_only() {
    assert_eq!(
        Condition::parse("volume_above", &json!({ "threshold": 2000.0 })).unwrap(),
        Condition::VolumeAbove(2000)
    );
    assert!(Condition::parse("volume_above", &json!({ "threshold": 2000.5 })).is_err());
}

#[test]
fn price_change_pct_follows_threshold_sign() {
    let mut q = quote("NVDA", 105.0, 0);
    q.reference_price = Some(100.0);

    assert!(evaluate("price_change_pct", &json!({ "percent_change": 4.9 }), &q).unwrap().triggered);
    assert!(!evaluate("price_change_pct", &json!({ "percent_change": 5.5 }), &q).unwrap().triggered);
    assert!(!evaluate("price_change_pct", &json!({ "percent_change": -5.0 }), &q).unwrap().triggered);

    q.price = 94.0;
    assert!(evaluate("price_change_pct", &json!({ "percent_change": -5.0 }), &q).unwrap().triggered);
}

#[test]
fn price_change_pct_direction_uses_the_size_of_the_move() {
    let mut q = quote("NVDA", 94.0, 0);
    q.reference_price = Some(100.0);

    let down = json!({ "percent_change": 5.0, "direction": "down" });
    let up = json!({ "percent_change": 5.0, "direction": "up" });
    let either = json!({ "percent_change": 5.0, "direction": "either" });

    assert!(evaluate("price_change_pct", &down, &q).unwrap().triggered);
    assert!(!evaluate("price_change_pct", &up, &q).unwrap().triggered);
    assert!(evaluate("price_change_pct", &either, &q).unwrap().triggered);

    q.price = 106.0;
    assert!(!evaluate("price_change_pct", &down, &q).unwrap().triggered);
    assert!(evaluate("price_change_pct", &up, &q).unwrap().triggered);
    assert!(evaluate("price_change_pct", &either, &q).unwrap().triggered);

    q.price = 102.0;
    assert!(!evaluate("price_change_pct", &either, &q).unwrap().triggered);
}

#[test]
fn price_change_pct_rejects_bad_direction() {
    assert_eq!(
        Condition::parse("price_change_pct", &json!({ "percent_change": 5, "direction": "DOWN" })).unwrap(),
        Condition::PriceChangePct { percent: 5.0, direction: ChangeDirection::Down }
    );
    assert!(Condition::parse("price_change_pct", &json!({ "percent_change": 5, "direction": "sideways" })).is_err());
    assert!(Condition::parse("price_change_pct", &json!({ "percent_change": -5, "direction": "down" })).is_err());
}

#[test]
fn price_change_pct_without_reference_is_an_error() {
    let q = quote("NVDA", 105.0, 0);
    let err = evaluate("price_change_pct", &json!({ "percent_change": 5.0 }), &q).unwrap_err();
    assert!(matches!(err, EvalError::MissingReference { .. }));
}

#[test]
fn volume_spike_compares_against_reference_volume() {
    let mut q = quote("AMD", 10.0, 3_000_000);
    q.reference_volume = Some(1_000_000);

    let cond = json!({ "volume_multiplier": 3.0 });
    let eval = evaluate("volume_spike", &cond, &q).unwrap();
    assert!(eval.triggered);
    assert!(eval.reason.contains("3.0x"));

    q.volume = 2_999_999;
    assert!(!evaluate("volume_spike", &cond, &q).unwrap().triggered);

    q.reference_volume = None;
    assert!(evaluate("volume_spike", &cond, &q).is_err());
}

#[test]
fn malformed_conditions_are_rejected() {
    assert!(matches!(
        Condition::parse("price_above", &json!({})),
        Err(EvalError::MalformedConditions { .. })
    ));
    assert!(Condition::parse("price_above", &json!({ "threshold": -1 })).is_err());
    assert!(Condition::parse("price_above", &json!({ "threshold": "150" })).is_err());
    assert!(Condition::parse("price_change_pct", &json!({ "percent_change": 0 })).is_err());
    assert!(Condition::parse("volume_spike", &json!({ "volume_multiplier": 1.0 })).is_err());
}

#[test]
fn unknown_kind_is_rejected() {
    assert_eq!(
        Condition::parse("rsi_above", &json!({ "threshold": 70 })),
        Err(EvalError::UnknownKind("rsi_above".to_string()))
    );
}

#[test]
fn volume_formatting_uses_suffixes() {
    assert_eq!(format_volume(950.0), "950");
    assert_eq!(format_volume(1_500.0), "1.5K");
    assert_eq!(format_volume(2_400_000.0), "2.4M");
    assert_eq!(format_volume(3_000_000_000.0), "3.0B");
}

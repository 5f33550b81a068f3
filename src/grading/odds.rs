/// American odds arithmetic.
///
/// American odds quote profit relative to 100:
///   +150  → a 100 stake profits 150
///   −200  → a 200 stake profits 100
///
/// Decimal odds fold the stake back in (total return per unit staked):
///   d = 1 + odds/100      for odds ≥ +100
///   d = 1 + 100/|odds|    for odds ≤ −100
///
/// Values strictly between −100 and +100 are not valid American odds.

/// Convert American odds to decimal odds. `None` when `|odds| < 100`.
pub fn american_to_decimal(odds: i32) -> Option<f64> {
    if odds >= 100 {
        Some(1.0 + odds as f64 / 100.0)
    } else if odds <= -100 {
        Some(1.0 + 100.0 / (odds as f64).abs())
    } else {
        None
    }
}

/// Profit of a winning wager, rounded to cents.
pub fn profit_for(stake: f64, odds: i32) -> Option<f64> {
    american_to_decimal(odds).map(|d| round_cents(stake * (d - 1.0)))
}

/// Product of the legs' decimal odds. Any invalid leg makes the whole
/// combination invalid.
pub fn combined_decimal(odds: impl IntoIterator<Item = i32>) -> Option<f64> {
    odds.into_iter()
        .try_fold(1.0, |acc, o| american_to_decimal(o).map(|d| acc * d))
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_positive_odds_profit() {
        assert_relative_eq!(profit_for(100.0, 150).unwrap(), 150.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_odds_profit() {
        assert_relative_eq!(profit_for(100.0, -200).unwrap(), 50.0, epsilon = 1e-9);
        assert_relative_eq!(profit_for(110.0, -110).unwrap(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_odds() {
        assert!(american_to_decimal(0).is_none());
        assert!(american_to_decimal(99).is_none());
        assert!(american_to_decimal(-99).is_none());
        assert!(profit_for(10.0, 50).is_none());
        assert!(combined_decimal([100, 50]).is_none());
    }

    #[test]
    fn test_even_money() {
        assert_relative_eq!(american_to_decimal(100).unwrap(), 2.0);
        assert_relative_eq!(american_to_decimal(-100).unwrap(), 2.0);
    }

    #[test]
    fn test_combined_three_leg() {
        let d = combined_decimal([100, 100, -400]).unwrap();
        assert_relative_eq!(d, 5.0, epsilon = 1e-9);
        let d = combined_decimal([150, 110, -300]).unwrap();
        assert_relative_eq!(d, 7.0, epsilon = 1e-9);
        assert_relative_eq!(combined_decimal(std::iter::empty()).unwrap(), 1.0);
    }

    #[test]
    fn test_round_cents() {
        assert_relative_eq!(round_cents(10.005_1), 10.01, epsilon = 1e-9);
        assert_relative_eq!(round_cents(-33.333), -33.33, epsilon = 1e-9);
    }
}

use crate::db::models::{Wager, WagerStatus};

use super::odds::{combined_decimal, round_cents};

/// Result of looking at every leg of one parlay.
#[derive(Debug, Clone, PartialEq)]
pub enum ParlayResolution {
    /// At least one leg is still pending; nothing may be written.
    Pending,
    Resolved {
        status: WagerStatus,
        total_profit: f64,
        /// `(wager id, profit)` for every leg, in leg order
        leg_profits: Vec<(i64, f64)>,
    },
}

/// Aggregate graded legs into a group result.
///
/// * any leg lost → lost; each leg loses its own stake
/// * none lost, at least one won → won; profit is the group stake times the
///   product of the winning legs' decimal odds minus one, split evenly across
///   the winning legs (void and push legs count as 1.0 and get nothing)
/// * every leg void/push → push, zero profit
pub fn resolve_parlay(legs: &[Wager]) -> ParlayResolution {
    if legs.is_empty() || legs.iter().any(|l| l.status == WagerStatus::Pending) {
        return ParlayResolution::Pending;
    }

    if legs.iter().any(|l| l.status == WagerStatus::Lost) {
        let leg_profits: Vec<(i64, f64)> =
            legs.iter().map(|l| (l.id, -round_cents(l.stake))).collect();
        let total_profit = round_cents(leg_profits.iter().map(|(_, p)| p).sum());
        return ParlayResolution::Resolved {
            status: WagerStatus::Lost,
            total_profit,
            leg_profits,
        };
    }

    if !legs.iter().any(|l| l.status == WagerStatus::Won) {
        return push(legs);
    }
    // won legs always carry valid odds
    let Some(combined) = combined_decimal(
        legs.iter()
            .filter(|l| l.status == WagerStatus::Won)
            .map(|l| l.odds),
    ) else {
        return push(legs);
    };
    let total_profit = round_cents(group_stake(legs) * (combined - 1.0));

    ParlayResolution::Resolved {
        status: WagerStatus::Won,
        total_profit,
        leg_profits: split_evenly(legs, total_profit),
    }
}

fn push(legs: &[Wager]) -> ParlayResolution {
    ParlayResolution::Resolved {
        status: WagerStatus::Push,
        total_profit: 0.0,
        leg_profits: legs.iter().map(|l| (l.id, 0.0)).collect(),
    }
}

/// Stake of the whole group: the recorded pre-division stake, or the sum of
/// the legs' allocations when it was not recorded.
pub fn group_stake(legs: &[Wager]) -> f64 {
    legs.iter()
        .find_map(|l| l.original_stake)
        .unwrap_or_else(|| legs.iter().map(|l| l.stake).sum())
}

/// Even split in cents across the won legs; every other leg gets 0.0. The
/// rounding remainder goes to the first won leg so the shares add up to
/// `total` exactly.
fn split_evenly(legs: &[Wager], total: f64) -> Vec<(i64, f64)> {
    let winners = legs.iter().filter(|l| l.status == WagerStatus::Won).count();
    if winners == 0 {
        return legs.iter().map(|l| (l.id, 0.0)).collect();
    }
    let n = winners as f64;
    let share = round_cents(total / n);
    let remainder = round_cents(total - share * n);
    let mut first = true;
    legs.iter()
        .map(|l| {
            if l.status != WagerStatus::Won {
                return (l.id, 0.0);
            }
            let profit = if first { round_cents(share + remainder) } else { share };
            first = false;
            (l.id, profit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use crate::db::models::WagerKind;

    fn leg(id: i64, odds: i32, status: WagerStatus, stake: f64, original: f64) -> Wager {
        Wager {
            id,
            parlay_id: Some("p1".into()),
            game_id: Some(format!("g{}", id)),
            participant_id: None,
            kind: WagerKind::Moneyline,
            selection: "Team".into(),
            stat_type: None,
            stake,
            original_stake: Some(original),
            odds,
            status,
            placed_at: Utc::now(),
            graded_at: Some(Utc::now()),
            profit: None,
            result_value: None,
        }
    }

    #[test]
    fn test_three_leg_win_distributes_evenly() {
        // +150, +110, -300 combine to decimal 7.0 (American +600)
        let legs = vec![
            leg(1, 150, WagerStatus::Won, 30.0, 90.0),
            leg(2, 110, WagerStatus::Won, 30.0, 90.0),
            leg(3, -300, WagerStatus::Won, 30.0, 90.0),
        ];
        match resolve_parlay(&legs) {
            ParlayResolution::Resolved { status, total_profit, leg_profits } => {
                assert_eq!(status, WagerStatus::Won);
                assert_relative_eq!(total_profit, 540.0, epsilon = 1e-9);
                for (_, p) in &leg_profits {
                    assert_relative_eq!(*p, 180.0, epsilon = 1e-9);
                }
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_any_lost_loses_every_stake() {
        let legs = vec![
            leg(1, 150, WagerStatus::Won, 30.0, 90.0),
            leg(2, 110, WagerStatus::Lost, 30.0, 90.0),
            leg(3, -300, WagerStatus::Won, 30.0, 90.0),
        ];
        let ParlayResolution::Resolved { status, total_profit, leg_profits } = resolve_parlay(&legs) else {
            panic!("expected resolution");
        };
        assert_eq!(status, WagerStatus::Lost);
        assert_relative_eq!(total_profit, -90.0, epsilon = 1e-9);
        assert!(leg_profits.iter().all(|(_, p)| (*p + 30.0).abs() < 1e-9));
    }

    #[test]
    fn test_pending_leg_blocks_resolution() {
        let legs = vec![
            leg(1, 150, WagerStatus::Lost, 30.0, 90.0),
            leg(2, 110, WagerStatus::Pending, 30.0, 90.0),
        ];
        assert_eq!(resolve_parlay(&legs), ParlayResolution::Pending);
        assert_eq!(resolve_parlay(&[]), ParlayResolution::Pending);
    }

    #[test]
    fn test_void_leg_counts_as_even() {
        let legs = vec![
            leg(1, 100, WagerStatus::Won, 50.0, 100.0),
            leg(2, 400, WagerStatus::Void, 50.0, 100.0),
        ];
        let ParlayResolution::Resolved { status, total_profit, leg_profits } = resolve_parlay(&legs) else {
            panic!("expected resolution");
        };
        assert_eq!(status, WagerStatus::Won);
        assert_relative_eq!(total_profit, 100.0, epsilon = 1e-9);
        assert_eq!(leg_profits[0].0, 1);
        assert_relative_eq!(leg_profits[0].1, 100.0, epsilon = 1e-9);
        assert_eq!(leg_profits[1].0, 2);
        assert_eq!(leg_profits[1].1, 0.0);
    }

    #[test]
    fn test_push_leg_gets_no_share() {
        let legs = vec![
            leg(1, 200, WagerStatus::Push, 30.0, 90.0),
            leg(2, 100, WagerStatus::Won, 30.0, 90.0),
            leg(3, 100, WagerStatus::Won, 30.0, 90.0),
        ];
        let ParlayResolution::Resolved { total_profit, leg_profits, .. } = resolve_parlay(&legs) else {
            panic!("expected resolution");
        };
        // 90 * (2.0 * 2.0 - 1) = 270, shared by the two winners
        assert_relative_eq!(total_profit, 270.0, epsilon = 1e-9);
        assert_eq!(leg_profits[0], (1, 0.0));
        assert_relative_eq!(leg_profits[1].1, 135.0, epsilon = 1e-9);
        assert_relative_eq!(leg_profits[2].1, 135.0, epsilon = 1e-9);
    }

    #[test]
    fn test_all_void_is_push() {
        let legs = vec![
            leg(1, 100, WagerStatus::Void, 50.0, 100.0),
            leg(2, 400, WagerStatus::Push, 50.0, 100.0),
        ];
        let ParlayResolution::Resolved { status, total_profit, leg_profits } = resolve_parlay(&legs) else {
            panic!("expected resolution");
        };
        assert_eq!(status, WagerStatus::Push);
        assert_eq!(total_profit, 0.0);
        assert!(leg_profits.iter().all(|(_, p)| *p == 0.0));
    }

    #[test]
    fn test_uneven_split_sums_exactly() {
        let legs = vec![
            leg(1, 100, WagerStatus::Won, 3.34, 10.01),
            leg(2, 100, WagerStatus::Won, 3.34, 10.01),
            leg(3, 100, WagerStatus::Won, 3.33, 10.01),
        ];
        let ParlayResolution::Resolved { total_profit, leg_profits, .. } = resolve_parlay(&legs) else {
            panic!("expected resolution");
        };
        // 10.01 * 7 = 70.07; 23.35 + 23.36 + 23.36
        assert_relative_eq!(total_profit, 70.07, epsilon = 1e-9);
        let sum: f64 = leg_profits.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(sum, 70.07, epsilon = 1e-9);
        assert_relative_eq!(leg_profits[0].1, 23.35, epsilon = 1e-9);
        assert_relative_eq!(leg_profits[1].1, 23.36, epsilon = 1e-9);
    }
}

//! ELO rating updates for a single pairwise outcome

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum rating change per match
pub const K_FACTOR: f64 = 32.0;

/// Rating every paper enters the pool with
pub const SEED_RATING: f64 = 1500.0;

/// Result of one vote: the preferred paper and the other one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub winner_id: Uuid,
    pub loser_id: Uuid,
}

/// Probability that a player rated `rating` beats one rated `opponent`
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// New `(winner, loser)` ratings after the winner beat the loser.
///
/// Zero-sum: the winner gains exactly what the loser gives up.
pub fn compute_updated_ratings(winner_rating: f64, loser_rating: f64) -> (f64, f64) {
    let expected_winner = expected_score(winner_rating, loser_rating);
    let expected_loser = 1.0 - expected_winner;

    let new_winner = winner_rating + K_FACTOR * (1.0 - expected_winner);
    let new_loser = loser_rating + K_FACTOR * (0.0 - expected_loser);

    (new_winner, new_loser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_equal_ratings() {
        let (winner, loser) = compute_updated_ratings(1500.0, 1500.0);
        assert!((winner - 1516.0).abs() < EPSILON);
        assert!((loser - 1484.0).abs() < EPSILON);
    }

    #[test]
    fn test_expected_score_is_symmetric() {
        let a = expected_score(1700.0, 1500.0);
        let b = expected_score(1500.0, 1700.0);
        assert!((a + b - 1.0).abs() < EPSILON);
        assert!(a > 0.5);
    }

    #[test]
    fn test_upset_moves_more_than_expected_win() {
        let (underdog, _) = compute_updated_ratings(1400.0, 1600.0);
        let (favourite, _) = compute_updated_ratings(1600.0, 1400.0);
        assert!(underdog - 1400.0 > favourite - 1600.0);
        assert!(underdog - 1400.0 < K_FACTOR);
    }

    #[test]
    fn test_random_ratings_conserve_mass() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let winner: f64 = rng.gen_range(0.0..3000.0);
            let loser: f64 = rng.gen_range(0.0..3000.0);
            let (new_winner, new_loser) = compute_updated_ratings(winner, loser);

            assert!(new_winner.is_finite() && new_loser.is_finite());
            assert!((new_winner + new_loser - (winner + loser)).abs() < 1e-6);
            assert!(new_winner >= winner);
            assert!(new_loser <= loser);
            if winner <= loser {
                assert!(new_winner > winner);
            }
        }
    }

    #[test]
    fn test_outcome_uses_camel_case() {
        let outcome = MatchOutcome {
            winner_id: Uuid::from_u128(1),
            loser_id: Uuid::from_u128(2),
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert!(json.get("winnerId").is_some());
        assert!(json.get("loserId").is_some());
    }
}

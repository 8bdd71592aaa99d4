//! Rotation policy: which two papers are compared next
//!
//! Papers are dealt from the unshown set until fewer than two remain, at
//! which point every paper is marked unshown again (a rotation reset).
//! Dealing is claimed atomically in the store so two concurrent requests
//! cannot both receive the same paper.

use crate::db::models::Paper;
use crate::db::{PaperChanges, PaperFilter, PaperQuery, PaperStore};
use crate::errors::{AppError, Result};
use crate::metrics;
use rand::Rng;
use tracing::{debug, info};

/// Claim attempts before giving up on a contended pool
pub const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Two distinct indices drawn uniformly from `0..len`.
///
/// The second draw is resampled until it differs from the first.
/// `len` must be at least 2.
pub fn draw_pair<R: Rng + ?Sized>(len: usize, rng: &mut R) -> (usize, usize) {
    debug_assert!(len >= 2);
    let first = rng.gen_range(0..len);
    let mut second = rng.gen_range(0..len);
    while second == first {
        second = rng.gen_range(0..len);
    }
    (first, second)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationPolicy;

impl RotationPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Pick two distinct unshown papers and mark them shown
    pub async fn select_next_pair(&self, store: &dyn PaperStore) -> Result<(Paper, Paper)> {
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let eligible = self.eligible(store).await?;

            let (first, second) = {
                let mut rng = rand::thread_rng();
                draw_pair(eligible.len(), &mut rng)
            };
            let (mut a, mut b) = (eligible[first].clone(), eligible[second].clone());

            if store.claim_unshown(&[a.id, b.id]).await? {
                a.shown = true;
                b.shown = true;
                metrics::record_pair_dealt();
                debug!(paper_a = %a.id, paper_b = %b.id, "Pair dealt");
                return Ok((a, b));
            }

            debug!(attempt, "Pair claimed concurrently, redrawing");
        }

        Err(AppError::Conflict {
            message: format!(
                "Could not claim a paper pair after {} attempts",
                MAX_CLAIM_ATTEMPTS
            ),
        })
    }

    /// Unshown papers, or the whole pool after a rotation reset
    async fn eligible(&self, store: &dyn PaperStore) -> Result<Vec<Paper>> {
        let unshown = store.find_all_for_write(PaperQuery::unshown()).await?;
        if unshown.len() >= 2 {
            return Ok(unshown);
        }

        let reset = store
            .update_all(PaperFilter::all(), PaperChanges::shown(false))
            .await?;
        metrics::record_rotation_reset();
        info!(papers = reset, "Rotation reset, all papers eligible again");

        let pool = store.find_all_for_write(PaperQuery::default()).await?;
        if pool.len() < 2 {
            return Err(AppError::InsufficientPapers {
                available: pool.len(),
            });
        }
        Ok(pool)
    }
}

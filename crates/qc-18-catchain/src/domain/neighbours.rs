//! Gossip neighbour sampling.

use rand::Rng;

use super::entities::SourceId;

/// Uniform sample of at most `max` candidates, preserving candidate order.
///
/// Selection sampling: each candidate is taken with probability
/// `still_needed / still_available`.
pub fn choose_neighbours<R: Rng + ?Sized>(
    candidates: &[SourceId],
    max: usize,
    rng: &mut R,
) -> Vec<SourceId> {
    let mut needed = max.min(candidates.len());
    let mut chosen = Vec::with_capacity(needed);
    for (i, candidate) in candidates.iter().enumerate() {
        if needed == 0 {
            break;
        }
        let available = candidates.len() - i;
        if rng.gen_range(0..available) < needed {
            chosen.push(*candidate);
            needed -= 1;
        }
    }
    chosen
}

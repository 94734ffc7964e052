use rand::seq::SliceRandom;

/// Chooses which of a peer's available pieces to request.
///
/// Implementations receive the available indices computed once per round
/// and must return at most `max` of them. An empty return skips the round.
pub trait PieceSelector: Send {
    fn select(&mut self, available: &[u32], max: usize) -> Vec<u32>;
}

/// Uniformly random choice among available pieces, without repeats
#[derive(Debug, Default)]
pub struct RandomSelector;

impl PieceSelector for RandomSelector {
    fn select(&mut self, available: &[u32], max: usize) -> Vec<u32> {
        let mut rng = rand::thread_rng();
        available.choose_multiple(&mut rng, max).copied().collect()
    }
}

/// Lowest indices first. Deterministic, handy for tests and debugging.
#[derive(Debug, Default)]
pub struct SequentialSelector;

impl PieceSelector for SequentialSelector {
    fn select(&mut self, available: &[u32], max: usize) -> Vec<u32> {
        available.iter().take(max).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_selector_bounded_and_distinct() {
        let available: Vec<u32> = (0..50).collect();
        let picked = RandomSelector.select(&available, 10);

        assert_eq!(picked.len(), 10);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(picked.iter().all(|index| available.contains(index)));
    }

    #[test]
    fn test_random_selector_fewer_than_max() {
        let picked = RandomSelector.select(&[4, 9], 10);

        let mut sorted = picked.clone();
        sorted.sort();
        assert_eq!(sorted, vec![4, 9]);
    }

    #[test]
    fn test_empty_available_returns_nothing() {
        assert!(RandomSelector.select(&[], 10).is_empty());
        assert!(SequentialSelector.select(&[], 10).is_empty());
    }

    #[test]
    fn test_sequential_selector() {
        assert_eq!(SequentialSelector.select(&[1, 3, 5, 7], 2), vec![1, 3]);
    }
}

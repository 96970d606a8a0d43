use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::ear::Ear;

/// Test order of one session.
///
/// The ear order is decided once at construction; every configured ear
/// appears exactly once. All frequencies of one ear run before the next ear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlan {
    ear_order: Vec<Ear>,
    frequencies: Vec<u32>,
}

impl SessionPlan {
    pub fn new<G: Rng + ?Sized>(config: &SessionConfig, rng: &mut G) -> Self {
        let mut ear_order = config.ears.clone();
        if config.shuffle_ears {
            ear_order.shuffle(rng);
        }
        Self {
            ear_order,
            frequencies: config.frequencies.clone(),
        }
    }

    pub fn ear_order(&self) -> &[Ear] {
        &self.ear_order
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    /// |ears| x |frequencies|
    pub fn total_steps(&self) -> usize {
        self.ear_order.len() * self.frequencies.len()
    }

    /// (ear, frequency) pairs in test order
    pub fn combinations(&self) -> impl Iterator<Item = (Ear, u32)> + '_ {
        self.ear_order
            .iter()
            .flat_map(move |&ear| self.frequencies.iter().map(move |&f| (ear, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_every_ear_exactly_once() {
        let config = SessionConfig::default();
        for seed in 0..32 {
            let plan = SessionPlan::new(&config, &mut StdRng::seed_from_u64(seed));
            let mut ears = plan.ear_order().to_vec();
            ears.sort_by_key(|e| e.channel_index());
            assert_eq!(ears, vec![Ear::Left, Ear::Right]);
        }
    }

    #[test]
    fn test_shuffle_produces_both_orders() {
        let config = SessionConfig::default();
        let firsts: Vec<Ear> = (0..64)
            .map(|seed| SessionPlan::new(&config, &mut StdRng::seed_from_u64(seed)).ear_order()[0])
            .collect();
        assert!(firsts.contains(&Ear::Left));
        assert!(firsts.contains(&Ear::Right));
    }

    #[test]
    fn test_unshuffled_keeps_configured_order() {
        let config = SessionConfig {
            shuffle_ears: false,
            ..SessionConfig::default()
        };
        let plan = SessionPlan::new(&config, &mut StdRng::seed_from_u64(1));
        assert_eq!(plan.ear_order(), &[Ear::Right, Ear::Left]);
    }

    #[test]
    fn test_combinations_are_ear_major() {
        let config = SessionConfig {
            frequencies: vec![1000, 4000],
            shuffle_ears: false,
            ..SessionConfig::default()
        };
        let plan = SessionPlan::new(&config, &mut StdRng::seed_from_u64(1));
        let combos: Vec<(Ear, u32)> = plan.combinations().collect();
        assert_eq!(
            combos,
            vec![
                (Ear::Right, 1000),
                (Ear::Right, 4000),
                (Ear::Left, 1000),
                (Ear::Left, 4000)
            ]
        );
        assert_eq!(plan.total_steps(), 4);
    }
}

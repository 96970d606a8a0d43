//! "3 of 5" response history of the confirmation phase.

/// Levels are compared after rounding to 0.01 dB.
fn level_key(level: f32) -> i64 {
    (level as f64 * 100.0).round() as i64
}

/// Ordered list of levels at which the patient responded on an ascent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmationHistory {
    levels: Vec<f32>,
}

impl ConfirmationHistory {
    /// Responses needed at one level to confirm it
    pub const REQUIRED: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: f32) {
        self.levels.push(level);
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn count(&self, level: f32) -> usize {
        let key = level_key(level);
        self.levels.iter().filter(|&&l| level_key(l) == key).count()
    }

    /// First level (in history order) that occurs exactly three times
    pub fn confirmed_level(&self) -> Option<f32> {
        self.levels
            .iter()
            .copied()
            .find(|&l| self.count(l) == Self::REQUIRED)
    }

    /// Most frequent level; ties go to the level seen first
    pub fn most_frequent(&self) -> Option<f32> {
        let mut best: Option<(f32, usize)> = None;
        for &level in &self.levels {
            let count = self.count(level);
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((level, count)),
            }
        }
        best.map(|(level, _)| level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(levels: &[f32]) -> ConfirmationHistory {
        let mut h = ConfirmationHistory::new();
        for &l in levels {
            h.push(l);
        }
        h
    }

    #[test]
    fn test_three_of_five_confirms() {
        let h = history(&[30.0, 25.0, 30.0, 35.0, 30.0]);
        assert_eq!(h.confirmed_level(), Some(30.0));
    }

    #[test]
    fn test_two_matches_do_not_confirm() {
        let h = history(&[30.0, 25.0, 30.0, 35.0]);
        assert_eq!(h.confirmed_level(), None);
    }

    #[test]
    fn test_most_frequent_prefers_earliest_on_tie() {
        let h = history(&[35.0, 30.0, 30.0, 35.0, 25.0]);
        assert_eq!(h.most_frequent(), Some(35.0));

        let h = history(&[25.0, 30.0, 30.0]);
        assert_eq!(h.most_frequent(), Some(30.0));
        assert_eq!(ConfirmationHistory::new().most_frequent(), None);
    }

    #[test]
    fn test_clear() {
        let mut h = history(&[30.0, 30.0]);
        h.clear();
        assert!(h.is_empty());
        h.push(40.0);
        assert_eq!(h.levels(), &[40.0]);
    }

    #[test]
    fn test_levels_compared_after_rounding() {
        let h = history(&[30.0, 30.000_001, 29.999_999]);
        assert_eq!(h.confirmed_level(), Some(30.0));
    }
}

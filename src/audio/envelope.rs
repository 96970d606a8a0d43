//! Linear attack/release envelope
//!
//! The envelope is owned by the renderer and advanced once per sample. Start
//! and stop only change `target_gain` and `slope`; `current_gain` moves only
//! through [`EnvelopeState::next_gain`], so no request can cause a jump.

/// Convert a dBFS level to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert milliseconds to a whole number of samples (at least one)
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> u32 {
    let samples = (sample_rate as f64 * ms as f64 / 1000.0).round();
    samples.max(1.0) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvelopeState {
    /// Linear amplitude of the last rendered sample
    pub current_gain: f32,
    /// Amplitude the ramp is heading to
    pub target_gain: f32,
    /// Linear amplitude change per sample
    pub slope: f32,
    /// Sample counter used for the sine phase
    pub phase_index: u64,
}

impl EnvelopeState {
    /// Begin ramping towards `target_gain` over `attack_samples`
    pub fn attack(&mut self, target_gain: f32, attack_samples: u32) {
        let delta = target_gain - self.current_gain;
        self.target_gain = target_gain;
        self.slope = if delta >= 0.0 {
            target_gain / attack_samples as f32
        } else {
            delta / attack_samples as f32
        };
    }

    /// Begin ramping to silence over `release_samples`
    pub fn release(&mut self, release_samples: u32) {
        self.target_gain = 0.0;
        self.slope = -self.current_gain / release_samples as f32;
    }

    /// Advance by one sample; the ramp never overshoots its target
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        let ramp = self.current_gain + self.slope;
        let gain = if self.slope > 0.0 {
            ramp.min(self.target_gain)
        } else if self.slope < 0.0 {
            ramp.max(self.target_gain)
        } else {
            self.current_gain
        };
        self.current_gain = gain;
        if self.target_gain == 0.0 && gain == 0.0 {
            self.slope = 0.0;
        }
        gain
    }

    /// Slope sign agrees with the ramp direction, and a silent envelope has no slope
    pub fn is_consistent(&self) -> bool {
        if self.target_gain == 0.0 && self.current_gain == 0.0 {
            return self.slope == 0.0;
        }
        if self.target_gain > self.current_gain {
            self.slope > 0.0
        } else if self.target_gain < self.current_gain {
            self.slope < 0.0
        } else {
            true
        }
    }

    pub fn is_silent(&self) -> bool {
        self.target_gain == 0.0 && self.current_gain == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_linear(-40.0) - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(30.0, 44100), 1323);
        assert_eq!(ms_to_samples(40.0, 48000), 1920);
        assert_eq!(ms_to_samples(0.001, 44100), 1);
    }

    #[test]
    fn test_attack_reaches_target_without_overshoot() {
        let mut env = EnvelopeState::default();
        env.attack(0.5, 10);
        assert!(env.is_consistent());

        let gains: Vec<f32> = (0..20).map(|_| env.next_gain()).collect();
        assert!((gains[0] - 0.05).abs() < 1e-6);
        assert!(gains.iter().all(|&g| g <= 0.5));
        assert!((gains[9] - 0.5).abs() < 1e-6);
        assert_eq!(gains[19], 0.5);
        assert!(env.is_consistent());
    }

    #[test]
    fn test_release_returns_to_silence() {
        let mut env = EnvelopeState::default();
        env.attack(0.5, 10);
        for _ in 0..10 {
            env.next_gain();
        }
        env.release(20);
        assert!(env.slope < 0.0);
        assert!(env.is_consistent());

        for _ in 0..25 {
            let g = env.next_gain();
            assert!(g >= 0.0);
        }
        assert!(env.is_silent());
        assert_eq!(env.slope, 0.0);
        assert!(env.is_consistent());
    }

    #[test]
    fn test_release_mid_attack_starts_from_current_gain() {
        let mut env = EnvelopeState::default();
        env.attack(1.0, 100);
        for _ in 0..10 {
            env.next_gain();
        }
        let current = env.current_gain;
        env.release(10);
        assert!((env.slope + current / 10.0).abs() < 1e-6);
        let first = env.next_gain();
        assert!(first < current);
    }

    #[test]
    fn test_idle_envelope_is_consistent() {
        let mut env = EnvelopeState::default();
        assert!(env.is_consistent());
        assert_eq!(env.next_gain(), 0.0);
        assert!(env.is_consistent());
    }
}

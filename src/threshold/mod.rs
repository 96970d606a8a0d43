// Threshold module - Modified Hughson-Westlake staircase
//
// One ThresholdSearch runs per frequency/ear combination and is dropped
// afterwards, so no level or history survives into the next combination.
//
//   Familiarizing -> Bracketing -> Confirming -> Done
//
// Every presented level stays within [floor, ceiling]. A step that would
// leave the range ends the current phase instead of being presented.

pub mod confirmation;

pub use confirmation::ConfirmationHistory;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::ear::Ear;
use crate::error::SessionError;
use crate::session::CancelToken;
use crate::trial::{PresentationMode, TrialRequest, TrialRunner};

/// Brackets run per confirmation cycle after the seed level
const BRACKETS_PER_CYCLE: usize = 4;

/// Step sizes and bounds, all in dB / dBHL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaircaseParams {
    pub start_level: f32,
    pub familiarization_ceiling: f32,
    pub small_increment: f32,
    pub large_increment: f32,
    pub small_decrement: f32,
    pub large_decrement: f32,
    pub floor: f32,
    pub ceiling: f32,
    pub max_cycles: u32,
}

impl From<&SessionConfig> for StaircaseParams {
    fn from(config: &SessionConfig) -> Self {
        Self {
            start_level: config.familiarization_start_dbhl,
            familiarization_ceiling: config.familiarization_ceiling_dbhl,
            small_increment: config.small_increment_db,
            large_increment: config.large_increment_db,
            small_decrement: config.small_decrement_db,
            large_decrement: config.large_decrement_db,
            floor: config.floor_dbhl,
            ceiling: config.ceiling_dbhl,
            max_cycles: config.max_confirmation_cycles,
        }
    }
}

impl Default for StaircaseParams {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Familiarizing,
    Bracketing,
    Confirming,
    Done,
}

/// How a threshold value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateKind {
    /// Three responses at one level within a cycle
    Confirmed,
    /// Cycle bound reached; most frequent level of the history, which after
    /// the final re-seed is the last presented level. An approximation, not
    /// a clinical-grade result.
    MostFrequent,
    /// Floor or ceiling reached; last presented level
    BoundaryReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    pub level: f32,
    pub kind: EstimateKind,
}

/// Result forwarded for one frequency/ear combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Threshold {
    Determined(ThresholdEstimate),
    /// Signal distortion prevented a result
    Undetermined,
}

impl Threshold {
    pub fn level(&self) -> Option<f32> {
        match self {
            Threshold::Determined(estimate) => Some(estimate.level),
            Threshold::Undetermined => None,
        }
    }

    pub fn is_determined(&self) -> bool {
        matches!(self, Threshold::Determined(_))
    }
}

/// Mutable state of one combination
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdState {
    pub phase: Phase,
    pub current_level: f32,
    pub history: ConfirmationHistory,
    pub confirmed_level: Option<f32>,
    pub trials: u32,
}

impl ThresholdState {
    fn new(start_level: f32) -> Self {
        Self {
            phase: Phase::Familiarizing,
            current_level: start_level,
            history: ConfirmationHistory::new(),
            confirmed_level: None,
            trials: 0,
        }
    }
}

pub struct ThresholdSearch<'a, R: TrialRunner + ?Sized> {
    runner: &'a mut R,
    cancel: &'a CancelToken,
    params: StaircaseParams,
    frequency: u32,
    ear: Ear,
    state: ThresholdState,
}

impl<'a, R: TrialRunner + ?Sized> ThresholdSearch<'a, R> {
    pub fn new(
        runner: &'a mut R,
        cancel: &'a CancelToken,
        params: StaircaseParams,
        frequency: u32,
        ear: Ear,
    ) -> Self {
        Self {
            runner,
            cancel,
            params,
            frequency,
            ear,
            state: ThresholdState::new(params.start_level),
        }
    }

    pub fn state(&self) -> &ThresholdState {
        &self.state
    }

    fn check_cancel(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    fn request(&self, level_dbhl: f32) -> TrialRequest {
        TrialRequest {
            frequency: self.frequency,
            level_dbhl,
            ear: self.ear,
        }
    }

    fn present(&mut self, level: f32, mode: PresentationMode) -> Result<bool, SessionError> {
        self.check_cancel()?;
        let result = self.runner.present(self.request(level), mode)?;
        self.state.trials += 1;
        self.state.current_level = level;
        Ok(result.responded)
    }

    /// Present at `current + delta`, or `None` if that leaves [floor, ceiling]
    fn step(&mut self, delta: f32) -> Result<Option<bool>, SessionError> {
        let next = self.state.current_level + delta;
        if next < self.params.floor || next > self.params.ceiling {
            log::warn!(
                "[Threshold] {} Hz {}: {:.1} dBHL outside [{}, {}] during {:?}",
                self.frequency,
                self.ear,
                next,
                self.params.floor,
                self.params.ceiling,
                self.state.phase
            );
            return Ok(None);
        }
        self.present(next, PresentationMode::Staircase).map(Some)
    }

    fn finish(&mut self, level: f32, kind: EstimateKind) -> Threshold {
        self.state.phase = Phase::Done;
        self.state.confirmed_level = Some(level);
        log::info!(
            "[Threshold] {} Hz {}: {:.1} dBHL ({:?}) after {} trials",
            self.frequency,
            self.ear,
            level,
            kind,
            self.state.trials
        );
        Threshold::Determined(ThresholdEstimate { level, kind })
    }

    fn boundary(&mut self) -> Threshold {
        let level = self.state.current_level;
        self.finish(level, EstimateKind::BoundaryReached)
    }

    /// Ascend in large steps until the tone is heard.
    ///
    /// Levels that would distort are skipped upward. Returns whether the
    /// patient heard a tone before the familiarization ceiling, which is
    /// itself capped by the safety ceiling.
    fn find_audible_level(&mut self) -> Result<bool, SessionError> {
        let mut level = self.params.start_level;
        let limit = self
            .params
            .familiarization_ceiling
            .min(self.params.ceiling);
        let mut presented = false;
        let mut distortion = None;

        while level <= limit {
            self.check_cancel()?;
            match self.present(level, PresentationMode::Familiarization) {
                Ok(true) => return Ok(true),
                Ok(false) => presented = true,
                Err(err @ SessionError::SignalDistortion { .. }) => {
                    log::warn!(
                        "[Threshold] Signal distorted at {:.1} dBHL, skipping to next level",
                        level
                    );
                    distortion = Some(err);
                }
                Err(err) => return Err(err),
            }
            level += self.params.large_increment;
        }

        if !presented {
            if let Some(err) = distortion {
                return Err(err);
            }
        }
        log::warn!(
            "[Threshold] {} Hz {}: no response up to {} dBHL",
            self.frequency,
            self.ear,
            limit
        );
        Ok(false)
    }

    /// Familiarization; returns whether the last presented tone was heard
    fn familiarize(&mut self) -> Result<bool, SessionError> {
        self.state.phase = Phase::Familiarizing;
        let mut heard = self.find_audible_level()?;

        if heard {
            self.check_cancel()?;
            if !self.runner.await_acknowledgement()? {
                log::warn!("[Threshold] Acknowledgement timed out, continuing");
            }
        }

        while heard {
            match self.step(-self.params.large_decrement)? {
                Some(responded) => heard = responded,
                None => return Ok(heard),
            }
        }
        while !heard {
            match self.step(self.params.large_increment)? {
                Some(responded) => heard = responded,
                None => return Ok(heard),
            }
        }
        Ok(heard)
    }

    /// Run all phases to a threshold.
    ///
    /// Errors: `Cancelled`, `SignalDistortion` (combination undetermined),
    /// or a fatal calibration/audio failure.
    pub fn run(mut self) -> Result<Threshold, SessionError> {
        log::info!(
            "[Threshold] Starting {} Hz {} at {:.1} dBHL",
            self.frequency,
            self.ear,
            self.params.start_level
        );
        self.familiarize()?;

        // Bracketing: one small step down, then up until the first response
        self.state.phase = Phase::Bracketing;
        let mut heard = match self.step(-self.params.small_decrement)? {
            Some(responded) => responded,
            None => return Ok(self.boundary()),
        };
        while !heard {
            self.check_cancel()?;
            heard = match self.step(self.params.small_increment)? {
                Some(responded) => responded,
                None => return Ok(self.boundary()),
            };
        }

        self.state.phase = Phase::Confirming;
        self.state.history.push(self.state.current_level);

        for cycle in 1..=self.params.max_cycles {
            self.check_cancel()?;
            log::debug!(
                "[Threshold] 3of5 check: {:?} (cycle {})",
                self.state.history.levels(),
                cycle
            );

            for _ in 0..BRACKETS_PER_CYCLE {
                while heard {
                    heard = match self.step(-self.params.small_decrement)? {
                        Some(responded) => responded,
                        None => return Ok(self.boundary()),
                    };
                }
                while !heard {
                    heard = match self.step(self.params.small_increment)? {
                        Some(responded) => responded,
                        None => return Ok(self.boundary()),
                    };
                }

                let level = self.state.current_level;
                self.state.history.push(level);
                if let Some(confirmed) = self.state.history.confirmed_level() {
                    return Ok(self.finish(confirmed, EstimateKind::Confirmed));
                }
            }

            log::info!(
                "[Threshold] No 3of5 match in cycle {}, +{} dB",
                cycle,
                self.params.large_increment
            );
            self.state.history.clear();
            heard = match self.step(self.params.large_increment)? {
                Some(responded) => responded,
                None => return Ok(self.boundary()),
            };
            self.state.history.push(self.state.current_level);
        }

        // The history holds only the level re-seeded after the last cycle
        log::warn!(
            "[Threshold] Maximum cycles reached, using most frequent level of {:?}",
            self.state.history.levels()
        );
        let level = self
            .state
            .history
            .most_frequent()
            .unwrap_or(self.state.current_level);
        Ok(self.finish(level, EstimateKind::MostFrequent))
    }
}

/// Run one combination to completion with a fresh state
pub fn determine_threshold<R: TrialRunner + ?Sized>(
    runner: &mut R,
    cancel: &CancelToken,
    params: StaircaseParams,
    frequency: u32,
    ear: Ear,
) -> Result<Threshold, SessionError> {
    ThresholdSearch::new(runner, cancel, params, frequency, ear).run()
}

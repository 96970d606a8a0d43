use std::collections::{HashMap, VecDeque};

use crate::calibration::CalibrationTable;
use crate::ear::Ear;
use crate::error::SessionError;
use crate::session::CancelToken;
use crate::trial::{PresentationMode, TrialRequest, TrialResult, TrialRunner};

/// Patient with a fixed hearing threshold per ear.
///
/// Responds to every tone at or above the threshold. With a calibration
/// table, levels above full scale fail with `SignalDistortion` just like the
/// real trial.
#[derive(Debug, Clone)]
pub struct SimulatedPatient {
    left: f32,
    right: f32,
    overrides: HashMap<(Ear, u32), f32>,
    calibration: Option<CalibrationTable>,
    acknowledges: bool,
    cancel_at: Option<(usize, CancelToken)>,
    presented: Vec<TrialRequest>,
    acknowledgements: usize,
    resets: usize,
}

impl SimulatedPatient {
    pub fn new(left_dbhl: f32, right_dbhl: f32) -> Self {
        Self {
            left: left_dbhl,
            right: right_dbhl,
            overrides: HashMap::new(),
            calibration: None,
            acknowledges: true,
            cancel_at: None,
            presented: Vec::new(),
            acknowledgements: 0,
            resets: 0,
        }
    }

    /// Threshold for one ear/frequency, overriding the per-ear value
    pub fn with_threshold(mut self, ear: Ear, frequency: u32, level_dbhl: f32) -> Self {
        self.overrides.insert((ear, frequency), level_dbhl);
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationTable) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Never perform the acknowledgement gesture
    pub fn without_acknowledgement(mut self) -> Self {
        self.acknowledges = false;
        self
    }

    /// Trigger `cancel` during the `trial`-th presentation (1-based)
    pub fn cancel_during_trial(mut self, trial: usize, cancel: CancelToken) -> Self {
        self.cancel_at = Some((trial, cancel));
        self
    }

    pub fn threshold(&self, ear: Ear, frequency: u32) -> f32 {
        if let Some(level) = self.overrides.get(&(ear, frequency)) {
            return *level;
        }
        match ear {
            Ear::Left => self.left,
            Ear::Right => self.right,
        }
    }

    pub fn presented(&self) -> &[TrialRequest] {
        &self.presented
    }

    pub fn acknowledgements(&self) -> usize {
        self.acknowledgements
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl TrialRunner for SimulatedPatient {
    fn present(
        &mut self,
        request: TrialRequest,
        _mode: PresentationMode,
    ) -> Result<TrialResult, SessionError> {
        if let Some(calibration) = &self.calibration {
            let level_dbfs = calibration.to_device_level(request.frequency, request.level_dbhl)?;
            if level_dbfs > 0.0 {
                return Err(SessionError::SignalDistortion {
                    frequency: request.frequency,
                    level_dbhl: request.level_dbhl,
                    level_dbfs,
                });
            }
        }

        self.presented.push(request);
        if let Some((trial, cancel)) = &self.cancel_at {
            if self.presented.len() == *trial {
                cancel.cancel();
                return Err(SessionError::Cancelled);
            }
        }

        Ok(TrialResult {
            level: request.level_dbhl,
            responded: request.level_dbhl >= self.threshold(request.ear, request.frequency),
        })
    }

    fn await_acknowledgement(&mut self) -> Result<bool, SessionError> {
        if self.acknowledges {
            self.acknowledgements += 1;
        }
        Ok(self.acknowledges)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Patient that answers from a fixed script, then with `fallback`
#[derive(Debug, Clone, Default)]
pub struct ScriptedPatient {
    responses: VecDeque<bool>,
    fallback: bool,
    presented: Vec<TrialRequest>,
}

impl ScriptedPatient {
    pub fn new(responses: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            fallback,
            presented: Vec::new(),
        }
    }

    /// Levels presented so far, in order
    pub fn levels(&self) -> Vec<f32> {
        self.presented.iter().map(|r| r.level_dbhl).collect()
    }

    pub fn presented(&self) -> &[TrialRequest] {
        &self.presented
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl TrialRunner for ScriptedPatient {
    fn present(
        &mut self,
        request: TrialRequest,
        _mode: PresentationMode,
    ) -> Result<TrialResult, SessionError> {
        self.presented.push(request);
        let responded = self.responses.pop_front().unwrap_or(self.fallback);
        Ok(TrialResult {
            level: request.level_dbhl,
            responded,
        })
    }

    fn await_acknowledgement(&mut self) -> Result<bool, SessionError> {
        Ok(true)
    }

    fn reset(&mut self) {}
}

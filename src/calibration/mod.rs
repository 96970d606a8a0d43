// Calibration module - dBHL to dBFS conversion
//
// The table holds one (reference, correction) pair per supported frequency.
// Conversion is exact-match only: an uncalibrated frequency is an error,
// never interpolated from its neighbours.

pub mod table;

pub use table::{CalibrationEntry, CalibrationTable};

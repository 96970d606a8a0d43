//! Per-frequency calibration constants.

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Reference and correction constants for one frequency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    /// Frequency in Hz
    pub frequency: u32,
    /// Reference level in dB
    pub reference: f32,
    /// Device correction in dB
    pub correction: f32,
}

impl CalibrationEntry {
    pub const fn new(frequency: u32, reference: f32, correction: f32) -> Self {
        Self {
            frequency,
            reference,
            correction,
        }
    }
}

/// Default profile: Intel 6 Series/C200 HDA controller, PC volume at maximum.
const DEFAULT_ENTRIES: [CalibrationEntry; 11] = [
    CalibrationEntry::new(125, -81.0, 17.0),
    CalibrationEntry::new(250, -92.0, 12.0),
    CalibrationEntry::new(500, -80.0, -5.0),
    CalibrationEntry::new(750, -85.0, -3.0),
    CalibrationEntry::new(1000, -84.0, -4.0),
    CalibrationEntry::new(1500, -82.0, -4.0),
    CalibrationEntry::new(2000, -90.0, 2.0),
    CalibrationEntry::new(3000, -94.0, 10.0),
    CalibrationEntry::new(4000, -91.0, 11.0),
    CalibrationEntry::new(6000, -70.0, -5.0),
    CalibrationEntry::new(8000, -76.0, 1.0),
];

/// Immutable dBHL → dBFS conversion table
///
/// Serialized as a plain list of entries; deserialization goes through
/// [`CalibrationTable::from_entries`] so duplicates are rejected on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CalibrationEntry>", into = "Vec<CalibrationEntry>")]
pub struct CalibrationTable {
    entries: Vec<CalibrationEntry>,
}

impl CalibrationTable {
    /// Build a table, rejecting duplicate frequencies and non-finite constants
    pub fn from_entries(entries: Vec<CalibrationEntry>) -> Result<Self, CalibrationError> {
        let mut sorted: Vec<CalibrationEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.frequency == 0 {
                return Err(CalibrationError::InvalidEntry {
                    frequency: entry.frequency,
                    reason: "frequency must be positive".to_string(),
                });
            }
            if !entry.reference.is_finite() || !entry.correction.is_finite() {
                return Err(CalibrationError::InvalidEntry {
                    frequency: entry.frequency,
                    reason: format!(
                        "constants must be finite (reference={}, correction={})",
                        entry.reference, entry.correction
                    ),
                });
            }
            match sorted.binary_search_by_key(&entry.frequency, |e| e.frequency) {
                Ok(_) => {
                    return Err(CalibrationError::DuplicateFrequency {
                        frequency: entry.frequency,
                    })
                }
                Err(pos) => sorted.insert(pos, entry),
            }
        }
        Ok(Self { entries: sorted })
    }

    /// Exact-match lookup
    pub fn entry(&self, frequency: u32) -> Result<&CalibrationEntry, CalibrationError> {
        self.entries
            .binary_search_by_key(&frequency, |e| e.frequency)
            .map(|idx| &self.entries[idx])
            .map_err(|_| CalibrationError::Missing { frequency })
    }

    /// `reference + correction + level_dbhl`
    pub fn to_device_level(&self, frequency: u32, level_dbhl: f32) -> Result<f32, CalibrationError> {
        let entry = self.entry(frequency)?;
        Ok(entry.reference + entry.correction + level_dbhl)
    }

    pub fn contains(&self, frequency: u32) -> bool {
        self.entry(frequency).is_ok()
    }

    /// Calibrated frequencies in ascending order
    pub fn frequencies(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.frequency)
    }

    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest dBHL level that still converts to at most 0 dBFS
    pub fn max_undistorted_level(&self, frequency: u32) -> Result<f32, CalibrationError> {
        let entry = self.entry(frequency)?;
        Ok(-(entry.reference + entry.correction))
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let mut entries = DEFAULT_ENTRIES.to_vec();
        entries.sort_by_key(|e| e.frequency);
        Self { entries }
    }
}

impl TryFrom<Vec<CalibrationEntry>> for CalibrationTable {
    type Error = CalibrationError;

    fn try_from(entries: Vec<CalibrationEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<CalibrationTable> for Vec<CalibrationEntry> {
    fn from(table: CalibrationTable) -> Self {
        table.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_table_covers_standard_frequencies() {
        let table = CalibrationTable::default();
        let freqs: Vec<u32> = table.frequencies().collect();
        assert_eq!(
            freqs,
            vec![125, 250, 500, 750, 1000, 1500, 2000, 3000, 4000, 6000, 8000]
        );
    }

    #[test]
    fn test_to_device_level_sums_constants() {
        let table = CalibrationTable::default();
        // 1000 Hz: -84 + -4 + 40 = -48
        assert_eq!(table.to_device_level(1000, 40.0).unwrap(), -48.0);
        // 125 Hz: -81 + 17 + 0 = -64
        assert_eq!(table.to_device_level(125, 0.0).unwrap(), -64.0);
    }

    #[test]
    fn test_uncalibrated_frequency_is_missing() {
        let table = CalibrationTable::default();
        assert_eq!(
            table.to_device_level(1001, 40.0),
            Err(CalibrationError::Missing { frequency: 1001 })
        );
        // No interpolation between 1000 and 1500
        assert!(table.to_device_level(1250, 40.0).is_err());
    }

    #[test]
    fn test_duplicate_frequency_rejected() {
        let result = CalibrationTable::from_entries(vec![
            CalibrationEntry::new(1000, -84.0, -4.0),
            CalibrationEntry::new(1000, -80.0, 0.0),
        ]);
        assert_eq!(
            result,
            Err(CalibrationError::DuplicateFrequency { frequency: 1000 })
        );
    }

    #[test]
    fn test_non_finite_entry_rejected() {
        let result =
            CalibrationTable::from_entries(vec![CalibrationEntry::new(1000, f32::NAN, 0.0)]);
        assert!(matches!(
            result,
            Err(CalibrationError::InvalidEntry {
                frequency: 1000,
                ..
            })
        ));
    }

    #[test]
    fn test_max_undistorted_level() {
        let table = CalibrationTable::default();
        // 6000 Hz: -(-70 + -5) = 75 dBHL is exactly 0 dBFS
        assert_eq!(table.max_undistorted_level(6000).unwrap(), 75.0);
        assert_eq!(table.to_device_level(6000, 75.0).unwrap(), 0.0);
    }

    #[test]
    fn test_json_roundtrip_rejects_duplicates() {
        let json = serde_json::to_string(&CalibrationTable::default()).unwrap();
        let parsed: CalibrationTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CalibrationTable::default());

        let dup = r#"[{"frequency":500,"reference":-80,"correction":-5},
                      {"frequency":500,"reference":-80,"correction":-5}]"#;
        assert!(serde_json::from_str::<CalibrationTable>(dup).is_err());
    }

    proptest! {
        #[test]
        fn lookup_is_exact_match_only(freq in 1u32..20_000, level in -20.0f32..120.0) {
            let table = CalibrationTable::default();
            let calibrated = table.frequencies().any(|f| f == freq);
            let first = table.to_device_level(freq, level);
            let second = table.to_device_level(freq, level);
            prop_assert_eq!(first.clone(), second);
            prop_assert_eq!(first.is_ok(), calibrated);
        }
    }
}

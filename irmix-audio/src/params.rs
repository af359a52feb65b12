//! Parameter store - named, range-clamped, lock-free parameters
//!
//! Every parameter is an `f32` stored as its bit pattern in an `AtomicU32`.
//! The control thread writes by name; the audio thread reads through
//! [`ParamHandle`]s that were resolved once when the DSP objects were built,
//! so no string work ever happens per block.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Number of impulse response slots
pub const NUM_SLOTS: usize = 4;

#[derive(Debug)]
struct Param {
    name: String,
    min: f32,
    max: f32,
    default: f32,
    value: AtomicU32,
}

/// Shared handle to one parameter value
#[derive(Debug, Clone)]
pub struct ParamHandle(Arc<Param>);

impl ParamHandle {
    fn new(name: String, min: f32, max: f32, default: f32) -> Self {
        Self(Arc::new(Param {
            name,
            min,
            max,
            default,
            value: AtomicU32::new(default.to_bits()),
        }))
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.value.load(Ordering::Relaxed))
    }

    /// Current value read as a switch
    #[inline]
    pub fn is_on(&self) -> bool {
        self.get() > 0.5
    }

    /// Store a value, clamped to the parameter range. Returns the stored value.
    pub fn set(&self, value: f32) -> f32 {
        let clamped = if value.is_nan() {
            self.0.default
        } else {
            value.clamp(self.0.min, self.0.max)
        };
        self.0.value.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Valid range (min, max)
    pub fn range(&self) -> (f32, f32) {
        (self.0.min, self.0.max)
    }

    /// Default value
    pub fn default_value(&self) -> f32 {
        self.0.default
    }
}

/// Per-slot parameter handles
#[derive(Debug, Clone)]
pub struct SlotParams {
    pub mute: ParamHandle,
    pub solo: ParamHandle,
    pub level_db: ParamHandle,
    pub pan: ParamHandle,
    pub delay_ms: ParamHandle,
    /// Alignment offset, written only by the alignment apply/revert path
    pub align_ms: ParamHandle,
}

/// Tone chain parameter handles
#[derive(Debug, Clone)]
pub struct ToneParams {
    pub lo_cut_hz: ParamHandle,
    pub hi_cut_hz: ParamHandle,
    pub bass_db: ParamHandle,
    pub mid_gain_db: ParamHandle,
    pub mid_freq_hz: ParamHandle,
    pub mid_q: ParamHandle,
    pub treble_db: ParamHandle,
    pub air_db: ParamHandle,
}

/// The full parameter set of the mixer
#[derive(Debug)]
pub struct ParamStore {
    all: Vec<ParamHandle>,
    slots: [SlotParams; NUM_SLOTS],
    tone: ToneParams,
    output_gain_db: ParamHandle,
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamStore {
    /// Create the parameter layout with default values
    pub fn new() -> Self {
        let mut all = Vec::new();
        let mut add = |name: &str, min: f32, max: f32, default: f32| {
            let handle = ParamHandle::new(name.to_string(), min, max, default);
            all.push(handle.clone());
            handle
        };

        let slots = std::array::from_fn(|i| {
            let n = i + 1;
            SlotParams {
                mute: add(&format!("Slot{n}_Mute"), 0.0, 1.0, 0.0),
                solo: add(&format!("Slot{n}_Solo"), 0.0, 1.0, 0.0),
                level_db: add(&format!("Slot{n}_Level"), -60.0, 6.0, -6.0),
                pan: add(&format!("Slot{n}_Pan"), -100.0, 100.0, 0.0),
                delay_ms: add(&format!("Slot{n}_DelayMs"), 0.0, 10.0, 0.0),
                align_ms: add(&format!("Slot{n}_AlignMs"), 0.0, 10.0, 0.0),
            }
        });

        let tone = ToneParams {
            lo_cut_hz: add("LoCutHz", 20.0, 500.0, 80.0),
            hi_cut_hz: add("HiCutHz", 2000.0, 20000.0, 12000.0),
            bass_db: add("BassGainDb", -12.0, 12.0, 0.0),
            mid_gain_db: add("MidGainDb", -12.0, 12.0, 0.0),
            mid_freq_hz: add("MidFreqHz", 200.0, 6000.0, 1000.0),
            mid_q: add("MidQ", 0.3, 10.0, 1.0),
            treble_db: add("TrebleGainDb", -12.0, 12.0, 0.0),
            air_db: add("AirGainDb", -12.0, 12.0, 0.0),
        };

        let output_gain_db = add("OutputGainDb", -24.0, 6.0, 0.0);

        Self {
            all,
            slots,
            tone,
            output_gain_db,
        }
    }

    /// Independent copy holding the current values
    ///
    /// Offline renders read from a snapshot so that later writes to the live
    /// store cannot leak into a render in progress.
    pub fn snapshot(&self) -> Self {
        let copy = Self::new();
        for (src, dst) in self.all.iter().zip(&copy.all) {
            dst.set(src.get());
        }
        copy
    }

    /// Resolve a parameter by name
    pub fn handle(&self, name: &str) -> Option<&ParamHandle> {
        self.all.iter().find(|p| p.name() == name)
    }

    /// Read a parameter by name
    pub fn get(&self, name: &str) -> Option<f32> {
        self.handle(name).map(ParamHandle::get)
    }

    /// Write a parameter by name (clamped). Returns the stored value.
    pub fn set(&self, name: &str, value: f32) -> Option<f32> {
        self.handle(name).map(|p| p.set(value))
    }

    /// Handles for one slot (0-based)
    pub fn slot(&self, index: usize) -> &SlotParams {
        &self.slots[index]
    }

    /// Tone chain handles
    pub fn tone(&self) -> &ToneParams {
        &self.tone
    }

    /// Output gain handle
    pub fn output_gain_db(&self) -> &ParamHandle {
        &self.output_gain_db
    }

    /// All parameters as (name, value) pairs in layout order
    pub fn values(&self) -> Vec<(String, f32)> {
        self.all.iter().map(|p| (p.name().to_string(), p.get())).collect()
    }

    /// Restore every parameter to its default
    pub fn reset_to_defaults(&self) {
        for p in &self.all {
            p.set(p.default_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = ParamStore::new();
        assert_eq!(store.get("Slot1_Level"), Some(-6.0));
        assert_eq!(store.get("Slot4_Pan"), Some(0.0));
        assert_eq!(store.get("HiCutHz"), Some(12000.0));
        assert_eq!(store.get("MidQ"), Some(1.0));
        assert_eq!(store.get("OutputGainDb"), Some(0.0));
        assert!(!store.slot(2).mute.is_on());
    }

    #[test]
    fn test_writes_are_clamped() {
        let store = ParamStore::new();
        assert_eq!(store.set("Slot2_Pan", 250.0), Some(100.0));
        assert_eq!(store.set("Slot2_DelayMs", -3.0), Some(0.0));
        assert_eq!(store.set("LoCutHz", 5.0), Some(20.0));
        assert_eq!(store.set("OutputGainDb", f32::NAN), Some(0.0));
        assert_eq!(store.slot(1).pan.get(), 100.0);
    }

    #[test]
    fn test_unknown_name() {
        let store = ParamStore::new();
        assert_eq!(store.get("Slot5_Pan"), None);
        assert_eq!(store.set("Volume", 1.0), None);
    }

    #[test]
    fn test_handles_share_value() {
        let store = ParamStore::new();
        let handle = store.slot(0).level_db.clone();
        store.set("Slot1_Level", 3.0);
        assert_eq!(handle.get(), 3.0);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = ParamStore::new();
        store.set("BassGainDb", 4.0);
        let snap = store.snapshot();
        store.set("BassGainDb", -4.0);
        assert_eq!(snap.get("BassGainDb"), Some(4.0));
        assert_eq!(snap.values().len(), store.values().len());
    }

    #[test]
    fn test_reset_to_defaults() {
        let store = ParamStore::new();
        store.set("Slot3_Solo", 1.0);
        store.reset_to_defaults();
        assert_eq!(store.get("Slot3_Solo"), Some(0.0));
    }
}

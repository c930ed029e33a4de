//! Tunable bytes biasing the engine's randomized choices.
//!
//! A knob is one byte out of a fixed array of [`NUM_KNOBS`]. Knob ids are
//! allocated once per process at startup (typically into file-scope statics)
//! and stay stable for the lifetime of the process; the values themselves
//! live in a [`Knobs`] instance that the engine loads from configuration or
//! leaves at zero. The long-term intent is to learn good knob values offline
//! rather than hand-tune them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Total number of knobs.
pub const NUM_KNOBS: usize = 32;

/// Opaque handle to one knob, returned by [`new_id`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnobId(usize);

static REGISTERED_NAMES: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
static REGISTRY_SEALED: AtomicBool = AtomicBool::new(false);

/// Allocates the next knob id and associates `name` with it.
///
/// Panics when more than [`NUM_KNOBS`] ids are requested, or when called
/// after [`seal_registrations`]: ids must be allocated at startup so that
/// their numbering is stable across runs of the same build.
pub fn new_id(name: &'static str) -> KnobId {
    assert!(
        !REGISTRY_SEALED.load(Ordering::Relaxed),
        "knob \"{name}\" registered after the registry was sealed"
    );
    let mut names = REGISTERED_NAMES.lock().unwrap();
    assert!(names.len() < NUM_KNOBS, "out of knob ids (limit {NUM_KNOBS})");
    names.push(name);
    KnobId(names.len() - 1)
}

/// The name `id` was registered with.
pub fn name(id: KnobId) -> &'static str {
    REGISTERED_NAMES.lock().unwrap()[id.0]
}

/// Forbids further [`new_id`] calls. Front ends call this once all their
/// knobs are registered, before entering the fuzzing loop.
pub fn seal_registrations() {
    REGISTRY_SEALED.store(true, Ordering::Relaxed);
}

/// The value array behind the registered knob ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct Knobs {
    values: [u8; NUM_KNOBS],
}

impl Knobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets every knob to `value`.
    pub fn set_all(&mut self, value: u8) {
        self.values = [value; NUM_KNOBS];
    }

    /// Bulk-loads knob values; extra input bytes are ignored.
    pub fn set_from_slice(&mut self, values: &[u8]) {
        let n = values.len().min(NUM_KNOBS);
        self.values[..n].copy_from_slice(&values[..n]);
    }

    /// The current value of the knob behind `id`.
    pub fn value(&self, id: KnobId) -> u8 {
        assert!(id.0 < NUM_KNOBS, "invalid knob id");
        self.values[id.0]
    }

    /// Calls `callback(name, value)` for every registered knob. The registry
    /// lock is not held across callbacks.
    pub fn for_each_knob(&self, mut callback: impl FnMut(&'static str, u8)) {
        let names: Vec<&'static str> = REGISTERED_NAMES.lock().unwrap().clone();
        for (index, knob_name) in names.into_iter().enumerate() {
            callback(knob_name, self.values[index]);
        }
    }

    /// Returns one of `choices`, using the knob values behind `ids` as
    /// probability weights: with `value(a) == 100` and `value(b) == 10`, the
    /// choice behind `a` comes out roughly ten times as often. When every
    /// involved knob is zero the choice is uniform.
    ///
    /// `ids` and `choices` must be non-empty and of equal length.
    pub fn choose<T: Copy>(&self, ids: &[KnobId], choices: &[T], random: u64) -> T {
        assert!(!choices.is_empty(), "choose requires at least one choice");
        assert_eq!(ids.len(), choices.len(), "choose requires matching slices");
        let sum: u64 = ids.iter().map(|&id| self.value(id) as u64).sum();
        if sum == 0 {
            return choices[(random % choices.len() as u64) as usize];
        }
        let target = random % sum;
        let mut partial_sum = 0u64;
        for (&id, &choice) in ids.iter().zip(choices) {
            partial_sum += self.value(id) as u64;
            if partial_sum > target {
                return choice;
            }
        }
        unreachable!("partial sums must cover the target");
    }

    /// Chooses between two strategies based on the knob behind `id`.
    ///
    /// Values 0 and 255 yield `default_value`; 1 always yields `false` and
    /// 254 always `true`. The 252 values in between map linearly onto a
    /// probability of returning `true`.
    pub fn generate_bool(&self, id: KnobId, default_value: bool, random: u64) -> bool {
        let value = self.value(id);
        match value {
            0 | 255 => default_value,
            1 => false,
            254 => true,
            _ => {
                // value is in [2, 253]; 252 knob values remain once the four
                // special cases are excluded.
                const NUM_OTHER_VALUES: u64 = 252;
                (random % NUM_OTHER_VALUES) <= (value - 2) as u64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    // Registered once per process, mirroring the file-scope statics front
    // ends are expected to use.
    static KNOB_A: LazyLock<KnobId> = LazyLock::new(|| new_id("test_knob_a"));
    static KNOB_B: LazyLock<KnobId> = LazyLock::new(|| new_id("test_knob_b"));
    static KNOB_C: LazyLock<KnobId> = LazyLock::new(|| new_id("test_knob_c"));

    #[test]
    fn values_default_to_zero_and_bulk_load() {
        let mut knobs = Knobs::new();
        assert_eq!(knobs.value(*KNOB_A), 0);

        knobs.set_all(7);
        assert_eq!(knobs.value(*KNOB_B), 7);

        let mut loaded = Knobs::new();
        loaded.set_from_slice(&[1, 2]);
        assert_eq!(loaded.value(*KNOB_A), 1);
        assert_eq!(loaded.value(*KNOB_B), 2);
        assert_eq!(loaded.value(*KNOB_C), 0);
    }

    #[test]
    fn registered_names_are_visible_through_for_each_knob() {
        let knobs = Knobs::new();
        let (a, b) = (*KNOB_A, *KNOB_B);
        assert_eq!(name(a), "test_knob_a");
        let mut seen = Vec::new();
        knobs.for_each_knob(|knob_name, value| seen.push((knob_name, value)));
        assert!(seen.contains(&("test_knob_a", 0)));
        assert!(seen.contains(&("test_knob_b", 0)));
        let _ = b;
    }

    #[test]
    fn choose_weights_choices_by_knob_values() {
        let mut knobs = Knobs::new();
        knobs.set_from_slice(&{
            let mut v = [0u8; NUM_KNOBS];
            v[KNOB_A.0] = 100;
            v[KNOB_B.0] = 10;
            v
        });
        let ids = [*KNOB_A, *KNOB_B];
        let choices = ['a', 'b'];
        let mut counts = [0usize; 2];
        for random in 0..1100u64 {
            match knobs.choose(&ids, &choices, random) {
                'a' => counts[0] += 1,
                'b' => counts[1] += 1,
                _ => unreachable!(),
            }
        }
        // Sequential randoms walk the modulus exactly: 100 out of every 110
        // draws pick 'a'.
        assert_eq!(counts[0], 1000);
        assert_eq!(counts[1], 100);
    }

    #[test]
    fn choose_falls_back_to_uniform_when_all_weights_are_zero() {
        let knobs = Knobs::new();
        let ids = [*KNOB_A, *KNOB_B];
        let choices = [10u32, 20];
        assert_eq!(knobs.choose(&ids, &choices, 0), 10);
        assert_eq!(knobs.choose(&ids, &choices, 1), 20);
        assert_eq!(knobs.choose(&ids, &choices, 2), 10);
    }

    #[test]
    fn generate_bool_honors_the_special_values() {
        let mut knobs = Knobs::new();
        let id = *KNOB_A;

        for default in [false, true] {
            // 0 and 255 defer to the default.
            for special in [0u8, 255] {
                let mut v = [0u8; NUM_KNOBS];
                v[id.0] = special;
                knobs.set_from_slice(&v);
                assert_eq!(knobs.generate_bool(id, default, 123), default);
            }
        }

        let mut v = [0u8; NUM_KNOBS];
        v[id.0] = 1;
        knobs.set_from_slice(&v);
        assert!(!knobs.generate_bool(id, true, 99));

        v[id.0] = 254;
        knobs.set_from_slice(&v);
        assert!(knobs.generate_bool(id, false, 99));
    }

    #[test]
    fn generate_bool_is_linear_in_between() {
        let mut knobs = Knobs::new();
        let id = *KNOB_A;
        let mut v = [0u8; NUM_KNOBS];
        v[id.0] = 128;
        knobs.set_from_slice(&v);
        let trues = (0..252u64)
            .filter(|&random| knobs.generate_bool(id, false, random))
            .count();
        // value 128 maps to 127 of the 252 in-between positions.
        assert_eq!(trues, 127);
    }
}

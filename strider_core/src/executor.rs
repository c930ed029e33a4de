//! The engine's seams to the outside world.
//!
//! Target execution, mutation and input filtering are injected as plain
//! function-typed fields rather than trait objects with wide surfaces: the
//! engine only ever needs one operation from each collaborator.

use crate::feature::FeatureVec;
use crate::ByteArray;

/// What the runner reports about one executed input.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    /// Deduplicated, domain-sorted features the input exercised.
    pub features: FeatureVec,
    /// Opaque comparison operands for mutators that consume them.
    pub cmp_args: ByteArray,
}

/// What the runner reports about one executed batch.
///
/// Contract: `results.len()` always equals the number of inputs submitted;
/// on a mid-batch failure the entries past `num_outputs_read` are padding
/// and `num_outputs_read` points at the first input whose output was never
/// seen, i.e. the presumed culprit.
#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    /// Whether every input executed without a failure.
    pub success: bool,
    /// The target's exit code on failure.
    pub exit_code: i32,
    /// The target's combined output, logged in full on failure. Runners
    /// embed their failure descriptions here (e.g. `failure description:
    /// timeout-exceeded`).
    pub log: String,
    /// Number of per-input outputs read back before the batch ended.
    pub num_outputs_read: usize,
    /// Per-input results; same length as the submitted batch.
    pub results: Vec<ExecutionResult>,
}

impl BatchResult {
    /// A successful result with empty features for `num_inputs` inputs.
    pub fn successful(num_inputs: usize) -> Self {
        Self {
            success: true,
            num_outputs_read: num_inputs,
            results: vec![ExecutionResult::default(); num_inputs],
            ..Self::default()
        }
    }
}

/// Executes a batch of inputs against `binary` and reports the outcome.
pub type RunnerFn = Box<dyn FnMut(&str, &[ByteArray]) -> BatchResult>;

/// Mutates a batch of inputs in place. The batch length is fixed; each
/// element may grow, shrink or be replaced wholesale.
pub type MutatorFn = Box<dyn FnMut(&mut [ByteArray])>;

/// Decides whether an input may enter the corpus.
pub type InputFilterFn = Box<dyn FnMut(&[u8]) -> bool>;

/// The injected collaborators of one engine instance.
pub struct Callbacks {
    pub execute: RunnerFn,
    pub mutate: MutatorFn,
    /// `None` admits every input.
    pub input_filter: Option<InputFilterFn>,
    /// A trivially valid input, used to warm up the runner and to seed an
    /// otherwise empty corpus.
    pub dummy_valid_input: ByteArray,
}

impl Callbacks {
    /// Callbacks that execute nothing and mutate nothing. Useful as a base
    /// for tests and tools that only load shards.
    pub fn inert() -> Self {
        Self {
            execute: Box::new(|_, inputs| BatchResult::successful(inputs.len())),
            mutate: Box::new(|_| {}),
            input_filter: None,
            dummy_valid_input: vec![0],
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("input_filter", &self.input_filter.is_some())
            .field("dummy_valid_input", &self.dummy_valid_input)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_batch_results_are_padded_to_the_input_count() {
        let result = BatchResult::successful(3);
        assert!(result.success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.num_outputs_read, 3);
        assert!(result.results.iter().all(|r| r.features.is_empty()));
    }

    #[test]
    fn inert_callbacks_execute_and_mutate_trivially() {
        let mut callbacks = Callbacks::inert();
        let mut batch: Vec<ByteArray> = vec![vec![1], vec![2]];
        (callbacks.mutate)(&mut batch);
        assert_eq!(batch, vec![vec![1], vec![2]]);
        let result = (callbacks.execute)("bin", &batch);
        assert!(result.success);
        assert_eq!(result.results.len(), 2);
    }
}

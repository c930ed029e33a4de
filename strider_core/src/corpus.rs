use std::io::{self, Write};

use rand_core::RngCore;

use crate::control_flow::CoverageFrontier;
use crate::feature::{counter_feature_to_pc_index, domains, FeatureSet, FeatureVec};
use crate::ByteArray;

/// A discrete distribution over indices `0..n` with cheap append, update and
/// removal of the last element.
///
/// Keeps `weights` alongside `prefix_sums`, where `prefix_sums[i]` is the sum
/// of `weights[0..=i]`. Sampling binary-searches the prefix sums, so the
/// probability of index `i` is `weights[i] / sum(weights)` and zero-weight
/// indices are never returned.
///
/// [`WeightedDistribution::change_weight`] invalidates the prefix sums;
/// sampling again before [`WeightedDistribution::recompute_internal_state`]
/// is a programming error and fails fast.
#[derive(Debug, Default)]
pub struct WeightedDistribution {
    weights: Vec<u64>,
    prefix_sums: Vec<u64>,
    prefix_sums_valid: bool,
}

impl WeightedDistribution {
    pub fn new() -> Self {
        Self {
            weights: Vec::new(),
            prefix_sums: Vec::new(),
            prefix_sums_valid: true,
        }
    }

    /// Appends a new index with weight `weight`.
    pub fn add_weight(&mut self, weight: u64) {
        debug_assert_eq!(self.weights.len(), self.prefix_sums.len());
        let running = self.prefix_sums.last().copied().unwrap_or(0);
        self.weights.push(weight);
        self.prefix_sums.push(running + weight);
    }

    /// Updates the weight of index `index`. The distribution is unusable for
    /// sampling until [`WeightedDistribution::recompute_internal_state`].
    pub fn change_weight(&mut self, index: usize, new_weight: u64) {
        self.weights[index] = new_weight;
        self.prefix_sums_valid = false;
    }

    /// Rebuilds the prefix sums after one or more `change_weight` calls.
    pub fn recompute_internal_state(&mut self) {
        let mut running = 0;
        for (weight, prefix) in self.weights.iter().zip(self.prefix_sums.iter_mut()) {
            running += *weight;
            *prefix = running;
        }
        self.prefix_sums_valid = true;
    }

    /// Removes the last index and returns its weight. Prefix sums of the
    /// remaining entries stay intact.
    pub fn pop_back(&mut self) -> u64 {
        self.prefix_sums.pop();
        self.weights.pop().expect("pop_back on empty distribution")
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> u64 {
        if self.prefix_sums_valid {
            self.prefix_sums.last().copied().unwrap_or(0)
        } else {
            self.weights.iter().sum()
        }
    }

    /// Picks an index with probability proportional to its weight, using
    /// `random` as the source of randomness.
    ///
    /// Panics when the distribution is empty, when all weights are zero, or
    /// when called after `change_weight` without an intervening
    /// `recompute_internal_state`.
    pub fn random_index(&self, random: u64) -> usize {
        assert!(!self.weights.is_empty(), "random_index on empty distribution");
        assert!(
            self.prefix_sums_valid,
            "random_index called after change_weight without recompute_internal_state"
        );
        let total = *self.prefix_sums.last().unwrap();
        assert!(total > 0, "random_index with all-zero weights");
        let target = random % total;
        // First index whose prefix sum exceeds the target.
        self.prefix_sums.partition_point(|&sum| sum <= target)
    }

    pub fn size(&self) -> usize {
        self.weights.len()
    }

    pub fn clear(&mut self) {
        self.weights.clear();
        self.prefix_sums.clear();
        self.prefix_sums_valid = true;
    }
}

/// One input and what the engine knows about it.
#[derive(Clone, Debug, Default)]
pub struct CorpusRecord {
    /// The raw bytes fed to the target.
    pub data: ByteArray,
    /// The (pruned) features the input exercised when it was added.
    pub features: FeatureVec,
    /// Opaque comparison operands captured during execution, handed to
    /// mutators that know how to use them.
    pub cmp_args: ByteArray,
}

/// The live set of interesting inputs, with a weighted sampling distribution
/// kept in lockstep.
///
/// Records are appended by [`Corpus::add`] and only ever removed by
/// [`Corpus::prune`]; `num_total` counts every record ever added, including
/// pruned ones. Between mutating calls the distribution always has exactly
/// one entry per active record.
#[derive(Debug, Default)]
pub struct Corpus {
    records: Vec<CorpusRecord>,
    weighted_distribution: WeightedDistribution,
    num_total: usize,
}

impl Corpus {
    /// Appends an active record. Its initial sampling weight combines the
    /// feature-set weight of `features` with the frontier bonus of the PCs
    /// the input touches.
    pub fn add(
        &mut self,
        data: ByteArray,
        features: FeatureVec,
        cmp_args: ByteArray,
        feature_set: &FeatureSet,
        frontier: &CoverageFrontier,
    ) {
        debug_assert_eq!(self.records.len(), self.weighted_distribution.size());
        let weight = Self::record_weight(&features, feature_set, frontier);
        self.records.push(CorpusRecord {
            data,
            features,
            cmp_args,
        });
        self.weighted_distribution.add_weight(weight);
        self.num_total += 1;
    }

    /// Removes every record all of whose features have become frequent, then
    /// evicts uniformly-random records until at most `max_corpus_size` remain.
    /// Returns the number of records removed. `num_total` is unchanged.
    ///
    /// Panics when `max_corpus_size` is zero.
    pub fn prune(
        &mut self,
        feature_set: &FeatureSet,
        frontier: &CoverageFrontier,
        max_corpus_size: usize,
        rng: &mut dyn RngCore,
    ) -> usize {
        assert!(max_corpus_size > 0, "max_corpus_size must be non-zero");
        let num_before = self.records.len();

        // Keep records that still carry at least one infrequent feature,
        // preserving relative order, and refresh the survivors' weights.
        let mut survivors = Vec::with_capacity(num_before);
        let mut weights = Vec::with_capacity(num_before);
        for record in self.records.drain(..) {
            let mut probe = record.features.clone();
            feature_set.count_unseen_and_prune_frequent_features(&mut probe);
            if probe.is_empty() {
                continue; // every feature is frequent now
            }
            weights.push(Self::record_weight(&record.features, feature_set, frontier));
            survivors.push(record);
        }

        // Enforce the size cap by random eviction. Survivor weights are
        // always positive, so a uniform pick never lands on dead weight.
        while survivors.len() > max_corpus_size {
            let index = (rng.next_u64() % survivors.len() as u64) as usize;
            survivors.swap_remove(index);
            weights.swap_remove(index);
        }

        self.records = survivors;
        self.weighted_distribution.clear();
        for &weight in &weights {
            self.weighted_distribution.add_weight(weight);
        }
        num_before - self.records.len()
    }

    /// Number of records currently active (sampleable).
    pub fn num_active(&self) -> usize {
        self.records.len()
    }

    /// Number of records ever added, including ones pruned since.
    pub fn num_total(&self) -> usize {
        self.num_total
    }

    /// All active records, in insertion order.
    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    /// The input bytes of the active record at `index`.
    pub fn get(&self, index: usize) -> &ByteArray {
        &self.records[index].data
    }

    /// The comparison operands of the active record at `index`.
    pub fn get_cmp_args(&self, index: usize) -> &ByteArray {
        &self.records[index].cmp_args
    }

    /// Samples a record with probability proportional to its weight, falling
    /// back to a uniform pick when every weight is zero. Panics on an empty
    /// corpus.
    pub fn weighted_random(&self, random: u64) -> &ByteArray {
        assert!(!self.records.is_empty(), "weighted_random on empty corpus");
        if self.weighted_distribution.total_weight() == 0 {
            return self.uniform_random(random);
        }
        &self.records[self.weighted_distribution.random_index(random)].data
    }

    /// Samples a record uniformly. Panics on an empty corpus.
    pub fn uniform_random(&self, random: u64) -> &ByteArray {
        assert!(!self.records.is_empty(), "uniform_random on empty corpus");
        &self.records[(random % self.records.len() as u64) as usize].data
    }

    /// Largest and average input size over the active records.
    pub fn max_and_avg_size(&self) -> (usize, usize) {
        if self.records.is_empty() {
            return (0, 0);
        }
        let max = self.records.iter().map(|r| r.data.len()).max().unwrap_or(0);
        let total: usize = self.records.iter().map(|r| r.data.len()).sum();
        (max, total / self.records.len())
    }

    /// Renders per-record statistics as a JSON document:
    /// each active record's input size and the current frequency of each of
    /// its features.
    pub fn print_stats(&self, out: &mut dyn Write, feature_set: &FeatureSet) -> io::Result<()> {
        write!(out, "{{ \"corpus_stats\": [")?;
        let mut record_sep = "\n";
        for record in &self.records {
            write!(
                out,
                "{record_sep}  {{\"size\": {}, \"frequencies\": [",
                record.data.len()
            )?;
            record_sep = ",\n";
            let mut feature_sep = "";
            for &feature in &record.features {
                write!(out, "{feature_sep}{}", feature_set.frequency(feature))?;
                feature_sep = ", ";
            }
            write!(out, "]}}")?;
        }
        writeln!(out, "]}}")
    }

    /// Weight of a record: the rarity-based feature weight plus a bonus for
    /// touching frontier blocks.
    fn record_weight(
        features: &FeatureVec,
        feature_set: &FeatureSet,
        frontier: &CoverageFrontier,
    ) -> u64 {
        feature_set.compute_weight(features) as u64 + Self::frontier_bonus(features, frontier)
    }

    fn frontier_bonus(features: &FeatureVec, frontier: &CoverageFrontier) -> u64 {
        let mut bonus = 0u64;
        for &feature in features {
            if !domains::COUNTERS_8BIT.contains(feature) {
                continue;
            }
            let pc_index = counter_feature_to_pc_index(feature);
            if pc_index < frontier.num_pcs() && frontier.pc_index_is_frontier(pc_index) {
                bonus += frontier.frontier_weight(pc_index) as u64;
            }
        }
        bonus
    }
}

use std::collections::HashMap;

/// An abstract signal about one program execution, encoded as an opaque
/// 64-bit value.
///
/// A feature may represent an executed edge together with a bucketed counter
/// value, a data-flow pair, a comparison trace, a bounded control-flow path,
/// or anything else the runner chooses to report. The numeric space is
/// partitioned into disjoint [`domains::Domain`] ranges so that features of
/// different kinds never collide and can be accounted for separately.
pub type Feature = u64;

/// An ordered sequence of features describing one input, with no duplicates.
///
/// By convention vectors arrive deduplicated and sorted by domain; the engine
/// only ever shrinks them in place (see
/// [`FeatureSet::count_unseen_and_prune_frequent_features`]).
pub type FeatureVec = Vec<Feature>;

pub mod domains {
    //! The fixed partition of the feature space.
    //!
    //! Each domain owns a contiguous range of `DOMAIN_SIZE` values. Domains
    //! are identified by a small integer id; the id also determines the
    //! range's base offset.

    use super::Feature;

    /// Capacity of a single domain.
    pub const DOMAIN_SIZE: u64 = 1 << 32;

    /// Number of domains, including the reserved one.
    pub const NUM_DOMAINS: usize = 5;

    /// One contiguous range of the feature space.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Domain {
        id: usize,
    }

    /// Features derived from 8-bit edge counters: one feature per
    /// (PC index, bucketed counter value) pair.
    pub const COUNTERS_8BIT: Domain = Domain { id: 0 };
    /// Features derived from load instructions: (caller PC offset, global
    /// address offset) pairs.
    pub const DATA_FLOW: Domain = Domain { id: 1 };
    /// Features derived from comparison instructions.
    pub const CMP: Domain = Domain { id: 2 };
    /// Features derived from hashing the last N executed PCs.
    pub const BOUNDED_PATH: Domain = Domain { id: 3 };
    /// Reserved domain, also used by tests.
    pub const UNKNOWN: Domain = Domain { id: 4 };

    impl Domain {
        /// The domain's integer id, in `[0, NUM_DOMAINS)`.
        pub const fn id(self) -> usize {
            self.id
        }

        /// First feature value belonging to this domain.
        pub const fn begin(self) -> Feature {
            self.id as u64 * DOMAIN_SIZE
        }

        /// One past the last feature value belonging to this domain.
        pub const fn end(self) -> Feature {
            self.begin() + DOMAIN_SIZE
        }

        /// Whether `feature` falls into this domain's range.
        pub const fn contains(self, feature: Feature) -> bool {
            feature >= self.begin() && feature < self.end()
        }

        /// Maps an arbitrary number into this domain's range.
        pub const fn convert_to_me(self, num: u64) -> Feature {
            self.begin() + num % DOMAIN_SIZE
        }

        /// The domain a feature belongs to. Values past the last defined
        /// domain are folded into [`UNKNOWN`].
        pub fn of(feature: Feature) -> Domain {
            let id = (feature / DOMAIN_SIZE) as usize;
            Domain {
                id: id.min(NUM_DOMAINS - 1),
            }
        }
    }
}

/// Buckets an 8-bit edge counter value into one of 8 logarithmic classes.
///
/// Counters grow roughly geometrically, so nearby values carry the same
/// signal; bucketing keeps the per-PC feature count small.
pub fn bucketize_counter(value: u8) -> u64 {
    match value {
        0 => unreachable!("zero counters are never reported"),
        1 => 0,
        2 => 1,
        3 => 2,
        4..=5 => 3,
        6..=7 => 4,
        8..=15 => 5,
        16..=127 => 6,
        128..=u8::MAX => 7,
    }
}

/// Packs a (PC index, counter value) pair into a domain-relative number,
/// suitable for [`domains::COUNTERS_8BIT`]`.convert_to_me`.
pub fn counter_to_number(pc_index: usize, counter_value: u8) -> u64 {
    pc_index as u64 * 8 + bucketize_counter(counter_value)
}

/// Recovers the PC index from a [`domains::COUNTERS_8BIT`] feature.
pub fn counter_feature_to_pc_index(feature: Feature) -> usize {
    debug_assert!(domains::COUNTERS_8BIT.contains(feature));
    ((feature - domains::COUNTERS_8BIT.begin()) / 8) as usize
}

/// Frequency-bounded accounting of every feature the shard has observed.
///
/// The set maps each feature to an 8-bit frequency saturating at
/// `frequency_threshold`. Once a feature reaches the threshold it is
/// considered *frequent*: it is pruned from every subsequently evaluated
/// vector and never contributes to corpus growth again. The set also tracks
/// how many distinct features each domain has produced, which feeds the
/// per-input weight computation.
#[derive(Debug)]
pub struct FeatureSet {
    frequency_threshold: u8,
    frequencies: HashMap<Feature, u8>,
    features_per_domain: [usize; domains::NUM_DOMAINS],
    num_features: usize,
}

impl FeatureSet {
    /// Creates an empty set. `frequency_threshold` must be in `[2, 255]`.
    pub fn new(frequency_threshold: u8) -> Self {
        assert!(
            frequency_threshold >= 2,
            "frequency_threshold must be at least 2, got {frequency_threshold}"
        );
        Self {
            frequency_threshold,
            frequencies: HashMap::new(),
            features_per_domain: [0; domains::NUM_DOMAINS],
            num_features: 0,
        }
    }

    /// The recorded frequency of `feature`, zero if never incremented.
    pub fn frequency(&self, feature: Feature) -> u8 {
        self.frequencies.get(&feature).copied().unwrap_or(0)
    }

    /// Number of distinct features observed so far, across all domains.
    pub fn size(&self) -> usize {
        self.num_features
    }

    /// Number of distinct features observed in `domain`.
    pub fn count_features(&self, domain: domains::Domain) -> usize {
        self.features_per_domain[domain.id()]
    }

    /// Returns how many features in `features` have never been observed,
    /// and removes from `features`, in place, every feature whose frequency
    /// has already reached the threshold. Relative order of the remaining
    /// elements is preserved. Idempotent: a second call on the resulting
    /// vector returns the same count and leaves the vector unchanged.
    pub fn count_unseen_and_prune_frequent_features(&self, features: &mut FeatureVec) -> usize {
        let mut num_unseen = 0;
        features.retain(|&f| {
            let frequency = self.frequency(f);
            if frequency == 0 {
                num_unseen += 1;
            }
            frequency < self.frequency_threshold
        });
        num_unseen
    }

    /// Bumps the saturating frequency counter of every feature in `features`.
    /// First-time features also bump their domain's distinct-feature count.
    pub fn increment_frequencies(&mut self, features: &FeatureVec) {
        for &feature in features {
            let entry = self.frequencies.entry(feature).or_insert(0);
            if *entry == 0 {
                self.features_per_domain[domains::Domain::of(feature).id()] += 1;
                self.num_features += 1;
            }
            if *entry < self.frequency_threshold {
                *entry += 1;
            }
        }
    }

    /// Computes the weight of an input with the given features.
    ///
    /// Each feature contributes the product of two factors: a domain scale
    /// that is inversely monotone in the domain's distinct-feature count
    /// (features from sparsely populated domains are more valuable), and a
    /// rarity factor strictly decreasing in the feature's frequency. The
    /// contributions are summed, so adding a feature never lowers the total.
    ///
    /// Panics if any feature in `features` has never been passed to
    /// [`FeatureSet::increment_frequencies`].
    pub fn compute_weight(&self, features: &FeatureVec) -> u32 {
        let mut weight: u64 = 0;
        for &feature in features {
            let frequency = self.frequency(feature) as u64;
            assert!(
                frequency > 0,
                "compute_weight: feature {feature} was never incremented"
            );
            let domain_count = self.count_features(domains::Domain::of(feature)) as u64;
            let domain_scale = 256 * self.num_features as u64 / domain_count;
            let rarity = 65536 / frequency;
            weight = weight.saturating_add(domain_scale * rarity);
        }
        weight.min(u32::MAX as u64) as u32
    }

    /// The sorted PC indices covered by the observed 8-bit counter features.
    pub fn to_coverage_pc_indices(&self) -> Vec<usize> {
        let mut pcs: Vec<usize> = self
            .frequencies
            .keys()
            .filter(|f| domains::COUNTERS_8BIT.contains(**f))
            .map(|&f| counter_feature_to_pc_index(f))
            .collect();
        pcs.sort_unstable();
        pcs.dedup();
        pcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_disjoint_and_convert_into_their_own_range() {
        let all = [
            domains::COUNTERS_8BIT,
            domains::DATA_FLOW,
            domains::CMP,
            domains::BOUNDED_PATH,
            domains::UNKNOWN,
        ];
        for (i, d) in all.iter().enumerate() {
            assert_eq!(d.id(), i);
            assert!(d.contains(d.begin()));
            assert!(d.contains(d.end() - 1));
            assert!(!d.contains(d.end()));
            let converted = d.convert_to_me(u64::MAX - 17);
            assert!(d.contains(converted));
            assert_eq!(domains::Domain::of(converted), *d);
        }
        // Ids beyond the table fold into the reserved domain.
        assert_eq!(domains::Domain::of(u64::MAX), domains::UNKNOWN);
    }

    #[test]
    fn counter_bucketing_is_monotone_and_has_eight_classes() {
        let mut last_bucket = 0;
        for value in 1..=u8::MAX {
            let bucket = bucketize_counter(value);
            assert!(bucket >= last_bucket, "bucket dropped at counter {value}");
            assert!(bucket < 8);
            last_bucket = bucket;
        }
        assert_eq!(bucketize_counter(1), 0);
        assert_eq!(bucketize_counter(u8::MAX), 7);
    }

    #[test]
    fn counter_features_round_trip_to_pc_indices() {
        for pc_index in [0usize, 1, 7, 1000] {
            for counter in [1u8, 2, 17, 255] {
                let feature =
                    domains::COUNTERS_8BIT.convert_to_me(counter_to_number(pc_index, counter));
                assert_eq!(counter_feature_to_pc_index(feature), pc_index);
            }
        }
    }

    #[test]
    fn count_unseen_and_prune_follows_the_frequency_threshold() {
        let threshold = 3;
        let fs = &mut FeatureSet::new(threshold);

        // Unseen features are counted but kept.
        let mut features: FeatureVec = vec![10, 20];
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 2);
        assert_eq!(fs.size(), 0);
        assert_eq!(features, vec![10, 20]);

        // Two increments of {10}: still below the threshold.
        for _ in 0..2 {
            features = vec![10, 20];
            fs.increment_frequencies(&vec![10]);
            assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 1);
            assert_eq!(fs.size(), 1);
            assert_eq!(features, vec![10, 20]);
        }

        // Third increment makes {10} frequent; it gets pruned in place.
        features = vec![10, 20];
        fs.increment_frequencies(&vec![10]);
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 1);
        assert_eq!(fs.size(), 1);
        assert_eq!(features, vec![20]);

        // A new feature {30} does not resurrect {10}.
        features = vec![10, 20];
        fs.increment_frequencies(&vec![30]);
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 1);
        assert_eq!(fs.size(), 2);
        assert_eq!(features, vec![20]);

        features = vec![10, 20, 30];
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 1);
        assert_eq!(features, vec![20, 30]);

        // Push {30} over the threshold as well.
        features = vec![10, 20, 30];
        fs.increment_frequencies(&vec![30]);
        fs.increment_frequencies(&vec![30]);
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 1);
        assert_eq!(fs.size(), 2);
        assert_eq!(features, vec![20]);

        // After {20} is seen twice, nothing in the vector is unseen.
        features = vec![10, 20, 30];
        fs.increment_frequencies(&vec![20]);
        fs.increment_frequencies(&vec![20]);
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 0);
        assert_eq!(fs.size(), 3);
        assert_eq!(features, vec![20]);

        // And the third increment empties the vector entirely.
        features = vec![10, 20, 30];
        fs.increment_frequencies(&vec![20]);
        assert_eq!(fs.count_unseen_and_prune_frequent_features(&mut features), 0);
        assert_eq!(fs.size(), 3);
        assert_eq!(features, Vec::<u64>::new());
    }

    #[test]
    fn count_unseen_and_prune_is_idempotent() {
        let fs = &mut FeatureSet::new(2);
        fs.increment_frequencies(&vec![5, 6]);
        fs.increment_frequencies(&vec![5]);
        let mut features: FeatureVec = vec![5, 6, 7];
        let first = fs.count_unseen_and_prune_frequent_features(&mut features);
        let after_first = features.clone();
        let second = fs.count_unseen_and_prune_frequent_features(&mut features);
        assert_eq!(first, second);
        assert_eq!(features, after_first);
    }

    #[test]
    fn compute_weight_prefers_rare_features() {
        let fs = &mut FeatureSet::new(10);
        fs.increment_frequencies(&vec![1, 2, 3]);
        assert_eq!(fs.compute_weight(&vec![1]), fs.compute_weight(&vec![2]));
        assert_eq!(fs.compute_weight(&vec![1]), fs.compute_weight(&vec![3]));

        fs.increment_frequencies(&vec![1, 2]);
        assert!(fs.compute_weight(&vec![3]) > fs.compute_weight(&vec![2]));
        assert!(fs.compute_weight(&vec![3]) > fs.compute_weight(&vec![1]));
        assert!(fs.compute_weight(&vec![3, 1]) > fs.compute_weight(&vec![2, 1]));
        assert!(fs.compute_weight(&vec![3, 2]) > fs.compute_weight(&vec![2]));

        fs.increment_frequencies(&vec![1]);
        assert!(fs.compute_weight(&vec![3]) > fs.compute_weight(&vec![2]));
        assert!(fs.compute_weight(&vec![2]) > fs.compute_weight(&vec![1]));
        assert!(fs.compute_weight(&vec![3, 2]) > fs.compute_weight(&vec![3, 1]));
    }

    #[test]
    #[should_panic(expected = "never incremented")]
    fn compute_weight_rejects_unseen_features() {
        let fs = &mut FeatureSet::new(10);
        fs.increment_frequencies(&vec![1, 2, 3]);
        fs.compute_weight(&vec![4]);
    }

    #[test]
    fn compute_weight_prefers_sparsely_populated_domains() {
        let fs = &mut FeatureSet::new(10);
        let f1 = domains::COUNTERS_8BIT.begin();
        let f2 = domains::CMP.begin();
        let f3 = domains::BOUNDED_PATH.begin();
        // One counter feature, two cmp features, three path features: the
        // counter domain is the rarest.
        fs.increment_frequencies(&vec![f1, f2, f2 + 1, f3, f3 + 1, f3 + 2]);
        assert!(fs.compute_weight(&vec![f1]) > fs.compute_weight(&vec![f2]));
        assert!(fs.compute_weight(&vec![f2]) > fs.compute_weight(&vec![f3]));
    }

    #[test]
    fn compute_weight_is_monotone_under_supersets() {
        let fs = &mut FeatureSet::new(10);
        fs.increment_frequencies(&vec![1, 2, 3]);
        fs.increment_frequencies(&vec![1]);
        let subset = fs.compute_weight(&vec![2, 3]);
        let superset = fs.compute_weight(&vec![1, 2, 3]);
        assert!(superset >= subset);
    }

    #[test]
    fn coverage_pcs_come_only_from_the_counter_domain() {
        let fs = &mut FeatureSet::new(10);
        let pc3 = domains::COUNTERS_8BIT.convert_to_me(counter_to_number(3, 1));
        let pc7_a = domains::COUNTERS_8BIT.convert_to_me(counter_to_number(7, 1));
        let pc7_b = domains::COUNTERS_8BIT.convert_to_me(counter_to_number(7, 255));
        let cmp = domains::CMP.convert_to_me(1234);
        fs.increment_frequencies(&vec![pc7_a, cmp, pc3, pc7_b]);
        assert_eq!(fs.to_coverage_pc_indices(), vec![3, 7]);
    }
}

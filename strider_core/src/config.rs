use std::path::PathBuf;

use serde::Deserialize;

/// Everything that parameterizes one shard of the engine.
///
/// An `Environment` can be loaded from a TOML file, after which front ends
/// typically override individual fields from command-line flags. Unknown
/// keys in the file are rejected to catch typos early.
#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Environment {
    /// Number of cooperating shards; each runs in its own process.
    pub total_shards: usize,
    /// Index of this shard, in `[0, total_shards)`.
    pub my_shard_index: usize,
    /// Seed for the shard's random number generator.
    pub seed: u64,
    /// Total number of target executions this shard performs.
    pub num_runs: usize,
    /// Number of inputs shipped to the runner per batch.
    pub batch_size: usize,
    /// Per-batch timeout, in seconds, enforced by the runner.
    pub timeout: u64,

    /// The shared working directory all shards append into.
    pub workdir: PathBuf,
    /// The instrumented target binary.
    pub binary: String,
    /// Additional binaries every batch is also executed against.
    pub extra_binaries: Vec<String>,
    /// External command deciding whether an input may enter the corpus.
    pub input_filter: String,
    /// Comma-separated function names; inputs enter the corpus only if they
    /// touch one of them. Empty means no filtering.
    pub function_filter: String,
    /// Local directories that receive a copy of every new corpus input.
    pub corpus_dir: Vec<PathBuf>,
    /// Foreign working directory to merge this shard's counterpart from.
    pub merge_from: Option<PathBuf>,

    /// Sample inputs by weight rather than uniformly.
    pub use_corpus_weights: bool,
    /// Load all shards at startup instead of just this one.
    pub full_sync: bool,
    /// Stop fuzzing after the first crash report.
    pub exit_on_crash: bool,
    /// Dump the active corpus to the distilled path after the initial load.
    pub distill: bool,

    /// Prune the corpus every this many additions; zero disables pruning.
    pub prune_frequency: usize,
    /// Load a random other shard every this many batches; zero disables.
    pub load_other_shard_frequency: usize,
    /// Upper bound on crash reports produced by this shard.
    pub max_num_crash_reports: usize,
    /// Upper bound on active corpus records enforced by pruning.
    pub max_corpus_size: usize,

    /// Minimum importance a status line needs to be emitted.
    pub log_level: usize,
    /// Verbosity of per-PC coverage logging.
    pub v: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            total_shards: 1,
            my_shard_index: 0,
            seed: 1,
            num_runs: 1_000_000,
            batch_size: 1000,
            timeout: 60,
            workdir: PathBuf::new(),
            binary: String::new(),
            extra_binaries: Vec::new(),
            input_filter: String::new(),
            function_filter: String::new(),
            corpus_dir: Vec::new(),
            merge_from: None,
            use_corpus_weights: true,
            full_sync: false,
            exit_on_crash: false,
            distill: false,
            prune_frequency: 100,
            load_other_shard_frequency: 10,
            max_num_crash_reports: 5,
            max_corpus_size: 100_000,
            log_level: 1,
            v: 0,
        }
    }
}

impl Environment {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        let env: Environment = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;
        env.validate()?;
        Ok(env)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.total_shards == 0 {
            anyhow::bail!("total-shards must be at least 1");
        }
        if self.my_shard_index >= self.total_shards {
            anyhow::bail!(
                "my-shard-index {} out of range for {} shards",
                self.my_shard_index,
                self.total_shards
            );
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch-size must be at least 1");
        }
        if self.max_corpus_size == 0 {
            anyhow::bail!("max-corpus-size must be at least 1");
        }
        Ok(())
    }

    /// Whether this shard dumps a distilled corpus.
    pub fn distilling_in_this_shard(&self) -> bool {
        self.distill
    }

    /// Corpus stats are maintained by a single shard to avoid N writers.
    pub fn generating_corpus_stats_in_this_shard(&self) -> bool {
        self.my_shard_index == 0
    }

    /// Same single-writer rule for the coverage report.
    pub fn generating_coverage_report_in_this_shard(&self) -> bool {
        self.my_shard_index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_single_local_shard() {
        let env = Environment::default();
        assert_eq!(env.total_shards, 1);
        assert_eq!(env.my_shard_index, 0);
        assert!(env.use_corpus_weights);
        assert!(!env.full_sync);
        assert!(env.validate().is_ok());
        assert!(env.generating_corpus_stats_in_this_shard());
    }

    #[test]
    fn toml_files_override_defaults_and_reject_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        std::fs::write(
            &path,
            r#"
            total-shards = 8
            my-shard-index = 3
            seed = 42
            num-runs = 5000
            binary = "/bins/target"
            use-corpus-weights = false
            extra-binaries = ["/bins/other"]
            "#,
        )
        .unwrap();
        let env = Environment::load_from_file(&path).unwrap();
        assert_eq!(env.total_shards, 8);
        assert_eq!(env.my_shard_index, 3);
        assert_eq!(env.seed, 42);
        assert_eq!(env.num_runs, 5000);
        assert_eq!(env.extra_binaries, vec!["/bins/other".to_string()]);
        assert!(!env.use_corpus_weights);
        // Untouched fields keep their defaults.
        assert_eq!(env.batch_size, 1000);
        assert!(!env.generating_corpus_stats_in_this_shard());

        std::fs::write(&path, "no-such-knob = 1").unwrap();
        assert!(Environment::load_from_file(&path).is_err());
    }

    #[test]
    fn validation_rejects_inconsistent_sharding() {
        let mut env = Environment {
            my_shard_index: 5,
            total_shards: 2,
            ..Default::default()
        };
        assert!(env.validate().is_err());
        env.my_shard_index = 1;
        assert!(env.validate().is_ok());
        env.batch_size = 0;
        assert!(env.validate().is_err());
    }
}

//! The per-shard fuzzing loop.
//!
//! One `Engine` owns one shard: it loads the shard's append-only files (and
//! periodically its peers'), then runs batches of sample → mutate → execute
//! → evaluate, appending every interesting input to the shard's corpus and
//! features files. All cross-shard coordination happens through those files;
//! shards never share memory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use thiserror::Error;

use crate::blob::{
    input_hash, input_hash_hex, BlobError, BlobFileReader, BlobFileWriter, FeaturesRecord,
};
use crate::config::Environment;
use crate::control_flow::{BinaryInfo, CoverageFrontier, PcTable};
use crate::corpus::Corpus;
use crate::executor::{BatchResult, Callbacks};
use crate::exit::EarlyExit;
use crate::feature::{counter_feature_to_pc_index, domains, FeatureSet, FeatureVec};
use crate::symbols::{CoverageLogger, FunctionFilter, SymbolTable};
use crate::workdir::{write_to_local_hashed_file_in_dir, WorkdirLayout};
use crate::ByteArray;

// How often a feature may be seen before it stops mattering. An ad-hoc
// constant; nothing principled is known to beat it yet.
const FREQUENCY_THRESHOLD: u8 = 100;

/// Errors that abort a shard.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// The writable ends of this shard's append-only files. Held open for the
/// duration of the loop; dropping the bundle releases the handles on every
/// exit path.
struct FileBundle {
    corpus_file: BlobFileWriter,
    features_file: BlobFileWriter,
}

impl FileBundle {
    fn open(layout: &WorkdirLayout, shard_index: usize) -> Result<Self, BlobError> {
        Ok(Self {
            corpus_file: BlobFileWriter::open_append(&layout.corpus_path(shard_index))?,
            features_file: BlobFileWriter::open_append(&layout.features_path(shard_index))?,
        })
    }
}

/// One shard of the fuzzing engine.
pub struct Engine {
    env: Environment,
    callbacks: Callbacks,
    rng: ChaCha8Rng,
    feature_set: FeatureSet,
    corpus: Corpus,
    coverage_frontier: CoverageFrontier,
    function_filter: FunctionFilter,
    coverage_logger: CoverageLogger,
    pc_table: PcTable,
    symbols: SymbolTable,
    layout: WorkdirLayout,
    early_exit: Arc<EarlyExit>,
    num_runs: usize,
    num_crash_reports: usize,
    start_time: Instant,
    coverage_log_verbosity: usize,
}

impl Engine {
    pub fn new(
        env: Environment,
        binary_info: BinaryInfo,
        callbacks: Callbacks,
        early_exit: Arc<EarlyExit>,
    ) -> Self {
        let layout = WorkdirLayout::new(&env);
        let rng = ChaCha8Rng::seed_from_u64(env.seed);
        let function_filter = FunctionFilter::new(&env.function_filter, &binary_info.symbols);
        let pc_table = binary_info.pc_table.clone();
        let symbols = binary_info.symbols.clone();
        Self {
            env,
            callbacks,
            rng,
            feature_set: FeatureSet::new(FREQUENCY_THRESHOLD),
            corpus: Corpus::default(),
            coverage_frontier: CoverageFrontier::new(binary_info),
            function_filter,
            coverage_logger: CoverageLogger::new(),
            pc_table,
            symbols,
            layout,
            early_exit,
            num_runs: 0,
            num_crash_reports: 0,
            start_time: Instant::now(),
            coverage_log_verbosity: 0,
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn feature_set(&self) -> &FeatureSet {
        &self.feature_set
    }

    pub fn num_runs(&self) -> usize {
        self.num_runs
    }

    pub fn num_crash_reports(&self) -> usize {
        self.num_crash_reports
    }

    /// Runs this shard to completion: warmup, initial load, optional merge
    /// and distillation, then `num_runs` target executions in batches.
    pub fn fuzzing_loop(&mut self) -> Result<(), EngineError> {
        self.layout.ensure_dirs()?;
        info!(
            "shard: {}/{}",
            self.env.my_shard_index, self.env.total_shards
        );

        // Warmup: one throwaway execution so the runner initializes its
        // instrumentation tables.
        let binary = self.env.binary.clone();
        let dummy = self.callbacks.dummy_valid_input.clone();
        let _ = (self.callbacks.execute)(&binary, std::slice::from_ref(&dummy));

        self.log_status("begin-fuzz", 0);

        let own_layout = self.layout.clone();
        if self.env.full_sync || self.env.distilling_in_this_shard() {
            // Load every shard, in random order so concurrent shards don't
            // hammer the same peer files in lockstep.
            let mut shards: Vec<usize> = (0..self.env.total_shards).collect();
            shards.shuffle(&mut self.rng);
            for (num_loaded, shard) in shards.into_iter().enumerate() {
                self.load_shard(&own_layout, shard, shard == self.env.my_shard_index)?;
                if (num_loaded + 1) % 100 == 0 {
                    info!("shards loaded: {}", num_loaded + 1);
                }
            }
        } else {
            self.load_shard(&own_layout, self.env.my_shard_index, true)?;
        }

        if let Some(merge_from) = self.env.merge_from.clone() {
            self.merge_from_other_corpus(&merge_from, self.env.my_shard_index)?;
        }

        let mut out_files = FileBundle::open(&self.layout, self.env.my_shard_index)?;

        // Sampling needs at least one record to draw from.
        if self.corpus.num_total() == 0 {
            self.corpus
                .add(dummy, vec![], vec![], &self.feature_set, &self.coverage_frontier);
        }

        self.log_status("init-done", 0);
        // Shard loading must not pollute the execution statistics.
        self.start_time = Instant::now();
        self.num_runs = 0;
        self.coverage_log_verbosity = 1;

        if self.env.distilling_in_this_shard() {
            self.distill_corpus()?;
        }
        self.generate_coverage_report()?;

        let number_of_batches = self.env.num_runs.div_ceil(self.env.batch_size.max(1));
        let mut new_runs = 0;
        for batch_index in 0..number_of_batches {
            if self.early_exit.requested() {
                break;
            }
            let batch_size = self.env.batch_size.min(self.env.num_runs - new_runs);
            let mut inputs: Vec<ByteArray> = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                let random = self.rng.next_u64();
                let data = if self.env.use_corpus_weights {
                    self.corpus.weighted_random(random)
                } else {
                    self.corpus.uniform_random(random)
                };
                inputs.push(data.clone());
            }
            (self.callbacks.mutate)(&mut inputs);
            let gained_new_coverage = self.run_batch(
                &inputs,
                Some(&mut out_files.corpus_file),
                Some(&mut out_files.features_file),
                None,
            )?;
            new_runs += inputs.len();

            let batch_is_power_of_two = (batch_index & batch_index.wrapping_sub(1)) == 0;
            if gained_new_coverage {
                self.log_status("new-feature", 1);
            } else if batch_is_power_of_two {
                self.log_status("pulse", 1);
            }
            if batch_is_power_of_two {
                self.coverage_frontier.compute(&self.corpus);
                self.generate_corpus_stats()?;
            }

            if self.env.load_other_shard_frequency != 0
                && batch_index % self.env.load_other_shard_frequency == 0
                && self.env.total_shards > 1
            {
                let random = self.rng.next_u64() as usize % (self.env.total_shards - 1);
                let other_shard_index =
                    (self.env.my_shard_index + 1 + random) % self.env.total_shards;
                self.load_shard(&own_layout, other_shard_index, false)?;
            }
        }
        self.log_status("end-fuzz", 0);
        Ok(())
    }

    /// Executes one batch and folds the results into the feature set, the
    /// corpus and the shard files. Returns whether any input in the batch
    /// contributed a previously unseen feature.
    fn run_batch(
        &mut self,
        inputs: &[ByteArray],
        mut corpus_file: Option<&mut BlobFileWriter>,
        mut features_file: Option<&mut BlobFileWriter>,
        mut unconditional_features_file: Option<&mut BlobFileWriter>,
    ) -> Result<bool, EngineError> {
        let binary = self.env.binary.clone();
        let mut batch_result = BatchResult::default();
        let mut success = self.execute_and_report_crash(&binary, inputs, &mut batch_result)?;
        assert_eq!(
            inputs.len(),
            batch_result.results.len(),
            "runner broke the batch contract"
        );

        for extra_binary in self.env.extra_binaries.clone() {
            let mut extra_batch_result = BatchResult::default();
            success =
                self.execute_and_report_crash(&extra_binary, inputs, &mut extra_batch_result)?
                    && success;
        }
        if !success && self.env.exit_on_crash {
            info!("exit-on-crash is enabled; exiting soon");
            self.early_exit.request(1);
            return Ok(false);
        }

        self.num_runs += inputs.len();
        let mut batch_gained_new_coverage = false;
        for (input, result) in inputs.iter().zip(batch_result.results.iter_mut()) {
            let features = &mut result.features;
            let function_filter_passed = self.function_filter.filter(features);
            let num_unseen = self
                .feature_set
                .count_unseen_and_prune_frequent_features(features);
            if let Some(file) = unconditional_features_file.as_deref_mut() {
                let packed = FeaturesRecord::for_input(input, features.clone()).pack()?;
                file.write_blob(&packed)?;
            }
            if num_unseen == 0 {
                continue;
            }
            if !self.input_passes_filter(input) {
                debug!("input rejected by the input filter");
                continue;
            }
            self.feature_set.increment_frequencies(features);
            self.log_features_as_symbols(features);
            batch_gained_new_coverage = true;
            debug_assert!(!features.is_empty());
            if function_filter_passed {
                let cmp_args = std::mem::take(&mut result.cmp_args);
                self.corpus.add(
                    input.clone(),
                    result.features.clone(),
                    cmp_args,
                    &self.feature_set,
                    &self.coverage_frontier,
                );
            }
            if self.env.prune_frequency != 0
                && self.corpus.num_total() % self.env.prune_frequency == 0
            {
                self.corpus.prune(
                    &self.feature_set,
                    &self.coverage_frontier,
                    self.env.max_corpus_size,
                    &mut self.rng,
                );
            }
            if let Some(file) = corpus_file.as_deref_mut() {
                file.write_blob(input)?;
            }
            if let Some(dir) = self.env.corpus_dir.first() {
                write_to_local_hashed_file_in_dir(dir, input)?;
            }
            if let Some(file) = features_file.as_deref_mut() {
                let packed = FeaturesRecord::for_input(input, result.features.clone()).pack()?;
                file.write_blob(&packed)?;
            }
        }
        Ok(batch_gained_new_coverage)
    }

    fn execute_and_report_crash(
        &mut self,
        binary: &str,
        inputs: &[ByteArray],
        batch_result: &mut BatchResult,
    ) -> Result<bool, EngineError> {
        *batch_result = (self.callbacks.execute)(binary, inputs);
        if !batch_result.success {
            self.report_crash(binary, inputs, batch_result)?;
        }
        Ok(batch_result.success)
    }

    /// Localizes and persists a reproducer for a failed batch.
    ///
    /// First suspect is the input whose output was never read back; failing
    /// that, every input is retried alone. A crash that only manifests for a
    /// combination of inputs is reported but not localized.
    fn report_crash(
        &mut self,
        binary: &str,
        inputs: &[ByteArray],
        batch_result: &BatchResult,
    ) -> Result<(), EngineError> {
        if self.num_crash_reports >= self.env.max_num_crash_reports {
            return Ok(());
        }
        info!(
            "batch execution failed; exit code: {}",
            batch_result.exit_code
        );
        // The full, untruncated target log; harnesses grep it for failure
        // descriptions.
        info!(
            "log of batch follows: [[[==================\n{}==================]]]",
            batch_result.log
        );

        let log_prefix = format!("ReportCrash[{}]: ", self.num_crash_reports);
        info!(
            "{log_prefix}the crash occurred when running {binary} on {} inputs",
            inputs.len()
        );
        self.num_crash_reports += 1;
        if self.num_crash_reports == self.env.max_num_crash_reports {
            info!(
                "{log_prefix}reached the maximum number of crash reports; \
                 further reports will be suppressed"
            );
        }

        if batch_result.num_outputs_read < inputs.len() {
            info!(
                "{log_prefix}executing input {} out of {}",
                batch_result.num_outputs_read,
                inputs.len()
            );
            if self.try_input_for_crash(binary, &inputs[batch_result.num_outputs_read], &log_prefix)?
            {
                return Ok(());
            }
        }
        info!("{log_prefix}executing inputs one-by-one, trying to find the reproducer");
        for input in inputs {
            if self.try_input_for_crash(binary, input, &log_prefix)? {
                return Ok(());
            }
        }
        info!("{log_prefix}crash was not observed when running inputs one-by-one");
        Ok(())
    }

    /// Re-executes a single input; on failure dumps it as a reproducer and
    /// returns true.
    fn try_input_for_crash(
        &mut self,
        binary: &str,
        input: &ByteArray,
        log_prefix: &str,
    ) -> Result<bool, EngineError> {
        let result = (self.callbacks.execute)(binary, std::slice::from_ref(input));
        if result.success {
            return Ok(false);
        }
        let crash_dir = self.layout.crash_reproducer_dir();
        fs::create_dir_all(&crash_dir)?;
        let file_path = crash_dir.join(input_hash_hex(input));
        info!(
            "{log_prefix}crash detected, saving input to {}",
            file_path.display()
        );
        info!("input bytes: {}", render_input_bytes(input));
        fs::write(&file_path, input)?;
        Ok(true)
    }

    /// Reads one shard's corpus and features files and absorbs every record
    /// that still carries unseen features. With `rerun`, inputs whose
    /// features are unknown are re-executed in batches and their features
    /// appended to *this* shard's features file.
    ///
    /// Loading is best-effort: missing files and half-written tails read as
    /// "nothing there yet".
    fn load_shard(
        &mut self,
        layout: &WorkdirLayout,
        shard_index: usize,
        rerun: bool,
    ) -> Result<(), EngineError> {
        let corpus_blobs = match BlobFileReader::open(&layout.corpus_path(shard_index)) {
            Ok(mut reader) => reader.read_all().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let mut features_by_hash: HashMap<[u8; 16], FeatureVec> = HashMap::new();
        if let Ok(mut reader) = BlobFileReader::open(&layout.features_path(shard_index)) {
            while let Ok(Some(blob)) = reader.read_blob() {
                match FeaturesRecord::unpack(&blob) {
                    Ok(record) => {
                        features_by_hash.insert(record.input_hash, record.features);
                    }
                    Err(e) => debug!("skipping undecodable features record: {e}"),
                }
            }
        }

        let mut added_to_corpus = 0;
        let mut to_rerun: Vec<ByteArray> = Vec::new();
        for data in corpus_blobs {
            match features_by_hash.get(&input_hash(&data)) {
                Some(features) if !features.is_empty() => {
                    let mut features = features.clone();
                    self.log_features_as_symbols(&features);
                    if self
                        .feature_set
                        .count_unseen_and_prune_frequent_features(&mut features)
                        > 0
                    {
                        self.feature_set.increment_frequencies(&features);
                        self.corpus.add(
                            data,
                            features,
                            vec![],
                            &self.feature_set,
                            &self.coverage_frontier,
                        );
                        added_to_corpus += 1;
                    }
                }
                // The shard knows the input but not its features yet.
                _ => {
                    if rerun {
                        to_rerun.push(data);
                    }
                }
            }
        }
        // No pruning here: distillation relies on seeing the loaded corpus
        // unshrunk.
        if added_to_corpus > 0 {
            self.log_status("load-shard", 1);
        }

        if to_rerun.is_empty() {
            return Ok(());
        }
        info!("{} inputs to rerun", to_rerun.len());
        let mut out_files = FileBundle::open(&self.layout, self.env.my_shard_index)?;
        while !to_rerun.is_empty() {
            let batch_size = to_rerun.len().min(self.env.batch_size);
            let batch = to_rerun.split_off(to_rerun.len() - batch_size);
            if self.run_batch(&batch, None, None, Some(&mut out_files.features_file))? {
                self.log_status("rerun-old", 1);
            }
        }
        Ok(())
    }

    /// Loads the same shard index from a foreign working directory and
    /// appends whatever it contributed to our own corpus file.
    fn merge_from_other_corpus(
        &mut self,
        merge_from: &Path,
        shard_index: usize,
    ) -> Result<(), EngineError> {
        info!("merging from {}", merge_from.display());
        let other_layout = WorkdirLayout::for_workdir(merge_from, &self.env.binary);
        let initial_corpus_size = self.corpus.num_active();
        self.load_shard(&other_layout, shard_index, true)?;
        let new_corpus_size = self.corpus.num_active();
        if new_corpus_size > initial_corpus_size {
            let mut writer =
                BlobFileWriter::open_append(&self.layout.corpus_path(self.env.my_shard_index))?;
            for index in initial_corpus_size..new_corpus_size {
                writer.write_blob(self.corpus.get(index))?;
            }
            info!(
                "merge: {} new inputs added",
                new_corpus_size - initial_corpus_size
            );
        }
        Ok(())
    }

    /// Dumps the active corpus into the distilled blob file (and the local
    /// corpus directory, when configured).
    fn distill_corpus(&mut self) -> Result<(), EngineError> {
        let distilled_path = self.layout.distilled_path(self.env.my_shard_index);
        let mut writer = BlobFileWriter::create(&distilled_path)?;
        for index in 0..self.corpus.num_active() {
            writer.write_blob(self.corpus.get(index))?;
            if let Some(dir) = self.env.corpus_dir.first() {
                write_to_local_hashed_file_in_dir(dir, self.corpus.get(index))?;
            }
        }
        info!(
            "distilled {} inputs to {}",
            self.corpus.num_active(),
            distilled_path.display()
        );
        Ok(())
    }

    /// Renders per-function coverage to the shard's report file. One shard
    /// writes the report; the file is rewritten wholesale each time.
    fn generate_coverage_report(&mut self) -> Result<(), EngineError> {
        if self.pc_table.is_empty() || !self.env.generating_coverage_report_in_this_shard() {
            return Ok(());
        }
        let covered: Vec<bool> = {
            let mut covered = vec![false; self.pc_table.len()];
            for pc_index in self.feature_set.to_coverage_pc_indices() {
                if pc_index < covered.len() {
                    covered[pc_index] = true;
                }
            }
            covered
        };
        let mut report = String::new();
        let mut function_start = None;
        let flush = |start: usize, end: usize, report: &mut String| {
            let num_covered = (start..end).filter(|&j| covered[j]).count();
            let status = if num_covered == end - start {
                "FULL"
            } else if num_covered == 0 {
                "NONE"
            } else {
                "PARTIAL"
            };
            report.push_str(&format!(
                "{status} {}: {num_covered}/{}\n",
                self.symbols.func(start),
                end - start
            ));
        };
        for (index, info) in self.pc_table.iter().enumerate() {
            if info.is_func_entry() {
                if let Some(start) = function_start {
                    flush(start, index, &mut report);
                }
                function_start = Some(index);
            }
        }
        if let Some(start) = function_start {
            flush(start, self.pc_table.len(), &mut report);
        }
        let report_path = self.layout.coverage_report_path(self.env.my_shard_index);
        info!("coverage report: {}", report_path.display());
        fs::write(report_path, report)?;
        Ok(())
    }

    /// Rewrites the shard's corpus-stats JSON document.
    fn generate_corpus_stats(&mut self) -> Result<(), EngineError> {
        if !self.env.generating_corpus_stats_in_this_shard() {
            return Ok(());
        }
        let mut rendered = Vec::new();
        self.corpus.print_stats(&mut rendered, &self.feature_set)?;
        let stats_path = self.layout.corpus_stats_path(self.env.my_shard_index);
        fs::write(stats_path, rendered)?;
        Ok(())
    }

    fn input_passes_filter(&mut self, input: &[u8]) -> bool {
        match self.callbacks.input_filter.as_mut() {
            None => true,
            Some(filter) => filter(input),
        }
    }

    /// Feeds newly covered PCs to the coverage logger; descriptions are
    /// emitted only at sufficient verbosity, but observation is
    /// unconditional so the "new" notion stays stable.
    fn log_features_as_symbols(&mut self, features: &FeatureVec) {
        for &feature in features {
            if !domains::COUNTERS_8BIT.contains(feature) {
                continue;
            }
            let pc_index = counter_feature_to_pc_index(feature);
            if let Some(description) = self.coverage_logger.observe_and_describe_if_new(
                pc_index,
                &self.pc_table,
                &self.symbols,
            ) {
                if self.env.v >= self.coverage_log_verbosity {
                    debug!("{description}");
                }
            }
        }
    }

    /// One status line summarizing the shard.
    fn log_status(&self, label: &str, min_log_level: usize) {
        if self.env.log_level < min_log_level {
            return;
        }
        let seconds = self.start_time.elapsed().as_secs();
        let exec_speed = if seconds > 0 {
            self.num_runs as u64 / seconds
        } else {
            0
        };
        let (max, avg) = self.corpus.max_and_avg_size();
        info!(
            "[{}] {}: ft: {} cov: {} cnt: {} df: {} cmp: {} path: {} corp: {}/{} max/avg {} {} exec/s: {}",
            self.num_runs,
            label,
            self.feature_set.size(),
            self.feature_set.to_coverage_pc_indices().len(),
            self.feature_set.count_features(domains::COUNTERS_8BIT),
            self.feature_set.count_features(domains::DATA_FLOW),
            self.feature_set.count_features(domains::CMP),
            self.feature_set.count_features(domains::BOUNDED_PATH),
            self.corpus.num_active(),
            self.corpus.num_total(),
            max,
            avg,
            exec_speed,
        );
    }
}

/// Reads every shard's corpus file and writes each input into `dir`, one
/// file per input, named by hash. Returns the number of inputs written.
pub fn save_corpus_to_local_dir(env: &Environment, dir: &Path) -> Result<usize, EngineError> {
    let layout = WorkdirLayout::new(env);
    fs::create_dir_all(dir)?;
    let mut num_saved = 0;
    for shard in 0..env.total_shards {
        let Ok(mut reader) = BlobFileReader::open(&layout.corpus_path(shard)) else {
            continue;
        };
        let inputs = reader.read_all()?;
        info!(
            "read {} inputs from {}",
            inputs.len(),
            layout.corpus_path(shard).display()
        );
        for input in inputs {
            fs::write(dir.join(input_hash_hex(&input)), &input)?;
            num_saved += 1;
        }
    }
    Ok(num_saved)
}

/// Distributes the files under `dir` over the shards' corpus files, skipping
/// inputs a shard already has. The partition hashes file names, so a given
/// file always lands in the same shard. Returns the number of inputs added.
pub fn export_corpus_from_local_dir(env: &Environment, dir: &Path) -> Result<usize, EngineError> {
    let layout = WorkdirLayout::new(env);
    layout.ensure_dirs()?;

    let mut sharded_paths: Vec<Vec<PathBuf>> = vec![Vec::new(); env.total_shards];
    let mut num_paths = 0usize;
    let mut pending_dirs = vec![dir.to_path_buf()];
    while let Some(current) = pending_dirs.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending_dirs.push(path);
            } else if path.is_file() {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let digest = md5::compute(file_name.as_bytes()).0;
                let mut hash_prefix = [0u8; 8];
                hash_prefix.copy_from_slice(&digest[..8]);
                let shard = u64::from_le_bytes(hash_prefix) % env.total_shards as u64;
                sharded_paths[shard as usize].push(path);
                num_paths += 1;
            }
        }
    }

    let mut inputs_added = 0;
    let mut inputs_ignored = 0;
    for (shard, paths) in sharded_paths.iter().enumerate() {
        let mut existing_hashes = std::collections::HashSet::new();
        if let Ok(mut reader) = BlobFileReader::open(&layout.corpus_path(shard)) {
            for blob in reader.read_all().unwrap_or_default() {
                existing_hashes.insert(input_hash(&blob));
            }
        }
        let mut writer = BlobFileWriter::open_append(&layout.corpus_path(shard))?;
        for path in paths {
            let input = fs::read(path)?;
            if !existing_hashes.insert(input_hash(&input)) {
                inputs_ignored += 1;
                continue;
            }
            writer.write_blob(&input)?;
            inputs_added += 1;
        }
    }
    if inputs_added + inputs_ignored != num_paths {
        warn!("export: some inputs were neither added nor ignored");
    }
    info!("export: {inputs_added} inputs added, {inputs_ignored} already present");
    Ok(inputs_added)
}

/// Printable rendering of an input for crash logs: ASCII stays as-is, the
/// rest is hex-escaped.
fn render_input_bytes(input: &[u8]) -> String {
    input
        .iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                (b as char).to_string()
            } else {
                format!("\\x{b:02X}")
            }
        })
        .collect()
}

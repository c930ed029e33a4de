use std::path::PathBuf;
use std::sync::LazyLock;

use clap::Parser;
use log::{info, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

use strider_core::control_flow::{BinaryInfo, CfTable, PcInfo, PcTable};
use strider_core::engine::{export_corpus_from_local_dir, save_corpus_to_local_dir};
use strider_core::executor::{
    BatchResult, Callbacks, ExecutionResult, InputFilterFn, MutatorFn, RunnerFn,
};
use strider_core::feature::{counter_to_number, domains};
use strider_core::knobs::{self, KnobId, Knobs};
use strider_core::symbols::SymbolTable;
use strider_core::{exit, Engine, Environment};

/// Upper bound on input growth from insert mutations.
const MAX_INPUT_LEN: usize = 1024;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Strider: sharded coverage-guided fuzzing", long_about = None)]
struct Cli {
    /// TOML file with an Environment; flags override its values.
    #[clap(long = "config")]
    config_file: Option<PathBuf>,

    #[clap(long = "workdir")]
    workdir: Option<PathBuf>,
    #[clap(long = "binary")]
    binary: Option<String>,
    #[clap(long = "seed")]
    seed: Option<u64>,
    #[clap(long = "num_runs")]
    num_runs: Option<usize>,
    #[clap(long = "batch_size")]
    batch_size: Option<usize>,
    #[clap(long = "timeout")]
    timeout: Option<u64>,
    #[clap(long = "total_shards")]
    total_shards: Option<usize>,
    #[clap(long = "my_shard_index")]
    my_shard_index: Option<usize>,

    #[clap(long = "exit_on_crash")]
    exit_on_crash: bool,
    #[clap(long = "full_sync")]
    full_sync: bool,
    #[clap(long = "distill")]
    distill: bool,
    #[clap(long = "use_corpus_weights")]
    use_corpus_weights: Option<bool>,

    #[clap(long = "merge_from")]
    merge_from: Option<PathBuf>,
    #[clap(long = "corpus_dir")]
    corpus_dir: Vec<PathBuf>,
    #[clap(long = "input_filter")]
    input_filter: Option<String>,
    #[clap(long = "function_filter")]
    function_filter: Option<String>,

    #[clap(long = "prune_frequency")]
    prune_frequency: Option<usize>,
    #[clap(long = "load_other_shard_frequency")]
    load_other_shard_frequency: Option<usize>,
    #[clap(long = "max_num_crash_reports")]
    max_num_crash_reports: Option<usize>,
    #[clap(long = "max_corpus_size")]
    max_corpus_size: Option<usize>,

    #[clap(long = "log_level")]
    log_level: Option<usize>,
    #[clap(long = "v")]
    v: Option<usize>,

    /// Comma-separated knob bytes, e.g. "128,0,40".
    #[clap(long = "knobs")]
    knobs: Option<String>,

    /// The byte sequence the built-in puzzle target crashes on.
    #[clap(long = "magic", default_value = "Fuzz!")]
    magic: String,

    /// Copy every input from all shards into this directory and exit.
    #[clap(long = "save_corpus_to_local_dir")]
    save_corpus_to_local_dir: Option<PathBuf>,
    /// Distribute this directory's files over the shard corpus files and
    /// exit.
    #[clap(long = "export_corpus_from_local_dir")]
    export_corpus_from_local_dir: Option<PathBuf>,
}

// Relative weights of the mutation strategies. All-zero knobs mean a uniform
// choice, so the mutator works out of the box and can be biased later.
static KNOB_MUTATE_OVERWRITE: LazyLock<KnobId> = LazyLock::new(|| knobs::new_id("mutate_overwrite"));
static KNOB_MUTATE_ADD_DELTA: LazyLock<KnobId> = LazyLock::new(|| knobs::new_id("mutate_add_delta"));
static KNOB_MUTATE_INSERT: LazyLock<KnobId> = LazyLock::new(|| knobs::new_id("mutate_insert"));
static KNOB_MUTATE_ERASE: LazyLock<KnobId> = LazyLock::new(|| knobs::new_id("mutate_erase"));
static KNOB_MUTATE_COPY: LazyLock<KnobId> = LazyLock::new(|| knobs::new_id("mutate_copy"));

#[derive(Clone, Copy)]
enum MutationStrategy {
    Overwrite,
    AddDelta,
    Insert,
    Erase,
    CopyWithin,
}

fn apply_cli_overrides(env: &mut Environment, cli: &Cli) {
    if let Some(workdir) = &cli.workdir {
        env.workdir = workdir.clone();
    }
    if let Some(binary) = &cli.binary {
        env.binary = binary.clone();
    }
    if let Some(seed) = cli.seed {
        env.seed = seed;
    }
    if let Some(num_runs) = cli.num_runs {
        env.num_runs = num_runs;
    }
    if let Some(batch_size) = cli.batch_size {
        env.batch_size = batch_size;
    }
    if let Some(timeout) = cli.timeout {
        env.timeout = timeout;
    }
    if let Some(total_shards) = cli.total_shards {
        env.total_shards = total_shards;
    }
    if let Some(my_shard_index) = cli.my_shard_index {
        env.my_shard_index = my_shard_index;
    }
    if cli.exit_on_crash {
        env.exit_on_crash = true;
    }
    if cli.full_sync {
        env.full_sync = true;
    }
    if cli.distill {
        env.distill = true;
    }
    if let Some(use_corpus_weights) = cli.use_corpus_weights {
        env.use_corpus_weights = use_corpus_weights;
    }
    if let Some(merge_from) = &cli.merge_from {
        env.merge_from = Some(merge_from.clone());
    }
    if !cli.corpus_dir.is_empty() {
        env.corpus_dir = cli.corpus_dir.clone();
    }
    if let Some(input_filter) = &cli.input_filter {
        env.input_filter = input_filter.clone();
    }
    if let Some(function_filter) = &cli.function_filter {
        env.function_filter = function_filter.clone();
    }
    if let Some(prune_frequency) = cli.prune_frequency {
        env.prune_frequency = prune_frequency;
    }
    if let Some(frequency) = cli.load_other_shard_frequency {
        env.load_other_shard_frequency = frequency;
    }
    if let Some(max_reports) = cli.max_num_crash_reports {
        env.max_num_crash_reports = max_reports;
    }
    if let Some(max_corpus_size) = cli.max_corpus_size {
        env.max_corpus_size = max_corpus_size;
    }
    if let Some(log_level) = cli.log_level {
        env.log_level = log_level;
    }
    if let Some(v) = cli.v {
        env.v = v;
    }
}

/// Synthetic binary metadata for the puzzle target: one basic block per
/// matched magic byte, chained linearly inside a single function.
fn puzzle_binary_info(magic: &[u8]) -> BinaryInfo {
    let num_pcs = magic.len() + 1;
    let pc_table: PcTable = (0..num_pcs)
        .map(|i| PcInfo {
            pc: i as u64,
            flags: if i == 0 { PcInfo::FUNC_ENTRY } else { 0 },
        })
        .collect();
    let mut cf_table: CfTable = Vec::new();
    for i in 0..num_pcs {
        cf_table.push(i as i64);
        if i + 1 < num_pcs {
            cf_table.push((i + 1) as i64);
        }
        cf_table.push(0); // end of successors
        cf_table.push(0); // end of callees
    }
    let symbols = SymbolTable::from_function_names(vec!["puzzle_main"; num_pcs]);
    BinaryInfo::from_tables(pc_table, symbols, cf_table)
}

/// An in-process stand-in for an instrumented target. Each input covers one
/// basic block per matched magic byte and emits a comparison feature for the
/// byte it failed on; an input matching the full sequence crashes the batch.
fn puzzle_runner(magic: Vec<u8>) -> RunnerFn {
    Box::new(move |_binary, inputs| {
        let mut result = BatchResult {
            success: true,
            ..BatchResult::default()
        };
        for (index, input) in inputs.iter().enumerate() {
            let progress = magic
                .iter()
                .zip(input.iter())
                .take_while(|(want, got)| want == got)
                .count();
            if progress == magic.len() {
                result.success = false;
                result.exit_code = 1;
                result.log = format!(
                    "puzzle target crashed after matching {progress} bytes\n\
                     failure description: magic-sequence-crash\n"
                );
                result.num_outputs_read = index;
                result
                    .results
                    .resize(inputs.len(), ExecutionResult::default());
                return result;
            }
            let mut features: Vec<u64> = (0..=progress)
                .map(|pc_index| {
                    domains::COUNTERS_8BIT.convert_to_me(counter_to_number(pc_index, 1))
                })
                .collect();
            if let Some(&attempted) = input.get(progress) {
                features.push(
                    domains::CMP
                        .convert_to_me(((progress as u64) << 8) | attempted as u64),
                );
            }
            result.results.push(ExecutionResult {
                features,
                cmp_args: vec![],
            });
            result.num_outputs_read = index + 1;
        }
        result
    })
}

/// A byte-level mutator whose strategy mix is biased by knobs.
fn knob_mutator(knob_values: Knobs, seed: u64) -> MutatorFn {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
    let strategy_ids = [
        *KNOB_MUTATE_OVERWRITE,
        *KNOB_MUTATE_ADD_DELTA,
        *KNOB_MUTATE_INSERT,
        *KNOB_MUTATE_ERASE,
        *KNOB_MUTATE_COPY,
    ];
    const STRATEGIES: [MutationStrategy; 5] = [
        MutationStrategy::Overwrite,
        MutationStrategy::AddDelta,
        MutationStrategy::Insert,
        MutationStrategy::Erase,
        MutationStrategy::CopyWithin,
    ];
    Box::new(move |batch| {
        for input in batch.iter_mut() {
            if input.is_empty() {
                input.push(0);
            }
            let position = (rng.next_u64() % input.len() as u64) as usize;
            let random_byte = (rng.next_u64() & 0xFF) as u8;
            match knob_values.choose(&strategy_ids, &STRATEGIES, rng.next_u64()) {
                MutationStrategy::Overwrite => input[position] = random_byte,
                MutationStrategy::AddDelta => {
                    let delta = 1 + (rng.next_u64() % 15) as u8;
                    input[position] = input[position].wrapping_add(delta);
                }
                MutationStrategy::Insert => {
                    if input.len() < MAX_INPUT_LEN {
                        input.insert(position, random_byte);
                    }
                }
                MutationStrategy::Erase => {
                    if input.len() > 1 {
                        input.remove(position);
                    }
                }
                MutationStrategy::CopyWithin => {
                    let from = (rng.next_u64() % input.len() as u64) as usize;
                    input[position] = input[from];
                }
            }
        }
    })
}

/// Wraps the external input-filter command: the input lands in a scratch
/// file, the command's exit status decides admission. Filter trouble admits
/// the input rather than wedging the shard.
fn input_filter_command(command: &str) -> Option<InputFilterFn> {
    if command.is_empty() {
        return None;
    }
    let command = command.to_string();
    let scratch_path =
        std::env::temp_dir().join(format!("strider-filter-input.{}", std::process::id()));
    Some(Box::new(move |input| {
        if let Err(e) = std::fs::write(&scratch_path, input) {
            warn!("input filter: cannot write scratch file: {e}");
            return true;
        }
        match std::process::Command::new(&command).arg(&scratch_path).status() {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("input filter: cannot run {command}: {e}");
                true
            }
        }
    }))
}

fn parse_knob_bytes(list: &str) -> Result<Vec<u8>, anyhow::Error> {
    list.split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|e| anyhow::anyhow!("bad knob value {part:?}: {e}"))
        })
        .collect()
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut env = match &cli.config_file {
        Some(path) => Environment::load_from_file(path)?,
        None => Environment::default(),
    };
    apply_cli_overrides(&mut env, &cli);
    if env.binary.is_empty() {
        env.binary = "puzzle".to_string();
    }
    env.validate()?;

    if let Some(dir) = &cli.save_corpus_to_local_dir {
        let num_saved = save_corpus_to_local_dir(&env, dir)?;
        info!("saved {num_saved} inputs to {}", dir.display());
        return Ok(());
    }
    if let Some(dir) = &cli.export_corpus_from_local_dir {
        let num_added = export_corpus_from_local_dir(&env, dir)?;
        info!("exported {num_added} inputs from {}", dir.display());
        return Ok(());
    }

    let mut knob_values = Knobs::new();
    if let Some(list) = &cli.knobs {
        knob_values.set_from_slice(&parse_knob_bytes(list)?);
    }
    // Force-register the mutation knobs, then freeze the id space.
    let _ = (
        *KNOB_MUTATE_OVERWRITE,
        *KNOB_MUTATE_ADD_DELTA,
        *KNOB_MUTATE_INSERT,
        *KNOB_MUTATE_ERASE,
        *KNOB_MUTATE_COPY,
    );
    knobs::seal_registrations();
    knob_values.for_each_knob(|name, value| info!("knob {name} = {value}"));

    let magic = cli.magic.clone().into_bytes();
    anyhow::ensure!(!magic.is_empty(), "--magic must not be empty");
    let callbacks = Callbacks {
        execute: puzzle_runner(magic.clone()),
        mutate: knob_mutator(knob_values, env.seed),
        input_filter: input_filter_command(&env.input_filter),
        dummy_valid_input: vec![0],
    };

    let early_exit = exit::global();
    let mut engine = Engine::new(env, puzzle_binary_info(&magic), callbacks, early_exit.clone());
    engine.fuzzing_loop()?;

    if early_exit.requested() {
        std::process::exit(early_exit.exit_code());
    }
    Ok(())
}

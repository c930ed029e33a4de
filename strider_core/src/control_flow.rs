use std::collections::HashMap;

use crate::corpus::Corpus;
use crate::feature::{counter_feature_to_pc_index, domains};
use crate::symbols::SymbolTable;

/// One instrumented program counter, as described by the target's PC table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcInfo {
    pub pc: u64,
    pub flags: u32,
}

impl PcInfo {
    /// Flag bit marking the first basic block of a function.
    pub const FUNC_ENTRY: u32 = 1;

    pub fn is_func_entry(&self) -> bool {
        self.flags & Self::FUNC_ENTRY != 0
    }
}

/// The target's table of instrumented PCs, indexed by PC index.
pub type PcTable = Vec<PcInfo>;

/// The raw control-flow table emitted by the instrumentation.
///
/// A flat sequence of entries, one per basic block: the block's PC, then its
/// successor PCs terminated by `0`, then its callee PCs terminated by `0`.
/// A callee of `-1` denotes an indirect call.
pub type CfTable = Vec<i64>;

/// The target of one call instruction inside a basic block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallTarget {
    Direct(u64),
    Indirect,
}

/// Walks a [`CfTable`], yielding `(pc, successors, callees)` per basic block.
fn for_each_cf_entry(cf_table: &CfTable, mut visit: impl FnMut(u64, &[i64], &[i64])) {
    let mut i = 0;
    while i < cf_table.len() {
        let pc = cf_table[i] as u64;
        i += 1;
        let succ_begin = i;
        while i < cf_table.len() && cf_table[i] != 0 {
            i += 1;
        }
        let successors = &cf_table[succ_begin..i];
        i += 1; // terminator
        let callee_begin = i;
        while i < cf_table.len() && cf_table[i] != 0 {
            i += 1;
        }
        let callees = &cf_table[callee_begin..i.min(cf_table.len())];
        i += 1; // terminator
        visit(pc, successors, callees);
    }
}

/// Intra-procedural successor edges, keyed by basic-block PC.
#[derive(Clone, Debug, Default)]
pub struct ControlFlowGraph {
    graph: HashMap<u64, Vec<u64>>,
}

impl ControlFlowGraph {
    pub fn from_cf_table(cf_table: &CfTable) -> Self {
        let mut graph = HashMap::new();
        for_each_cf_entry(cf_table, |pc, successors, _| {
            graph.insert(pc, successors.iter().map(|&s| s as u64).collect());
        });
        Self { graph }
    }

    /// Successor PCs of `basic_block`, empty when the block is unknown.
    pub fn successors(&self, basic_block: u64) -> &[u64] {
        self.graph.get(&basic_block).map_or(&[], Vec::as_slice)
    }

    pub fn exists(&self, basic_block: u64) -> bool {
        self.graph.contains_key(&basic_block)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

/// Call edges, keyed by the calling basic block's PC.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    callees: HashMap<u64, Vec<CallTarget>>,
}

impl CallGraph {
    pub fn from_cf_table(cf_table: &CfTable) -> Self {
        let mut callees = HashMap::new();
        for_each_cf_entry(cf_table, |pc, _, raw_callees| {
            let targets = raw_callees
                .iter()
                .map(|&c| {
                    if c == -1 {
                        CallTarget::Indirect
                    } else {
                        CallTarget::Direct(c as u64)
                    }
                })
                .collect();
            callees.insert(pc, targets);
        });
        Self { callees }
    }

    /// Call targets issued from `basic_block`, empty when the block is unknown.
    pub fn callees(&self, basic_block: u64) -> &[CallTarget] {
        self.callees.get(&basic_block).map_or(&[], Vec::as_slice)
    }
}

/// Everything the engine knows about the instrumented binary: the PC table,
/// its symbolization, and the control-flow/call structure derived from the
/// raw CF table.
#[derive(Clone, Debug, Default)]
pub struct BinaryInfo {
    pub pc_table: PcTable,
    pub symbols: SymbolTable,
    pub cf_table: CfTable,
    pub control_flow_graph: ControlFlowGraph,
    pub call_graph: CallGraph,
}

impl BinaryInfo {
    /// Builds the graphs from the raw tables.
    pub fn from_tables(pc_table: PcTable, symbols: SymbolTable, cf_table: CfTable) -> Self {
        let control_flow_graph = ControlFlowGraph::from_cf_table(&cf_table);
        let call_graph = CallGraph::from_cf_table(&cf_table);
        Self {
            pc_table,
            symbols,
            cf_table,
            control_flow_graph,
            call_graph,
        }
    }
}

// Weight constants for the frontier scoring below. A callee that is fully
// uncovered is worth the full scale; an indirect call is treated as a fully
// unexplored callee; a callee outside the binary is worth a token amount.
const FRONTIER_CALLEE_SCALE: usize = 153;
const FRONTIER_INDIRECT_WEIGHT: u32 = 153;
const FRONTIER_EXTERNAL_WEIGHT: u32 = 25;

/// Identifies the *coverage frontier*: covered basic blocks, inside
/// partially-covered functions, that have at least one uncovered successor.
///
/// Frontier blocks are where mutation effort pays off the most, so the corpus
/// grants a weight bonus to inputs that touch them. The frontier is a pure
/// function of the binary structure and the current corpus; call
/// [`CoverageFrontier::compute`] to refresh it.
#[derive(Debug)]
pub struct CoverageFrontier {
    binary_info: BinaryInfo,
    frontier: Vec<bool>,
    frontier_weight: Vec<u32>,
    num_functions_in_frontier: usize,
}

impl CoverageFrontier {
    /// Creates an empty frontier over `binary_info`. No PC is a frontier
    /// until the first [`CoverageFrontier::compute`].
    pub fn new(binary_info: BinaryInfo) -> Self {
        let num_pcs = binary_info.pc_table.len();
        Self {
            binary_info,
            frontier: vec![false; num_pcs],
            frontier_weight: vec![0; num_pcs],
            num_functions_in_frontier: 0,
        }
    }

    /// Number of PCs the frontier is defined over.
    pub fn num_pcs(&self) -> usize {
        self.binary_info.pc_table.len()
    }

    /// Number of functions with at least one frontier block, as of the last
    /// [`CoverageFrontier::compute`].
    pub fn num_functions_in_frontier(&self) -> usize {
        self.num_functions_in_frontier
    }

    /// Whether the PC at `pc_index` is currently a frontier block.
    /// Panics when `pc_index` is out of range.
    pub fn pc_index_is_frontier(&self, pc_index: usize) -> bool {
        assert!(pc_index < self.frontier.len(), "pc_index out of range: {pc_index}");
        self.frontier[pc_index]
    }

    /// The weight of the frontier block at `pc_index`, zero for non-frontier
    /// blocks. Panics when `pc_index` is out of range.
    pub fn frontier_weight(&self, pc_index: usize) -> u32 {
        assert!(
            pc_index < self.frontier_weight.len(),
            "pc_index out of range: {pc_index}"
        );
        self.frontier_weight[pc_index]
    }

    /// Recomputes the frontier from the union of counter features present in
    /// `corpus` and returns the number of functions in the frontier.
    ///
    /// A function with no covered blocks, or with every block covered,
    /// contributes nothing. In a partially covered function, every covered
    /// block with at least one uncovered successor becomes a frontier block;
    /// its weight sums, over the uncovered successors, the exploration value
    /// of the calls those successors would make.
    pub fn compute(&mut self, corpus: &Corpus) -> usize {
        let pc_table = &self.binary_info.pc_table;
        let num_pcs = pc_table.len();
        let mut frontier = vec![false; num_pcs];
        let mut frontier_weight = vec![0u32; num_pcs];
        let mut num_functions = 0;

        // The set of covered PC indices, from the corpus' counter features.
        let mut covered = vec![false; num_pcs];
        for record in corpus.records() {
            for &feature in &record.features {
                if !domains::COUNTERS_8BIT.contains(feature) {
                    continue;
                }
                let pc_index = counter_feature_to_pc_index(feature);
                if pc_index < num_pcs {
                    covered[pc_index] = true;
                }
            }
        }

        let pc_index_of: HashMap<u64, usize> = pc_table
            .iter()
            .enumerate()
            .map(|(index, info)| (info.pc, index))
            .collect();

        // Function extents: entry PC -> [start, end) in PC-index space.
        let mut function_ranges: Vec<(usize, usize)> = Vec::new();
        let mut entry_range: HashMap<u64, (usize, usize)> = HashMap::new();
        let mut start = None;
        for (index, info) in pc_table.iter().enumerate() {
            if info.is_func_entry() {
                if let Some(s) = start {
                    function_ranges.push((s, index));
                }
                start = Some(index);
            }
        }
        if let Some(s) = start {
            function_ranges.push((s, num_pcs));
        }
        for &(s, e) in &function_ranges {
            entry_range.insert(pc_table[s].pc, (s, e));
        }

        let callee_weight = |target: &CallTarget| -> u32 {
            match target {
                CallTarget::Indirect => FRONTIER_INDIRECT_WEIGHT,
                CallTarget::Direct(pc) => match entry_range.get(pc) {
                    None => FRONTIER_EXTERNAL_WEIGHT,
                    Some(&(s, e)) => {
                        let total = e - s;
                        let uncovered = (s..e).filter(|&j| !covered[j]).count();
                        (FRONTIER_CALLEE_SCALE * uncovered).div_ceil(total) as u32
                    }
                },
            }
        };

        for &(s, e) in &function_ranges {
            let num_covered = (s..e).filter(|&j| covered[j]).count();
            if num_covered == 0 || num_covered == e - s {
                continue; // fully covered or fully uncovered
            }
            let mut function_in_frontier = false;
            for j in (s..e).filter(|&j| covered[j]) {
                let mut weight = 0u32;
                let mut has_uncovered_successor = false;
                for &successor in self.binary_info.control_flow_graph.successors(pc_table[j].pc) {
                    let Some(&succ_index) = pc_index_of.get(&successor) else {
                        continue;
                    };
                    if covered[succ_index] {
                        continue;
                    }
                    has_uncovered_successor = true;
                    for target in self.binary_info.call_graph.callees(successor) {
                        weight = weight.saturating_add(callee_weight(target));
                    }
                }
                if has_uncovered_successor {
                    frontier[j] = true;
                    frontier_weight[j] = weight;
                    function_in_frontier = true;
                }
            }
            if function_in_frontier {
                num_functions += 1;
            }
        }

        self.frontier = frontier;
        self.frontier_weight = frontier_weight;
        self.num_functions_in_frontier = num_functions;
        self.num_functions_in_frontier
    }
}

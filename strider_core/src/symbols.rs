use std::collections::HashSet;

use crate::control_flow::PcTable;
use crate::feature::{counter_feature_to_pc_index, domains, FeatureVec};

/// Symbolization of the target's PC table: one entry per PC index.
///
/// Symbolization itself happens outside the engine; the table arrives as
/// plain data alongside the PC table.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolInfo>,
}

#[derive(Clone, Debug, Default)]
pub struct SymbolInfo {
    pub func: String,
    pub file_line_col: String,
}

impl SymbolTable {
    pub fn new(entries: Vec<SymbolInfo>) -> Self {
        Self { entries }
    }

    /// Builds a table with function names only, one per PC index.
    pub fn from_function_names<S: Into<String>>(names: Vec<S>) -> Self {
        Self {
            entries: names
                .into_iter()
                .map(|func| SymbolInfo {
                    func: func.into(),
                    file_line_col: String::new(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The function name at `pc_index`, `"?"` when unknown.
    pub fn func(&self, pc_index: usize) -> &str {
        self.entries
            .get(pc_index)
            .map_or("?", |entry| entry.func.as_str())
    }

    /// A one-line human-readable description of `pc_index`.
    pub fn full_description(&self, pc_index: usize) -> String {
        match self.entries.get(pc_index) {
            Some(entry) if !entry.file_line_col.is_empty() => {
                format!("{} {}", entry.func, entry.file_line_col)
            }
            Some(entry) => entry.func.clone(),
            None => "?".to_string(),
        }
    }
}

/// Restricts corpus growth to inputs touching a chosen set of functions.
///
/// Built from a comma-separated list of function names; an empty list admits
/// everything. Filtering is advisory for feature accounting: filtered inputs
/// still have their features recorded, they just never enter the corpus.
#[derive(Debug)]
pub struct FunctionFilter {
    // One flag per PC index; empty when the filter is a pass-through.
    pcs_in_filter: Vec<bool>,
}

impl FunctionFilter {
    pub fn new(filter_list: &str, symbols: &SymbolTable) -> Self {
        if filter_list.is_empty() {
            return Self {
                pcs_in_filter: Vec::new(),
            };
        }
        let wanted: HashSet<&str> = filter_list.split(',').filter(|s| !s.is_empty()).collect();
        let pcs_in_filter = (0..symbols.len())
            .map(|pc_index| wanted.contains(symbols.func(pc_index)))
            .collect();
        Self { pcs_in_filter }
    }

    /// Number of PC indices selected by the filter.
    pub fn count_pcs(&self) -> usize {
        self.pcs_in_filter.iter().filter(|&&b| b).count()
    }

    /// Whether an input with these features may enter the corpus.
    pub fn filter(&self, features: &FeatureVec) -> bool {
        if self.pcs_in_filter.is_empty() {
            return true;
        }
        features.iter().any(|&feature| {
            domains::COUNTERS_8BIT.contains(feature)
                && self
                    .pcs_in_filter
                    .get(counter_feature_to_pc_index(feature))
                    .copied()
                    .unwrap_or(false)
        })
    }
}

/// Logs each newly covered PC once, symbolized.
#[derive(Debug, Default)]
pub struct CoverageLogger {
    observed_pcs: HashSet<usize>,
}

impl CoverageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a description of `pc_index` the first time it is seen, `None`
    /// on repeats or out-of-table indices.
    pub fn observe_and_describe_if_new(
        &mut self,
        pc_index: usize,
        pc_table: &PcTable,
        symbols: &SymbolTable,
    ) -> Option<String> {
        if pc_index >= pc_table.len() || !self.observed_pcs.insert(pc_index) {
            return None;
        }
        let kind = if pc_table[pc_index].is_func_entry() {
            "FUNC"
        } else {
            "EDGE"
        };
        Some(format!("{kind}: {}", symbols.full_description(pc_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::PcInfo;
    use crate::feature::counter_to_number;

    fn counter_feature(pc_index: usize) -> u64 {
        domains::COUNTERS_8BIT.convert_to_me(counter_to_number(pc_index, 1))
    }

    #[test]
    fn empty_filter_admits_everything() {
        let symbols = SymbolTable::from_function_names(vec!["foo", "bar"]);
        let filter = FunctionFilter::new("", &symbols);
        assert_eq!(filter.count_pcs(), 0);
        assert!(filter.filter(&vec![counter_feature(0)]));
        assert!(filter.filter(&vec![]));
    }

    #[test]
    fn filter_selects_pcs_by_function_name() {
        let symbols = SymbolTable::from_function_names(vec!["foo", "bar", "foo", "baz"]);
        let filter = FunctionFilter::new("foo,baz", &symbols);
        assert_eq!(filter.count_pcs(), 3);

        assert!(filter.filter(&vec![counter_feature(0)]));
        assert!(filter.filter(&vec![counter_feature(3)]));
        assert!(!filter.filter(&vec![counter_feature(1)]));
        // Non-counter features never satisfy a non-empty filter.
        assert!(!filter.filter(&vec![domains::CMP.convert_to_me(5)]));
        // Any matching feature admits the whole input.
        assert!(filter.filter(&vec![counter_feature(1), counter_feature(2)]));
    }

    #[test]
    fn coverage_logger_reports_each_pc_once() {
        let pc_table = vec![
            PcInfo {
                pc: 0,
                flags: PcInfo::FUNC_ENTRY,
            },
            PcInfo { pc: 1, flags: 0 },
        ];
        let symbols = SymbolTable::from_function_names(vec!["main", "main"]);
        let mut logger = CoverageLogger::new();
        assert_eq!(
            logger.observe_and_describe_if_new(0, &pc_table, &symbols),
            Some("FUNC: main".to_string())
        );
        assert_eq!(
            logger.observe_and_describe_if_new(1, &pc_table, &symbols),
            Some("EDGE: main".to_string())
        );
        assert_eq!(logger.observe_and_describe_if_new(0, &pc_table, &symbols), None);
        assert_eq!(logger.observe_and_describe_if_new(99, &pc_table, &symbols), None);
    }
}

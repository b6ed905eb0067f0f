//! Bounds tracking for global variables.
//!
//! For each candidate global start address, the table holds the furthest address known to be
//! reachable from it. Values only ever grow. Variable sizes are later derived from the distance to
//! the next known start.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::log::*;

#[derive(Default, Clone, PartialEq, Eq)]
pub struct VariableAliasSet {
    alias_set: BTreeMap<u64, u64>,
}

impl VariableAliasSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add `start_addr` as a known variable start, reaching at least `alias_addr`.
    pub fn insert_variable(&mut self, start_addr: u64, alias_addr: u64) {
        let value = self.alias_set.entry(start_addr).or_insert(alias_addr);
        if *value < alias_addr {
            *value = alias_addr;
        }
    }

    /// Record that `alias_addr` is reachable from `start_addr`.
    ///
    /// If `start_addr` is not itself a known start, the observation is folded onto the closest
    /// known start below it, since `start_addr` then lies inside that variable. With no known start
    /// below it either, the observation is dropped; only `insert_variable` creates starts.
    pub fn record(&mut self, start_addr: u64, alias_addr: u64) {
        let key = if self.alias_set.contains_key(&start_addr) {
            start_addr
        } else if let Some(pred) = self.predecessor(start_addr) {
            trace!(
                "Folding alias onto enclosing variable";
                "addr" => format!("{:#x}", start_addr),
                "start" => format!("{:#x}", pred),
            );
            pred
        } else {
            trace!(
                "No enclosing variable for alias. Dropping.";
                "addr" => format!("{:#x}", start_addr),
            );
            return;
        };
        self.insert_variable(key, alias_addr);
    }

    /// The largest known start strictly below `addr`
    pub fn predecessor(&self, addr: u64) -> Option<u64> {
        self.alias_set.range(..addr).next_back().map(|(&k, _)| k)
    }

    pub fn get(&self, start_addr: u64) -> Option<u64> {
        self.alias_set.get(&start_addr).cloned()
    }

    pub fn contains(&self, start_addr: u64) -> bool {
        self.alias_set.contains_key(&start_addr)
    }

    pub fn len(&self) -> usize {
        self.alias_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alias_set.is_empty()
    }

    /// Known starts in ascending order, with their furthest reachable address
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.alias_set.iter().map(|(&k, &v)| (k, v))
    }

    /// Known starts in ascending order, each with its size: the distance to the next start. The
    /// last start has no known upper bound and gets size `0`.
    pub fn sized_variables(&self) -> Vec<(u64, u64)> {
        let mut sized: Vec<(u64, u64)> = self
            .alias_set
            .keys()
            .tuple_windows()
            .map(|(&start, &next)| (start, next - start))
            .collect();
        if let Some(&last) = self.alias_set.keys().next_back() {
            sized.push((last, 0));
        }

        for (start, size) in &sized {
            if let Some(reach) = self.get(*start) {
                if *size != 0 && reach > start + size {
                    debug!(
                        "Variable reaches past the next variable start";
                        "start" => format!("{:#x}", start),
                        "size" => size,
                        "reach" => format!("{:#x}", reach),
                    );
                }
            }
        }

        sized
    }
}

impl std::fmt::Debug for VariableAliasSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{{ {} }}",
            self.alias_set
                .iter()
                .map(|(k, v)| format!("({:x} : {:x})", k, v))
                .join(", ")
        )
    }
}

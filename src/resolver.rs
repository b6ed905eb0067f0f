//! Value-set resolution for SSA variables.
//!
//! Resolution walks definition chains backwards from a variable's definition site with an
//! explicit worklist. Each worklist node is dispatched at most once per top-level resolution, which
//! is what guarantees termination in the presence of phi cycles. Both hops through SSA definitions
//! and sub-expressions of a dispatched node go through the worklist, so that stack depth does not
//! grow with the depth of an expression tree.
//!
//! The worklist has two parts. Nodes reached through ordinary def-chasing contribute their values
//! to the result. Nodes reached through the address operand of a memory load are traversed for
//! diagnostics only: the loaded value is not modelled, so nothing they produce may end up in the
//! result. Contributing nodes are always drained first, so that a node never gets claimed by the
//! diagnostic traversal before its contribution has been collected.

use crate::config::RecoveryConfig;
use crate::containers::unordered::UnorderedSet;
use crate::dispatch::ILVisitor;
use crate::il::{ExprIndex, Function, RegisterValue, SSAVariable};
use crate::log::*;
use crate::value_set::{FunctionValueSets, PossibleValue, ValueSet};

/// A single top-level resolution within one function.
pub struct SSAVariableResolver<'f, 'c> {
    function: &'f Function,
    /// Read-only view of the run-wide cache, for entry-register lookups
    cache: &'c FunctionValueSets,
    config: &'c RecoveryConfig,
    visited: UnorderedSet<ExprIndex>,
    /// Pending nodes whose values count towards the result
    to_visit: Vec<ExprIndex>,
    /// Pending nodes reached only through load addresses
    to_trace: Vec<ExprIndex>,
    /// Whether the node currently being dispatched came off `to_trace`
    tracing: bool,
    /// Worklist nodes dispatched so far, in order
    dispatched: Vec<ExprIndex>,
}

impl<'f, 'c> SSAVariableResolver<'f, 'c> {
    pub fn new(
        function: &'f Function,
        cache: &'c FunctionValueSets,
        config: &'c RecoveryConfig,
    ) -> Self {
        Self {
            function,
            cache,
            config,
            visited: Default::default(),
            to_visit: vec![],
            to_trace: vec![],
            tracing: false,
            dispatched: vec![],
        }
    }

    /// Resolve the possible values of `var` in `function`, and store the result in `cache`.
    ///
    /// A variable with no definition (say, a parameter) resolves to the empty set, and leaves the
    /// cache untouched.
    pub fn resolve(
        var: &SSAVariable,
        function: &'f Function,
        cache: &mut FunctionValueSets,
        config: &RecoveryConfig,
    ) -> ValueSet {
        let def = match function.get_ssa_var_definition(var) {
            Some(def) => def,
            None => {
                trace!(
                    "No definition for variable";
                    "var" => %var,
                    "function" => &function.name,
                );
                return ValueSet::new();
            }
        };

        let values = SSAVariableResolver::new(function, cache, config).resolve_from(def);

        if config.log_resolved_value_sets {
            info!(
                "Resolved value set";
                "var" => %var,
                "function" => &function.name,
                "values" => ?values,
            );
        }
        cache.insert(function.start, var, values.clone());
        values
    }

    /// Resolve the possible values of an arbitrary expression in `function`, without caching.
    pub fn resolve_expression(
        expr: ExprIndex,
        function: &'f Function,
        cache: &'c FunctionValueSets,
        config: &'c RecoveryConfig,
    ) -> ValueSet {
        SSAVariableResolver::new(function, cache, config).resolve_from(expr)
    }

    /// Run the worklist, starting at `seed`, until nothing is pending.
    pub fn resolve_from(&mut self, seed: ExprIndex) -> ValueSet {
        self.to_visit.push(seed);

        let mut value_set = ValueSet::new();
        loop {
            let (idx, collect) = if let Some(idx) = self.to_visit.pop() {
                (idx, true)
            } else if let Some(idx) = self.to_trace.pop() {
                (idx, false)
            } else {
                break;
            };

            if self.visited.contains(&idx) {
                continue;
            }
            if self.dispatched.len() >= self.config.max_dispatched_nodes_per_resolve {
                warn!(
                    "Node budget exhausted, returning partial value set";
                    "function" => &self.function.name,
                    "budget" => self.config.max_dispatched_nodes_per_resolve,
                );
                break;
            }
            self.visited.insert(idx);
            self.dispatched.push(idx);

            trace!("visit"; "node" => ?self.function.get(idx), "collect" => collect);
            self.tracing = !collect;
            let values = self.visit(idx);
            if collect {
                value_set.extend(values);
            } else if !values.is_empty() {
                trace!(
                    "Values behind load address not modelled";
                    "node" => ?idx,
                    "values" => ?values,
                );
            }
        }
        self.tracing = false;

        value_set
    }

    /// The worklist nodes dispatched so far, in dispatch order
    pub fn dispatched_nodes(&self) -> &[ExprIndex] {
        &self.dispatched
    }

    /// Queue a node, in the same mode as the node being dispatched.
    fn enqueue(&mut self, idx: ExprIndex) {
        if self.tracing {
            self.to_trace.push(idx);
        } else {
            self.to_visit.push(idx);
        }
    }

    fn symbolic(&self, var: &SSAVariable) -> PossibleValue {
        PossibleValue::UnresolvedSymbolic(self.function.identity_of(var))
    }
}

impl<'f, 'c> ILVisitor<'f> for SSAVariableResolver<'f, 'c> {
    fn function(&self) -> &'f Function {
        self.function
    }

    fn visit_const(&mut self, _idx: ExprIndex, constant: u64) -> ValueSet {
        std::iter::once(PossibleValue::Constant(constant)).collect()
    }

    fn visit_const_ptr(&mut self, _idx: ExprIndex, constant: u64) -> ValueSet {
        std::iter::once(PossibleValue::ConstantPointer(constant)).collect()
    }

    fn visit_load_ssa(&mut self, idx: ExprIndex, src: ExprIndex) -> ValueSet {
        let function = self.function;
        match function.get(src).and_then(|e| e.kind.constant()) {
            Some(memory) => {
                trace!(
                    "Load from constant address";
                    "addr" => format!("{:#x}", function[idx].address),
                    "memory" => format!("{:#x}", memory),
                );
            }
            None => {
                // Only for tracing where the address comes from; see module docs.
                self.to_trace.push(src);
            }
        }
        ValueSet::new()
    }

    fn visit_add(&mut self, _idx: ExprIndex, left: ExprIndex, right: ExprIndex) -> ValueSet {
        // Both operands contribute; no arithmetic is modelled
        self.enqueue(left);
        self.enqueue(right);
        ValueSet::new()
    }

    fn visit_var_ssa(&mut self, _idx: ExprIndex, src: &'f SSAVariable) -> ValueSet {
        let function = self.function;
        let possible_value = function.get_ssa_var_possible_values(src);
        if !possible_value.is_undetermined() {
            return std::iter::once(possible_value.into()).collect();
        }
        if src.is_return_address() {
            return std::iter::once(self.symbolic(src)).collect();
        }
        if let Some(def) = function.get_ssa_var_definition(src) {
            if !self.visited.contains(&def) {
                self.enqueue(def);
            }
        }
        ValueSet::new()
    }

    fn visit_set_var_ssa(
        &mut self,
        _idx: ExprIndex,
        dest: &'f SSAVariable,
        src: ExprIndex,
    ) -> ValueSet {
        let function = self.function;
        match function.get_ssa_var_possible_values(dest) {
            RegisterValue::EntryValue(reg) => {
                match self.cache.get_entry_register(function.start, &reg) {
                    Some(values) => values.clone(),
                    None => {
                        trace!(
                            "No forwarded entry values, keeping classification";
                            "var" => %dest,
                            "reg" => &reg,
                        );
                        std::iter::once(PossibleValue::EntryRegisterValue(reg)).collect()
                    }
                }
            }
            RegisterValue::Undetermined => {
                self.enqueue(src);
                ValueSet::new()
            }
            possible_value => std::iter::once(possible_value.into()).collect(),
        }
    }

    fn visit_var_aliased(&mut self, _idx: ExprIndex, src: &'f SSAVariable) -> ValueSet {
        std::iter::once(self.symbolic(src)).collect()
    }

    fn visit_set_var_aliased(
        &mut self,
        _idx: ExprIndex,
        _dest: &'f SSAVariable,
        src: ExprIndex,
    ) -> ValueSet {
        self.enqueue(src);
        ValueSet::new()
    }

    /// The first operand with a concrete classification wins. Without one, the operands are kept
    /// as opaque values rather than chased, to avoid blowing up through phi fan-in.
    fn visit_var_phi(
        &mut self,
        _idx: ExprIndex,
        _dest: &'f SSAVariable,
        src: &'f [SSAVariable],
    ) -> ValueSet {
        let function = self.function;
        if let Some(concrete) = src
            .iter()
            .map(|v| function.get_ssa_var_possible_values(v))
            .find(|pv| !pv.is_undetermined())
        {
            return std::iter::once(concrete.into()).collect();
        }
        src.iter().map(|v| self.symbolic(v)).collect()
    }
}

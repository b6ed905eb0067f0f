//! Whole-binary recovery of global variables.
//!
//! [`GlobalVariableRecovery`] holds everything a single run accumulates: the alias table, the
//! value-set cache, data-variable spans and their references, and the function work queue.
//! Functions are recovered starting from an entry point, following direct calls; optionally, any
//! function not reached that way is picked up afterwards.

use std::collections::{BTreeSet, VecDeque};

use crate::alias::VariableAliasSet;
use crate::cfg_module::Module;
use crate::config::{RecoveryConfig, CONFIG};
use crate::dispatch::CalleeCollector;
use crate::error::Error;
use crate::host::{AnalysisHost, SymbolKind};
use crate::il::Function;
use crate::log::*;
use crate::resolver::SSAVariableResolver;
use crate::scanner::{self, DataVariables, Xrefs};
use crate::symbolic::{NoSymbolicExecution, SymbolicExecutionHooks};
use crate::value_set::{FunctionValueSets, ValueSet};

/// Name of the produced module
pub const MODULE_NAME: &str = "GlobalVariables";

pub struct GlobalVariableRecovery<'h, H: AnalysisHost> {
    host: &'h H,
    config: &'h RecoveryConfig,
    alias_set: VariableAliasSet,
    value_sets: FunctionValueSets,
    data_variables: DataVariables,
    xrefs: Xrefs,
    recovered: BTreeSet<u64>,
    to_recover: VecDeque<u64>,
    hooks: Box<dyn SymbolicExecutionHooks + 'h>,
}

impl<'h, H: AnalysisHost> GlobalVariableRecovery<'h, H> {
    /// A new recovery over `host`, using the global [`CONFIG`](static@CONFIG)
    pub fn new(host: &'h H) -> Self {
        Self::with_config(host, &CONFIG)
    }

    pub fn with_config(host: &'h H, config: &'h RecoveryConfig) -> Self {
        Self {
            host,
            config,
            alias_set: Default::default(),
            value_sets: Default::default(),
            data_variables: Default::default(),
            xrefs: Default::default(),
            recovered: Default::default(),
            to_recover: Default::default(),
            hooks: Box::new(NoSymbolicExecution),
        }
    }

    /// Use `hooks` for symbolic execution. Only has an effect if
    /// `install_symbolic_execution_hooks` is set.
    pub fn with_hooks(mut self, hooks: Box<dyn SymbolicExecutionHooks + 'h>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn alias_set(&self) -> &VariableAliasSet {
        &self.alias_set
    }

    pub fn value_sets(&self) -> &FunctionValueSets {
        &self.value_sets
    }

    pub fn data_variables(&self) -> &DataVariables {
        &self.data_variables
    }

    pub fn xrefs(&self) -> &Xrefs {
        &self.xrefs
    }

    pub fn recovered_functions(&self) -> &BTreeSet<u64> {
        &self.recovered
    }

    /// Run the whole recovery, from symbol identification to the final module.
    pub fn run(mut self, entrypoint: &str) -> Result<Module, Error> {
        self.identify_exported_symbols();
        self.identify_data_variables();
        self.recover_from_entrypoint(entrypoint)?;
        Ok(self.to_module())
    }

    /// Seed the alias table with every exported data symbol, each reaching at least one pointer
    /// past its start.
    pub fn identify_exported_symbols(&mut self) {
        let host = self.host;
        let mut symbols: Vec<_> = host.symbols().iter().collect();
        symbols.sort_by_key(|s| s.address);

        for sym in symbols {
            let section = match host.section_at(sym.address) {
                Some(s) => s,
                None => continue,
            };
            if sym.kind == SymbolKind::Data
                && host.is_data_variable(sym.address)
                && !section.executable
                && !section.external
            {
                let end = sym.address.saturating_add(host.address_size());
                self.alias_set.insert_variable(sym.address, end);
            }
        }

        debug!("Exported global variables"; "count" => self.alias_set.len());
    }

    pub fn identify_data_variables(&mut self) {
        let (data_variables, xrefs) = scanner::scan(self.host);
        self.data_variables = data_variables;
        self.xrefs = xrefs;
    }

    /// Recover the function named `entrypoint`, then everything reachable from it (and, with
    /// round-robin discovery, everything else).
    pub fn recover_from_entrypoint(&mut self, entrypoint: &str) -> Result<(), Error> {
        let host = self.host;
        let candidates = host.symbols_by_name(entrypoint);
        let entry = candidates
            .iter()
            .find(|s| s.kind == SymbolKind::Function)
            .or_else(|| candidates.first())
            .ok_or_else(|| Error::MissingEntryPoint(entrypoint.to_owned()))?;
        info!(
            "Entry point";
            "name" => &entry.name,
            "addr" => format!("{:#x}", entry.address),
            "functions" => host.function_starts().len(),
        );

        self.recovered.insert(entry.address);
        self.recover_function(entry.address);

        loop {
            while let Some(addr) = self.to_recover.pop_front() {
                if self.recovered.insert(addr) {
                    self.recover_function(addr);
                }
            }
            if !self.config.round_robin_function_discovery {
                break;
            }
            match host
                .function_starts()
                .into_iter()
                .find(|f| !self.recovered.contains(f))
            {
                Some(addr) => {
                    trace!("Picking up unreached function"; "addr" => format!("{:#x}", addr));
                    self.to_recover.push_back(addr);
                }
                None => break,
            }
        }

        if self.config.install_symbolic_execution_hooks {
            if let Err(e) = self.hooks.run() {
                warn!("Symbolic execution failed. Ignoring."; "error" => %e);
            }
        }

        info!(
            "Global variables recovered";
            "functions" => self.recovered.len(),
            "alias_set" => ?self.alias_set,
        );
        info!(
            "Data variables";
            "count" => self.data_variables.len(),
            "spans" => ?self.data_variables,
        );
        Ok(())
    }

    /// Resolve every SSA variable defined in the function at `addr`, and learn from the results.
    pub fn recover_function(&mut self, addr: u64) {
        let host = self.host;
        let function = match host.function_at(addr) {
            Some(f) => f,
            None => {
                debug!("No function at address. Ignoring."; "addr" => format!("{:#x}", addr));
                return;
            }
        };
        if let Some(sym) = host.symbol_at(addr) {
            if sym.kind == SymbolKind::ImportedFunction {
                debug!("Skipping external function"; "name" => &sym.name);
                return;
            }
        }

        debug!(
            "Recovering function";
            "name" => &function.name,
            "addr" => format!("{:#x}", addr),
            "params" => ?function.params,
        );

        if self.config.install_symbolic_execution_hooks {
            if let Err(e) = self.hooks.install_hook(addr, &function.name) {
                warn!("Could not install symbolic execution hook. Ignoring."; "error" => %e);
            }
        }

        for var in function.defined_variables() {
            let values =
                SSAVariableResolver::resolve(var, function, &mut self.value_sets, self.config);
            if self.config.record_discovered_pointers {
                self.record_discovered_pointers(&values);
            }
        }

        self.log_xrefs(function);

        if self.config.forward_entry_register_values {
            self.forward_entry_registers(function);
        }

        for call in CalleeCollector::collect(function) {
            if host.function_at(call.target).is_some() && !self.recovered.contains(&call.target) {
                trace!(
                    "Queueing callee";
                    "from" => format!("{:#x}", call.address),
                    "target" => format!("{:#x}", call.target),
                );
                self.to_recover.push_back(call.target);
            }
        }
    }

    /// Let constant pointers into data sections widen the known variables they fall in. Never
    /// adds a start to the alias table.
    fn record_discovered_pointers(&mut self, values: &ValueSet) {
        let host = self.host;
        for ptr in values.iter().filter_map(|v| v.as_pointer()) {
            if !host.is_data_address(ptr) {
                continue;
            }
            let end = match self.data_variables.span_end(ptr) {
                Some(end) if end > ptr => end,
                _ => ptr.saturating_add(host.address_size()),
            };
            self.alias_set.record(ptr, end);
        }
    }

    fn log_xrefs(&self, function: &Function) {
        for (idx, expr) in function.instructions() {
            let refs = match self.xrefs.at(expr.address) {
                Some(refs) => refs,
                None => continue,
            };
            for (var, site) in refs.iter() {
                if site.function_start != function.start || site.instruction != idx {
                    continue;
                }
                debug!(
                    "Instruction refers to data variable";
                    "addr" => format!("{:#x}", expr.address),
                    "var" => format!("{:#x}", var),
                    "operation" => expr.kind.operation_name(),
                    "known_start" => self.alias_set.contains(*var),
                );
            }
        }
    }

    /// Union the value sets of each direct call's arguments into the callee's entry-register
    /// values.
    fn forward_entry_registers(&mut self, function: &Function) {
        let host = self.host;
        for call in CalleeCollector::collect(function) {
            let callee = match host.function_at(call.target) {
                Some(callee) if !callee.params.is_empty() => callee,
                _ => continue,
            };
            for (reg, &arg) in callee.params.iter().zip(call.params.iter()) {
                let values = SSAVariableResolver::resolve_expression(
                    arg,
                    function,
                    &self.value_sets,
                    self.config,
                );
                if values.is_empty() {
                    continue;
                }
                trace!(
                    "Forwarding argument values";
                    "callee" => &callee.name,
                    "reg" => reg,
                    "values" => ?values,
                );
                self.value_sets
                    .add_entry_register_values(callee.start, reg, values);
            }
        }
    }

    /// Flatten the alias table into the output module.
    pub fn to_module(&self) -> Module {
        Module::from_alias_table(MODULE_NAME, &self.alias_set)
    }
}

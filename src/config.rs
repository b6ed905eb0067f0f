//! A global store of flags that can impact recovery.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different recovery runs in the same process).

/// The global configuration store. Its fields are expected to be accessed across the program via
/// the global [`CONFIG`](static@CONFIG).
#[derive(Debug)]
pub struct RecoveryConfig {
    /// Push argument value sets at direct call sites into the callee's entry-register values, so
    /// that the callee can resolve variables that were classified as entry values.
    pub forward_entry_register_values: bool,
    /// When the work queue drains but unrecovered functions are left, pick up the lowest-addressed
    /// of them. Without this, only functions reachable from the entry point by direct calls are
    /// recovered.
    pub round_robin_function_discovery: bool,
    /// Let constant pointers into data sections that show up in resolved value sets widen the
    /// known variables they point into.
    pub record_discovered_pointers: bool,
    /// Install the symbolic-execution hook at each recovered function's entry.
    pub install_symbolic_execution_hooks: bool,
    /// Log every resolved value set at `info` level (useful when debugging)
    pub log_resolved_value_sets: bool,
    /// Upper bound on the worklist nodes dispatched by a single top-level resolution. Reaching it
    /// truncates that resolution to whatever was collected so far.
    pub max_dispatched_nodes_per_resolve: usize,
}

impl RecoveryConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        // SAFETY: only reached through the `lazy_static` initializer, which runs exactly once.
        let init = unsafe { INTERNAL_CONFIG_INITIALIZER.take() };
        init.flatten().unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`, before anything reads [`CONFIG`](static@CONFIG).
    #[allow(static_mut_refs)]
    pub fn initialize(
        command_line_config: Vec<CommandLineRecoveryConfig>,
        node_budget: Option<usize>,
    ) {
        let mut config: RecoveryConfig = command_line_config.into();
        if let Some(budget) = node_budget {
            config.max_dispatched_nodes_per_resolve = budget;
        }
        // SAFETY: called once from `main` before any other thread exists.
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(config)) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<RecoveryConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: RecoveryConfig = RecoveryConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Recovery configuration parameters
pub enum CommandLineRecoveryConfig {
    DisableEntryRegisterForwarding,
    DisableRoundRobinFunctionDiscovery,
    DisableDiscoveredPointerRecording,
    EnableSymbolicExecutionHooks,
    EnableValueSetDump,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            forward_entry_register_values: true,
            round_robin_function_discovery: true,
            record_discovered_pointers: true,
            install_symbolic_execution_hooks: false,
            log_resolved_value_sets: false,
            max_dispatched_nodes_per_resolve: 1 << 16,
        }
    }
}

impl From<Vec<CommandLineRecoveryConfig>> for RecoveryConfig {
    fn from(v: Vec<CommandLineRecoveryConfig>) -> Self {
        use CommandLineRecoveryConfig::*;
        let mut r = RecoveryConfig::default();
        for v in v {
            match v {
                DisableEntryRegisterForwarding => {
                    r.forward_entry_register_values = false;
                }
                DisableRoundRobinFunctionDiscovery => {
                    r.round_robin_function_discovery = false;
                }
                DisableDiscoveredPointerRecording => {
                    r.record_discovered_pointers = false;
                }
                EnableSymbolicExecutionHooks => {
                    r.install_symbolic_execution_hooks = true;
                }
                EnableValueSetDump => {
                    r.log_resolved_value_sets = true;
                }
            }
        }
        r
    }
}

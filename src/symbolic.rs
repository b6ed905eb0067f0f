//! Optional symbolic execution of recovered functions.
//!
//! An engine may install a hook at the entry of each function the recovery visits, and is run
//! once every function has been visited. Engine failures never abort the recovery.

/// A failure reported by a symbolic-execution engine.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("could not install hook at {function_start:#x} ({function_name}): {reason}")]
    Install {
        function_start: u64,
        function_name: String,
        reason: String,
    },
    #[error("symbolic execution failed: {0}")]
    Run(String),
}

pub trait SymbolicExecutionHooks {
    /// Install a hook at the entry of the function starting at `function_start`.
    fn install_hook(&mut self, function_start: u64, function_name: &str)
        -> Result<(), HookError>;

    /// Run the engine with all installed hooks.
    fn run(&mut self) -> Result<(), HookError>;
}

/// No symbolic execution at all.
#[derive(Default, Debug)]
pub struct NoSymbolicExecution;

impl SymbolicExecutionHooks for NoSymbolicExecution {
    fn install_hook(&mut self, _: u64, _: &str) -> Result<(), HookError> {
        Ok(())
    }

    fn run(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

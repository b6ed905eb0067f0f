use varrecovery::*;

use std::path::PathBuf;

use clap::Parser;

use crate::error::Error;
use crate::recovery::GlobalVariableRecovery;

/// Recover global variables from a disassembled binary
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Path to the analysis export of the binary image, produced by the exporter script
    #[clap(long)]
    binary: PathBuf,
    /// Path to output the CFG module (protobuf) to
    #[clap(long)]
    out: PathBuf,
    /// Name of the entry point function
    #[clap(long)]
    entrypoint: String,
    /// Path to send log (as JSON) to. Default is stderr.
    ///
    /// Error or higher severity alerts will still continue being shown at stderr (in addition
    /// to being added to the log)
    #[clap(long = "log_file")]
    log_file: Option<PathBuf>,
    /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
    #[clap(short, long, parse(from_occurrences))]
    debug: usize,
    /// Disable terminal logging, even for high severity alerts. Strongly discouraged for normal
    /// use.
    #[clap(long)]
    debug_disable_terminal_logging: bool,
    /// Force blocking for terminal logging. If too many messages are being spewed the logger,
    /// by default, does not block, but instead dumps a dropped-messages alert. This option
    /// forces it to block and dump even if too many are being sent.
    #[clap(long)]
    debug_forced_blocking_terminal_logging: bool,
    /// Output the data-variable cross references as a GraphViz `.dot` file to the given path
    #[clap(long)]
    debug_output_graphviz: Option<PathBuf>,
    /// Maximum number of IL nodes a single value-set resolution may visit
    #[clap(long)]
    node_budget: Option<usize>,
    /// Advanced configuration options to tweak the recovery behavior
    #[clap(short = 'Z', long, arg_enum)]
    advanced_config: Vec<config::CommandLineRecoveryConfig>,
}

fn run(args: Args) -> Result<(), Error> {
    let exported =
        std::fs::read_to_string(&args.binary).map_err(|e| Error::io(&args.binary, e))?;
    let host = export_lifter::lift_from(&exported)?;
    log::debug!("Analysis export loaded"; "path" => %args.binary.display());

    let mut recovery = GlobalVariableRecovery::new(&host);
    recovery.identify_exported_symbols();
    recovery.identify_data_variables();
    recovery.recover_from_entrypoint(&args.entrypoint)?;

    if let Some(path) = args.debug_output_graphviz {
        std::fs::write(
            &path,
            recovery.xrefs().generate_dot(recovery.alias_set()),
        )
        .map_err(|e| Error::io(&path, e))?;
    }

    recovery.to_module().write_to(&args.out)
}

fn main() {
    let args = Args::parse();

    let logger = match log::FileAndTermDrain::new(
        args.debug,
        args.debug_disable_terminal_logging,
        args.debug_forced_blocking_terminal_logging,
        args.log_file.clone(),
    ) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Could not set up logging: {}", e);
            std::process::exit(2);
        }
    };
    let log_guard = slog_scope::set_global_logger(logger);

    config::RecoveryConfig::initialize(args.advanced_config.clone(), args.node_budget);

    let result = run(args);
    match &result {
        Ok(()) => log::trace!("Done"),
        Err(e) => log::crit!("Recovery failed"; "error" => %e),
    }

    drop(log_guard);
    if result.is_err() {
        std::process::exit(1);
    }
}

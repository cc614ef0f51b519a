//! `converge` binary entry point.
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{CommandFactory as _, Parser as _};

use converge_cli::cli::{Cli, Command};
use converge_cli::commands::{self, Runtime};
use converge_cli::logging::{self, Logger};

const fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Capture(_) => "capture",
        Command::Apply(_) => "apply",
        Command::Verify(_) => "verify",
        Command::Plan => "plan",
        Command::Report => "report",
        Command::Doctor => "doctor",
        Command::State { .. } => "state",
        Command::Completions { .. } => "completions",
        Command::Version => "version",
    }
}

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();

    match &args.command {
        Command::Version => {
            commands::version::run();
            return ExitCode::SUCCESS;
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "converge", &mut std::io::stdout());
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let name = command_name(&args.command);
    let logger = Arc::new(Logger::new(name));
    logging::init_subscriber(args.verbose, name, logger.progress_line());

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    let handler_log = Arc::clone(&logger);
    if let Err(e) = ctrlc::set_handler(move || {
        if !handler_flag.swap(true, Ordering::SeqCst) {
            handler_log.warn("interrupted; finishing running apps, skipping the rest");
        }
    }) {
        logger.debug(&format!("cannot install Ctrl-C handler: {e}"));
    }

    let rt = Runtime::new(Arc::clone(&logger) as Arc<dyn logging::Log>).with_cancel(cancel);
    logger.debug(&format!("converge {}", commands::version::version()));

    let result = match &args.command {
        Command::Capture(opts) => commands::capture::run(&args.global, opts, &rt),
        Command::Apply(opts) => commands::apply::run(&args.global, opts, &rt),
        Command::Verify(opts) => commands::verify::run(&args.global, opts, &rt),
        Command::Plan => commands::plan::run(&args.global, &rt),
        Command::Report => commands::report::run(&args.global, &rt),
        Command::Doctor => commands::doctor::run(&args.global, &rt),
        Command::State { action } => commands::state::run(&args.global, action, &rt),
        Command::Completions { .. } | Command::Version => Ok(()),
    };

    logger.print_summary();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

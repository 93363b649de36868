use std::process::ExitCode;

use clap::Parser;

use relaxpaint::{cli, log_info, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // A missing log file never stops a run.
    match logger::init_with_path(args.log_file.as_deref()) {
        Ok(path) => {
            if args.verbose {
                println!("Log file: {}", path.display());
            }
        }
        Err(e) => eprintln!("warning: {}", e),
    }
    log_info!("args: {:?}", args);

    cli::run(args)
}

use clap::{CommandFactory, Parser};
use std::error::Error;
use tracing::error;

use lifecycle::{
    cli::{StopCli, StopVerb, format_status, format_stop, init_logging},
    config::load_config,
    supervisor::{Lifecycle, StatusOptions},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = StopCli::parse();
    init_logging(args.global.log_level);

    run(args).inspect_err(|err| error!("{err}"))
}

fn run(args: StopCli) -> Result<(), Box<dyn Error>> {
    let verb = args.verb();
    if verb == StopVerb::Help {
        StopCli::command().print_help()?;
        println!();
        return Ok(());
    }

    let config = load_config(args.global.config.as_deref())?;
    let lifecycle = Lifecycle::new(config)?;

    match verb {
        StopVerb::Stop => {
            let report = lifecycle.stop_all();
            println!("{}", format_stop(&report, &args.global)?);
        }
        StopVerb::Status => {
            let report = lifecycle.status(StatusOptions {
                health: args.global.health,
            });
            print!("{}", format_status(&report, &args.global)?);
            if args.global.json {
                println!();
            }
        }
        StopVerb::Help => {}
    }

    Ok(())
}

use clap::{CommandFactory, Parser};
use std::error::Error;
use tracing::{error, info};

use lifecycle::{
    cli::{StartCli, StartVerb, format_status, init_logging},
    config::load_config,
    supervisor::{Lifecycle, StatusOptions},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = StartCli::parse();
    init_logging(args.global.log_level);

    run(args).inspect_err(|err| error!("{err}"))
}

fn run(args: StartCli) -> Result<(), Box<dyn Error>> {
    let verb = args.verb();
    if verb == StartVerb::Help {
        StartCli::command().print_help()?;
        println!();
        return Ok(());
    }

    let config = load_config(args.global.config.as_deref())?;
    let lifecycle = Lifecycle::new(config)?;

    match verb {
        StartVerb::Start => {
            let report = lifecycle.start_all().into_result()?;
            info!(
                "All {} service(s) launched; run `lifecycle-start status` to check readiness",
                report.launched.len()
            );
        }
        StartVerb::Restart => {
            lifecycle.restart().into_result()?;
        }
        StartVerb::Status => {
            let report = lifecycle.status(StatusOptions {
                health: args.global.health,
            });
            print!("{}", format_status(&report, &args.global)?);
            if args.global.json {
                println!();
            }
        }
        StartVerb::Help => {}
    }

    Ok(())
}

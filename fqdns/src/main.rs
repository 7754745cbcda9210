mod cli;
mod commands;
mod factory;
mod logging;

use clap::Parser;

use cli::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.global.log_level, cli.global.log_file.as_deref());
    let factory = factory::build(&cli.global);

    match cli.command {
        Command::Resolve(args) => {
            let result = commands::resolve::run(args, factory).await;
            print_result(&result);
        }
        Command::Discover(args) => {
            let result = commands::discover::run(args, factory).await;
            print_result(&result);
        }
        Command::Serve(args) => {
            commands::serve::run(args, factory).await?;
        }
    }

    Ok(())
}

/// Matches the original tool's convention of writing its JSON result to
/// stderr, one line, so stdout stays free for whatever the DNS server
/// itself is doing.
fn print_result(value: &serde_json::Value) {
    eprintln!("{value}");
}

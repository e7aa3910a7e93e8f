use sqlbridge::bridge::Bridge;
use sqlbridge::config;
use sqlbridge::core::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

const USAGE: &str = "\
Usage: sqlbridge [--config <path>] <command>

Commands:
  select <address>             Run a select address and print the first row
  update <address> <payload>   Run an update address with a payload
  insert <address> <payload>   Run an insert address with a payload
  poll                         Refresh every configured item once
  items                        Show the refresh interval and configured items";

/// A parsed command line.
#[derive(Debug, PartialEq)]
struct Cli {
    config: PathBuf,
    command: Command,
}

#[derive(Debug, PartialEq)]
enum Command {
    Select(String),
    Update { address: String, payload: String },
    Insert { address: String, payload: String },
    Poll,
    Items,
}

fn parse_args(args: &[String]) -> std::result::Result<Cli, String> {
    let mut config_path = None;
    let mut rest: Vec<&str> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            let path = iter.next().ok_or("--config needs a path")?;
            config_path = Some(PathBuf::from(path));
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["select", address] => Command::Select(address.to_string()),
        ["update", address, payload] => Command::Update {
            address: address.to_string(),
            payload: payload.to_string(),
        },
        ["insert", address, payload] => Command::Insert {
            address: address.to_string(),
            payload: payload.to_string(),
        },
        ["poll"] => Command::Poll,
        ["items"] => Command::Items,
        [] => return Err("no command given".to_string()),
        other => return Err(format!("unrecognized arguments: {}", other.join(" "))),
    };

    Ok(Cli {
        config: config_path.unwrap_or_else(config::default_config_path),
        command,
    })
}

fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {}", cli.config.display());
    let bridge = Bridge::from_config(config::load_config(&cli.config)?);

    let outcome = execute(&bridge, cli.command);
    if let Err(e) = bridge.shutdown() {
        eprintln!("{}", e);
    }
    outcome
}

fn execute(bridge: &Bridge, command: Command) -> Result<()> {
    match command {
        Command::Select(address) => {
            let selected = bridge.executor().select(&address)?;
            if selected.additional_rows {
                eprintln!("query returned more than one row; showing the first");
            }
            match selected.into_value() {
                Some(value) => println!("{}", value),
                None => eprintln!("no row"),
            }
        }
        Command::Update { address, payload } => {
            let changed = bridge.executor().update(&address, &payload)?;
            println!("{} row(s) updated", changed);
        }
        Command::Insert { address, payload } => {
            let inserted = bridge.executor().insert(&address, &payload)?;
            println!("{} row(s) inserted", inserted);
        }
        Command::Poll => {
            for change in bridge.refresh() {
                match change.value {
                    Some(value) => println!("{}: {}", change.item, value),
                    None => println!("{}: (no row)", change.item),
                }
            }
        }
        Command::Items => {
            println!("refresh every {} ms", bridge.refresh_interval().as_millis());
            for name in bridge.item_names() {
                if let Some(binding) = bridge.binding(name) {
                    let directions: Vec<&str> = [
                        binding.select.as_ref().map(|_| "select"),
                        binding.update.as_ref().map(|_| "update"),
                        binding.insert.as_ref().map(|_| "insert"),
                    ]
                    .into_iter()
                    .flatten()
                    .collect();
                    println!("{} ({})", name, directions.join(", "));
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

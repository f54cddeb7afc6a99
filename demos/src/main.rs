//! Small demo binary showing how an embedding application wires logging
//! and configuration around `persistency-core`: load a config file with
//! `confy`, initialize `fern` logging, then drive a single KVS instance
//! through the manager. Not a wire-protocol CLI client — just the
//! ambient-stack idiom.

mod config;
mod trace;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::DemoConfig;
use log::info;
use persistency_core::manager::PersistencyManager;
use persistency_core::value::{TypeTag, TypedValue};

#[derive(Debug, Parser)]
#[command(author, version, about = "persistency-core demo binary")]
struct Args {
    /// Instance specifier to open.
    #[clap(short, long, default_value = "demo_instance")]
    instance: String,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a string value under `key`.
    Set { key: String, value: String },
    /// Print the string value stored under `key`, if any.
    Get { key: String },
    /// List every key in the instance.
    List,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg: DemoConfig = confy::load("persistency-demo", None).unwrap_or_default();
    trace::init_logging(cfg.log_level())?;
    info!("persistency-demo starting with args: {:?}", args);

    let manager = PersistencyManager::new();
    manager.init(cfg.to_persistency_config()?).context("failed to initialize persistency manager")?;

    let handle = manager.get_kvs_storage(&args.instance, true, None)?;
    let backend = handle.backend();

    match args.cmd {
        Command::Set { key, value } => {
            backend.set_value(&key, &TypedValue::String(value))?;
            backend.sync_to_storage()?;
            println!("ok");
        }
        Command::Get { key } => match backend.get_value(&key, TypeTag::String) {
            Ok(TypedValue::String(v)) => println!("{}", v),
            Ok(_) => unreachable!("get_value with TypeTag::String always returns TypedValue::String"),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        Command::List => {
            for key in backend.get_all_keys()? {
                println!("{}", key);
            }
        }
    }

    Ok(())
}

//! Logging initialization: a `fern` dispatcher with a `chrono`-timestamped
//! formatter on a single stderr chain, since this binary has no
//! long-lived daemon log directory to rotate.

use log::LevelFilter;
use std::str::FromStr;

pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] - {} - [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::from_str(level).unwrap_or(LevelFilter::Info))
        .chain(std::io::stderr());

    if dispatch.apply().is_err() {
        eprintln!("logger has already been set");
    }
    Ok(())
}

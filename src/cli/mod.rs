//! The command line interface of the `tally` binary.

pub mod options;

use std::fmt;
use serde::Serialize;
use crate::commons::TallyEmptyResult;
use crate::commons::error::Error;
use crate::config::Config;
use self::options::{Command, Options};

/// Runs the command the process was invoked with.
pub async fn process(options: Options) -> TallyEmptyResult {
    let config = Config::create(options.general.config.as_deref())?;
    let json = options.general.json;
    match options.command {
        Command::Update(command) => command.run(&config, json).await,
        Command::Retention(command) => command.run(&config, json).await,
        Command::Show(command) => command.run(&config, json).await,
    }
}

/// Prints a report to stdout, as JSON when asked for.
pub fn output<T: Serialize + fmt::Display>(value: &T, json: bool) -> TallyEmptyResult {
    if json {
        output_json(value)
    } else {
        println!("{}", value);
        Ok(())
    }
}

/// Prints a value to stdout as pretty JSON.
pub fn output_json<T: Serialize>(value: &T) -> TallyEmptyResult {
    let text = serde_json::to_string_pretty(value).map_err(Error::custom)?;
    println!("{}", text);
    Ok(())
}

// The Cli gathers the setup script and the observation file.
use clap::{Arg, ArgAction, ColorChoice, Command};
use std::fs::read_to_string;

use crate::setup::Setup;

pub struct Cli {
    setup: Setup,
    observations: Option<String>,
}

impl Cli {
    pub fn new() -> Result<Self, String> {
        let cmd = Command::new("ice")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Incremental GNSS estimation with learned residual noise model")
            .arg_required_else_help(true)
            .color(ColorChoice::Always)
            .arg(
                Arg::new("cfg")
                    .short('c')
                    .action(ArgAction::Set)
                    .required(true)
                    .help("Load setup script (JSON). Must describe the station."),
            )
            .arg(
                Arg::new("observations")
                    .short('i')
                    .action(ArgAction::Set)
                    .required(false)
                    .help("Observation file. Supersedes the setup script."),
            )
            .arg(
                Arg::new("dump")
                    .short('d')
                    .action(ArgAction::Set)
                    .required(false)
                    .help("Dump residual batches and final model in this directory."),
            );

        let matches = cmd.get_matches();

        let path = matches
            .get_one::<String>("cfg")
            .ok_or_else(|| "missing setup script".to_string())?;

        let content =
            read_to_string(path).map_err(|e| format!("failed to read setup: {}", e))?;

        let mut setup: Setup = serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse setup: {}", e))?;

        if let Some(dir) = matches.get_one::<String>("dump") {
            setup.dump_dir = Some(dir.clone());
        }

        Ok(Self {
            observations: matches.get_one::<String>("observations").cloned(),
            setup,
        })
    }

    pub fn setup(&self) -> Setup {
        self.setup.clone()
    }

    /// Observation file to process
    pub fn observations(&self) -> Option<String> {
        self.observations
            .clone()
            .or_else(|| self.setup.observations.clone())
    }
}

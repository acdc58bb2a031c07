// ice processes one observation file, epoch by epoch, and prints
// the solutions selected by the setup script. The residual noise model
// learnt along the way is printed at shutdown.

#[macro_use]
extern crate log;
extern crate serde;

use env_logger::{Builder, Target};

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::exit;

mod cli;
use cli::Cli;

mod source;

pub mod setup;

use gnss_ice::prelude::{EpochController, EpochOutcome, Residual};

/// Dumps one consumed residual batch, as `<key> <sv> <range> <phase>`.
fn dump_batch(dir: &str, index: usize, residuals: &[Residual]) -> std::io::Result<()> {
    let path = Path::new(dir).join(format!("batch_{}.residuals", index));
    let mut fd = File::create(path)?;
    for residual in residuals.iter() {
        writeln!(
            fd,
            "{} {} {:.6} {:.6}",
            residual.key, residual.sv, residual.value[0], residual.value[1]
        )?;
    }
    Ok(())
}

pub fn main() {
    let mut builder = Builder::from_default_env();
    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    let cli = Cli::new().unwrap_or_else(|e| {
        error!("{}", e);
        exit(2);
    });

    let setup = cli.setup();

    let path = cli.observations().unwrap_or_else(|| {
        error!("no observation file");
        exit(2);
    });

    let stream = source::load(&path).unwrap_or_else(|e| {
        error!("{}", e);
        exit(1);
    });

    info!(
        "{}: {} observations (keys {:?} to {:?})",
        path,
        stream.len(),
        stream.first_key(),
        stream.last_key()
    );

    let output = setup.config.output;

    let mut controller = EpochController::new(setup.config).unwrap_or_else(|e| {
        error!("failed to deploy: {}", e);
        exit(1);
    });

    let mut batches = 0;

    for epoch in stream.epochs() {
        let outcome = match controller.process(&epoch) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} - {}", epoch.key, e);
                exit(1);
            },
        };

        if let EpochOutcome::Solved(solution) = &outcome {
            for line in solution.lines(&output) {
                println!("{}", line);
            }
        }

        let reclusterings = controller.summary().reclusterings;
        if reclusterings > batches {
            batches = reclusterings;
            if let Some(dir) = &setup.dump_dir {
                let residuals = controller.mixture().previous_batch();
                if let Err(e) = dump_batch(dir, batches, residuals) {
                    error!("failed to dump residual batch #{}: {}", batches, e);
                }
            }
        }

        if controller.reached_end_marker(&epoch, &stream) {
            info!("{} - end marker reached", epoch.key);
            break;
        }
    }

    let model = controller.mixture().model();
    print!("{}", model);

    if let Some(dir) = &setup.dump_dir {
        let path = Path::new(dir).join("model");
        let dumped = File::create(&path).and_then(|mut fd| write!(fd, "{}", model));
        if let Err(e) = dumped {
            error!("failed to dump model: {}", e);
        }
    }

    info!("{}", controller.summary());
}

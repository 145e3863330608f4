//! Orrery control daemon.
//!
//! Runs the control loop: delivers scene-loading progress and keeps the
//! configured telescopes connected.
//!
//! # Usage
//!
//! ```sh
//! orreryd --config orrery.toml --scene sterngarten --goto 0:5.59:-5.39
//! ```
//!
//! Ctrl+C terminates the process; the job coordinator's drop joins the
//! worker when the loop exits through `--ticks`.

use std::path::PathBuf;
use std::thread;

use clap::Parser;
use thiserror::Error;

use orrery::config::{ConfigError, OrreryConfig};
use orrery::scenery::{SceneCatalog, SceneError, SceneryManager};
use orrery::telescope::{TelescopeError, TelescopeManager};

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telescope(#[from] TelescopeError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("invalid --goto '{0}', expected SLOT:RA_HOURS:DEC_DEG")]
    Goto(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GotoArg {
    slot: u8,
    ra_hours: f64,
    dec_deg: f64,
}

fn parse_goto(raw: &str) -> Result<GotoArg, String> {
    let invalid = || DaemonError::Goto(raw.to_string()).to_string();
    let mut parts = raw.split(':');
    let (Some(slot), Some(ra), Some(dec), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let goto = GotoArg {
        slot: slot.trim().parse().map_err(|_| invalid())?,
        ra_hours: ra.trim().parse().map_err(|_| invalid())?,
        dec_deg: dec.trim().parse().map_err(|_| invalid())?,
    };
    if !(0.0..24.0).contains(&goto.ra_hours) || !(-90.0..=90.0).contains(&goto.dec_deg) {
        return Err(invalid());
    }
    Ok(goto)
}

/// Planetarium control daemon: background scene loading and telescope links.
#[derive(Debug, Parser)]
#[command(name = "orreryd", version, about)]
struct Cli {
    /// Configuration file. Falls back to $ORRERY_CONFIG, then orrery.toml.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scene id to load at startup, overriding scenery.default_scene_id.
    #[arg(short, long, value_name = "ID")]
    scene: Option<String>,

    /// Slew a telescope once it connects. Repeatable.
    #[arg(long, value_name = "SLOT:RA_HOURS:DEC_DEG", value_parser = parse_goto)]
    goto: Vec<GotoArg>,

    /// Stop after this many control-loop iterations.
    #[arg(long, value_name = "N")]
    ticks: Option<u64>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() {
    orrery::init_tracing();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("orreryd: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), DaemonError> {
    let (config, source) = OrreryConfig::load(cli.config.as_deref())?;
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    eprintln!(
        "orreryd: config from {source:?}, {} telescope(s), tick {} ms",
        config.telescopes.len(),
        config.control.tick_interval_ms
    );

    let mut telescopes = TelescopeManager::from_config(&config.telescopes)?;
    let mut scenery = SceneryManager::new(SceneCatalog::new(&config.scenery.scene_dir));
    if let Some(id) = &config.scenery.default_scene_id {
        scenery.set_default_scene_id(id.clone());
    }
    match &cli.scene {
        Some(id) => {
            scenery.load_by_id(id)?;
        }
        None => {
            scenery.set_enabled(true);
        }
    }

    let mut pending_gotos = cli.goto;
    let mut last_message = None;
    let interval = config.control.tick_interval();
    let mut iteration: u64 = 0;

    loop {
        scenery.update();
        if let Err(e) = telescopes.communicate() {
            eprintln!("orreryd: telescope loop: {e}");
        }

        pending_gotos.retain(|goto| {
            if !telescopes.is_connected(goto.slot) {
                return true;
            }
            match telescopes.goto(goto.slot, goto.ra_hours, goto.dec_deg) {
                Ok(()) => eprintln!(
                    "orreryd: slot {} slewing to {}h {}°",
                    goto.slot, goto.ra_hours, goto.dec_deg
                ),
                Err(e) => eprintln!("orreryd: goto failed: {e}"),
            }
            false
        });

        let message = scenery.message();
        if message.is_some() && message != last_message {
            eprintln!("orreryd: {}", message.as_deref().unwrap_or_default());
        }
        last_message = message;

        iteration += 1;
        if cli.ticks.is_some_and(|limit| iteration >= limit) {
            break;
        }
        thread::sleep(interval);
    }

    scenery.cancel_loading();
    telescopes.disconnect_all();
    eprintln!("orreryd: stopped after {iteration} iteration(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goto_argument() {
        assert_eq!(
            parse_goto("2:5.5:-5.4").unwrap(),
            GotoArg {
                slot: 2,
                ra_hours: 5.5,
                dec_deg: -5.4
            }
        );
        for bad in ["2:5.5", "x:1:1", "1:24:0", "1:1:91", "1:1:1:1"] {
            assert!(parse_goto(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from([
            "orreryd", "--config", "a.toml", "--goto", "0:1:2", "--goto", "1:3:4", "--ticks", "5",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert_eq!(cli.goto.len(), 2);
        assert_eq!(cli.ticks, Some(5));
        assert!(!cli.print_config);
    }
}

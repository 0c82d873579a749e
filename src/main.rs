//! rcarflash - R-Car firmware flasher
//!
//! Programs loader images onto R-Car Gen3/Gen4 boards through the serial
//! download monitor of a flash writer stub.
//!
//! # Flow
//!
//! 1. Board, loaders and files are resolved from the YAML configuration.
//! 2. With `--cpld`, the board's mode-select CPLD is driven over a
//!    USB-to-GPIO adapter into serial download mode and the board is reset.
//! 3. The flash writer is uploaded (`--flash-writer`), optionally followed
//!    by a switch to the board's high-speed baud rate.
//! 4. Every loader is placed by running its flash target's monitor dialog.
//! 5. With `--cpld`, the board is switched back to normal boot mode.

mod adapters;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::FlashOptions;
use rcarflash_core::config::Config;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> rcarflash_core::Result<()> {
    let config = Config::load(&cli.conf)?;

    match cli.command {
        Commands::Flash {
            board,
            loaders,
            path,
            serial,
            flash_writer,
            cpld,
        } => {
            let options = FlashOptions {
                board,
                loaders,
                path,
                serial,
                flash_writer,
                cpld,
            };
            let adapter = adapters::gpio_adapter();
            commands::cmd_flash(&config, &options, adapter.as_deref())
        }
        Commands::ListLoaders { board } => commands::list_loaders(&config, &board),
        Commands::ListBoards => {
            commands::list_boards(&config);
            Ok(())
        }
    }
}

//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rcarflash")]
#[command(author, version, about = "Automatic R-Car Gen3/Gen4 flash tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file
    #[arg(long, global = true, default_value = "rcar_flash.yaml")]
    pub conf: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flash loaders onto a board
    #[command(
        after_help = "Each loader has format loader_name[:file_name], by default the file name is taken from the configuration file"
    )]
    Flash {
        /// Board name
        #[arg(short, long)]
        board: String,

        /// Loaders to flash, or "all" to flash every loader of the board
        #[arg(required = true, num_args = 1..)]
        loaders: Vec<String>,

        /// Directory where loader files named in the configuration are located
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Serial console to use
        #[arg(short, long)]
        serial: Option<String>,

        /// Upload a flash writer first; the default file comes from the configuration
        #[arg(short, long, value_name = "FLASHWRITER", num_args = 0..=1)]
        flash_writer: Option<Option<PathBuf>>,

        /// Use the CPLD to switch the board to serial download mode, optionally
        /// naming the adapter by USB serial number
        #[arg(short, long, value_name = "SERIAL_NO", num_args = 0..=1)]
        cpld: Option<Option<String>>,
    },

    /// List supported loaders for a board
    ListLoaders {
        /// Board name
        #[arg(short, long)]
        board: String,
    },

    /// List supported boards
    ListBoards,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_optional_flag_values() {
        let cli = Cli::try_parse_from([
            "rcarflash", "flash", "-b", "demo", "-f", "-c", "FT1234", "bl2", "bootparam",
        ])
        .unwrap();
        match cli.command {
            Commands::Flash {
                board,
                loaders,
                flash_writer,
                cpld,
                path,
                serial,
            } => {
                assert_eq!(board, "demo");
                assert_eq!(loaders, vec!["bl2", "bootparam"]);
                assert_eq!(flash_writer, Some(None));
                assert_eq!(cpld, Some(Some("FT1234".to_string())));
                assert_eq!(path, PathBuf::from("."));
                assert_eq!(serial, None);
            }
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn test_loaders_required() {
        assert!(Cli::try_parse_from(["rcarflash", "flash", "-b", "demo"]).is_err());
    }

    #[test]
    fn test_default_conf() {
        let cli = Cli::try_parse_from(["rcarflash", "list-boards"]).unwrap();
        assert_eq!(cli.conf, PathBuf::from("rcar_flash.yaml"));
        assert!(matches!(cli.command, Commands::ListBoards));
    }
}

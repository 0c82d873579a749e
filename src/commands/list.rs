//! List commands implementation

use rcarflash_core::config::Config;
use rcarflash_core::error::Result;

/// Loader table of one board: loaders grouped by flash target, by address within a target
pub fn loader_table(config: &Config, board: &str) -> Result<Vec<String>> {
    let board = config.board(board)?;
    log::info!("Reading config for board {}", board.name);

    let mut ipls: Vec<_> = board.ipls.iter().collect();
    ipls.sort_by(|a, b| {
        a.flash_target
            .cmp(&b.flash_target)
            .then(a.flash_addr.cmp(&b.flash_addr))
    });

    let header = format!(
        "{:<24}     {:<15}     {:35}      {:10}",
        "Loader", "Flash address", "Default file", "Flash target"
    );
    let rule = "-".repeat(header.len());
    let mut lines = vec![header, rule];
    for ipl in ipls {
        lines.push(format!(
            "{:<24}     {:<15}     {:35}      {:10}",
            ipl.name,
            format!("0x{:x}", ipl.flash_addr),
            ipl.file.display().to_string(),
            ipl.flash_target
        ));
    }
    Ok(lines)
}

/// Board table: name and default flash writer, sorted by name
pub fn board_table(config: &Config) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<15}     {:>15}",
        "Board Name", "Default flash loader file"
    )];
    lines.extend(config.boards().map(|board| {
        format!(
            "{:<15}     {:>15}",
            board.name,
            board.flash_writer.display().to_string()
        )
    }));
    lines
}

/// List supported loaders for a board
pub fn list_loaders(config: &Config, board: &str) -> Result<()> {
    for line in loader_table(config, board)? {
        println!("{}", line);
    }
    Ok(())
}

/// List supported boards
pub fn list_boards(config: &Config) {
    for line in board_table(config) {
        println!("{}", line);
    }
}

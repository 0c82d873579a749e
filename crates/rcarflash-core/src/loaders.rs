//! Loader selection
//!
//! Turns the operator's loader list (`name`, `name:path` or `all`) into an
//! ordered flash plan. Every name and every file is checked here, before
//! any device is touched.

use std::path::{Path, PathBuf};

use crate::config::BoardProfile;
use crate::error::{ConfigError, FileError, Result};

/// Loader list entry that selects every loader of the board
pub const ALL_LOADERS: &str = "all";

/// One loader that will be flashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLoader {
    /// Loader name
    pub name: String,
    /// Image file to send
    pub file: PathBuf,
    /// Destination address in flash
    pub flash_addr: u64,
    /// Flash target used to place the image
    pub flash_target: String,
}

/// Resolve `specs` against `board`
///
/// File names taken from the configuration are looked up under `prefix`;
/// paths given as `name:path` are used as given. A loader named twice is
/// flashed once, at its first position, with the last file given for it.
pub fn plan_loaders(board: &BoardProfile, specs: &[String], prefix: &Path) -> Result<Vec<PlannedLoader>> {
    if specs.iter().any(|s| s == ALL_LOADERS) {
        if specs.len() > 1 {
            return Err(ConfigError::AllWithOthers.into());
        }
        let plan: Vec<PlannedLoader> = board
            .ipls
            .iter()
            .map(|ipl| PlannedLoader {
                name: ipl.name.clone(),
                file: prefix.join(&ipl.file),
                flash_addr: ipl.flash_addr,
                flash_target: ipl.flash_target.clone(),
            })
            .collect();
        check_files(&plan)?;
        return Ok(plan);
    }

    let mut plan: Vec<PlannedLoader> = Vec::with_capacity(specs.len());
    for spec in specs {
        let (name, file) = match spec.split_once(':') {
            Some((name, path)) => (name, Some(PathBuf::from(path))),
            None => (spec.as_str(), None),
        };
        let ipl = board.ipl(name)?;
        let file = file.unwrap_or_else(|| prefix.join(&ipl.file));

        match plan.iter_mut().find(|p| p.name == ipl.name) {
            Some(existing) => existing.file = file,
            None => plan.push(PlannedLoader {
                name: ipl.name.clone(),
                file,
                flash_addr: ipl.flash_addr,
                flash_target: ipl.flash_target.clone(),
            }),
        }
    }
    check_files(&plan)?;
    Ok(plan)
}

/// Flash writer file to upload: `explicit` as given, else the board default under `prefix`
pub fn flash_writer_path(board: &BoardProfile, explicit: Option<&Path>, prefix: &Path) -> Result<PathBuf> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => prefix.join(&board.flash_writer),
    };
    ensure_exists("flash writer", &path)?;
    Ok(path)
}

fn check_files(plan: &[PlannedLoader]) -> Result<()> {
    for loader in plan {
        ensure_exists(&format!("loader {}", loader.name), &loader.file)?;
    }
    Ok(())
}

fn ensure_exists(what: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(FileError::NotFound {
            what: what.to_string(),
            path: path.to_path_buf(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::DEMO, Config};
    use crate::error::Error;
    use std::fs;

    fn specs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn workdir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bl2.srec"), "S315E6302000\n").unwrap();
        fs::write(dir.path().join("bootparam.srec"), "S3150000\n").unwrap();
        fs::write(dir.path().join("writer.mot"), "S3150000\n").unwrap();
        dir
    }

    #[test]
    fn test_all_keeps_config_order() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let dir = workdir();
        let plan = plan_loaders(config.board("demo").unwrap(), &specs(&["all"]), dir.path()).unwrap();
        let names: Vec<&str> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bl2", "bootparam"]);
        assert_eq!(plan[0].file, dir.path().join("bl2.srec"));
        assert_eq!(plan[0].flash_addr, 0xE630_0000);
    }

    #[test]
    fn test_all_with_others_fails_before_io() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        // Nothing exists under this prefix, so any file check would fail differently
        let err = plan_loaders(
            config.board("demo").unwrap(),
            &specs(&["bl2", "all"]),
            Path::new("/nonexistent"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::AllWithOthers)));
    }

    #[test]
    fn test_override_path_used_as_given() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let dir = workdir();
        let custom = dir.path().join("custom.srec");
        fs::write(&custom, "S315E6302000\n").unwrap();

        let spec = format!("bl2:{}", custom.display());
        let plan = plan_loaders(
            config.board("demo").unwrap(),
            &[spec, "bootparam".to_string()],
            dir.path(),
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].file, custom);
        assert_eq!(plan[1].file, dir.path().join("bootparam.srec"));
    }

    #[test]
    fn test_unknown_loader() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let dir = workdir();
        let err = plan_loaders(config.board("demo").unwrap(), &specs(&["bl31:x.srec"]), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnknownLoader(ref n)) if n == "bl31"));
    }

    #[test]
    fn test_missing_file() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = plan_loaders(config.board("demo").unwrap(), &specs(&["bootparam"]), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::File(FileError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_loader_flashed_once() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let dir = workdir();
        let plan = plan_loaders(
            config.board("demo").unwrap(),
            &specs(&["bootparam", "bl2", "bootparam"]),
            dir.path(),
        )
        .unwrap();
        let names: Vec<&str> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bootparam", "bl2"]);
    }

    #[test]
    fn test_flash_writer_path() {
        let config = Config::from_yaml_str(DEMO).unwrap();
        let board = config.board("demo").unwrap();
        let dir = workdir();
        assert_eq!(
            flash_writer_path(board, None, dir.path()).unwrap(),
            dir.path().join("writer.mot")
        );
        assert!(matches!(
            flash_writer_path(board, Some(Path::new("/nonexistent/fw.mot")), dir.path()),
            Err(Error::File(FileError::NotFound { .. }))
        ));
    }
}

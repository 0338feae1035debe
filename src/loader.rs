//! Suite file loader.
//!
//! Reads suite documents from files, directories or stdin.

use crate::error::LoadError;
use crate::schema::SuiteFile;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

/// Default suite file looked up when no path is given.
pub const DEFAULT_SUITE_FILENAME: &str = "commander.yaml";

/// Document formats a suite can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
}

impl Format {
    /// Format implied by a file's extension.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(LoadError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Parse a suite document.
pub fn parse_suite(contents: &str, format: Format) -> Result<SuiteFile, LoadError> {
    if contents.trim().is_empty() {
        return Ok(SuiteFile::default());
    }
    match format {
        Format::Yaml => Ok(serde_yaml::from_str(contents)?),
        Format::Toml => Ok(toml::from_str(contents)?),
    }
}

/// Load a suite from a file.
pub fn load_suite(path: &Path) -> Result<SuiteFile, LoadError> {
    if path.is_dir() {
        return Err(LoadError::IsDirectory(path.to_path_buf()));
    }
    let format = Format::from_path(path)?;
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_suite(&contents, format)
}

/// Load a YAML suite piped in on stdin.
pub fn load_stdin() -> Result<SuiteFile, LoadError> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(LoadError::StdinIsTerminal);
    }
    let mut contents = String::new();
    stdin
        .read_to_string(&mut contents)
        .map_err(LoadError::Stdin)?;
    parse_suite(&contents, Format::Yaml)
}

/// Suite files directly inside `dir`, sorted by name.
pub fn find_suites(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io_err = |source: std::io::Error| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut suites = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && Format::from_path(&path).is_ok() {
            suites.push(path);
        }
    }
    suites.sort();
    Ok(suites)
}

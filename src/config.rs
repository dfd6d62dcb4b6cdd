//! Runtime configuration.
//!
//! The tracker reads its transaction log from one of three places, checked
//! in order: a spawned command (the production deployment tails a live
//! `varnishlog`), a log file for replay, or stdin.

use crate::source::{
    CommandSource,
    LogSource,
    ReaderSource,
};
use eyre::{
    eyre,
    Result,
};
use std::{
    io::BufReader,
    path::PathBuf,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub log_command: Option<String>,
    pub log_file: Option<PathBuf>,
    pub interval: Duration,
    pub prefix: String,
    /// Static `key=value` tags appended to every metric line.
    pub tags: Vec<(String, String)>,
}

impl Config {
    pub fn new(
        log_command: Option<String>,
        log_file: Option<PathBuf>,
        interval: Duration,
        prefix: String,
        tags: Vec<String>,
    ) -> Result<Self> {
        let tags = tags.iter().map(|t| Self::parse_tag(t)).collect::<Result<_>>()?;
        Ok(Self {
            log_command,
            log_file,
            interval,
            prefix,
            tags,
        })
    }

    /// Parse a `key=value` tag argument.
    fn parse_tag(tag: &str) -> Result<(String, String)> {
        let (key, value) = tag
            .split_once('=')
            .ok_or_else(|| eyre!("invalid tag {tag:?}, expected key=value"))?;
        if key.is_empty() {
            return Err(eyre!("invalid tag {tag:?}, empty key"));
        }
        Ok((key.to_string(), value.to_string()))
    }

    /// Open the configured log source.
    pub fn open_source(&self) -> Result<Box<dyn LogSource>> {
        if let Some(command) = &self.log_command {
            return Ok(Box::new(CommandSource::spawn(command)?));
        }
        if let Some(path) = &self.log_file {
            let file = std::fs::File::open(path)
                .map_err(|err| eyre!("cannot open log file {}: {err}", path.display()))?;
            return Ok(Box::new(ReaderSource::new(BufReader::new(file))));
        }
        info!("no log command or file configured, reading from stdin");
        Ok(Box::new(ReaderSource::new(BufReader::new(std::io::stdin()))))
    }
}

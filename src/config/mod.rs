use std::fmt;
use std::io;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use eyre::{Context, Result};
use miniarg::split_args::SplitArgs;
use thiserror::Error;

pub mod forward;

use self::forward::{Forward, ParseForwardError};

pub type ParseStream<'a> = Peekable<SplitArgs<'a>>;

pub fn parse_stream(s: &str) -> ParseStream<'_> {
    SplitArgs::new(s).peekable()
}

/// Mappings as written in the mapping store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub forward: Vec<Forward>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseForwardError,
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut forward = Vec::new();

        let lines = s
            .lines()
            .map(str::trim)
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .filter(|(_, line)| !line.starts_with('#'));

        for (i, line) in lines {
            let mut stream = parse_stream(line);

            let Some(directive) = stream.next() else {
                continue;
            };

            match directive {
                "forward" => {
                    let x = Forward::parse(&mut stream)
                        .map_err(|kind| ParseError { line: i + 1, kind })?;

                    forward.push(x);
                }

                x => {
                    warn!("skipping unknown directive '{x}'")
                }
            }
        }

        Ok(Self { forward })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Managed by portmapd, rewritten on every change.")?;

        for x in &self.forward {
            writeln!(f, "{x}")?;
        }

        Ok(())
    }
}

/// File the mapping table is persisted to.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store. A store that does not exist yet is empty.
    pub async fn load(&self) -> Result<Config> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        let config = data
            .parse()
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(config)
    }

    /// Replace the store contents with `config`.
    pub async fn save(&self, config: &Config) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, config.to_string())
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::mapping::MappingType;

    use super::*;

    #[test]
    fn comments_and_unknown_directives_are_skipped() {
        let config: Config = "
            # comment
            upstream 10.0.0.17 mac 01:02:03:04:05:06

            forward :8080 to 10.0.0.5:80
            forward 127.0.0.1:9000 to db.internal:5432 type tcp
        "
        .parse()
        .unwrap();

        assert_eq!(config.forward.len(), 2);
        assert_eq!(config.forward[1].to.host(), "db.internal");
        assert_eq!(config.forward[1].mapping_type, MappingType::Tcp);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = "forward :8080 to 10.0.0.5:80\n\nforward :8081 10.0.0.5:80"
            .parse::<Config>()
            .unwrap_err();

        assert_eq!(err.line, 3);
        assert_eq!(err.kind, ParseForwardError::ExpectedTo);
    }

    #[tokio::test]
    async fn missing_store_is_empty_and_created_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("mappings.conf"));

        assert_eq!(store.load().await.unwrap(), Config::default());

        let config: Config = "forward :8080 to 10.0.0.5:80".parse().unwrap();
        store.save(&config).await.unwrap();

        assert_eq!(store.load().await.unwrap(), config);
        assert!(!dir.path().join("mappings.conf.tmp").exists());
    }

    #[tokio::test]
    async fn malformed_store_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.conf");
        std::fs::write(&path, "forward nonsense").unwrap();

        let err = Store::new(&path).load().await.unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }
}

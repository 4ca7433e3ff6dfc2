use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Value codec used by the cache backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    Bincode,
    Json,
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bincode" => Ok(CodecKind::Bincode),
            "json" => Ok(CodecKind::Json),
            other => Err(Error::Config(format!("unknown codec '{}'", other))),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Bincode => f.write_str("bincode"),
            CodecKind::Json => f.write_str("json"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionKind {
    Zstd,
    None,
}

impl FromStr for CompressionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" => Ok(CompressionKind::Zstd),
            "none" | "off" => Ok(CompressionKind::None),
            other => Err(Error::Config(format!("unknown compression '{}'", other))),
        }
    }
}

/// Physical store served by the TCP server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sled,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "moka" => Ok(StoreKind::Memory),
            "sled" => Ok(StoreKind::Sled),
            other => Err(Error::Config(format!("unknown store '{}'", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub remote_addr: String,
    pub store: StoreKind,
    pub data_dir: String,
    pub max_entries: Option<u64>,
    pub encoder: Option<CodecKind>,
    pub decoder: Option<CodecKind>,
    pub compression: CompressionKind,
    pub zstd_level: i32,
    pub tag_payloads: bool,
    pub coalesce: bool,
    pub op_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            remote_addr: format!("{}:{}", Self::DEFAULT_HOST, Self::DEFAULT_PORT),
            store: StoreKind::Memory,
            data_dir: Self::DEFAULT_DATA_DIR.to_string(),
            max_entries: None,
            encoder: None,
            decoder: None,
            compression: CompressionKind::Zstd,
            zstd_level: Self::DEFAULT_ZSTD_LEVEL,
            tag_payloads: false,
            coalesce: false,
            op_timeout: None,
            sweep_interval: Duration::from_secs(Self::DEFAULT_SWEEP_SECS),
        }
    }
}

impl Config {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 6380;
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_ZSTD_LEVEL: i32 = 3;
    const DEFAULT_SWEEP_SECS: u64 = 60;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("KEEPER_HOST").unwrap_or(defaults.host);
        let port = parse_or("KEEPER_PORT", lookup("KEEPER_PORT"), defaults.port);

        Ok(Self {
            remote_addr: lookup("KEEPER_REMOTE_ADDR").unwrap_or(defaults.remote_addr),
            store: lookup("KEEPER_STORE")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(defaults.store),
            data_dir: lookup("KEEPER_DATA_DIR").unwrap_or(defaults.data_dir),
            max_entries: lookup("KEEPER_MAX_ENTRIES")
                .and_then(|raw| parse_opt("KEEPER_MAX_ENTRIES", &raw)),
            encoder: lookup("KEEPER_ENCODER").map(|s| s.parse()).transpose()?,
            decoder: lookup("KEEPER_DECODER").map(|s| s.parse()).transpose()?,
            compression: lookup("KEEPER_COMPRESSION")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(defaults.compression),
            zstd_level: parse_or(
                "KEEPER_ZSTD_LEVEL",
                lookup("KEEPER_ZSTD_LEVEL"),
                defaults.zstd_level,
            ),
            tag_payloads: parse_or(
                "KEEPER_TAG_PAYLOADS",
                lookup("KEEPER_TAG_PAYLOADS"),
                defaults.tag_payloads,
            ),
            coalesce: parse_or("KEEPER_COALESCE", lookup("KEEPER_COALESCE"), defaults.coalesce),
            op_timeout: lookup("KEEPER_OP_TIMEOUT_MS")
                .and_then(|raw| parse_opt::<u64>("KEEPER_OP_TIMEOUT_MS", &raw))
                .map(Duration::from_millis),
            sweep_interval: Duration::from_secs(parse_or(
                "KEEPER_SWEEP_INTERVAL_SECS",
                lookup("KEEPER_SWEEP_INTERVAL_SECS"),
                Self::DEFAULT_SWEEP_SECS,
            )),
            host,
            port,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the encoder/decoder pair into a single codec
    ///
    /// Falls back to bincode only when neither side is configured. Setting
    /// one side alone, or two different codecs, is rejected.
    pub fn codec(&self) -> Result<CodecKind> {
        match (self.encoder, self.decoder) {
            (None, None) => Ok(CodecKind::Bincode),
            (Some(enc), Some(dec)) if enc == dec => Ok(enc),
            (Some(enc), Some(dec)) => Err(Error::Config(format!(
                "encoder '{}' does not match decoder '{}'",
                enc, dec
            ))),
            (Some(_), None) => Err(Error::Config(
                "KEEPER_ENCODER is set but KEEPER_DECODER is not".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "KEEPER_DECODER is set but KEEPER_ENCODER is not".to_string(),
            )),
        }
    }
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => parse_opt(name, &raw).unwrap_or(default),
        None => default,
    }
}

fn parse_opt<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} has invalid value '{}', using default", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:6380");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.compression, CompressionKind::Zstd);
        assert_eq!(config.codec().unwrap(), CodecKind::Bincode);
        assert!(!config.tag_payloads);
        assert!(!config.coalesce);
        assert!(config.op_timeout.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("KEEPER_PORT", "7000"),
            ("KEEPER_STORE", "sled"),
            ("KEEPER_ENCODER", "json"),
            ("KEEPER_DECODER", "JSON"),
            ("KEEPER_COMPRESSION", "none"),
            ("KEEPER_TAG_PAYLOADS", "true"),
            ("KEEPER_OP_TIMEOUT_MS", "250"),
            ("KEEPER_MAX_ENTRIES", "10000"),
        ])
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.store, StoreKind::Sled);
        assert_eq!(config.codec().unwrap(), CodecKind::Json);
        assert_eq!(config.compression, CompressionKind::None);
        assert!(config.tag_payloads);
        assert_eq!(config.op_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_entries, Some(10_000));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[("KEEPER_PORT", "not-a-port"), ("KEEPER_ZSTD_LEVEL", "x")]).unwrap();
        assert_eq!(config.port, 6380);
        assert_eq!(config.zstd_level, 3);
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let err = config_from(&[("KEEPER_ENCODER", "gob")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_partial_codec_override_is_rejected() {
        let config = config_from(&[("KEEPER_ENCODER", "json")]).unwrap();
        assert_eq!(config.codec().unwrap_err().kind(), ErrorKind::Config);

        let config = config_from(&[("KEEPER_DECODER", "bincode")]).unwrap();
        assert_eq!(config.codec().unwrap_err().kind(), ErrorKind::Config);

        let config = config_from(&[("KEEPER_ENCODER", "json"), ("KEEPER_DECODER", "bincode")]).unwrap();
        assert_eq!(config.codec().unwrap_err().kind(), ErrorKind::Config);
    }
}

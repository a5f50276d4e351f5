//! Environment-driven configuration (spec §6), loaded once at startup into a
//! typed struct — the pattern `dex-idl-parser`'s loader used for its IDL
//! files, applied here to process env vars instead.

use crate::error::ConfigError;
use pool_codec::DexKind;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub stream_endpoint: String,
    pub stream_token: String,
    pub enabled_dexs: Vec<DexKind>,
    pub sink_url: Option<String>,
    pub sink_token: Option<String>,
    pub journal_path: PathBuf,
    pub metadata_fallback_key: Option<String>,
}

fn all_dexs() -> Vec<DexKind> {
    DexKind::all().to_vec()
}

fn parse_dex(name: &str) -> Option<DexKind> {
    match name.trim() {
        "RaydiumCPMM" => Some(DexKind::RaydiumCpmm),
        "RaydiumAMMv4" => Some(DexKind::RaydiumAmmV4),
        "OrcaWhirlpool" => Some(DexKind::OrcaWhirlpool),
        "MeteoraDLMM" => Some(DexKind::MeteoraDlmm),
        "PumpFun" => Some(DexKind::PumpFun),
        _ => None,
    }
}

impl Config {
    /// Loads configuration from environment variables (spec §6). Missing
    /// `STREAM_ENDPOINT`/`STREAM_TOKEN` is a fatal-config error (spec §7):
    /// the caller logs the cause and exits non-zero before the event loop
    /// starts.
    pub fn from_env() -> Result<Self, ConfigError> {
        let stream_endpoint = std::env::var("STREAM_ENDPOINT")
            .map_err(|_| ConfigError::MissingEnvVar("STREAM_ENDPOINT"))?;
        let stream_token =
            std::env::var("STREAM_TOKEN").map_err(|_| ConfigError::MissingEnvVar("STREAM_TOKEN"))?;

        let enabled_dexs = match std::env::var("ENABLED_DEXS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let parsed: Vec<DexKind> = raw.split(',').filter_map(parse_dex).collect();
                if parsed.is_empty() {
                    return Err(ConfigError::InvalidValue { name: "ENABLED_DEXS", value: raw });
                }
                parsed
            }
            _ => all_dexs(),
        };

        let sink_url = std::env::var("SINK_URL").ok().filter(|s| !s.is_empty());
        let sink_token = std::env::var("SINK_TOKEN").ok().filter(|s| !s.is_empty());
        let journal_path = std::env::var("JOURNAL_PATH")
            .unwrap_or_else(|_| "pool_sentinel.journal.jsonl".to_string())
            .into();
        let metadata_fallback_key = std::env::var("METADATA_FALLBACK_KEY").ok().filter(|s| !s.is_empty());

        Ok(Config {
            stream_endpoint,
            stream_token,
            enabled_dexs,
            sink_url,
            sink_token,
            journal_path,
            metadata_fallback_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_dexs_defaults_to_all_five() {
        assert_eq!(all_dexs().len(), 5);
    }

    #[test]
    fn parses_known_dex_names() {
        assert_eq!(parse_dex("PumpFun"), Some(DexKind::PumpFun));
        assert_eq!(parse_dex("RaydiumAMMv4"), Some(DexKind::RaydiumAmmV4));
        assert_eq!(parse_dex("unknown"), None);
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use escrow_lending_core::WalletAddress;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    rpc_url: String,
    escrow_address: WalletAddress,
    admin_address: WalletAddress,
    ledger_url: String,
    #[serde(default = "default_outbox_path")]
    outbox_path: PathBuf,
    #[serde(default = "default_refresh_interval_secs")]
    refresh_interval_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    receipt_poll_interval_ms: u64,
}

fn default_outbox_path() -> PathBuf {
    PathBuf::from("outbox.jsonl")
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq)]
pub struct LenderConfig {
    pub rpc_url: reqwest::Url,
    pub escrow_address: WalletAddress,
    pub admin_address: WalletAddress,
    pub ledger_url: reqwest::Url,
    pub outbox_path: PathBuf,
    pub refresh_interval: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl LenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config toml file {path:?}"))?;
        let base_dir = path.parent().unwrap_or(Path::new(""));
        Self::parse(&contents, base_dir)
            .with_context(|| format!("failed to parse config toml file {path:?}"))
    }

    /// A relative `outbox_path` is taken relative to `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;

        let rpc_url = file
            .rpc_url
            .parse()
            .with_context(|| format!("invalid rpc_url {:?}", file.rpc_url))?;
        let ledger_url = file
            .ledger_url
            .parse()
            .with_context(|| format!("invalid ledger_url {:?}", file.ledger_url))?;

        if file.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be at least 1");
        }
        if file.confirmation_timeout_secs == 0 {
            bail!("confirmation_timeout_secs must be at least 1");
        }
        if file.receipt_poll_interval_ms == 0 {
            bail!("receipt_poll_interval_ms must be at least 1");
        }

        let outbox_path = if file.outbox_path.is_absolute() {
            file.outbox_path
        } else {
            base_dir.join(file.outbox_path)
        };

        Ok(Self {
            rpc_url,
            escrow_address: file.escrow_address,
            admin_address: file.admin_address,
            ledger_url,
            outbox_path,
            refresh_interval: Duration::from_secs(file.refresh_interval_secs),
            confirmation_timeout: Duration::from_secs(file.confirmation_timeout_secs),
            receipt_poll_interval: Duration::from_millis(file.receipt_poll_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
        rpc_url = "http://127.0.0.1:8545"
        escrow_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        admin_address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        ledger_url = "http://127.0.0.1:3000/api"
    "#;

    #[test]
    fn defaults_apply() {
        let config = LenderConfig::parse(MINIMAL, Path::new("/etc/lender")).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(120));
        assert_eq!(config.receipt_poll_interval, Duration::from_millis(1000));
        assert_eq!(config.outbox_path, PathBuf::from("/etc/lender/outbox.jsonl"));
        assert_eq!(
            config.admin_address,
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap()
        );
    }

    #[test]
    fn rejects_bad_values() {
        let zero_refresh = format!("{MINIMAL}\nrefresh_interval_secs = 0");
        assert!(LenderConfig::parse(&zero_refresh, Path::new("")).is_err());

        let bad_address = MINIMAL.replace("0x5FbDB2315678afecb367f032d93F642f64180aa3", "0x1234");
        assert!(LenderConfig::parse(&bad_address, Path::new("")).is_err());

        let unknown_key = format!("{MINIMAL}\nprivate_key = \"0xdead\"");
        assert!(LenderConfig::parse(&unknown_key, Path::new("")).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lender.toml");
        std::fs::write(&path, format!("{MINIMAL}\noutbox_path = \"state/outbox.jsonl\"")).unwrap();

        let config = LenderConfig::load(&path).unwrap();
        assert_eq!(config.outbox_path, dir.path().join("state/outbox.jsonl"));
        assert!(LenderConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; flags win over env.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub log_level: String,
    pub base_domain: String,
    pub disable_auth: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("log_level", &self.log_level)
            .field("base_domain", &self.base_domain)
            .field("disable_auth", &self.disable_auth)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Local S3-compatible object storage emulator")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding buckets and objects (overrides DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Access key clients must sign with (overrides ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// Secret key clients must sign with (overrides SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Region reported to clients (overrides REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Log filter when RUST_LOG is unset (overrides LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Host name used in multipart completion locations (overrides BASE_DOMAIN)
    #[arg(long)]
    pub base_domain: Option<String>,

    /// Accept unsigned requests (overrides DISABLE_AUTH)
    #[arg(long)]
    pub disable_auth: bool,
}

impl AppConfig {
    /// Parse CLI args, falling back to the process environment.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge parsed args with an environment lookup. Empty values count as unset.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let text = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let env_port = match var("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value `{}`", value))?,
            None => 3000,
        };
        let env_disable_auth = match var("DISABLE_AUTH") {
            Some(value) => {
                parse_bool(&value).with_context(|| format!("parsing DISABLE_AUTH value `{}`", value))?
            }
            None => false,
        };

        Ok(Self {
            host: args.host.unwrap_or_else(|| text("HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            data_dir: args
                .data_dir
                .unwrap_or_else(|| PathBuf::from(text("DATA_DIR", "./data"))),
            access_key: args.access_key.unwrap_or_else(|| text("ACCESS_KEY", "test")),
            secret_key: args
                .secret_key
                .unwrap_or_else(|| text("SECRET_KEY", "test123456789")),
            region: args.region.unwrap_or_else(|| text("REGION", "ap-southeast-3")),
            log_level: args.log_level.unwrap_or_else(|| text("LOG_LEVEL", "debug")),
            base_domain: args
                .base_domain
                .unwrap_or_else(|| text("BASE_DOMAIN", "localhost")),
            disable_auth: args.disable_auth || env_disable_auth,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(args: &[&str], env: &[(&str, &str)]) -> Result<AppConfig> {
        let args = Args::try_parse_from(std::iter::once("locals3").chain(args.iter().copied()))?;
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| env.get(name).cloned())
    }

    #[test]
    fn defaults_apply_without_args_or_env() {
        let cfg = resolve(&[], &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.access_key, "test");
        assert_eq!(cfg.secret_key, "test123456789");
        assert_eq!(cfg.region, "ap-southeast-3");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.base_domain, "localhost");
        assert!(!cfg.disable_auth);
    }

    #[test]
    fn env_overrides_defaults_and_flags_override_env() {
        let env = [
            ("PORT", "9000"),
            ("REGION", "eu-central-1"),
            ("ACCESS_KEY", "from-env"),
            ("DISABLE_AUTH", "Yes"),
        ];
        let cfg = resolve(&["--port", "9100", "--access-key", "from-flag"], &env).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.region, "eu-central-1");
        assert_eq!(cfg.access_key, "from-flag");
        assert!(cfg.disable_auth);
    }

    #[test]
    fn empty_env_values_are_unset() {
        let cfg = resolve(&[], &[("PORT", ""), ("HOST", " "), ("DISABLE_AUTH", "")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(!cfg.disable_auth);
    }

    #[test]
    fn unparseable_values_are_errors() {
        let err = resolve(&[], &[("PORT", "eighty")]).unwrap_err();
        assert!(format!("{:#}", err).contains("PORT"));

        let err = resolve(&[], &[("DISABLE_AUTH", "maybe")]).unwrap_err();
        assert!(format!("{:#}", err).contains("DISABLE_AUTH"));
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = resolve(&["--secret-key", "hunter2hunter2"], &[]).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("hunter2hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

use crate::channel_config::{ChannelConfig, PreferenceBook};
use crate::ChannelRanges;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::PathBuf;

/// Receiver configuration, taken from the environment.
///
/// | Variable | Meaning |
/// |---|---|
/// | `LISTEN` | socket address to serve HTTP on |
/// | `PORT` | port to serve HTTP on, all interfaces (ignored if `LISTEN` is set) |
/// | `ALLOW_ALL_ORIGINS` | send `Access-Control-Allow-Origin: *` if non-empty |
/// | `CB_STORE_PATH` | JSON file to keep broadcasts in; memory only if unset |
/// | `CB_SOURCE_URI` | upstream event stream of decoded broadcasts; stdin if unset |
/// | `CB_GSM_EMERGENCY_IDS` | operator emergency message identifiers, e.g. `0x1100-0x1104,4370` |
/// | `CB_CDMA_EMERGENCY_IDS` | operator emergency CDMA service categories |
/// | `CB_CHANNEL_50` | offer channel 50 (Brazilian area info) if non-empty |
/// | `CB_SUBSCRIPTIONS` | number of SIM subscriptions, default 1 |
/// | `CB_PREFERENCES` | JSON file of per-subscription alert preferences |
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub allow_all_origins: bool,
    pub store_path: Option<PathBuf>,
    pub source_uri: Option<hyper::Uri>,
    pub channels: ChannelConfig,
    pub preferences: PreferenceBook,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build settings from any source of variables; unset and empty variables are equivalent.
    pub fn from_vars<F: Fn(&str) -> Option<String>>(var: F) -> Result<Self, SettingsError> {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        let listen = if let Some(listen) = var("LISTEN") {
            parse("LISTEN", listen)?
        } else if let Some(port) = var("PORT") {
            let port: u16 = parse("PORT", port)?;
            SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0).into()
        } else {
            SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 8080, 0, 0).into()
        };

        let source_uri = var("CB_SOURCE_URI")
            .map(|uri| parse::<hyper::Uri>("CB_SOURCE_URI", uri))
            .transpose()?;

        let channels = ChannelConfig {
            gsm_emergency_ids: var("CB_GSM_EMERGENCY_IDS")
                .map(|ids| parse::<ChannelRanges>("CB_GSM_EMERGENCY_IDS", ids))
                .transpose()?
                .unwrap_or_default(),
            cdma_emergency_ids: var("CB_CDMA_EMERGENCY_IDS")
                .map(|ids| parse::<ChannelRanges>("CB_CDMA_EMERGENCY_IDS", ids))
                .transpose()?
                .unwrap_or_default(),
            channel_50_supported: var("CB_CHANNEL_50").is_some(),
        };

        let mut preferences = match var("CB_PREFERENCES") {
            Some(path) => read_preferences(PathBuf::from(path))?,
            None => PreferenceBook::default(),
        };
        if let Some(count) = var("CB_SUBSCRIPTIONS") {
            let count: u32 = parse("CB_SUBSCRIPTIONS", count)?;
            preferences = preferences.with_subscriptions(count);
        }

        Ok(Self {
            listen,
            allow_all_origins: var("ALLOW_ALL_ORIGINS").is_some(),
            store_path: var("CB_STORE_PATH").map(PathBuf::from),
            source_uri,
            channels,
            preferences,
        })
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| SettingsError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn read_preferences(path: PathBuf) -> Result<PreferenceBook, SettingsError> {
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => return Err(SettingsError::ReadPreferences(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| SettingsError::PreferencesFormat(path, e))
}

#[derive(Debug)]
pub enum SettingsError {
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    ReadPreferences(PathBuf, std::io::Error),
    PreferencesFormat(PathBuf, serde_json::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SettingsError::Invalid {
                name,
                value,
                reason,
            } => write!(f, "{}={:?} is invalid: {}", name, value, reason),
            SettingsError::ReadPreferences(path, e) => {
                write!(f, "failed to read preferences from {:?}: {}", path, e)
            }
            SettingsError::PreferencesFormat(path, e) => {
                write!(f, "invalid preferences in {:?}: {}", path, e)
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Invalid { .. } => None,
            SettingsError::ReadPreferences(_, e) => Some(e),
            SettingsError::PreferencesFormat(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, SettingsError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.listen.port(), 8080);
        assert!(!s.allow_all_origins);
        assert_eq!(s.store_path, None);
        assert_eq!(s.source_uri, None);
        assert_eq!(s.channels, ChannelConfig::default());
        assert_eq!(s.preferences, PreferenceBook::default());
    }

    #[test]
    fn listen_beats_port() {
        let s = settings(&[("LISTEN", "127.0.0.1:9000"), ("PORT", "1")]).unwrap();
        assert_eq!(s.listen, "127.0.0.1:9000".parse().unwrap());

        let s = settings(&[("PORT", "9001"), ("ALLOW_ALL_ORIGINS", "")]).unwrap();
        assert_eq!(s.listen.port(), 9001);
        assert!(!s.allow_all_origins);
    }

    #[test]
    fn channel_settings() {
        let s = settings(&[
            ("CB_GSM_EMERGENCY_IDS", "0x1100-0x1104"),
            ("CB_CHANNEL_50", "1"),
            ("CB_SUBSCRIPTIONS", "2"),
        ])
        .unwrap();
        assert!(s.channels.gsm_emergency_ids.contains(0x1103));
        assert!(s.channels.cdma_emergency_ids.is_empty());
        assert!(s.channels.channel_50_supported);
        assert!(s.preferences.is_multi_sim());
    }

    #[test]
    fn invalid_values_are_named() {
        let e = settings(&[("CB_GSM_EMERGENCY_IDS", "4370,x")]).unwrap_err();
        assert!(e.to_string().starts_with("CB_GSM_EMERGENCY_IDS=\"4370,x\" is invalid"));

        assert!(matches!(
            settings(&[("PORT", "http")]),
            Err(SettingsError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            settings(&[("CB_PREFERENCES", "/nonexistent/preferences.json")]),
            Err(SettingsError::ReadPreferences(..))
        ));
    }
}

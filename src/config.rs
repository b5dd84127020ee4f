#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_YTDLP_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Everything the backend needs to know before it binds a socket.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub download_dir: PathBuf,
    pub www_root: PathBuf,
    pub cookies_file: PathBuf,
    pub ytdlp_program: PathBuf,
    pub host: IpAddr,
    pub port: u16,
}

/// Values supplied on the command line. They win over the environment and
/// the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub download_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub ytdlp_program: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let path_setting = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup_value(key, file_vars, &env_lookup).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let download_dir = path_setting(
        overrides.download_dir,
        "FETCHTUBE_DOWNLOAD_DIR",
        DEFAULT_DOWNLOAD_DIR,
    );
    let www_root = path_setting(overrides.www_root, "FETCHTUBE_WWW_ROOT", DEFAULT_WWW_ROOT);
    let cookies_file = path_setting(
        overrides.cookies_file,
        "FETCHTUBE_COOKIES",
        DEFAULT_COOKIES_FILE,
    );
    let ytdlp_program = path_setting(
        overrides.ytdlp_program,
        "FETCHTUBE_YTDLP",
        DEFAULT_YTDLP_PROGRAM,
    );

    let port = overrides
        .port
        .or_else(|| {
            lookup_value("FETCHTUBE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);

    let host_raw = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("FETCHTUBE_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let host = parse_host(&host_raw)?;

    Ok(RuntimeSettings {
        download_dir,
        www_root,
        cookies_file,
        ytdlp_program,
        host,
        port,
    })
}

pub fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address, got {value:?}"))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    if path.is_dir() {
        return Err(anyhow!("{} is a directory, not an env file", path.display()));
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_listen_on_all_interfaces() {
        let settings =
            build_runtime_settings(&HashMap::new(), |_| None, RuntimeOverrides::default())
                .unwrap();
        assert_eq!(settings.download_dir, PathBuf::from("downloads"));
        assert_eq!(settings.cookies_file, PathBuf::from("cookies.txt"));
        assert_eq!(settings.ytdlp_program, PathBuf::from("yt-dlp"));
        assert_eq!(settings.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn env_file_values_are_used() {
        let settings = settings_from(
            "FETCHTUBE_DOWNLOAD_DIR=\"/srv/media\"\nFETCHTUBE_PORT=\"8081\"\nFETCHTUBE_HOST=\"127.0.0.1\"\n",
        );
        assert_eq!(settings.download_dir, PathBuf::from("/srv/media"));
        assert_eq!(settings.port, 8081);
        assert_eq!(settings.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let settings = settings_from("FETCHTUBE_PORT=\"nope\"\n");
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn invalid_host_is_an_error() {
        let vars = read_env_file(make_config("FETCHTUBE_HOST=\"not-an-ip\"\n").path()).unwrap();
        let err = build_runtime_settings(&vars, |_| None, RuntimeOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("not-an-ip"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars =
            read_env_file(make_config("FETCHTUBE_COOKIES=\"/file/cookies.txt\"\n").path())
                .unwrap();
        let settings = build_runtime_settings(
            &vars,
            |key| (key == "FETCHTUBE_COOKIES").then(|| "/env/cookies.txt".to_string()),
            RuntimeOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.cookies_file, PathBuf::from("/env/cookies.txt"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("FETCHTUBE_DOWNLOAD_DIR".to_string(), "/file".to_string());
        vars.insert("FETCHTUBE_PORT".to_string(), "7000".to_string());

        let settings = build_runtime_settings(
            &vars,
            |key| match key {
                "FETCHTUBE_DOWNLOAD_DIR" => Some("/env".to_string()),
                "FETCHTUBE_PORT" => Some("8000".to_string()),
                _ => None,
            },
            RuntimeOverrides {
                download_dir: Some(PathBuf::from("/cli")),
                port: Some(9000),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();

        assert_eq!(settings.download_dir, PathBuf::from("/cli"));
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_runtime_settings(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn blank_file_value_counts_as_unset() {
        let settings = settings_from("FETCHTUBE_WWW_ROOT=\"\"\n");
        assert_eq!(settings.www_root, PathBuf::from(DEFAULT_WWW_ROOT));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export FETCHTUBE_DOWNLOAD_DIR="/media"
            FETCHTUBE_WWW_ROOT='/www'
            FETCHTUBE_HOST =  "0.0.0.0"
            FETCHTUBE_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("FETCHTUBE_DOWNLOAD_DIR").unwrap(), "/media");
        assert_eq!(vars.get("FETCHTUBE_WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("FETCHTUBE_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("FETCHTUBE_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_reads_custom_env_path() {
        let cfg = make_config("FETCHTUBE_YTDLP=\"/opt/bin/yt-dlp\"\n");
        let settings = resolve_runtime_settings(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        // The process environment could still set FETCHTUBE_YTDLP in CI.
        if env::var("FETCHTUBE_YTDLP").is_err() {
            assert_eq!(settings.ytdlp_program, PathBuf::from("/opt/bin/yt-dlp"));
        }
    }
}

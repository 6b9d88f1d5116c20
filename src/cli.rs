//! Command-line interface for rpc-tunnel.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments.
///
/// Unset options leave the value from the environment or config file alone.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// API key for authentication (overrides config file).
    pub api_key: Option<String>,
    /// Disable authentication.
    pub no_auth: bool,
    /// Idle time in milliseconds before a session is collected.
    pub stale_timeout_ms: Option<u64>,
    /// Always answer with buffered JSON, never SSE.
    pub json_response: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("api-key") => {
                result.api_key = Some(parser.value()?.parse()?);
            }
            Long("no-auth") => {
                result.no_auth = true;
            }
            Short('t') | Long("stale-timeout") => {
                let value: String = parser.value()?.parse()?;
                let ms = value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or(ArgsError::InvalidValue("stale-timeout", value))?;
                result.stale_timeout_ms = Some(ms);
            }
            Long("json-response") => {
                result.json_response = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"rpc-tunnel {version}
Horizontally scalable JSON-RPC session server

USAGE:
    rpc-tunnel [OPTIONS]

OPTIONS:
    -H, --host <ADDR>           Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>           Port to listen on [default: 3000]
    -c, --config <FILE>         Path to configuration file (JSON)
    -k, --api-key <KEY>         API key for authentication (default tenant)
    -t, --stale-timeout <MS>    Idle time before a session is collected [default: 300000]
        --json-response         Always answer with JSON, never SSE
    -l, --log-level <LVL>       Log level (error, warn, info, debug, trace)
        --no-auth               Disable authentication
    -h, --help                  Print help
    -V, --version               Print version

ENVIRONMENT VARIABLES:
    RPC_TUNNEL_HOST                 Host address (overrides config)
    RPC_TUNNEL_PORT                 Port number (overrides config)
    RPC_TUNNEL_API_KEY              API key (overrides config)
    RPC_TUNNEL_STALE_TIMEOUT_MS     Session stale timeout (overrides config)
    RPC_TUNNEL_LOG_LEVEL            Log level (overrides config)
    RUST_LOG                        Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:3000, no auth)
    rpc-tunnel

    # Start on all interfaces with API key
    rpc-tunnel -H 0.0.0.0 -p 8080 -k my-secret-key

    # Start with config file
    rpc-tunnel -c /etc/rpc-tunnel/config.json

    # Short-lived sessions, plain JSON responses
    rpc-tunnel -t 60000 --json-response
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("rpc-tunnel {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("{0}")]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("rpc-tunnel")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(result.stale_timeout_ms.is_none());
        assert!(!result.no_auth);
        assert!(!result.json_response);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_long_options() {
        let result =
            parse_args_from(args(&["--host", "192.168.1.1", "--port", "9000"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "192.168.1.1");
        assert_eq!(result.port, Some(9000));
    }

    #[test]
    fn test_api_key() {
        let result = parse_args_from(args(&["-k", "my-secret"])).unwrap();
        assert_eq!(result.api_key, Some("my-secret".to_string()));
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_no_auth() {
        let result = parse_args_from(args(&["--no-auth"])).unwrap();
        assert!(result.no_auth);
    }

    #[test]
    fn test_stale_timeout() {
        let result = parse_args_from(args(&["-t", "60000"])).unwrap();
        assert_eq!(result.stale_timeout_ms, Some(60000));

        let result = parse_args_from(args(&["--stale-timeout", "1500"])).unwrap();
        assert_eq!(result.stale_timeout_ms, Some(1500));

        assert!(parse_args_from(args(&["-t", "0"])).is_err());
        assert!(parse_args_from(args(&["-t", "soon"])).is_err());
    }

    #[test]
    fn test_json_response() {
        let result = parse_args_from(args(&["--json-response"])).unwrap();
        assert!(result.json_response);
    }

    #[test]
    fn test_help_flag() {
        let result = parse_args_from(args(&["-h"])).unwrap();
        assert!(result.help);

        let result = parse_args_from(args(&["--help"])).unwrap();
        assert!(result.help);
    }

    #[test]
    fn test_version_flag() {
        let result = parse_args_from(args(&["-V"])).unwrap();
        assert!(result.version);

        let result = parse_args_from(args(&["--version"])).unwrap();
        assert!(result.version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_port() {
        let result = parse_args_from(args(&["-p", "invalid"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_host() {
        let err = parse_args_from(args(&["-H", "not-an-ip"])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for --host: 'not-an-ip'");
    }

    #[test]
    fn test_unexpected_positional() {
        let err = parse_args_from(args(&["serve"])).unwrap_err();
        assert!(matches!(err, ArgsError::UnexpectedArgument(_)));
    }

    #[test]
    fn test_combined_options() {
        let result = parse_args_from(args(&[
            "-H",
            "0.0.0.0",
            "-p",
            "8080",
            "-k",
            "secret",
            "-l",
            "debug",
            "-t",
            "1000",
            "--json-response",
        ]))
        .unwrap();

        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
        assert_eq!(result.api_key, Some("secret".to_string()));
        assert_eq!(result.log_level, Some("debug".to_string()));
        assert_eq!(result.stale_timeout_ms, Some(1000));
        assert!(result.json_response);
        assert!(!result.no_auth);
    }
}

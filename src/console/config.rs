//! Configuration resolution for the console server.
//!
//! Every value follows the same priority:
//!
//! 1. **Parameter** - explicitly provided by the caller
//! 2. **Environment variable**
//! 3. **Default**
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONSOLE_PORT` | 8000 | HTTP listen port |
//! | `JUMP_CONNECT_TIMEOUT` | 30s | Jump host connection timeout in seconds |
//! | `JUMP_COMPRESSION` | true | Enable zlib compression |
//! | `JUMP_SHELL_LANG` | zh_CN.UTF-8 | `LANG` exported to the remote shell |
//! | `CONSOLE_OUTBOUND_CAPACITY` | 100 | Outbound queue capacity per session |
//! | `CONSOLE_LOGOUT_INTERVAL_MS` | 3000ms | Delay between LOGOUT attempts |
//! | `CONSOLE_CHECK_INTERVAL_MS` | 10000ms | Delay between health probes |
//! | `CONSOLE_CHECK_TIMEOUT_SECS` | unset | Health check ceiling; unset polls forever |
//! | `CONSOLE_STORE_PATH` | console-store.json | Script/argument store file |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::health::CheckTiming;
use super::script::ScriptTiming;

pub(crate) const DEFAULT_PORT: u16 = 8000;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_SHELL_LANG: &str = "zh_CN.UTF-8";
pub(crate) const DEFAULT_OUTBOUND_CAPACITY: usize = super::adapter::DEFAULT_OUTBOUND_CAPACITY;
pub(crate) const DEFAULT_LOGOUT_INTERVAL_MS: u64 = 3000;
pub(crate) const DEFAULT_CHECK_INTERVAL_MS: u64 = 10_000;
pub(crate) const DEFAULT_STORE_PATH: &str = "console-store.json";

pub(crate) const PORT_ENV_VAR: &str = "CONSOLE_PORT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "JUMP_CONNECT_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "JUMP_COMPRESSION";
pub(crate) const SHELL_LANG_ENV_VAR: &str = "JUMP_SHELL_LANG";
pub(crate) const OUTBOUND_CAPACITY_ENV_VAR: &str = "CONSOLE_OUTBOUND_CAPACITY";
pub(crate) const LOGOUT_INTERVAL_ENV_VAR: &str = "CONSOLE_LOGOUT_INTERVAL_MS";
pub(crate) const CHECK_INTERVAL_ENV_VAR: &str = "CONSOLE_CHECK_INTERVAL_MS";
pub(crate) const CHECK_TIMEOUT_ENV_VAR: &str = "CONSOLE_CHECK_TIMEOUT_SECS";
pub(crate) const STORE_PATH_ENV_VAR: &str = "CONSOLE_STORE_PATH";

/// Parse an environment variable, ignoring it when unset or malformed.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

/// Resolve the HTTP listen port: parameter -> env var -> default
pub fn resolve_port(port_param: Option<u16>) -> u16 {
    port_param
        .or_else(|| env_parse(PORT_ENV_VAR))
        .unwrap_or(DEFAULT_PORT)
}

/// Resolve the jump host connection timeout in seconds.
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    timeout_param
        .or_else(|| env_parse(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve the compression setting. Only `true` (any case) and `1` enable it
/// from the environment.
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the `LANG` value exported to remote shells.
pub(crate) fn resolve_shell_lang(lang_param: Option<String>) -> String {
    lang_param
        .filter(|lang| !lang.trim().is_empty())
        .or_else(|| env::var(SHELL_LANG_ENV_VAR).ok().filter(|l| !l.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_SHELL_LANG.to_string())
}

/// Resolve the per-session outbound queue capacity. Zero is not a valid
/// capacity and falls through to the next tier.
pub(crate) fn resolve_outbound_capacity(capacity_param: Option<usize>) -> usize {
    capacity_param
        .filter(|c| *c > 0)
        .or_else(|| env_parse::<usize>(OUTBOUND_CAPACITY_ENV_VAR).filter(|c| *c > 0))
        .unwrap_or(DEFAULT_OUTBOUND_CAPACITY)
}

pub(crate) fn resolve_logout_interval(interval_ms_param: Option<u64>) -> Duration {
    Duration::from_millis(
        interval_ms_param
            .or_else(|| env_parse(LOGOUT_INTERVAL_ENV_VAR))
            .unwrap_or(DEFAULT_LOGOUT_INTERVAL_MS),
    )
}

pub(crate) fn resolve_check_interval(interval_ms_param: Option<u64>) -> Duration {
    Duration::from_millis(
        interval_ms_param
            .or_else(|| env_parse(CHECK_INTERVAL_ENV_VAR))
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MS),
    )
}

/// Resolve the optional health check ceiling. `None` means no timeout.
pub(crate) fn resolve_check_timeout(timeout_secs_param: Option<u64>) -> Option<Duration> {
    timeout_secs_param
        .or_else(|| env_parse(CHECK_TIMEOUT_ENV_VAR))
        .map(Duration::from_secs)
}

pub fn resolve_store_path(path_param: Option<PathBuf>) -> PathBuf {
    path_param
        .or_else(|| env::var(STORE_PATH_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
}

/// Script timing built from the environment.
pub(crate) fn script_timing() -> ScriptTiming {
    ScriptTiming {
        logout_interval: resolve_logout_interval(None),
        check: CheckTiming {
            interval: resolve_check_interval(None),
            timeout: resolve_check_timeout(None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serialize env var tests to avoid races between them
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// Run `f` with `key` set to `value` (or removed when `None`).
    fn with_env<R>(key: &str, value: Option<&str>, f: impl FnOnce() -> R) -> R {
        let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access from these tests
        unsafe {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        let result = f();
        // SAFETY: Holding ENV_TEST_MUTEX
        unsafe { env::remove_var(key) };
        result
    }

    mod port {
        use super::*;

        #[test]
        fn test_param_takes_priority_over_env() {
            let port = with_env(PORT_ENV_VAR, Some("9000"), || resolve_port(Some(8080)));
            assert_eq!(port, 8080);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let port = with_env(PORT_ENV_VAR, Some("9000"), || resolve_port(None));
            assert_eq!(port, 9000);
        }

        #[test]
        fn test_ignores_out_of_range_env_var() {
            let port = with_env(PORT_ENV_VAR, Some("70000"), || resolve_port(None));
            assert_eq!(port, DEFAULT_PORT);
        }
    }

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_connect_timeout(Some(60)), 60);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let timeout = with_env(CONNECT_TIMEOUT_ENV_VAR, Some("90"), || {
                resolve_connect_timeout(None)
            });
            assert_eq!(timeout, 90);
        }

        #[test]
        fn test_ignores_negative_env_var() {
            let timeout = with_env(CONNECT_TIMEOUT_ENV_VAR, Some("-10"), || {
                resolve_connect_timeout(None)
            });
            assert_eq!(timeout, DEFAULT_CONNECT_TIMEOUT_SECS);
        }

        #[test]
        fn test_uses_default_when_no_param_or_env() {
            let timeout = with_env(CONNECT_TIMEOUT_ENV_VAR, None, || resolve_connect_timeout(None));
            assert_eq!(timeout, DEFAULT_CONNECT_TIMEOUT_SECS);
        }
    }

    mod compression {
        use super::*;

        #[test]
        fn test_param_takes_priority_over_env() {
            let compress = with_env(COMPRESSION_ENV_VAR, Some("true"), || {
                resolve_compression(Some(false))
            });
            assert!(!compress);
        }

        #[test]
        fn test_env_var_accepts_true_and_one() {
            assert!(with_env(COMPRESSION_ENV_VAR, Some("TrUe"), || resolve_compression(None)));
            assert!(with_env(COMPRESSION_ENV_VAR, Some("1"), || resolve_compression(None)));
        }

        #[test]
        fn test_env_var_other_values_are_false() {
            assert!(!with_env(COMPRESSION_ENV_VAR, Some("yes"), || resolve_compression(None)));
            assert!(!with_env(COMPRESSION_ENV_VAR, Some("0"), || resolve_compression(None)));
        }

        #[test]
        fn test_default_is_true() {
            assert!(with_env(COMPRESSION_ENV_VAR, None, || resolve_compression(None)));
        }
    }

    mod shell_lang {
        use super::*;

        #[test]
        fn test_default_lang() {
            let lang = with_env(SHELL_LANG_ENV_VAR, None, || resolve_shell_lang(None));
            assert_eq!(lang, "zh_CN.UTF-8");
        }

        #[test]
        fn test_env_lang() {
            let lang = with_env(SHELL_LANG_ENV_VAR, Some("en_US.UTF-8"), || {
                resolve_shell_lang(None)
            });
            assert_eq!(lang, "en_US.UTF-8");
        }

        #[test]
        fn test_blank_param_falls_through() {
            let lang = with_env(SHELL_LANG_ENV_VAR, Some("C"), || {
                resolve_shell_lang(Some("  ".to_string()))
            });
            assert_eq!(lang, "C");
        }
    }

    mod queues_and_intervals {
        use super::*;

        #[test]
        fn test_outbound_capacity_rejects_zero() {
            let capacity = with_env(OUTBOUND_CAPACITY_ENV_VAR, Some("0"), || {
                resolve_outbound_capacity(Some(0))
            });
            assert_eq!(capacity, 100);
        }

        #[test]
        fn test_outbound_capacity_from_env() {
            let capacity = with_env(OUTBOUND_CAPACITY_ENV_VAR, Some("16"), || {
                resolve_outbound_capacity(None)
            });
            assert_eq!(capacity, 16);
        }

        #[test]
        fn test_interval_defaults() {
            let logout = with_env(LOGOUT_INTERVAL_ENV_VAR, None, || resolve_logout_interval(None));
            let check = with_env(CHECK_INTERVAL_ENV_VAR, None, || resolve_check_interval(None));
            assert_eq!(logout, Duration::from_secs(3));
            assert_eq!(check, Duration::from_secs(10));
        }

        #[test]
        fn test_check_timeout_unset_means_none() {
            let timeout = with_env(CHECK_TIMEOUT_ENV_VAR, None, || resolve_check_timeout(None));
            assert!(timeout.is_none());
        }

        #[test]
        fn test_check_timeout_from_env() {
            let timeout = with_env(CHECK_TIMEOUT_ENV_VAR, Some("120"), || {
                resolve_check_timeout(None)
            });
            assert_eq!(timeout, Some(Duration::from_secs(120)));
        }
    }

    mod store_path {
        use super::*;

        #[test]
        fn test_default_store_path() {
            let path = with_env(STORE_PATH_ENV_VAR, None, || resolve_store_path(None));
            assert_eq!(path, PathBuf::from("console-store.json"));
        }

        #[test]
        fn test_param_store_path() {
            let path = resolve_store_path(Some(PathBuf::from("/var/lib/console.json")));
            assert_eq!(path, PathBuf::from("/var/lib/console.json"));
        }
    }
}

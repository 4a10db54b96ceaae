use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Root of the per-user dashboard directory, `~/.savings-dashboard/`.
pub fn dashboard_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".savings-dashboard")
}

/// Ensure `~/.savings-dashboard/` and its `logs/` subdirectory exist.
pub fn ensure_directories() -> anyhow::Result<()> {
    let root = dashboard_dir();
    std::fs::create_dir_all(root.join("logs"))?;
    Ok(())
}

/// A bare file name given as `--log-file` lands in `~/.savings-dashboard/logs/`;
/// any other path is used as given.
pub fn resolve_log_file(path: &Path) -> PathBuf {
    let bare = path.parent().map_or(true, |p| p.as_os_str().is_empty());
    if bare && path.is_relative() {
        dashboard_dir().join("logs").join(path)
    } else {
        path.to_path_buf()
    }
}

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map a `DEBUG` / `INFO` / `WARNING` / `ERROR` level name to a filter
/// directive. Unknown names pass through unchanged.
pub fn filter_directive(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" => "warn".to_string(),
        "ERROR" => "error".to_string(),
        _ => log_level.to_lowercase(),
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Output goes to stderr. When `log_file` is given, the same events are also
/// appended to that file without ANSI colours.
pub fn setup_logging(log_level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_new(filter_directive(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(&resolve_log_file(path))?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()?;

    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_directories() {
        let tmp = TempDir::new().expect("tempdir");

        // Override HOME so that dirs::home_dir() resolves to our temp dir.
        let original_home = std::env::var_os("HOME");
        std::env::set_var("HOME", tmp.path());

        let result = ensure_directories();

        match original_home {
            Some(v) => std::env::set_var("HOME", v),
            None => std::env::remove_var("HOME"),
        }

        result.expect("ensure_directories should succeed");

        let root = tmp.path().join(".savings-dashboard");
        assert!(root.is_dir(), ".savings-dashboard dir must exist");
        assert!(root.join("logs").is_dir(), "logs subdir must exist");
    }

    #[test]
    fn test_resolve_log_file() {
        let bare = resolve_log_file(Path::new("dashboard.log"));
        assert!(bare.ends_with(".savings-dashboard/logs/dashboard.log"));

        let nested = Path::new("out/dashboard.log");
        assert_eq!(resolve_log_file(nested), nested.to_path_buf());

        let absolute = Path::new("/var/log/dashboard.log");
        assert_eq!(resolve_log_file(absolute), absolute.to_path_buf());
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("DEBUG"), "debug");
        assert_eq!(filter_directive("info"), "info");
        assert_eq!(filter_directive("WARNING"), "warn");
        assert_eq!(filter_directive("ERROR"), "error");
        assert_eq!(filter_directive("savings_runtime=trace"), "savings_runtime=trace");
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("nested").join("dashboard.log");

        open_log_file(&path).expect("log file should open");
        assert!(path.is_file());
    }
}

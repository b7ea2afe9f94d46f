/// Web panel helpers: opening it in the system browser, and noticing when the
/// server started answering on it.
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ReadinessConfig;
use crate::error::{LauncherError, Result};

/// Opens `url` in the default browser. Fire-and-forget: the opener is spawned
/// and reaped on a short-lived thread, so this never waits for the browser.
pub fn open_in_browser(url: &str) -> Result<()> {
    check_url(url)?;
    let mut cmd = opener_command(url)?;
    spawn_detached(&mut cmd)
}

fn check_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(LauncherError::InvalidUrl(url.to_string()))
    }
}

fn spawn_detached(cmd: &mut Command) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| LauncherError::Spawn {
            command: program.clone(),
            source,
        })?;

    std::thread::Builder::new()
        .name("browser-opener".to_string())
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
            Ok(_) => {}
            Err(e) => warn!("Failed to wait for {}: {}", program, e),
        })?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn opener_command(url: &str) -> Result<Command> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    let mut cmd = Command::new("cmd");
    // The empty string is the window title `start` expects before the target
    cmd.args(["/C", "start", "", url]).creation_flags(CREATE_NO_WINDOW);
    Ok(cmd)
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> Result<Command> {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    Ok(cmd)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn opener_command(url: &str) -> Result<Command> {
    let opener = ["xdg-open", "gio", "sensible-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| LauncherError::Spawn {
            command: "xdg-open".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no browser opener on PATH"),
        })?;

    let mut cmd = Command::new(&opener);
    if opener.file_name().is_some_and(|name| name == "gio") {
        cmd.arg("open");
    }
    cmd.arg(url);
    Ok(cmd)
}

/// Polls `url` until something answers over HTTP, with exponential backoff.
/// Any response counts, including error statuses; only connection failures retry.
pub async fn wait_until_reachable(url: &str, readiness: &ReadinessConfig) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_millis(readiness.timeout_ms))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build readiness client: {}", e);
            return false;
        }
    };

    let mut delay_ms = readiness.initial_delay_ms;
    for attempt in 1..=readiness.attempts {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        match client.get(url).send().await {
            Ok(response) => {
                info!("Web panel answered with {} (attempt {})", response.status(), attempt);
                return true;
            }
            Err(e) => {
                info!("Web panel not reachable yet (attempt {}): {}", attempt, e);
            }
        }

        delay_ms = (delay_ms * 2).min(readiness.max_delay_ms);
    }

    warn!("Web panel {} not reachable after {} attempts", url, readiness.attempts);
    false
}

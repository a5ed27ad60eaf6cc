//! Exécution des outils externes (téléchargeur, ffmpeg)

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Nombre de lignes de stderr reprises dans le message d'erreur
const STDERR_TAIL_LINES: usize = 5;

/// Lance `command` et attend sa fin dans la limite `limit`.
///
/// Le processus est tué si le délai expire ou si la future est abandonnée.
/// `fail` construit l'erreur propre à l'étape (téléchargement ou transcodage).
pub(crate) async fn run_tool(
    mut command: Command,
    stage: &'static str,
    limit: Duration,
    fail: fn(String) -> Error,
) -> Result<()> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program, stage, "Spawning external tool");

    let child = command
        .spawn()
        .map_err(|e| fail(format!("cannot start {}: {}", program, e)))?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(fail(format!("{} failed: {}", program, e))),
        Err(_) => {
            return Err(Error::Timeout {
                stage,
                secs: limit.as_secs(),
            })
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut tail: Vec<&str> = stderr
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(STDERR_TAIL_LINES)
        .collect();
    tail.reverse();

    Err(fail(format!(
        "{} exited with {}: {}",
        program,
        output.status,
        tail.join(" | ")
    )))
}

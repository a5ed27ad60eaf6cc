//! Conversion du média brut vers le format canonique (MP3)

use crate::error::{Error, Result};
use crate::process::run_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Convertit un fichier brut en MP3 à l'emplacement `output`
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Paramètres du transcodage
#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    /// Exécutable ffmpeg
    pub program: String,
    pub bitrate_kbps: u32,
    /// Applique le filtre `loudnorm`
    pub loudness_normalization: bool,
    pub timeout: Duration,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            bitrate_kbps: 192,
            loudness_normalization: true,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Transcodeur basé sur ffmpeg / libmp3lame
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    settings: TranscoderSettings,
}

impl FfmpegTranscoder {
    pub fn new(settings: TranscoderSettings) -> Self {
        Self { settings }
    }

    /// Ligne de commande ffmpeg
    ///
    /// Le format de sortie est forcé car le fichier cible porte l'extension `.part`.
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            ["-vn", "-codec:a", "libmp3lame", "-b:a"]
                .iter()
                .map(OsString::from),
        );
        args.push(format!("{}k", self.settings.bitrate_kbps).into());
        if self.settings.loudness_normalization {
            args.push("-af".into());
            args.push("loudnorm".into());
        }
        args.push("-f".into());
        args.push("mp3".into());
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.settings.program);
        command.args(self.args(input, output));
        run_tool(
            command,
            "transcode",
            self.settings.timeout,
            Error::TranscodeFailed,
        )
        .await
    }
}

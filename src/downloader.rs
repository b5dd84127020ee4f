#![forbid(unsafe_code)]

//! Wrapper around the external `yt-dlp` program.
//!
//! A download is a single blocking `yt-dlp` run: best video + best audio
//! merged into one container inside the download directory, with the
//! credential file passed along when present. The program prints the name it
//! picked for the file; we keep only the basename and swap its extension for
//! the container's.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, anyhow, bail};

pub const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best";
pub const DEFAULT_MERGE_FORMAT: &str = "mkv";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Text yt-dlp emits when a video needs a signed-in, age-verified session.
pub const AGE_RESTRICTION_MARKER: &str = "Sign in to confirm your age";

/// Static options for every yt-dlp run, fixed at construction.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub program: PathBuf,
    pub output_dir: PathBuf,
    pub cookies_file: PathBuf,
    pub format: String,
    pub merge_format: String,
}

impl DownloaderConfig {
    pub fn new(
        program: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        cookies_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            output_dir: output_dir.into(),
            cookies_file: cookies_file.into(),
            format: DEFAULT_FORMAT.to_string(),
            merge_format: DEFAULT_MERGE_FORMAT.to_string(),
        }
    }
}

/// Turns a URL into one media file inside the download directory and reports
/// the file's name. Implementations block until the file is complete.
pub trait MediaDownloader: Send + Sync {
    fn download(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    config: DownloaderConfig,
}

impl YtDlp {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    fn command_args(&self, url: &str) -> Vec<OsString> {
        let config = &self.config;
        let mut args: Vec<OsString> = vec![
            "--format".into(),
            config.format.clone().into(),
            "--merge-output-format".into(),
            config.merge_format.clone().into(),
            // Single-stream fallbacks skip the merge step; remuxing keeps
            // every artifact in the same container.
            "--remux-video".into(),
            config.merge_format.clone().into(),
            "--output".into(),
            config.output_dir.join(OUTPUT_TEMPLATE).into_os_string(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-simulate".into(),
            "--print".into(),
            "filename".into(),
        ];
        if config.cookies_file.is_file() {
            args.push("--cookies".into());
            args.push(config.cookies_file.clone().into_os_string());
        }
        args.push("--".into());
        args.push(url.into());
        args
    }
}

impl MediaDownloader for YtDlp {
    fn download(&self, url: &str) -> Result<String> {
        let program = &self.config.program;
        tracing::debug!(url, program = %program.display(), "starting yt-dlp");

        let output = Command::new(program)
            .args(self.command_args(url))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("launching {}", program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let predicted = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| anyhow!("{} did not report a filename", program.display()))?;
        let base_name = Path::new(predicted)
            .file_name()
            .ok_or_else(|| anyhow!("unusable filename reported: {predicted:?}"))?
            .to_string_lossy();

        let final_name = normalize_extension(&base_name, &self.config.merge_format);
        if !self.config.output_dir.join(&final_name).is_file() {
            tracing::warn!(
                filename = %final_name,
                "yt-dlp finished but the merged file is not in the download directory"
            );
        }
        Ok(final_name)
    }
}

/// Replaces whatever extension `file_name` carries with `container`. A name
/// without an extension simply gains one.
pub fn normalize_extension(file_name: &str, container: &str) -> String {
    Path::new(file_name)
        .with_extension(container)
        .to_string_lossy()
        .into_owned()
}

/// The two ways a download can fail as far as the caller is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFailure {
    /// The site wants an age-verified session; a cookies file would help.
    AgeRestricted,
    Other,
}

pub fn classify_failure(err: &anyhow::Error) -> DownloadFailure {
    if format!("{err:#}").contains(AGE_RESTRICTION_MARKER) {
        DownloadFailure::AgeRestricted
    } else {
        DownloadFailure::Other
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable shell script standing in for yt-dlp.
    pub(crate) fn install_ytdlp_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = format!("#!/bin/sh\nset -eu\n{body}\n");
        std::fs::write(&script_path, script).unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    /// Stub that drops `<title>.<merge ext>` into the output directory and
    /// prints the pre-merge name, the way yt-dlp does with `--print filename`.
    pub(crate) fn merging_stub_body(title: &str, source_ext: &str) -> String {
        format!(
            r#"output=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output)
      shift
      output="$1"
      ;;
  esac
  shift
done
dir=$(dirname "$output")
printf 'merged:{title}' > "$dir/{title}.mkv"
echo "[info] pretend progress" >&2
echo "$dir/{title}.{source_ext}""#
        )
    }
}

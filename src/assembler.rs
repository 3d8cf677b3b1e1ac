//! Muxes the separately downloaded elementary streams into `vid.mp4`.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, error};

use crate::error::AssemblyError;
use crate::store::{AUDIO_STREAM_FILE, VIDEO_FILE, VIDEO_STREAM_FILE};

/// Wraps the external ffmpeg binary. Streams are copied, never re-encoded.
#[derive(Debug, Clone)]
pub struct Assembler {
    ffmpeg: PathBuf,
}

impl Assembler {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn ensure_available(&self) -> anyhow::Result<()> {
        crate::source::ensure_program_available(&self.ffmpeg, "-version")
    }

    /// Builds `vid.mp4` inside `folder`, overwriting any previous output.
    ///
    /// On success the elementary inputs are deleted. On failure they are left
    /// untouched and the caller decides what to do with the folder.
    pub fn assemble(&self, folder: &Path) -> Result<(), AssemblyError> {
        let video = folder.join(VIDEO_STREAM_FILE);
        let audio = folder.join(AUDIO_STREAM_FILE);
        let output = folder.join(VIDEO_FILE);

        if !video.is_file() {
            return Err(AssemblyError::MissingInput(video));
        }
        let has_audio = audio.is_file();

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(&video);
        if has_audio {
            command
                .arg("-i")
                .arg(&audio)
                .args(["-map", "0:v:0", "-map", "1:a:0"]);
        } else {
            // A combined fallback stream keeps its own audio track.
            command.args(["-map", "0"]);
        }
        command.arg("-c").arg("copy").arg(&output);

        debug!("muxing {}", folder.display());
        let result = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .map_err(|source| AssemblyError::Spawn {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            let err = AssemblyError::ToolFailed {
                folder: folder.to_path_buf(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            };
            error!("{err}");
            return Err(err);
        }

        remove_input(&video)?;
        if has_audio {
            remove_input(&audio)?;
        }
        Ok(())
    }
}

fn remove_input(path: &Path) -> Result<(), AssemblyError> {
    fs::remove_file(path).map_err(|source| AssemblyError::Cleanup {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    /// Fake ffmpeg that concatenates its `-i` inputs into the output path,
    /// or fails when any input contains the word `corrupt`.
    pub fn install_ffmpeg_stub(dir: &Path) -> anyhow::Result<PathBuf> {
        let script_path = dir.join("ffmpeg-stub");
        let script = r#"#!/usr/bin/env bash
set -eu
inputs=()
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -i) shift; inputs+=("$1") ;;
    -loglevel|-map|-c) shift ;;
    -*) ;;
    *) output="$1" ;;
  esac
  shift
done
if grep -q corrupt "${inputs[@]}"; then
  echo "Invalid data found when processing input" >&2
  exit 1
fi
cat "${inputs[@]}" > "$output"
"#;
        fs::write(&script_path, script)?;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
        Ok(script_path)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::testing::install_ffmpeg_stub;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assemble_merges_and_removes_inputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let assembler = Assembler::new(install_ffmpeg_stub(dir.path())?);
        let folder = dir.path().join("Clip");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_STREAM_FILE), "video\n")?;
        fs::write(folder.join(AUDIO_STREAM_FILE), "audio\n")?;

        assembler.assemble(&folder)?;

        assert_eq!(
            fs::read_to_string(folder.join(VIDEO_FILE))?,
            "video\naudio\n"
        );
        assert!(!folder.join(VIDEO_STREAM_FILE).exists());
        assert!(!folder.join(AUDIO_STREAM_FILE).exists());
        Ok(())
    }

    #[test]
    fn assemble_without_audio_remuxes_video_alone() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let assembler = Assembler::new(install_ffmpeg_stub(dir.path())?);
        let folder = dir.path().join("Silent");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_STREAM_FILE), "video\n")?;

        assembler.assemble(&folder)?;

        assert_eq!(fs::read_to_string(folder.join(VIDEO_FILE))?, "video\n");
        assert!(!folder.join(VIDEO_STREAM_FILE).exists());
        Ok(())
    }

    #[test]
    fn assemble_failure_keeps_inputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let assembler = Assembler::new(install_ffmpeg_stub(dir.path())?);
        let folder = dir.path().join("Broken");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_STREAM_FILE), "corrupt\n")?;
        fs::write(folder.join(AUDIO_STREAM_FILE), "audio\n")?;

        let err = assembler.assemble(&folder).unwrap_err();

        assert!(matches!(err, AssemblyError::ToolFailed { .. }));
        assert!(err.to_string().contains("Invalid data"));
        assert!(folder.join(VIDEO_STREAM_FILE).exists());
        assert!(folder.join(AUDIO_STREAM_FILE).exists());
        assert!(!folder.join(VIDEO_FILE).exists());
        Ok(())
    }

    #[test]
    fn assemble_requires_video_input() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let assembler = Assembler::new(install_ffmpeg_stub(dir.path())?);
        let err = assembler.assemble(dir.path()).unwrap_err();
        assert!(matches!(err, AssemblyError::MissingInput(_)));
        Ok(())
    }

    #[test]
    fn missing_ffmpeg_is_a_spawn_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let folder = dir.path().join("Clip");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_STREAM_FILE), "video\n")?;
        let assembler = Assembler::new(dir.path().join("no-ffmpeg"));
        let err = assembler.assemble(&folder).unwrap_err();
        assert!(matches!(err, AssemblyError::Spawn { .. }));
        assert!(folder.join(VIDEO_STREAM_FILE).exists());
        Ok(())
    }
}

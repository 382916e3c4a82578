use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker prefixing the analyzer's non-ASCII-escaped copy of its result.
const UTF8_JSON_MARKER: &str = "DEBUG_JSON_UTF8:";

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("audio file not found: {0}")]
    AudioMissing(PathBuf),

    #[error("audio file is empty: {0}")]
    AudioEmpty(PathBuf),

    #[error("analyzer executable not found: {0}")]
    ExecutableMissing(PathBuf),

    #[error("failed to run analyzer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("analyzer exited with code {code:?}: {stderr}")]
    Failed {
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    #[error("analyzer produced no JSON result")]
    NoJson { stdout: String },

    #[error("analyzer result is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Speaker gender passed to the classifier as `-g 0|1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderHint {
    Male,
    Female,
}

impl GenderHint {
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Male => "0",
            Self::Female => "1",
        }
    }
}

/// Voice identifiers arrive as numbers or strings depending on the model set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoiceId {
    Number(i64),
    Text(String),
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceScore {
    pub id: VoiceId,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OppositeMatch {
    #[serde(default)]
    pub id: Option<VoiceId>,
    pub name: String,
}

/// The classifier's JSON result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub main: VoiceScore,
    #[serde(default)]
    pub sub: Vec<VoiceScore>,
    #[serde(default)]
    pub opposite_match: Option<OppositeMatch>,
}

/// Client for the external voice classifier process.
#[derive(Debug, Clone)]
pub struct VoiceAnalyzer {
    executable: PathBuf,
}

impl VoiceAnalyzer {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Classify a saved recording. Blocks until the process exits.
    pub fn analyze(&self, audio_path: &Path, gender: Option<GenderHint>) -> Result<VoiceProfile, AnalyzerError> {
        let size = std::fs::metadata(audio_path)
            .map_err(|_| AnalyzerError::AudioMissing(audio_path.to_path_buf()))?
            .len();
        if size == 0 {
            return Err(AnalyzerError::AudioEmpty(audio_path.to_path_buf()));
        }
        if !self.executable.exists() {
            return Err(AnalyzerError::ExecutableMissing(self.executable.clone()));
        }

        let mut command = Command::new(&self.executable);
        command
            .arg("-f")
            .arg(audio_path)
            .arg("-j")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUTF8", "1")
            .env("PYTHONLEGACYWINDOWSSTDIO", "1");
        if let Some(gender) = gender {
            command.arg("-g").arg(gender.as_arg());
        }

        log::info!("Running voice analyzer on {}", audio_path.display());
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            log::warn!("Voice analyzer exited with {:?}", output.status.code());
            // A failed run that still printed a result is accepted.
            if let Some(json) = extract_json(&stdout) {
                if let Ok(profile) = serde_json::from_str(json) {
                    return Ok(profile);
                }
            }
            return Err(AnalyzerError::Failed {
                code: output.status.code(),
                stderr,
                stdout,
            });
        }

        let json = extract_json(&stdout).ok_or_else(|| AnalyzerError::NoJson { stdout: stdout.clone() })?;
        let profile: VoiceProfile = serde_json::from_str(json)?;
        log::debug!("Voice analyzer matched {}", profile.main.name);
        Ok(profile)
    }
}

/// Pick the result object out of the analyzer's stdout.
///
/// The UTF-8 copy after the marker wins; otherwise the first complete
/// top-level `{...}` object. Braces inside JSON strings are ignored.
pub fn extract_json(stdout: &str) -> Option<&str> {
    if let Some(pos) = stdout.find(UTF8_JSON_MARKER) {
        if let Some(json) = first_object(&stdout[pos + UTF8_JSON_MARKER.len()..]) {
            return Some(json);
        }
    }
    first_object(stdout)
}

fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_RESULT: &str = r#"{
  "main": {"id": 3, "name": "清爽少年音", "score": 61.4},
  "sub": [{"id": 7, "name": "暖男音", "score": 22.5}],
  "opposite_match": {"id": 12, "name": "御姐音"}
}"#;

    #[test]
    fn marker_copy_wins_over_escaped_copy() {
        let stdout = format!(
            "loading models...\n{}\n{}{{\"main\": {{\"id\": 3, \"name\": \"清爽少年音\", \"score\": 61.4}}}}\n",
            ASCII_RESULT, UTF8_JSON_MARKER
        );
        let json = extract_json(&stdout).unwrap();
        let profile: VoiceProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.main.name, "清爽少年音");
        assert!(profile.sub.is_empty());
    }

    #[test]
    fn falls_back_to_first_object() {
        let stdout = format!("log line\n{}\ntrailing {{ noise", ASCII_RESULT);
        let profile: VoiceProfile = serde_json::from_str(extract_json(&stdout).unwrap()).unwrap();
        assert_eq!(profile.main.id, VoiceId::Number(3));
        assert_eq!(profile.main.name, "清爽少年音");
        assert_eq!(profile.opposite_match.map(|m| m.name), Some("御姐音".to_string()));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let stdout = r#"{"main": {"id": "a}", "name": "{odd}", "score": 1.0}} extra }"#;
        let profile: VoiceProfile = serde_json::from_str(extract_json(stdout).unwrap()).unwrap();
        assert_eq!(profile.main.id, VoiceId::Text("a}".into()));
    }

    #[test]
    fn no_object_means_none() {
        assert_eq!(extract_json("错误: model not found"), None);
        assert_eq!(extract_json("{ unterminated"), None);
    }

    #[test]
    fn missing_audio_is_rejected_before_spawning() {
        let analyzer = VoiceAnalyzer::new("/nonexistent/analyzer");
        let err = analyzer
            .analyze(Path::new("/nonexistent/audio.wav"), None)
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::AudioMissing(_)));
    }

    #[test]
    fn empty_audio_and_missing_executable_are_rejected() {
        let dir = std::env::temp_dir().join(format!("voice_card_analyzer_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let audio = dir.join("audio.wav");

        std::fs::write(&audio, b"").unwrap();
        let analyzer = VoiceAnalyzer::new(dir.join("missing-analyzer"));
        assert!(matches!(analyzer.analyze(&audio, None), Err(AnalyzerError::AudioEmpty(_))));

        std::fs::write(&audio, b"RIFF").unwrap();
        assert!(matches!(
            analyzer.analyze(&audio, None),
            Err(AnalyzerError::ExecutableMissing(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("analyzer.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn runs_executable_with_flags_and_environment() {
        let dir = std::env::temp_dir().join(format!("voice_card_analyzer_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let audio = dir.join("audio.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        // Echo the arguments and one environment variable back as the voice name.
        let exe = script(
            &dir,
            r#"printf '{"main": {"id": 1, "name": "%s %s", "score": 80.2}}' "$*" "$PYTHONUTF8""#,
        );
        let profile = VoiceAnalyzer::new(&exe)
            .analyze(&audio, Some(GenderHint::Female))
            .unwrap();
        assert_eq!(profile.main.name, format!("-f {} -j -g 1 1", audio.display()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn failed_run_reports_stderr_unless_json_was_printed() {
        let dir = std::env::temp_dir().join(format!("voice_card_analyzer_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let audio = dir.join("audio.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let failing = script(&dir, "echo 'boom' >&2; exit 2");
        match VoiceAnalyzer::new(&failing).analyze(&audio, None) {
            Err(AnalyzerError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let noisy = script(
            &dir,
            r#"echo '{"main": {"id": 2, "name": "x", "score": 50}}'; exit 1"#,
        );
        let profile = VoiceAnalyzer::new(&noisy).analyze(&audio, None).unwrap();
        assert_eq!(profile.main.id, VoiceId::Number(2));

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Image classification behind a trait, plus an adapter that delegates to an
//! external model command.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Coarse demographic category of the people in an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(alias = "man")]
    Male,
    #[serde(alias = "woman")]
    Female,
    Both,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Both => "both",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Classification {
    #[serde(alias = "human_present", default)]
    pub person_present: bool,
    #[serde(alias = "gender", default)]
    pub category: Category,
}

impl Classification {
    /// Result for an image that could not be analyzed.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            person_present: false,
            category: Category::Unknown,
        }
    }
}

#[async_trait]
pub trait VisionClassifier: Send + Sync {
    async fn classify(&self, image: &Path) -> Result<Classification>;
}

/// Runs `<program> <args…> <image>` and reads a JSON [`Classification`]
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl VisionClassifier for CommandClassifier {
    async fn classify(&self, image: &Path) -> Result<Classification> {
        debug!(program = %self.program, image = %image.display(), "Running classifier");

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.program, self.timeout))?
            .with_context(|| format!("Failed to wait for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.program, stderr.trim());
        }

        parse_classification(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse classifier output. Only the last non-empty line is considered, so
/// model chatter printed before the result is ignored.
///
/// # Errors
///
/// Returns an error if no line holds a JSON classification object.
pub fn parse_classification(stdout: &str) -> Result<Classification> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .context("Classifier produced no output")?;
    serde_json::from_str(line).with_context(|| format!("Unexpected classifier output: {line}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primary_keys() {
        let c = parse_classification(r#"{"person_present": true, "category": "female"}"#).unwrap();
        assert_eq!(
            c,
            Classification {
                person_present: true,
                category: Category::Female
            }
        );
    }

    #[test]
    fn test_parse_alias_keys() {
        let c = parse_classification(r#"{"human_present": true, "gender": "man"}"#).unwrap();
        assert!(c.person_present);
        assert_eq!(c.category, Category::Male);
    }

    #[test]
    fn test_parse_ignores_leading_chatter() {
        let out = "loading model...\n0: 640x480 2 persons\n{\"person_present\": true, \"category\": \"both\"}\n\n";
        assert_eq!(parse_classification(out).unwrap().category, Category::Both);
    }

    #[test]
    fn test_unrecognized_category_is_unknown() {
        let c = parse_classification(r#"{"person_present": false, "category": "robot"}"#).unwrap();
        assert_eq!(c.category, Category::Unknown);
    }

    #[test]
    fn test_empty_output_is_error() {
        assert!(parse_classification("  \n").is_err());
        assert!(parse_classification("not json").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_classifier_reads_stdout() {
        let classifier = CommandClassifier::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"echo '{"person_present": true, "category": "male"}'"#.to_string(),
            ],
            Duration::from_secs(5),
        );
        let c = classifier.classify(Path::new("ignored.jpg")).await.unwrap();
        assert_eq!(c.category, Category::Male);
        assert!(c.person_present);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_classifier_failure_is_error() {
        let classifier = CommandClassifier::new(
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
            Duration::from_secs(5),
        );
        assert!(classifier.classify(Path::new("x.jpg")).await.is_err());
    }
}

use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context as _;

use crate::config::{
    GEMINI_API_KEY_ENV, OPENAI_API_KEY_ENV, Settings, TranslationEngineKind,
};
use crate::error::ServiceError;
use crate::gemini::{self, GeminiService};
use crate::openai::{self, OpenAiService};

/// Exit status a translator command uses to report rate limiting
/// (`EX_TEMPFAIL`).
pub const COMMAND_RATE_LIMIT_EXIT: i32 = 75;

/// Exit status a translator command uses to report a content-policy block.
pub const COMMAND_BLOCKED_EXIT: i32 = 3;

pub trait TextService {
    fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Builds the configured generative service. `None` when the backend's
/// credential is absent, which disables translation.
pub fn build_service(settings: &Settings) -> anyhow::Result<Option<Box<dyn TextService>>> {
    let translation = &settings.translation;
    let timeout = Duration::from_secs(translation.timeout_secs);

    match translation.engine {
        TranslationEngineKind::Gemini => {
            let Some(api_key) = credential(GEMINI_API_KEY_ENV) else {
                tracing::warn!(
                    env = GEMINI_API_KEY_ENV,
                    "translation credential missing; every chapter will be stored as failed"
                );
                return Ok(None);
            };
            let base_url = translation
                .base_url
                .as_deref()
                .unwrap_or(gemini::DEFAULT_BASE_URL);
            let service = GeminiService::new(base_url, api_key, &translation.model, timeout)?;
            Ok(Some(Box::new(service)))
        }
        TranslationEngineKind::Openai => {
            let Some(api_key) = credential(OPENAI_API_KEY_ENV) else {
                tracing::warn!(
                    env = OPENAI_API_KEY_ENV,
                    "translation credential missing; every chapter will be stored as failed"
                );
                return Ok(None);
            };
            let base_url = translation
                .base_url
                .as_deref()
                .unwrap_or(openai::DEFAULT_BASE_URL);
            let service =
                OpenAiService::new(base_url, api_key, translation.model.clone(), timeout)?;
            Ok(Some(Box::new(service)))
        }
        TranslationEngineKind::Command => {
            let Some(program) = translation.command.clone() else {
                anyhow::bail!("translation.command is required when translation.engine=command");
            };
            Ok(Some(Box::new(CommandService {
                program,
                args: translation.command_args.clone(),
                target_language: settings.target_language.clone(),
            })))
        }
    }
}

fn credential(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Runs an external program with the prompt on stdin and takes its stdout as
/// the generated text.
#[derive(Debug, Clone)]
pub struct CommandService {
    pub program: String,
    pub args: Vec<String>,
    pub target_language: String,
}

impl TextService for CommandService {
    fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        tracing::debug!(command = %self.program, "translator command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("NOVELRELAY_TARGET_LANGUAGE", &self.target_language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn translator command: {}", self.program))?;

        {
            let mut stdin = child.stdin.take().context("open translator stdin")?;
            // A command may exit without reading its input.
            if let Err(err) = stdin.write_all(prompt.as_bytes())
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(anyhow::Error::new(err)
                    .context("write translator stdin")
                    .into());
            }
        }

        let output = child
            .wait_with_output()
            .context("wait translator process")?;
        match output.status.code() {
            Some(0) => {}
            Some(COMMAND_RATE_LIMIT_EXIT) => {
                return Err(ServiceError::RateLimited(format!(
                    "translator command exited with {COMMAND_RATE_LIMIT_EXIT}"
                )));
            }
            Some(COMMAND_BLOCKED_EXIT) => {
                return Err(ServiceError::Blocked(format!(
                    "translator command exited with {COMMAND_BLOCKED_EXIT}"
                )));
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "translator command failed: {} ({})",
                    self.program,
                    output.status
                )
                .into());
            }
        }

        let stdout =
            String::from_utf8(output.stdout).context("translator stdout is not valid UTF-8")?;
        if stdout.trim().is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(stdout.trim_end().to_owned())
    }
}

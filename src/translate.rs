//! Tiered translation with graceful degradation.
//!
//! A chapter body is offered to the generative service under a fixed list of
//! prompt strategies, from a faithful translation down to a plot summary.
//! Rate limiting holds the current tier; any other failure moves to the next.
//! When every tier fails the body becomes [`TRANSLATION_FAILED_SENTINEL`].

use std::time::Duration;

use crate::error::ServiceError;
use crate::llm::TextService;

pub const TRANSLATION_FAILED_SENTINEL: &str =
    "[novelrelay] translation unavailable: every fallback tier failed for this chapter";

/// Inserted between the halves of a split-and-merge translation.
pub const CONTINUATION_MARKER: &str = "\n\n(…continued…)\n\n";

/// How many times a half may be bisected again in split-and-merge.
const MAX_SPLIT_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Faithful,
    Soften,
    Summarize,
    SplitMerge,
}

#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub source_language: String,
    pub target_language: String,
    pub max_chars: usize,
    pub split_merge: bool,
    pub tier_delay: Duration,
    pub rate_limit_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Tier that produced `text`; `None` for the sentinel.
    pub tier: Option<Tier>,
}

impl Translation {
    pub fn is_sentinel(&self) -> bool {
        self.tier.is_none()
    }
}

pub fn is_sentinel(text: &str) -> bool {
    text == TRANSLATION_FAILED_SENTINEL
}

pub struct TranslationEngine<'a> {
    service: Option<&'a dyn TextService>,
    policy: EnginePolicy,
}

impl<'a> TranslationEngine<'a> {
    /// `service = None` disables translation: bodies become the sentinel and
    /// titles pass through unchanged.
    pub fn new(service: Option<&'a dyn TextService>, policy: EnginePolicy) -> Self {
        Self { service, policy }
    }

    pub fn tiers(&self) -> Vec<Tier> {
        let mut tiers = vec![Tier::Faithful, Tier::Soften, Tier::Summarize];
        if self.policy.split_merge {
            tiers.push(Tier::SplitMerge);
        }
        tiers
    }

    pub fn translate_body(&self, body: &str) -> Translation {
        let Some(service) = self.service else {
            return sentinel();
        };
        let source = truncate_chars(body, self.policy.max_chars);

        let tiers = self.tiers();
        for (pos, tier) in tiers.iter().copied().enumerate() {
            let outcome = match tier {
                Tier::SplitMerge => self.split_merge(service, source),
                _ => self.call(service, tier, &self.prompt(tier, source)),
            };

            match outcome {
                Ok(text) => {
                    tracing::info!(tier = ?tier, chars = text.chars().count(), "translated");
                    return Translation {
                        text,
                        tier: Some(tier),
                    };
                }
                Err(err) => {
                    tracing::warn!(tier = ?tier, error = %err, "translation tier failed");
                    if pos + 1 < tiers.len() {
                        pause(self.policy.tier_delay);
                    }
                }
            }
        }

        tracing::error!("all translation tiers failed; storing sentinel");
        sentinel()
    }

    /// Single attempt without escalation; the original title on any failure.
    pub fn translate_title(&self, title: &str) -> String {
        let Some(service) = self.service else {
            return title.to_owned();
        };
        if title.trim().is_empty() {
            return title.to_owned();
        }

        let prompt = format!(
            "Translate this {source} chapter title into {target}. \
Output ONLY the translated title on one line.\n\n{title}",
            source = self.policy.source_language,
            target = self.policy.target_language,
        );
        match service.generate(&prompt) {
            Ok(text) => match text.lines().map(str::trim).find(|l| !l.is_empty()) {
                Some(line) => line.to_owned(),
                None => title.to_owned(),
            },
            Err(err) => {
                tracing::debug!(error = %err, "title translation failed; keeping original");
                title.to_owned()
            }
        }
    }

    /// One tier's service call. Rate limiting retries the same prompt with
    /// linear backoff and no attempt limit.
    fn call(
        &self,
        service: &dyn TextService,
        tier: Tier,
        prompt: &str,
    ) -> Result<String, ServiceError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match service.generate(prompt) {
                Ok(text) if text.trim().is_empty() => return Err(ServiceError::Empty),
                Ok(text) => return Ok(text.trim().to_owned()),
                Err(ServiceError::RateLimited(message)) => {
                    let wait = self.policy.rate_limit_backoff * attempt;
                    tracing::warn!(
                        tier = ?tier,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        message = %message,
                        "rate limited; retrying same tier"
                    );
                    pause(wait);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn split_merge(&self, service: &dyn TextService, source: &str) -> Result<String, ServiceError> {
        let Some((left, right)) = split_at_newline(source) else {
            return Err(ServiceError::Other(anyhow::anyhow!(
                "text cannot be split further"
            )));
        };

        let mut stack = vec![(right, 1usize), (left, 1usize)];
        let mut parts = Vec::new();
        while let Some((piece, depth)) = stack.pop() {
            match self.call(service, Tier::Soften, &self.prompt(Tier::Soften, &piece)) {
                Ok(text) => parts.push(text),
                Err(err) => {
                    if depth < MAX_SPLIT_DEPTH
                        && let Some((l, r)) = split_at_newline(&piece)
                    {
                        tracing::info!(split_depth = depth, "splitting failed half again");
                        stack.push((r, depth + 1));
                        stack.push((l, depth + 1));
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Ok(parts.join(CONTINUATION_MARKER))
    }

    pub fn prompt(&self, tier: Tier, source: &str) -> String {
        let source_language = &self.policy.source_language;
        let target = &self.policy.target_language;
        let rules = match tier {
            Tier::Faithful => format!(
                "You are a professional novel translator. Translate the following \
{source_language} web-novel chapter into natural, engaging {target}.\n\
Rules:\n\
1. Preserve the tone, voice and every scene of the original.\n\
2. Render sensitive or mature passages with tasteful euphemism; never omit them.\n\
3. Do not stop early; translate to the end of the chapter.\n\
4. Output ONLY the translation."
            ),
            Tier::Soften | Tier::SplitMerge => format!(
                "You are a professional novel translator. Translate the following \
{source_language} text into {target}.\n\
Rules:\n\
1. Avoid explicit sexual or graphic violent wording; replace it with soft euphemism or metaphor.\n\
2. Keep the story flow and dialogue intact.\n\
3. Do not stop early; translate all of the text.\n\
4. Output ONLY the translation."
            ),
            Tier::Summarize => format!(
                "Summarize the plot of the following {source_language} chapter in {target}.\n\
Rules:\n\
1. Do not translate literally; retell the events as a clear plot summary.\n\
2. Skip explicit scenes entirely, mentioning only that they happened.\n\
3. Keep character names and key dialogue beats.\n\
4. Output ONLY the summary."
            ),
        };
        format!("{rules}\n\nText:\n{source}")
    }
}

fn sentinel() -> Translation {
    Translation {
        text: TRANSLATION_FAILED_SENTINEL.to_owned(),
        tier: None,
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

/// Longest prefix of at most `max_chars` characters.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Splits at the newline closest to the middle; `None` when there is none.
fn split_at_newline(input: &str) -> Option<(String, String)> {
    let len = input.len();
    if len < 2 {
        return None;
    }

    let mut mid = len / 2;
    while !input.is_char_boundary(mid) {
        mid -= 1;
    }
    let left_split = input[..mid].rfind('\n').map(|idx| idx + 1);
    let right_split = input[mid..].find('\n').map(|rel| mid + rel + 1);

    let split_at = match (left_split, right_split) {
        (Some(a), Some(b)) => {
            if mid - a <= b - mid {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };

    if split_at == 0 || split_at >= len {
        return None;
    }
    Some((input[..split_at].to_owned(), input[split_at..].to_owned()))
}

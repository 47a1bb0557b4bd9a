use std::time::Duration;

use anyhow::Context as _;

pub const END_OF_CHAPTER: &str = "✅ **End of chapter**";

/// Upper bound of the part prefix, for up to 9999 parts.
pub const PART_PREFIX_MAX_CHARS: usize = "**[Part 9999/9999]**\n".len();

pub trait PushSink {
    fn post(&self, channel: &str, content: &str) -> anyhow::Result<()>;
}

/// Posts `{"content": ...}` to a webhook URL.
pub struct WebhookSink {
    client: reqwest::blocking::Client,
}

impl WebhookSink {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build webhook http client")?;
        Ok(Self { client })
    }

    fn send(&self, channel: &str, content: &str) -> anyhow::Result<reqwest::blocking::Response> {
        self.client
            .post(channel)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .context("POST webhook")
    }
}

impl PushSink for WebhookSink {
    fn post(&self, channel: &str, content: &str) -> anyhow::Result<()> {
        let mut response = self.send(channel, content)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let raw = response.text().unwrap_or_default();
            let wait = retry_after(&raw).unwrap_or(Duration::from_secs(1));
            tracing::warn!(wait_ms = wait.as_millis() as u64, "webhook rate limited; retrying once");
            std::thread::sleep(wait);
            response = self.send(channel, content)?;
        }

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().unwrap_or_default();
            anyhow::bail!("webhook rejected message ({status}): {raw}");
        }
        Ok(())
    }
}

fn retry_after(raw_json: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let secs = value.get("retry_after")?.as_f64()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs.min(60.0)))
}

pub struct Notifier<'a> {
    sink: &'a dyn PushSink,
    max_message_chars: usize,
    delay: Duration,
}

impl<'a> Notifier<'a> {
    pub fn new(sink: &'a dyn PushSink, max_message_chars: usize, delay: Duration) -> Self {
        Self {
            sink,
            max_message_chars: max_message_chars.max(1),
            delay,
        }
    }

    /// Announces a chapter. A missing channel is skipped.
    pub fn notify(&self, channel: Option<&str>, title: &str, link: &str) -> anyhow::Result<()> {
        let Some(channel) = channel else {
            tracing::debug!("no push channel configured; skipping notification");
            return Ok(());
        };
        self.sink
            .post(channel, &format!("📚 **{title}**\n🔗 {link}"))
            .context("send chapter header")
    }

    /// Sends `content` in ordered chunks followed by the end-of-chapter
    /// marker. `max_message_chars` bounds each chunk's content; a multi-part
    /// delivery adds a `**[Part i/n]**` line of at most [`PART_PREFIX_MAX_CHARS`]
    /// on top.
    pub fn deliver(&self, channel: Option<&str>, content: &str) -> anyhow::Result<()> {
        let Some(channel) = channel else {
            tracing::debug!("no push channel configured; skipping delivery");
            return Ok(());
        };

        let chunks = chunk_chars(content, self.max_message_chars);
        let total = chunks.len();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let message = if total > 1 {
                format!("**[Part {}/{total}]**\n{chunk}", idx + 1)
            } else {
                chunk.to_owned()
            };
            self.sink
                .post(channel, &message)
                .with_context(|| format!("send chunk {}/{total}", idx + 1))?;
            self.pace();
        }

        self.sink
            .post(channel, END_OF_CHAPTER)
            .context("send end-of-chapter marker")
    }

    pub fn notify_failure(
        &self,
        channel: Option<&str>,
        title: &str,
        link: &str,
    ) -> anyhow::Result<()> {
        let Some(channel) = channel else {
            return Ok(());
        };
        self.sink
            .post(
                channel,
                &format!("⚠️ **Translation failed, will retry next run**\n📖 {title}\n🔗 {link}"),
            )
            .context("send failure notice")
    }

    fn pace(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

/// Consecutive slices of at most `max_chars` characters each.
pub fn chunk_chars(input: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (idx, _) in input.char_indices() {
        if count == max_chars {
            chunks.push(&input[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < input.len() {
        chunks.push(&input[start..]);
    }
    chunks
}

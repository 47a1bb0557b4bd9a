use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store_file: PathBuf,
    pub state_dir: PathBuf,
    pub source_language: String,
    pub target_language: String,
    pub translation: TranslationSettings,
    pub fetch: FetchSettings,
    pub pacing: PacingSettings,
    pub notify: NotifySettings,
    pub site: SiteProfile,
    pub works: Vec<WorkConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_file: PathBuf::from("novels.json"),
            state_dir: PathBuf::from("state"),
            source_language: "Japanese".to_owned(),
            target_language: "Thai".to_owned(),
            translation: TranslationSettings::default(),
            fetch: FetchSettings::default(),
            pacing: PacingSettings::default(),
            notify: NotifySettings::default(),
            site: SiteProfile::default(),
            works: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;

        // Relative state paths are anchored at the config file's directory.
        if let Some(base) = path.parent() {
            settings.store_file = anchor(base, &settings.store_file);
            settings.state_dir = anchor(base, &settings.state_dir);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.translation.max_chars == 0 {
            anyhow::bail!("translation.max_chars must be > 0");
        }
        if self.notify.max_message_chars == 0 {
            anyhow::bail!("notify.max_message_chars must be > 0");
        }
        if self.fetch.max_retries == 0 {
            anyhow::bail!("fetch.max_retries must be > 0");
        }
        if self.fetch.retry_delay_min_ms > self.fetch.retry_delay_max_ms {
            anyhow::bail!("fetch.retry_delay_min_ms must be <= fetch.retry_delay_max_ms");
        }
        regex::Regex::new(&self.site.episode_pattern).context("compile site.episode_pattern")?;

        let mut seen = std::collections::HashSet::new();
        for work in &self.works {
            url::Url::parse(&work.url).with_context(|| format!("parse work url: {}", work.url))?;
            if !seen.insert(work.state_key()) {
                anyhow::bail!("duplicate work state key: {}", work.state_key());
            }
        }
        Ok(())
    }

    pub fn find_work(&self, name: &str) -> anyhow::Result<&WorkConfig> {
        self.works
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| anyhow::anyhow!("no work named {name:?} in config"))
    }
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_owned()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranslationEngineKind {
    Gemini,
    Openai,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslationSettings {
    pub engine: TranslationEngineKind,
    pub model: String,
    pub base_url: Option<String>,
    pub max_chars: usize,
    pub split_merge: bool,
    pub timeout_secs: u64,
    pub command: Option<String>,
    pub command_args: Vec<String>,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            engine: TranslationEngineKind::Gemini,
            model: "gemini-2.5-pro".to_owned(),
            base_url: None,
            max_chars: 30_000,
            split_merge: true,
            timeout_secs: 300,
            command: None,
            command_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_min_ms: u64,
    pub retry_delay_max_ms: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_retries: 3,
            retry_delay_min_ms: 2_000,
            retry_delay_max_ms: 5_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_owned(),
            accept_language: "ja,en-US;q=0.9,en;q=0.8".to_owned(),
        }
    }
}

/// Sleep intervals in milliseconds; zero skips the sleep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingSettings {
    pub chapter_delay_ms: u64,
    pub tier_delay_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub notify_delay_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            chapter_delay_ms: 30_000,
            tier_delay_ms: 2_000,
            rate_limit_backoff_ms: 20_000,
            notify_delay_ms: 1_000,
        }
    }
}

impl PacingSettings {
    pub fn chapter_delay(&self) -> Duration {
        Duration::from_millis(self.chapter_delay_ms)
    }

    pub fn tier_delay(&self) -> Duration {
        Duration::from_millis(self.tier_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_millis(self.notify_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifySettings {
    /// Content characters per message. Multi-part deliveries add a short
    /// part prefix on top, see `notify::PART_PREFIX_MAX_CHARS`.
    pub max_message_chars: usize,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            max_message_chars: 1900,
        }
    }
}

/// Document selectors for the tracked site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteProfile {
    pub work_title: String,
    pub chapter_title: String,
    pub body: String,
    pub body_fallback: Option<String>,
    pub body_strip: Option<String>,
    pub next_link: String,
    pub start_link: Option<String>,
    /// Regex matched against anchor hrefs; capture group 1 is the numeric id.
    pub episode_pattern: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            work_title: "#workTitle, h1".to_owned(),
            chapter_title: ".widget-episodeTitle, h1, h2".to_owned(),
            body: ".widget-episodeBody".to_owned(),
            body_fallback: Some("#contentMain-inner".to_owned()),
            body_strip: Some("button, .widget-episode-navigation".to_owned()),
            next_link: "#contentMain-readNextEpisode".to_owned(),
            start_link: Some("#readFromFirstEpisode a, a.readFromFirstEpisode".to_owned()),
            episode_pattern: r"/works/\d+/episodes/(\d+)".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Environment variable holding the webhook URL.
    #[serde(default)]
    pub webhook_env: Option<String>,
    #[serde(default)]
    pub state_key: Option<String>,
}

impl WorkConfig {
    pub fn state_key(&self) -> String {
        match self.state_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.trim().to_owned(),
            _ => derive_state_key(&self.url),
        }
    }

    /// Resolved push channel; `None` means notification is skipped.
    pub fn channel(&self) -> Option<String> {
        if let Some(url) = self.webhook_url.as_deref()
            && !url.trim().is_empty()
        {
            return Some(url.trim().to_owned());
        }
        let var = self.webhook_env.as_deref()?;
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }
}

fn derive_state_key(url: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(url.trim().as_bytes());
    let digest = hasher.finalize();
    format!("w_{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("works.yaml");
        std::fs::write(
            &path,
            "works:\n  - name: demo\n    url: https://example.com/works/1\n    webhook_url: https://hooks.example/1\n",
        )?;

        let settings = Settings::load(&path)?;
        assert_eq!(settings.store_file, temp.path().join("novels.json"));
        assert_eq!(settings.state_dir, temp.path().join("state"));
        assert_eq!(settings.translation.engine, TranslationEngineKind::Gemini);
        assert_eq!(settings.notify.max_message_chars, 1900);
        assert_eq!(settings.fetch.max_retries, 3);

        let work = settings.find_work("demo")?;
        assert_eq!(work.channel().as_deref(), Some("https://hooks.example/1"));
        assert!(work.state_key().starts_with("w_"));
        Ok(())
    }

    #[test]
    fn state_key_is_stable_and_overridable() {
        let mut work = WorkConfig {
            name: "a".to_owned(),
            url: "https://example.com/works/1".to_owned(),
            webhook_url: None,
            webhook_env: None,
            state_key: None,
        };
        assert_eq!(work.state_key(), work.state_key());
        assert_eq!(work.state_key().len(), 2 + 16);

        work.state_key = Some("novel_1".to_owned());
        assert_eq!(work.state_key(), "novel_1");
    }

    #[test]
    fn duplicate_state_keys_are_rejected() {
        let work = WorkConfig {
            name: "a".to_owned(),
            url: "https://example.com/works/1".to_owned(),
            webhook_url: None,
            webhook_env: None,
            state_key: Some("same".to_owned()),
        };
        let settings = Settings {
            works: vec![work.clone(), WorkConfig { name: "b".to_owned(), ..work }],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_channel_is_none() {
        let work = WorkConfig {
            name: "a".to_owned(),
            url: "https://example.com/works/1".to_owned(),
            webhook_url: None,
            webhook_env: Some("NOVELRELAY_TEST_UNSET_WEBHOOK".to_owned()),
            state_key: None,
        };
        assert_eq!(work.channel(), None);
    }
}

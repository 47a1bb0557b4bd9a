//! Chapter chain orchestration.
//!
//! `run_chain` walks a work from its first chapter along "next" links:
//! fetch, extract, skip if already in history, translate, persist, notify,
//! record history, advance. `check_latest` handles only the newest chapter
//! against the latest-cursor. Works are processed one at a time.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::config::WorkConfig;
use crate::discovery::Discovery;
use crate::error::ChapterError;
use crate::extract::{ChapterExtractor, ExtractedChapter};
use crate::fetch::PageSource;
use crate::formats::Chapter;
use crate::notify::Notifier;
use crate::state::{CursorRole, CursorStore, HistoryStore, KvStore};
use crate::store::WorkStore;
use crate::translate::TranslationEngine;

#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// Stop after this many chapters were translated (or failed) this run.
    pub max_chapters: Option<usize>,
    /// Start from the stored chain cursor instead of the first chapter.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// No next link: the end of the work was reached.
    Terminal,
    /// A page could not be fetched or parsed; the chain stops here.
    Aborted { link: String, error: ChapterError },
    /// The per-run chapter cap was reached before `next_link`.
    Limited { next_link: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub fetched: usize,
    pub translated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ChainReport {
    fn new() -> Self {
        Self {
            outcome: ChainOutcome::Terminal,
            fetched: 0,
            translated: 0,
            failed: 0,
            skipped: 0,
        }
    }

    fn processed(&self) -> usize {
        self.translated + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NoChapters,
    UpToDate,
    /// Latest chapter is already in history; only the cursor moved.
    AlreadyTranslated,
    Translated,
    /// Stored as sentinel; the cursor stays so the next run retries.
    Failed,
    Aborted { link: String, error: ChapterError },
}

/// Per-work values shared by every step.
struct WorkContext<'w> {
    config: &'w WorkConfig,
    work_url: Url,
    state_key: String,
    channel: Option<String>,
}

impl<'w> WorkContext<'w> {
    fn new(config: &'w WorkConfig) -> anyhow::Result<Self> {
        let work_url =
            Url::parse(&config.url).with_context(|| format!("parse work url: {}", config.url))?;
        Ok(Self {
            config,
            work_url,
            state_key: config.state_key(),
            channel: config.channel(),
        })
    }

    fn work_id(&self) -> &str {
        &self.config.url
    }

    fn title(&self) -> &str {
        &self.config.name
    }
}

enum StepResult {
    Translated,
    Failed,
}

pub struct Pipeline<'p> {
    pub source: &'p dyn PageSource,
    pub discovery: &'p Discovery,
    pub extractor: &'p ChapterExtractor,
    pub engine: &'p TranslationEngine<'p>,
    pub notifier: &'p Notifier<'p>,
    pub state: &'p dyn KvStore,
    pub works: WorkStore<'p>,
    pub chapter_delay: Duration,
}

impl<'p> Pipeline<'p> {
    pub fn run_chain(
        &self,
        work: &WorkConfig,
        options: &ChainOptions,
    ) -> anyhow::Result<ChainReport> {
        let ctx = WorkContext::new(work)?;
        let history = HistoryStore::new(self.state, &ctx.state_key);
        let cursor = CursorStore::new(self.state, &ctx.state_key, CursorRole::Chain);
        let mut report = ChainReport::new();

        tracing::info!(work = %work.name, url = %ctx.work_url, "chain: discovering");
        let resume_from = if options.resume { cursor.get()? } else { None };
        let (start, mut position) = match resume_from {
            Some(link) => {
                let position = self.resume_position(&ctx, &link)?;
                tracing::info!(work = %work.name, link = %link, "chain: resuming from cursor");
                (Url::parse(&link).with_context(|| format!("parse chain cursor: {link}"))?, position)
            }
            None => match self.discovery.find_first_chapter(self.source, &ctx.work_url) {
                Ok(Some(first)) => (first, 1),
                Ok(None) => {
                    tracing::info!(work = %work.name, "chain: work has no chapters");
                    return Ok(report);
                }
                Err(err) => {
                    tracing::warn!(work = %work.name, error = %err, "chain: discovery failed");
                    report.outcome = ChainOutcome::Aborted {
                        link: ctx.work_url.to_string(),
                        error: err.into(),
                    };
                    return Ok(report);
                }
            },
        };

        let mut link = start;
        let mut visited = HashSet::new();
        // Once a chapter ends as the sentinel the cursor stays on it, so a
        // resumed run retries it first.
        let mut cursor_held = false;
        loop {
            if let Some(max) = options.max_chapters
                && report.processed() >= max
            {
                tracing::info!(work = %work.name, max = max, "chain: chapter cap reached");
                report.outcome = ChainOutcome::Limited {
                    next_link: link.to_string(),
                };
                break;
            }
            visited.insert(link.to_string());

            let extracted = match self.fetch_chapter(&ctx, &link) {
                Ok(extracted) => extracted,
                Err(error) => {
                    tracing::warn!(work = %work.name, link = %link, error = %error, "chain: aborted");
                    report.outcome = ChainOutcome::Aborted {
                        link: link.to_string(),
                        error,
                    };
                    break;
                }
            };
            report.fetched += 1;

            if history.is_completed(link.as_str())? {
                tracing::info!(work = %work.name, link = %link, "chain: already translated; skipping");
                report.skipped += 1;
            } else {
                let ordinal = self
                    .discovery
                    .episode_id(link.as_str())
                    .unwrap_or(position);
                match self.process_chapter(&ctx, &history, &link, ordinal, &extracted)? {
                    StepResult::Translated => report.translated += 1,
                    StepResult::Failed => {
                        report.failed += 1;
                        if !cursor_held {
                            cursor.set(link.as_str())?;
                            cursor_held = true;
                        }
                    }
                }
                pause(self.chapter_delay);
            }

            let Some(next) = extracted.next_link else {
                if !cursor_held {
                    cursor.set(link.as_str())?;
                }
                report.outcome = ChainOutcome::Terminal;
                break;
            };
            if visited.contains(next.as_str()) {
                tracing::warn!(work = %work.name, link = %next, "chain: next link loops back; stopping");
                if !cursor_held {
                    cursor.set(link.as_str())?;
                }
                report.outcome = ChainOutcome::Terminal;
                break;
            }
            if !cursor_held {
                cursor.set(next.as_str())?;
            }
            link = next;
            position += 1;
        }

        tracing::info!(
            work = %work.name,
            outcome = ?report.outcome,
            fetched = report.fetched,
            translated = report.translated,
            failed = report.failed,
            skipped = report.skipped,
            "chain: finished"
        );
        Ok(report)
    }

    pub fn check_latest(&self, work: &WorkConfig) -> anyhow::Result<CheckOutcome> {
        let ctx = WorkContext::new(work)?;
        let history = HistoryStore::new(self.state, &ctx.state_key);
        let cursor = CursorStore::new(self.state, &ctx.state_key, CursorRole::Latest);

        let latest = match self.discovery.find_latest_chapter(self.source, &ctx.work_url) {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                tracing::info!(work = %work.name, "check: no chapters found");
                return Ok(CheckOutcome::NoChapters);
            }
            Err(err) => {
                tracing::warn!(work = %work.name, error = %err, "check: cannot read table of contents");
                return Ok(CheckOutcome::Aborted {
                    link: ctx.work_url.to_string(),
                    error: err.into(),
                });
            }
        };
        tracing::info!(work = %work.name, latest = %latest.title, "check: latest chapter on site");

        if cursor.get()?.as_deref() == Some(latest.link.as_str()) {
            tracing::info!(work = %work.name, "check: no new chapter");
            return Ok(CheckOutcome::UpToDate);
        }

        if history.is_completed(&latest.link)? {
            cursor.set(&latest.link)?;
            return Ok(CheckOutcome::AlreadyTranslated);
        }

        let link = Url::parse(&latest.link)
            .with_context(|| format!("parse latest link: {}", latest.link))?;
        let extracted = match self.fetch_chapter(&ctx, &link) {
            Ok(extracted) => extracted,
            Err(error) => {
                tracing::warn!(work = %work.name, link = %link, error = %error, "check: cannot fetch chapter");
                return Ok(CheckOutcome::Aborted {
                    link: link.to_string(),
                    error,
                });
            }
        };

        tracing::info!(work = %work.name, link = %link, "check: new chapter");
        match self.process_chapter(&ctx, &history, &link, latest.numeric_id, &extracted)? {
            StepResult::Translated => {
                cursor.set(&latest.link)?;
                Ok(CheckOutcome::Translated)
            }
            StepResult::Failed => Ok(CheckOutcome::Failed),
        }
    }

    fn fetch_chapter(
        &self,
        ctx: &WorkContext<'_>,
        link: &Url,
    ) -> Result<ExtractedChapter, ChapterError> {
        let doc = self.source.fetch(link, Some(&ctx.work_url))?;
        Ok(self.extractor.extract(&doc)?)
    }

    /// Translate, persist, notify, then record history unless the body is
    /// the sentinel.
    fn process_chapter(
        &self,
        ctx: &WorkContext<'_>,
        history: &HistoryStore<'_>,
        link: &Url,
        ordinal: u64,
        extracted: &ExtractedChapter,
    ) -> anyhow::Result<StepResult> {
        let name = &ctx.config.name;
        tracing::info!(work = %name, link = %link, ordinal = ordinal, title = %extracted.title, "translating chapter");

        let title = self.engine.translate_title(&extracted.title);
        let translation = self.engine.translate_body(&extracted.body);

        let chapter = Chapter {
            ordinal,
            title,
            source_link: link.to_string(),
            body: extracted.body.clone(),
            translated_body: translation.text.clone(),
        };
        self.works
            .upsert_chapter(ctx.work_id(), ctx.title(), &chapter)
            .context("persist chapter")?;

        let channel = ctx.channel.as_deref();
        if translation.is_sentinel() {
            if let Err(err) = self
                .notifier
                .notify_failure(channel, &chapter.title, &chapter.source_link)
            {
                tracing::warn!(work = %name, error = %err, "failure notice not delivered");
            }
            tracing::warn!(work = %name, link = %link, "chapter stored as failed; will retry next run");
            return Ok(StepResult::Failed);
        }

        let notified = self
            .notifier
            .notify(channel, &chapter.title, &chapter.source_link)
            .and_then(|()| self.notifier.deliver(channel, &chapter.translated_body));
        if let Err(err) = notified {
            tracing::warn!(work = %name, link = %link, error = %err, "notification not delivered");
        }

        history
            .mark_completed(&chapter.source_link)
            .context("record history")?;
        Ok(StepResult::Translated)
    }

    /// Chain position of a resumed link: its stored ordinal, else one past
    /// the highest stored ordinal.
    fn resume_position(&self, ctx: &WorkContext<'_>, link: &str) -> anyhow::Result<u64> {
        let Some(record) = self.works.work(ctx.work_id())? else {
            return Ok(1);
        };
        if let Some(existing) = record.chapters.iter().find(|c| c.link == link) {
            return Ok(existing.ordinal);
        }
        Ok(record
            .chapters
            .iter()
            .map(|c| c.ordinal)
            .max()
            .map_or(1, |max| max + 1))
    }
}

/// Outcome of one work in a multi-work run.
#[derive(Debug)]
pub enum WorkRun<T> {
    Done(T),
    Failed(anyhow::Error),
}

/// Runs `step` for every work in order; an error on one work is logged and
/// does not stop the others.
pub fn run_all<'w, T, F>(works: &'w [WorkConfig], mut step: F) -> Vec<(&'w str, WorkRun<T>)>
where
    F: FnMut(&WorkConfig) -> anyhow::Result<T>,
{
    let mut results = Vec::with_capacity(works.len());
    for work in works {
        tracing::info!(work = %work.name, "processing work");
        let result = match step(work) {
            Ok(value) => WorkRun::Done(value),
            Err(err) => {
                tracing::error!(work = %work.name, error = %format!("{err:#}"), "work failed; continuing");
                WorkRun::Failed(err)
            }
        };
        results.push((work.name.as_str(), result));
    }
    results
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

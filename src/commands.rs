use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use url::Url;

use crate::cli::{CheckArgs, ListArgs, RunArgs, TranslateArgs};
use crate::config::{Settings, WorkConfig};
use crate::discovery::Discovery;
use crate::extract::ChapterExtractor;
use crate::fetch::HttpFetcher;
use crate::llm::{self, TextService};
use crate::notify::{Notifier, WebhookSink};
use crate::pipeline::{self, ChainOptions, Pipeline, WorkRun};
use crate::state::{self, FsKvStore};
use crate::store::WorkStore;
use crate::translate::{EnginePolicy, TranslationEngine};

/// Long-lived collaborators built once from [`Settings`].
struct Runtime {
    settings: Settings,
    fetcher: HttpFetcher,
    discovery: Discovery,
    extractor: ChapterExtractor,
    service: Option<Box<dyn TextService>>,
    sink: WebhookSink,
    state_kv: FsKvStore,
    store_kv: FsKvStore,
    store_key: String,
}

impl Runtime {
    fn new(settings: Settings) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(settings.fetch.clone()).context("build page fetcher")?;
        let discovery = Discovery::new(&settings.site)?;
        let extractor = ChapterExtractor::new(&settings.site)?;
        let service = llm::build_service(&settings)?;
        let sink = WebhookSink::new()?;

        let (store_dir, store_key) = split_store_path(&settings.store_file)?;
        Ok(Self {
            state_kv: FsKvStore::new(&settings.state_dir),
            store_kv: FsKvStore::new(store_dir),
            store_key,
            fetcher,
            discovery,
            extractor,
            service,
            sink,
            settings,
        })
    }

    fn policy(&self) -> EnginePolicy {
        engine_policy(&self.settings)
    }

    fn selected_works(&self, name: Option<&str>) -> anyhow::Result<Vec<WorkConfig>> {
        match name {
            Some(name) => Ok(vec![self.settings.find_work(name)?.clone()]),
            None => Ok(self.settings.works.clone()),
        }
    }
}

fn engine_policy(settings: &Settings) -> EnginePolicy {
    EnginePolicy {
        source_language: settings.source_language.clone(),
        target_language: settings.target_language.clone(),
        max_chars: settings.translation.max_chars,
        split_merge: settings.translation.split_merge,
        tier_delay: settings.pacing.tier_delay(),
        rate_limit_backoff: settings.pacing.rate_limit_backoff(),
    }
}

fn split_store_path(path: &Path) -> anyhow::Result<(std::path::PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("store_file has no file name: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir.to_owned(), name.to_owned()))
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let settings = Settings::load(&args.config.config)?;
    let rt = Runtime::new(settings)?;
    let works = rt.selected_works(args.work.as_deref())?;
    let options = ChainOptions {
        max_chapters: args.max_chapters,
        resume: args.resume,
    };

    let engine = TranslationEngine::new(rt.service.as_deref(), rt.policy());
    let notifier = Notifier::new(
        &rt.sink,
        rt.settings.notify.max_message_chars,
        rt.settings.pacing.notify_delay(),
    );
    let runner = Pipeline {
        source: &rt.fetcher,
        discovery: &rt.discovery,
        extractor: &rt.extractor,
        engine: &engine,
        notifier: &notifier,
        state: &rt.state_kv,
        works: WorkStore::new(&rt.store_kv, rt.store_key.clone()),
        chapter_delay: rt.settings.pacing.chapter_delay(),
    };

    let results = pipeline::run_all(&works, |work| runner.run_chain(work, &options));
    finish(results)
}

pub fn check(args: CheckArgs) -> anyhow::Result<()> {
    let settings = Settings::load(&args.config.config)?;
    let rt = Runtime::new(settings)?;
    let works = rt.selected_works(args.work.as_deref())?;

    let engine = TranslationEngine::new(rt.service.as_deref(), rt.policy());
    let notifier = Notifier::new(
        &rt.sink,
        rt.settings.notify.max_message_chars,
        rt.settings.pacing.notify_delay(),
    );
    let runner = Pipeline {
        source: &rt.fetcher,
        discovery: &rt.discovery,
        extractor: &rt.extractor,
        engine: &engine,
        notifier: &notifier,
        state: &rt.state_kv,
        works: WorkStore::new(&rt.store_kv, rt.store_key.clone()),
        chapter_delay: rt.settings.pacing.chapter_delay(),
    };

    let results = pipeline::run_all(&works, |work| {
        let outcome = runner.check_latest(work)?;
        tracing::info!(work = %work.name, outcome = ?outcome, "check finished");
        Ok(outcome)
    });
    finish(results)
}

/// Fails when any work hit an unrecoverable error, after all works ran.
fn finish<T>(results: Vec<(&str, WorkRun<T>)>) -> anyhow::Result<()> {
    let failed = results
        .iter()
        .filter(|(_, r)| matches!(r, WorkRun::Failed(_)))
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        anyhow::bail!("{} work(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

pub fn list(args: ListArgs) -> anyhow::Result<()> {
    let settings = Settings::load(&args.config.config)?;
    let work = settings.find_work(&args.work)?;
    let work_url = Url::parse(&work.url).with_context(|| format!("parse work url: {}", work.url))?;

    let fetcher = HttpFetcher::new(settings.fetch.clone()).context("build page fetcher")?;
    let discovery = Discovery::new(&settings.site)?;
    let index = discovery
        .scan_index(&fetcher, &work_url)
        .with_context(|| format!("read table of contents: {work_url}"))?;
    tracing::info!(
        work = %work.name,
        title = index.title.as_deref().unwrap_or_default(),
        episodes = index.episodes.len(),
        "table of contents"
    );

    let mut stdout = std::io::stdout().lock();
    for episode in &index.episodes {
        let line = serde_json::to_string(episode).context("serialize episode")?;
        writeln!(stdout, "{line}").context("write stdout")?;
    }
    Ok(())
}

pub fn translate(args: TranslateArgs) -> anyhow::Result<()> {
    if args.out.exists() && !args.force {
        anyhow::bail!("translate output already exists: {}", args.out.display());
    }
    let settings = Settings::load(&args.config.config)?;
    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read input: {}", args.input.display()))?;

    let service = llm::build_service(&settings)?;
    let engine = TranslationEngine::new(service.as_deref(), engine_policy(&settings));
    let translation = engine.translate_body(&source);
    if translation.is_sentinel() {
        anyhow::bail!(
            "translation failed at every tier: {}",
            args.input.display()
        );
    }
    tracing::info!(tier = ?translation.tier, out = %args.out.display(), "writing translation");

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    let mut text = translation.text;
    text.push('\n');
    state::write_atomic(&args.out, text.as_bytes())
}

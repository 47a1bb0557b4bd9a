use std::collections::HashSet;

use anyhow::Context as _;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::config::SiteProfile;
use crate::error::FetchError;
use crate::extract::{first_text, parse_selector};
use crate::fetch::{Document, PageSource};
use crate::formats::EpisodeRef;

/// Table of contents of a work's main page, sorted by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkIndex {
    pub title: Option<String>,
    pub start_link: Option<Url>,
    pub episodes: Vec<EpisodeRef>,
}

impl WorkIndex {
    /// The designated start anchor, else the lowest-numbered episode.
    pub fn first_chapter(&self) -> Option<Url> {
        if let Some(start) = &self.start_link {
            return Some(start.clone());
        }
        self.episodes
            .first()
            .and_then(|ep| Url::parse(&ep.link).ok())
    }

    pub fn latest_chapter(&self) -> Option<&EpisodeRef> {
        self.episodes.last()
    }
}

#[derive(Debug, Clone)]
pub struct Discovery {
    work_title: Selector,
    start_link: Option<Selector>,
    anchors: Selector,
    episode_pattern: Regex,
}

impl Discovery {
    pub fn new(profile: &SiteProfile) -> anyhow::Result<Self> {
        Ok(Self {
            work_title: parse_selector(&profile.work_title)?,
            start_link: profile
                .start_link
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            anchors: parse_selector("a[href]")?,
            episode_pattern: Regex::new(&profile.episode_pattern)
                .context("compile episode pattern")?,
        })
    }

    pub fn scan_index(
        &self,
        source: &dyn PageSource,
        work_url: &Url,
    ) -> Result<WorkIndex, FetchError> {
        let doc = source.fetch(work_url, Some(work_url))?;
        Ok(self.parse_index(&doc))
    }

    pub fn find_first_chapter(
        &self,
        source: &dyn PageSource,
        work_url: &Url,
    ) -> Result<Option<Url>, FetchError> {
        Ok(self.scan_index(source, work_url)?.first_chapter())
    }

    pub fn find_latest_chapter(
        &self,
        source: &dyn PageSource,
        work_url: &Url,
    ) -> Result<Option<EpisodeRef>, FetchError> {
        Ok(self.scan_index(source, work_url)?.latest_chapter().cloned())
    }

    pub fn parse_index(&self, doc: &Document) -> WorkIndex {
        let page = Html::parse_document(&doc.html);

        let start_link = self
            .start_link
            .as_ref()
            .and_then(|sel| page.select(sel).find_map(|el| el.value().attr("href")))
            .and_then(|href| doc.url.join(href.trim()).ok());

        let mut seen = HashSet::new();
        let mut episodes = Vec::new();
        for anchor in page.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(numeric_id) = self.episode_id(href) else {
                continue;
            };
            if !seen.insert(numeric_id) {
                continue;
            }
            let Ok(link) = doc.url.join(href.trim()) else {
                continue;
            };

            let mut title = collapse(&anchor.text().collect::<String>());
            if title.is_empty() {
                title = format!("Episode {numeric_id}");
            }

            episodes.push(EpisodeRef {
                numeric_id,
                title,
                link: link.to_string(),
            });
        }
        episodes.sort_by_key(|ep| ep.numeric_id);

        WorkIndex {
            title: first_text(&page, &self.work_title),
            start_link,
            episodes,
        }
    }

    /// Numeric id embedded in an episode link, if it matches the pattern.
    pub fn episode_id(&self, link: &str) -> Option<u64> {
        self.episode_pattern
            .captures(link)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

fn collapse(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

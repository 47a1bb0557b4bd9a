use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::SiteProfile;
use crate::error::ExtractError;
use crate::fetch::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChapter {
    pub title: String,
    pub body: String,
    /// `None` is the end of the work.
    pub next_link: Option<Url>,
}

/// Compiled selectors from a [`SiteProfile`].
#[derive(Debug, Clone)]
pub struct ChapterExtractor {
    chapter_title: Selector,
    body: Selector,
    body_fallback: Option<Selector>,
    body_strip: Option<Selector>,
    next_link: Selector,
}

impl ChapterExtractor {
    pub fn new(profile: &SiteProfile) -> anyhow::Result<Self> {
        Ok(Self {
            chapter_title: parse_selector(&profile.chapter_title)?,
            body: parse_selector(&profile.body)?,
            body_fallback: profile
                .body_fallback
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            body_strip: profile
                .body_strip
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            next_link: parse_selector(&profile.next_link)?,
        })
    }

    pub fn extract(&self, doc: &Document) -> Result<ExtractedChapter, ExtractError> {
        self.extract_html(&doc.html, &doc.url)
    }

    pub fn extract_html(
        &self,
        html: &str,
        current_url: &Url,
    ) -> Result<ExtractedChapter, ExtractError> {
        let page = Html::parse_document(html);

        let body = match page.select(&self.body).next() {
            Some(el) => visible_text(el, None),
            None => match self.body_fallback.as_ref().and_then(|s| page.select(s).next()) {
                Some(el) => visible_text(el, self.body_strip.as_ref()),
                None => String::new(),
            },
        };
        if body.is_empty() {
            return Err(ExtractError::MissingBody {
                url: current_url.to_string(),
            });
        }

        let title = first_text(&page, &self.chapter_title).ok_or_else(|| {
            ExtractError::MissingTitle {
                url: current_url.to_string(),
            }
        })?;

        let next_link = page
            .select(&self.next_link)
            .find_map(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
            .and_then(|href| current_url.join(href).ok());

        Ok(ExtractedChapter {
            title,
            body,
            next_link,
        })
    }
}

pub(crate) fn parse_selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("invalid selector {css:?}: {err}"))
}

/// Text of the first matching element with non-blank text, trimmed.
pub(crate) fn first_text(page: &Html, selector: &Selector) -> Option<String> {
    page.select(selector)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// One line per non-blank text node, skipping `strip` descendants.
fn visible_text(container: ElementRef<'_>, strip: Option<&Selector>) -> String {
    let stripped = strip
        .map(|sel| container.select(sel).map(|el| el.id()).collect::<HashSet<_>>())
        .unwrap_or_default();

    let mut lines = Vec::new();
    for node in container.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if !stripped.is_empty() && node.ancestors().any(|a| stripped.contains(&a.id())) {
            continue;
        }
        let line = text.trim();
        if !line.is_empty() {
            lines.push(line.to_owned());
        }
    }
    lines.join("\n")
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ChapterExtractor {
        ChapterExtractor::new(&SiteProfile::default()).expect("default profile compiles")
    }

    fn url() -> Url {
        Url::parse("https://example.com/works/1/episodes/100").expect("valid url")
    }

    #[test]
    fn extracts_title_body_and_relative_next_link() -> anyhow::Result<()> {
        let html = r#"<html><body>
<p class="widget-episodeTitle"> 第1話  出会い </p>
<div class="widget-episodeBody">
  <p>一行目</p>
  <p>  </p>
  <p>二行目 <ruby>漢<rt>かん</rt></ruby></p>
</div>
<a id="contentMain-readNextEpisode" href="/works/1/episodes/101">次へ</a>
</body></html>"#;

        let chapter = extractor().extract_html(html, &url())?;
        assert_eq!(chapter.title, "第1話 出会い");
        assert_eq!(chapter.body, "一行目\n二行目\n漢\nかん");
        assert_eq!(
            chapter.next_link.map(|u| u.to_string()).as_deref(),
            Some("https://example.com/works/1/episodes/101")
        );
        Ok(())
    }

    #[test]
    fn missing_next_link_is_end_of_work() -> anyhow::Result<()> {
        let html = r#"<p class="widget-episodeTitle">Last</p>
<div class="widget-episodeBody"><p>The end.</p></div>"#;
        let chapter = extractor().extract_html(html, &url())?;
        assert_eq!(chapter.next_link, None);
        Ok(())
    }

    #[test]
    fn fallback_container_drops_navigation() -> anyhow::Result<()> {
        let html = r#"<h1>Title</h1>
<div id="contentMain-inner">
  <p>Body text</p>
  <button>Follow</button>
  <div class="widget-episode-navigation"><a href="/x">prev</a></div>
</div>"#;
        let chapter = extractor().extract_html(html, &url())?;
        assert_eq!(chapter.body, "Body text");
        Ok(())
    }

    #[test]
    fn missing_body_is_an_error() {
        let html = r#"<p class="widget-episodeTitle">Title</p><div>nothing here</div>"#;
        let err = extractor().extract_html(html, &url()).unwrap_err();
        assert!(matches!(err, ExtractError::MissingBody { .. }));
    }

    #[test]
    fn missing_title_is_an_error() {
        let html = r#"<div class="widget-episodeBody"><p>text</p></div>"#;
        let err = extractor().extract_html(html, &url()).unwrap_err();
        assert!(matches!(err, ExtractError::MissingTitle { .. }));
    }
}

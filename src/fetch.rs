use std::time::Duration;

use anyhow::Context as _;
use rand::Rng as _;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use url::Url;

use crate::config::FetchSettings;
use crate::error::FetchError;

/// A fetched HTML page. `url` is the final URL after redirects.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: Url,
    pub html: String,
}

pub trait PageSource {
    fn fetch(&self, url: &Url, referer: Option<&Url>) -> Result<Document, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build page fetch http client")?;
        Ok(Self { client, settings })
    }

    fn retry_delay(&self) -> Duration {
        let min = self.settings.retry_delay_min_ms;
        let max = self.settings.retry_delay_max_ms;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    fn attempt(&self, url: &Url, referer: Option<&Url>) -> Result<Document, FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.settings.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, &self.settings.accept_language);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().map_err(|err| classify(url, &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().map_err(|err| classify(url, &err))?;
        Ok(Document {
            url: final_url,
            html,
        })
    }
}

impl PageSource for HttpFetcher {
    fn fetch(&self, url: &Url, referer: Option<&Url>) -> Result<Document, FetchError> {
        let attempts = self.settings.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let delay = self.retry_delay();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match self.attempt(url, referer) {
                Ok(doc) => return Ok(doc),
                Err(err) => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        attempts = attempts,
                        error = %err,
                        "fetch attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transport {
            url: url.to_string(),
            message: "no fetch attempt was made".to_owned(),
        }))
    }
}

fn classify(url: &Url, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if let Some(status) = err.status() {
        FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc};
    use std::thread;

    use super::*;

    fn quick_settings() -> FetchSettings {
        FetchSettings {
            timeout_secs: 5,
            retry_delay_min_ms: 0,
            retry_delay_max_ms: 0,
            ..FetchSettings::default()
        }
    }

    /// Serves `fail_first` 503s, then a page echoing the request's Referer.
    fn spawn_flaky_server(
        fail_first: usize,
    ) -> (String, Arc<AtomicUsize>, mpsc::Sender<()>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let counter = Arc::clone(&hits);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    let _ = request
                        .respond(tiny_http::Response::from_string("busy").with_status_code(503));
                    continue;
                }
                let referer = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Referer"))
                    .map(|h| h.value.as_str().to_owned())
                    .unwrap_or_default();
                let _ = request.respond(tiny_http::Response::from_string(format!(
                    "<html><body>referer={referer}</body></html>"
                )));
            }
        });

        (base_url, hits, shutdown_tx, handle)
    }

    #[test]
    fn fetch_retries_until_success_and_sends_referer() -> anyhow::Result<()> {
        let (base_url, hits, shutdown, handle) = spawn_flaky_server(2);
        let fetcher = HttpFetcher::new(quick_settings())?;
        let url = Url::parse(&format!("{base_url}/works/1/episodes/10"))?;
        let referer = Url::parse(&format!("{base_url}/works/1"))?;

        let doc = fetcher.fetch(&url, Some(&referer))?;
        assert!(doc.html.contains(&format!("referer={referer}")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let _ = shutdown.send(());
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn fetch_gives_up_after_max_retries_with_status() -> anyhow::Result<()> {
        let (base_url, hits, shutdown, handle) = spawn_flaky_server(usize::MAX);
        let fetcher = HttpFetcher::new(quick_settings())?;
        let url = Url::parse(&format!("{base_url}/works/1"))?;

        let err = fetcher.fetch(&url, None).unwrap_err();
        assert_eq!(
            err,
            FetchError::HttpStatus {
                url: url.to_string(),
                status: 503
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let _ = shutdown.send(());
        let _ = handle.join();
        Ok(())
    }
}

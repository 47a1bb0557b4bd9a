use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use novelrelay::formats::{EpisodeRef, StoreDocument};
use predicates::prelude::*;

struct Site {
    base_url: String,
    shutdown_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
    posts_rx: mpsc::Receiver<String>,
}

impl Site {
    fn work_url(&self) -> String {
        format!("{}/works/1", self.base_url)
    }

    fn posts(&self) -> Vec<String> {
        self.posts_rx.try_iter().collect()
    }

    fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.join();
    }
}

const TOC_HTML: &str = r#"<!doctype html>
<html><body>
  <h1 id="workTitle">転生したら</h1>
  <ol>
    <li><a href="/works/1/episodes/12">第二話</a></li>
    <li><a href="/works/1/episodes/11">第一話</a></li>
  </ol>
</body></html>"#;

const EPISODE_11: &str = r#"<!doctype html>
<html><body>
  <p class="widget-episodeTitle">第一話</p>
  <div class="widget-episodeBody"><p>朝が来た。</p><p>彼は目を覚ました。</p></div>
  <a id="contentMain-readNextEpisode" href="/works/1/episodes/12">次へ</a>
</body></html>"#;

const EPISODE_12: &str = r#"<!doctype html>
<html><body>
  <p class="widget-episodeTitle">第二話</p>
  <div id="contentMain-inner">
    <p>夜になった。</p>
    <button>応援する</button>
    <div class="widget-episode-navigation">目次</div>
  </div>
</body></html>"#;

/// Serves a two-chapter work and records webhook posts.
fn spawn_site() -> Site {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let (posts_tx, posts_rx) = mpsc::channel::<String>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            if request.method() == &tiny_http::Method::Post && request.url() == "/hook" {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let content = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_owned))
                    .unwrap_or(body);
                let _ = posts_tx.send(content);
                let _ = request.respond(tiny_http::Response::empty(204));
                continue;
            }

            let (status, body) = match request.url() {
                "/works/1" => (200, TOC_HTML),
                "/works/1/episodes/11" => (200, EPISODE_11),
                "/works/1/episodes/12" => (200, EPISODE_12),
                _ => (404, "not found"),
            };
            let header =
                tiny_http::Header::from_bytes("Content-Type", "text/html; charset=utf-8")
                    .expect("content-type header");
            let _ = request.respond(
                tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header),
            );
        }
    });

    Site {
        base_url,
        shutdown_tx,
        handle,
        posts_rx,
    }
}

fn write_config(dir: &Path, site: &Site, translator_script: &str) -> anyhow::Result<PathBuf> {
    let yaml = format!(
        r#"store_file: novels.json
state_dir: state
translation:
  engine: command
  command: sh
  command_args: ["-c", "{translator_script}"]
fetch:
  timeout_secs: 5
  max_retries: 1
  retry_delay_min_ms: 0
  retry_delay_max_ms: 0
pacing:
  chapter_delay_ms: 0
  tier_delay_ms: 0
  rate_limit_backoff_ms: 0
  notify_delay_ms: 0
works:
  - name: Demo
    url: {work_url}
    webhook_url: {base_url}/hook
    state_key: demo
"#,
        work_url = site.work_url(),
        base_url = site.base_url,
    );
    let path = dir.join("works.yaml");
    fs::write(&path, yaml)?;
    Ok(path)
}

fn load_store(dir: &Path) -> anyhow::Result<StoreDocument> {
    let raw = fs::read_to_string(dir.join("novels.json"))?;
    Ok(serde_json::from_str(&raw)?)
}

fn history_lines(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("state/history/demo.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn run_translates_whole_chain_and_rerun_is_idempotent() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let config = write_config(temp.path(), &site, "cat >/dev/null; echo แปลแล้ว")?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["run", "--config", config.to_str().unwrap()])
        .assert()
        .success();

    let store = load_store(temp.path())?;
    let work = store.works.get(&site.work_url()).expect("work record");
    assert_eq!(work.title, "Demo");
    let ordinals = work.chapters.iter().map(|c| c.ordinal).collect::<Vec<_>>();
    assert_eq!(ordinals, vec![11, 12]);
    assert!(work.chapters.iter().all(|c| c.content == "แปลแล้ว"));
    assert_eq!(
        work.chapters[1].link,
        format!("{}/episodes/12", site.work_url())
    );

    let raw = fs::read_to_string(temp.path().join("novels.json"))?;
    assert!(raw.contains(r#""ep_id": "11""#), "ep_id is written as a string");

    assert_eq!(history_lines(temp.path()).len(), 2);
    // header, one content chunk and footer per chapter
    let posts = site.posts();
    assert_eq!(posts.len(), 6);
    assert!(posts[0].contains("/episodes/11"));
    assert_eq!(posts[1], "แปลแล้ว");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["run", "--config", config.to_str().unwrap()])
        .assert()
        .success();

    assert_eq!(load_store(temp.path())?.works[&site.work_url()].chapters.len(), 2);
    assert_eq!(history_lines(temp.path()).len(), 2);
    assert!(site.posts().is_empty(), "nothing is re-sent on an unchanged site");

    site.stop();
    Ok(())
}

#[test]
fn failing_translator_stores_sentinel_and_leaves_history_empty() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let config = write_config(temp.path(), &site, "cat >/dev/null; exit 3")?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["run", "--config", config.to_str().unwrap()])
        .assert()
        .success();

    let store = load_store(temp.path())?;
    let work = &store.works[&site.work_url()];
    assert_eq!(work.chapters.len(), 2);
    assert!(
        work.chapters
            .iter()
            .all(|c| novelrelay::translate::is_sentinel(&c.content))
    );
    // titles fall back to the source text
    assert_eq!(work.chapters[0].title, "第一話");
    assert!(history_lines(temp.path()).is_empty());

    let posts = site.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.contains("Translation failed")));

    site.stop();
    Ok(())
}

#[test]
fn check_translates_only_the_latest_chapter() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let config = write_config(temp.path(), &site, "cat >/dev/null; echo ok")?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["check", "--config", config.to_str().unwrap()])
        .assert()
        .success();

    let store = load_store(temp.path())?;
    let ordinals = store.works[&site.work_url()]
        .chapters
        .iter()
        .map(|c| c.ordinal)
        .collect::<Vec<_>>();
    assert_eq!(ordinals, vec![12]);

    let cursor = fs::read_to_string(temp.path().join("state/latest/demo.txt"))?;
    assert_eq!(cursor.trim(), format!("{}/episodes/12", site.work_url()));
    assert_eq!(site.posts().len(), 3);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["check", "--config", config.to_str().unwrap()])
        .assert()
        .success();
    assert!(site.posts().is_empty());

    site.stop();
    Ok(())
}

#[test]
fn list_prints_table_of_contents_in_numeric_order() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let config = write_config(temp.path(), &site, "cat >/dev/null; echo ok")?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    let output = cmd
        .args(["list", "--config", config.to_str().unwrap(), "--work", "Demo"])
        .output()?;
    assert!(output.status.success());

    let episodes = String::from_utf8(output.stdout)?
        .lines()
        .map(serde_json::from_str::<EpisodeRef>)
        .collect::<Result<Vec<_>, _>>()?;
    let ids = episodes.iter().map(|e| e.numeric_id).collect::<Vec<_>>();
    assert_eq!(ids, vec![11, 12]);
    assert_eq!(episodes[0].title, "第一話");

    site.stop();
    Ok(())
}

#[test]
fn translate_writes_local_file_and_respects_force() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let config = write_config(temp.path(), &site, "cat >/dev/null; echo done")?;
    let input = temp.path().join("chapter.txt");
    let out = temp.path().join("out/chapter.th.txt");
    fs::write(&input, "本文")?;

    let args = [
        "translate",
        "--config",
        config.to_str().unwrap(),
        "--input",
        input.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ];
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(args).assert().success();
    assert_eq!(fs::read_to_string(&out)?, "done\n");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(args).arg("--force").assert().success();

    site.stop();
    Ok(())
}

#[test]
fn missing_config_fails_with_context() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.args(["run", "--config", "/nonexistent/works.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}

#[test]
fn rust_log_debug_emits_parsed_cli_to_stderr() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelrelay");
    cmd.env("RUST_LOG", "debug")
        .args(["run", "--config", "/nonexistent/works.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}

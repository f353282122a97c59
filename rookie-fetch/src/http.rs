use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use rookie_core::{ContentFetcher, EngineError, FetchRequest, ProgressFn};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::FetchError;

/// User agent the mirror expects.
pub const USER_AGENT: &str = "rclone/v1.65.2";

/// One archive volume advertised in a mirror directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePart {
    pub name: String,
    pub size: u64,
}

/// Resumable HTTP downloads from the mirror.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(proxy_url) = std::env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTP_PROXY").ok())
        {
            match reqwest::Proxy::all(&proxy_url) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => warn!(proxy = %proxy_url, error = %e, "ignoring invalid proxy URL"),
            }
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Volumes listed under `<base_url><content_id>/`.
    pub async fn list_parts(
        &self,
        base_url: &str,
        content_id: &str,
    ) -> Result<Vec<RemotePart>, FetchError> {
        let url = format!("{}/", join_url(base_url, content_id));
        let html = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let parts = parse_listing(&html);
        if parts.is_empty() {
            return Err(FetchError::invalid(format!("no archive parts listed at {url}")));
        }
        Ok(parts)
    }

    /// Download `url` into `dest`, resuming a partial file.
    ///
    /// `on_bytes` receives the number of bytes of `dest` present so far,
    /// including any resumed prefix. Returns the final file length.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
        cancel: &watch::Receiver<bool>,
        mut on_bytes: impl FnMut(u64) + Send,
    ) -> Result<u64, FetchError> {
        let existing = match fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if expected_size.is_some_and(|size| size > 0 && existing >= size) {
            debug!(path = %dest.display(), "already downloaded");
            on_bytes(existing);
            return Ok(existing);
        }

        let mut request = self.client.get(url);
        if existing > 0 {
            request = request.header(header::RANGE, format!("bytes={existing}-"));
        }
        let response = request.send().await?;

        let mut written = match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                debug!(url, offset = existing, "resuming");
                existing
            }
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 => {
                on_bytes(existing);
                return Ok(existing);
            }
            _ => 0,
        };
        let response = response.error_for_status()?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(written > 0)
            .truncate(written == 0)
            .open(dest)
            .await?;
        on_bytes(written);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if *cancel.borrow() {
                file.flush().await?;
                return Err(FetchError::Aborted);
            }
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_bytes(written);
        }
        file.flush().await?;
        Ok(written)
    }

    /// Download every volume of `request` into its destination directory.
    pub async fn fetch_parts(
        &self,
        request: &FetchRequest,
        progress: &ProgressFn,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(), FetchError> {
        let parts = self.list_parts(&request.base_url, &request.content_id).await?;
        let total: u64 = parts.iter().map(|p| p.size).sum();
        fs::create_dir_all(&request.dest_dir).await?;
        info!(
            content_id = %request.content_id,
            parts = parts.len(),
            total_bytes = total,
            "fetching archive"
        );

        progress(0, total);
        let dir_url = join_url(&request.base_url, &request.content_id);
        let mut done = 0u64;
        for part in &parts {
            if *cancel.borrow() {
                return Err(FetchError::Aborted);
            }
            let url = join_url(&dir_url, &part.name);
            let dest = request.dest_dir.join(&part.name);
            let before = done;
            let received = self
                .download_file(&url, &dest, Some(part.size), cancel, |n| {
                    progress((before + n).min(total), total);
                })
                .await?;
            done += received.max(part.size);
        }
        progress(total, total);
        Ok(())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressFn,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        Ok(self.fetch_parts(&request, &progress, &cancel).await?)
    }
}

/// `base` and `path` joined with exactly one `/`.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Archive volumes and their sizes from an index page.
///
/// Only the first `<pre>` block is read. Each line looks like
/// `c383d4be...7z.001    18-Dec-2023 01:46    524288000`, possibly wrapped
/// in an anchor.
pub fn parse_listing(html: &str) -> Vec<RemotePart> {
    let lower = html.to_ascii_lowercase();
    let Some(start) = lower.find("<pre>") else {
        return Vec::new();
    };
    let body_start = start + "<pre>".len();
    let end = lower[body_start..]
        .find("</pre>")
        .map_or(html.len(), |i| body_start + i);
    let text = strip_tags(&html[body_start..end]);

    text.lines().filter_map(parse_listing_line).collect()
}

fn parse_listing_line(line: &str) -> Option<RemotePart> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?.trim_start_matches("../");
    let size = tokens.last()?.parse::<u64>().ok()?;
    is_part_name(name).then(|| RemotePart {
        name: name.to_owned(),
        size,
    })
}

/// `<lowercase alnum>.7z.<digits>`
fn is_part_name(name: &str) -> bool {
    let Some((stem, index)) = name.split_once(".7z.") else {
        return false;
    };
    !stem.is_empty()
        && stem
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        && !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_digit())
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::test_server::{Reply, TestServer, direct_fetcher};

    const LISTING: &str = r#"<html>
<head><title>Index of /c383d4bed11d5d96411920f0451f80da/</title></head>
<body>
<h1>Index of /c383d4bed11d5d96411920f0451f80da/</h1><hr><PRE><a href="../">../</a>
<a href="c383d4bed11d5d96411920f0451f80da.7z.001">c383d4bed11d5d96411920f0451f80da.7z.001</a>           18-Dec-2023 01:46           524288000
<a href="c383d4bed11d5d96411920f0451f80da.7z.002">c383d4bed11d5d96411920f0451f80da.7z.002</a>           18-Dec-2023 01:46            12345
<a href="notes.txt">notes.txt</a>                                         18-Dec-2023 01:46              10
</PRE><hr></body>
</html>"#;

    #[test]
    fn listing_yields_parts_with_sizes() {
        let parts = parse_listing(LISTING);
        assert_eq!(
            parts,
            vec![
                RemotePart {
                    name: "c383d4bed11d5d96411920f0451f80da.7z.001".into(),
                    size: 524_288_000,
                },
                RemotePart {
                    name: "c383d4bed11d5d96411920f0451f80da.7z.002".into(),
                    size: 12_345,
                },
            ]
        );
    }

    #[test]
    fn listing_without_pre_is_empty() {
        assert!(parse_listing("<html><body>403 Forbidden</body></html>").is_empty());
    }

    #[test]
    fn part_names_must_be_numbered_volumes() {
        assert!(is_part_name("0bee89b07a248e27c83fc3d5951213c1.7z.001"));
        assert!(!is_part_name("meta.7z"));
        assert!(!is_part_name("ABC.7z.001"));
        assert!(!is_part_name("abc.7z.x1"));
    }

    #[test]
    fn urls_join_with_single_slash() {
        assert_eq!(join_url("https://m.test/", "abc"), "https://m.test/abc");
        assert_eq!(join_url("https://m.test", "/abc"), "https://m.test/abc");
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    const BODY: &[u8] = b"0123456789";

    #[tokio::test]
    async fn partial_file_resumes_from_its_length() {
        let server = TestServer::start(|req| match req.range.as_deref() {
            Some("bytes=4-") => Reply::new(206, &BODY[4..]),
            _ => Reply::ok(BODY),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.7z.001");
        std::fs::write(&dest, &BODY[..4]).unwrap();

        let (_tx, cancel) = watch::channel(false);
        let mut seen = Vec::new();
        let len = direct_fetcher()
            .download_file(&server.url("/part"), &dest, Some(10), &cancel, |n| {
                seen.push(n)
            })
            .await
            .unwrap();

        assert_eq!(len, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert_eq!(server.requests()[0].range.as_deref(), Some("bytes=4-"));
        assert_eq!(seen.first(), Some(&4));
        assert_eq!(seen.last(), Some(&10));
    }

    #[tokio::test]
    async fn ignored_range_rewrites_file_from_scratch() {
        let server = TestServer::start(|_| Reply::ok(BODY)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.7z.001");
        std::fs::write(&dest, b"stale").unwrap();

        let (_tx, cancel) = watch::channel(false);
        let len = direct_fetcher()
            .download_file(&server.url("/part"), &dest, Some(10), &cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(len, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert_eq!(server.requests()[0].range.as_deref(), Some("bytes=5-"));
    }

    #[tokio::test]
    async fn unsatisfiable_range_keeps_complete_file() {
        let server = TestServer::start(|_| Reply::new(416, Vec::new())).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("meta.7z");
        std::fs::write(&dest, BODY).unwrap();

        let (_tx, cancel) = watch::channel(false);
        let len = direct_fetcher()
            .download_file(&server.url("/meta.7z"), &dest, None, &cancel, |_| {})
            .await
            .unwrap();
        assert_eq!(len, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn complete_file_is_not_requested_again() {
        let server = TestServer::start(|_| Reply::ok(BODY)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.7z.001");
        std::fs::write(&dest, BODY).unwrap();

        let (_tx, cancel) = watch::channel(false);
        let len = direct_fetcher()
            .download_file(&server.url("/part"), &dest, Some(10), &cancel, |_| {})
            .await
            .unwrap();
        assert_eq!(len, 10);
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn cancel_between_chunks_keeps_partial_file() {
        let server = TestServer::start(|_| Reply::ok(BODY).stalling_after(3)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.7z.001");

        let (tx, cancel) = watch::channel(false);
        let result = direct_fetcher()
            .download_file(&server.url("/part"), &dest, Some(10), &cancel, |n| {
                if n > 0 {
                    let _ = tx.send(true);
                }
            })
            .await;

        assert!(matches!(result, Err(FetchError::Aborted)));
        assert_eq!(std::fs::read(&dest).unwrap(), &BODY[..3]);
    }

    #[tokio::test]
    async fn parts_are_fetched_with_aggregate_progress() {
        let id = "0bee89b07a248e27c83fc3d5951213c1";
        let listing = format!(
            "<html><body><pre><a href=\"../\">../</a>\n\
             <a href=\"{id}.7z.001\">{id}.7z.001</a>   18-Dec-2023 01:46   6\n\
             <a href=\"{id}.7z.002\">{id}.7z.002</a>   18-Dec-2023 01:46   4\n\
             </pre></body></html>"
        );
        let server = TestServer::start(move |req| {
            if req.path == format!("/{id}/") {
                Reply::ok(listing.clone())
            } else if req.path.ends_with(".7z.001") {
                Reply::ok(&BODY[..6])
            } else if req.path.ends_with(".7z.002") {
                Reply::ok(&BODY[6..])
            } else {
                Reply::new(404, Vec::new())
            }
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let request = FetchRequest {
            base_url: server.url("/"),
            content_id: id.to_owned(),
            dest_dir: dir.path().join(id),
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |received, total| {
            sink.lock().unwrap().push((received, total));
        });
        let (_tx, cancel) = watch::channel(false);
        direct_fetcher()
            .fetch_parts(&request, &progress, &cancel)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(request.dest_dir.join(format!("{id}.7z.001"))).unwrap(),
            &BODY[..6]
        );
        assert_eq!(
            std::fs::read(request.dest_dir.join(format!("{id}.7z.002"))).unwrap(),
            &BODY[6..]
        );
        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|&(_, total)| total == 10));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last(), Some(&(10, 10)));
    }
}

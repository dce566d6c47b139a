//! Fetching from remote repositories into their cache.

use std::io;
use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::StatusCode;
use tokio_util::io::StreamReader;
use tracing::{instrument, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use maven_compat::checksum_file::ChecksumKind;
use maven_compat::timestamp;
use quarry_store::{
    epoch_millis_now, Error, HexDigest, ItemSnapshot, ItemStore, RelPath, RepoPath, Wait,
};

use crate::registry::{RemoteSettings, Repository};

pub(crate) struct RemoteFetcher {
    store: Arc<ItemStore>,
    http_client: reqwest::Client,
}

impl RemoteFetcher {
    pub fn new(store: Arc<ItemStore>) -> Self {
        RemoteFetcher {
            store,
            http_client: reqwest::Client::new(),
        }
    }

    /// Downloads `path` from the remote repository into its cache and
    /// returns the committed snapshot. `Ok(None)` covers everything that
    /// counts as a plain miss for this candidate: 404 and 403 answers,
    /// network failures, and content the remote's checksum policy rejects.
    #[instrument(skip_all, fields(repo = repo.key(), path = %path, indicatif.pb_show = 1))]
    pub async fn fetch(
        &self,
        repo: &Repository,
        settings: &RemoteSettings,
        path: &RelPath,
    ) -> Result<Option<Arc<ItemSnapshot>>, Error> {
        let url = join_url(&settings.url, path.as_str())?;

        let resp = match self
            .http_client
            .get(url.clone())
            .timeout(settings.socket_timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!(url = %url, "remote fetch timed out");
                return Ok(None);
            }
            Err(e) => {
                warn!(e = %e.without_url(), "remote fetch failed");
                return Ok(None);
            }
        };

        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !resp.status().is_success() {
            warn!(status = %resp.status(), url = %url, "remote answered with an error");
            return Ok(None);
        }

        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(timestamp::parse_http_date)
            .unwrap_or_else(epoch_millis_now);

        // Declared checksums ride along as sidecar files; fetched first so
        // the policy check sees them, and before the write lock is taken.
        let mut declared = [None, None];
        for (slot, kind) in declared.iter_mut().zip(ChecksumKind::ALL) {
            *slot = self.fetch_checksum(settings, path, kind).await;
        }

        let cache_path = RepoPath::new(&repo.cache_key(), path.clone())?;
        let mut handle = self.store.write(&cache_path, Wait::Normal).await?;
        for (digest, kind) in declared.into_iter().zip(ChecksumKind::ALL) {
            if let Some(digest) = digest {
                handle.draft_mut().checksums_mut().set_original(kind, digest);
            }
        }

        let span = Span::current();
        span.pb_set_style(&quarry_tracing::PB_TRANSFER_STYLE);
        if let Some(length) = resp.content_length() {
            span.pb_set_length(length);
        }
        span.pb_start();

        let data = StreamReader::new(
            resp.bytes_stream()
                .inspect_ok(move |chunk| span.pb_inc(chunk.len() as u64))
                .map_err(|e| {
                    let e = e.without_url();
                    warn!(e = %e, "failed to get response body");
                    io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())
                }),
        );

        match self
            .store
            .fill_content(&mut handle, repo.checksum_policy(), last_modified, data)
            .await
        {
            Ok(()) => {}
            Err(Error::ChecksumPolicy(e)) => {
                warn!(e = %e, url = %url, "remote content failed checksum verification");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        self.store.commit(handle).await.map(Some)
    }

    /// Best-effort fetch of one checksum sidecar. Missing sidecars are
    /// routine; only garbage gets a warning.
    async fn fetch_checksum(
        &self,
        settings: &RemoteSettings,
        path: &RelPath,
        kind: ChecksumKind,
    ) -> Option<HexDigest> {
        let sidecar = format!("{}.{}", path.as_str(), kind.ext());
        let url = join_url(&settings.url, &sidecar).ok()?;

        let resp = self
            .http_client
            .get(url.clone())
            .timeout(settings.socket_timeout)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }

        let text = resp.text().await.ok()?;
        match HexDigest::parse(&text, kind) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(e = %e, url = %url, "remote checksum sidecar is unusable");
                None
            }
        }
    }
}

fn join_url(base: &Url, path: &str) -> Result<Url, Error> {
    base.join(path).map_err(|e| {
        warn!(e = %e, path, "unable to join url");
        Error::InvalidRequest(format!("unable to join url: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_keeps_the_base_path() {
        let base: Url = "https://repo1.maven.org/maven2/".parse().unwrap();
        assert_eq!(
            "https://repo1.maven.org/maven2/com/example/widget/1.0/widget-1.0.jar",
            join_url(&base, "com/example/widget/1.0/widget-1.0.jar")
                .unwrap()
                .as_str()
        );
    }
}

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONNECTION, USER_AGENT};
use tokio::sync::mpsc;
use url::Url;

use super::sampler::{log_transfer_error, run_pool, TransferProgress, TransferResult};
use super::{SpeedTest, TransferOptions, BROWSER_UA};
use crate::counter::Counter;
use crate::error::Result;
use crate::server::{Server, ServerType};

/// Resolves the download URL, carrying the token as `key` for GlobalSpeed.
pub fn download_url(server: &Server, token: &str) -> Result<Url> {
    let mut url = Url::parse(&server.download_url())?;
    if server.server_type == ServerType::GlobalSpeed {
        url.query_pairs_mut().append_pair("key", token);
    }
    Ok(url)
}

fn download_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers
}

impl SpeedTest {
    /// Saturates the downlink with `concurrency` parallel GETs for
    /// `duration` and reports the averaged rate.
    pub async fn download(
        &self,
        server: &Server,
        options: &TransferOptions,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<TransferResult> {
        let url = download_url(server, &options.token).map_err(|err| {
            debug!("Failed when creating HTTP request: {}", err);
            err
        })?;
        let headers = download_headers();

        let mut counter = Counter::new();
        counter.set_mebi(options.use_mebi);
        counter.set_use_bytes(options.use_bytes);
        let counter = Arc::new(counter);

        let client = self.client.clone();
        let transfer = || {
            let request = client.get(url.clone()).headers(headers.clone());
            let counter = Arc::clone(&counter);
            async move {
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) => {
                        log_transfer_error("Failed when making HTTP request", &err);
                        return false;
                    }
                };

                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(chunk) => counter.add(chunk.len() as u64),
                        Err(err) => {
                            log_transfer_error("Failed when reading HTTP response", &err);
                            break;
                        }
                    }
                }
                true
            }
        };

        let progress = if options.silent { None } else { progress };
        let result = run_pool(
            Arc::clone(&counter),
            options.concurrency,
            options.duration,
            progress,
            transfer,
        )
        .await;

        if !options.silent {
            if options.use_bytes {
                info!(
                    "Download: {} (data used: {})",
                    counter.avg_humanize(),
                    counter.bytes_humanize()
                );
            } else {
                info!(
                    "Download: {:.2} Mbps (data used: {:.2} MB)",
                    result.avg_mbps,
                    counter.mbytes()
                );
            }
        }

        Ok(result)
    }
}

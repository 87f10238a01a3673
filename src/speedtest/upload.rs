use std::sync::Arc;

use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, USER_AGENT};
use tokio::sync::mpsc;
use url::Url;

use super::sampler::{log_transfer_error, run_pool, TransferProgress, TransferResult};
use super::{SpeedTest, TransferOptions, ANDROID_UA};
use crate::counter::Counter;
use crate::error::Result;
use crate::server::{Server, ServerType};

const MULTIPART: &str = "multipart/form-data;boundary=00content0boundary00";
const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Headers for an upload request; the token travels as `Key` except for
/// WirelessSpeed servers, which take a plain form post.
pub fn upload_headers(server_type: ServerType, token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(ANDROID_UA));
    if server_type == ServerType::WirelessSpeed {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(URLENCODED));
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        headers.insert(HeaderName::from_static("charset"), HeaderValue::from_static("UTF-8"));
        headers.insert(HeaderName::from_static("key"), HeaderValue::from_str(token)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(MULTIPART));
    }
    Ok(headers)
}

impl SpeedTest {
    /// Saturates the uplink with `concurrency` parallel POSTs of
    /// `upload_size` random bytes for `duration`.
    pub async fn upload(
        &self,
        server: &Server,
        options: &TransferOptions,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<TransferResult> {
        let url = Url::parse(&server.upload_url()).map_err(|err| {
            debug!("Failed when creating HTTP request: {}", err);
            err
        })?;
        let headers = upload_headers(server.server_type, &options.token).map_err(|err| {
            debug!("Failed when creating HTTP request: {}", err);
            err
        })?;

        let mut counter = Counter::new();
        counter.set_mebi(options.use_mebi);
        counter.set_use_bytes(options.use_bytes);
        counter.set_upload_size(options.upload_size);
        if options.no_prealloc {
            info!("Pre-allocation is disabled, performance might be lower!");
            counter.use_random_stream();
        } else {
            counter.generate_blob();
        }
        let counter = Arc::new(counter);

        let client = self.client.clone();
        let transfer = || {
            let request = client
                .post(url.clone())
                .headers(headers.clone())
                .body(counter.upload_body());
            async move {
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) => {
                        log_transfer_error("Failed when making HTTP request", &err);
                        return false;
                    }
                };
                if let Err(err) = response.bytes().await {
                    log_transfer_error("Failed when reading HTTP response", &err);
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
                    "Upload: {} (data used: {})",
                    counter.avg_humanize(),
                    counter.bytes_humanize()
                );
            } else {
                info!(
                    "Upload: {:.2} Mbps (data used: {:.2} MB)",
                    result.avg_mbps,
                    counter.mbytes()
                );
            }
        }

        Ok(result)
    }
}

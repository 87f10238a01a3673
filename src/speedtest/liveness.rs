use log::debug;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use url::Url;

use super::{SpeedTest, ANDROID_UA};
use crate::server::Server;

impl SpeedTest {
    /// Checks the backend answers on its ping URL.
    ///
    /// Some dialects answer a bare ping with 403 while working fine, so both
    /// 200 and 403 count as up. Every failure collapses to `false`.
    pub async fn is_server_up(&self, server: &Server) -> bool {
        let url = match Url::parse(&server.ping_url()) {
            Ok(url) => url,
            Err(err) => {
                debug!("Failed when creating HTTP request: {}", err);
                return false;
            }
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, ANDROID_UA)
            .timeout(self.liveness_timeout)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if let Err(err) = response.bytes().await {
                    debug!("Failed when draining status response: {}", err);
                }
                status == StatusCode::OK || status == StatusCode::FORBIDDEN
            }
            Err(err) => {
                debug!("Error checking for server status: {}", err);
                false
            }
        }
    }
}

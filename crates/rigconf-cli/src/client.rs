use rigconf_core::service::{Ack, ConfigurationList, StartConfiguration, StopConfiguration};
use rigconf_core::ManagerStatus;
use rigconf_schema::Strictness;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Prefix of every error caused by the daemon not answering at all.
pub const UNREACHABLE: &str = "cannot reach rigconfd";

/// Blocking JSON client for the daemon's request surface.
pub struct Client {
    base: String,
    agent: ureq::Agent,
}

impl Client {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        Self {
            base: url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    fn decode<T: DeserializeOwned>(
        url: &str,
        resp: ureq::http::Response<ureq::Body>,
    ) -> Result<T, String> {
        let code = resp.status().as_u16();
        let body = resp
            .into_body()
            .read_to_string()
            .map_err(|e| format!("reading response from {url}: {e}"))?;
        if code != 200 {
            return Err(format!("HTTP {code} for {url}: {}", body.trim()));
        }
        serde_json::from_str(&body).map_err(|e| format!("invalid response from {url}: {e}"))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| format!("{UNREACHABLE} at {}: {e}", self.base))?;
        Self::decode(&url, resp)
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, String> {
        let url = self.url(path);
        let payload =
            serde_json::to_vec(body).map_err(|e| format!("JSON serialization failed: {e}"))?;
        tracing::debug!("POST {url} ({} bytes)", payload.len());
        let resp = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .send(&payload[..])
            .map_err(|e| format!("{UNREACHABLE} at {}: {e}", self.base))?;
        Self::decode(&url, resp)
    }

    pub fn start(&self, name: &str, strictness: Strictness) -> Result<Ack, String> {
        self.post(
            "start_configuration",
            &StartConfiguration {
                name: name.to_owned(),
                strictness,
            },
        )
    }

    pub fn stop(&self, strictness: Strictness) -> Result<Ack, String> {
        self.post("stop_configuration", &StopConfiguration { strictness })
    }

    pub fn list(&self) -> Result<ConfigurationList, String> {
        self.get("list_configurations")
    }

    pub fn update(&self) -> Result<Ack, String> {
        self.post("update_configurations", &serde_json::json!({}))
    }

    pub fn status(&self) -> Result<ManagerStatus, String> {
        self.get("status")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client = Client::new("http://127.0.0.1:8420/", Duration::from_secs(1));
        assert_eq!(client.url("status"), "http://127.0.0.1:8420/status");
    }

    #[test]
    fn unreachable_daemon_is_reported() {
        // Port 9 (discard) is not served by anything in the test environment.
        let client = Client::new("http://127.0.0.1:9", Duration::from_secs(1));
        let err = client.status().unwrap_err();
        assert!(err.starts_with(UNREACHABLE), "{err}");
    }
}

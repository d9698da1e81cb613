use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use crate::config::ApiConfig;
use crate::models::{ChannelSchema, MeterRecord, ReadingSet};
use super::{channel_parser, reading_parser, registry_parser, DataEasyError, MeterSource};

const REGISTRY_PATH: &str = "DB/REGISTRY_METER.dbs";

/// HTTP client for the text dumps served by the DataEasy
pub struct DataEasyClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl DataEasyClient {
    pub fn new(config: &ApiConfig) -> Result<Self, DataEasyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        return Ok(DataEasyClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        });
    }

    pub fn url(&self, path: &str) -> String {
        return format!("{}/{}", self.base_url, path);
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, String), reqwest::Error> {
        let url = self.url(path);
        debug!("GET {url}");

        let response = self.http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "text/plain")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        return Ok((status, body));
    }
}

#[async_trait]
impl MeterSource for DataEasyClient {
    async fn get_meters(&self) -> Result<Vec<MeterRecord>, DataEasyError> {
        let (status, body) = self.get(REGISTRY_PATH).await
            .map_err(|e| DataEasyError::RegistryFetch(e.to_string()))?;
        if !status.is_success() {
            return Err(DataEasyError::RegistryFetch(format!("HTTP status {status}")));
        }
        return registry_parser::parse_registry(&body);
    }

    async fn get_meter_channels(&self, meter: &MeterRecord) -> Result<ChannelSchema, DataEasyError> {
        let path = format!("{}/alldb.dbs", meter.device_path());
        let (status, body) = self.get(&path).await
            .map_err(|e| DataEasyError::ChannelFetch(e.to_string()))?;
        if status == StatusCode::NOT_FOUND {
            return Err(DataEasyError::ChannelFetch(format!("{path} not found")));
        }
        if !status.is_success() {
            return Err(DataEasyError::ChannelFetch(format!("HTTP status {status}")));
        }
        return channel_parser::parse_channels(&body);
    }

    async fn get_last_meter_readings(&self, meter: &MeterRecord, channels: &ChannelSchema) -> Result<ReadingSet, DataEasyError> {
        let path = format!("{}/LOG/last.txt", meter.device_path());
        let (status, body) = self.get(&path).await
            .map_err(|e| DataEasyError::ReadingsFetch(e.to_string()))?;
        if !status.is_success() {
            return Err(DataEasyError::ReadingsFetch(format!("HTTP status {status}")));
        }
        return reading_parser::parse_readings(&body, channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_url_building() {
        let client = DataEasyClient::new(&config("http://192.168.1.20/")).unwrap();
        let meter = MeterRecord {
            id_device: "12345678".to_string(),
            manf_code: "CAL".to_string(),
            medium: "04".to_string(),
            version: "1A".to_string(),
            ..Default::default()
        };

        assert_eq!(client.url(REGISTRY_PATH), "http://192.168.1.20/DB/REGISTRY_METER.dbs");
        assert_eq!(
            client.url(&format!("{}/alldb.dbs", meter.device_path())),
            "http://192.168.1.20/DB/12345678-CAL041A/alldb.dbs"
        );
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_a_fetch_error() {
        /* nothing listens on the discard port */
        let client = DataEasyClient::new(&config("http://127.0.0.1:9")).unwrap();
        let result = client.get_meters().await;
        assert!(matches!(result, Err(DataEasyError::RegistryFetch(_))));
    }
}

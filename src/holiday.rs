use crate::error::{DigestError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Holiday collaborator contract: `holidays(country, date)`,
/// cached for the day.
#[async_trait]
pub trait HolidayProvider: Send + Sync {
    async fn holidays(&self, country: &str, date: NaiveDate) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
struct HolidayResponse {
    name: String,
}

pub struct HttpHolidayProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Mutex<HashMap<(String, NaiveDate), Vec<String>>>,
}

impl HttpHolidayProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HolidayProvider for HttpHolidayProvider {
    async fn holidays(&self, country: &str, date: NaiveDate) -> Result<Vec<String>> {
        let key = (country.to_string(), date);
        {
            let cache = self.cache.lock().await;
            if let Some(names) = cache.get(&key) {
                return Ok(names.clone());
            }
        }

        let mut req = self
            .client
            .get(format!("{}/holidays", self.base_url))
            .query(&[("country", country), ("date", &date.to_string())]);
        if let Some(api_key) = &self.api_key {
            req = req.query(&[("key", api_key.as_str())]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DigestError::UpstreamTransient(format!("holiday: {e}")))?;
        if !resp.status().is_success() {
            return Err(DigestError::UpstreamUnavailable(format!(
                "holiday: HTTP {}",
                resp.status()
            )));
        }
        let parsed: Vec<HolidayResponse> = resp
            .json()
            .await
            .map_err(|e| DigestError::UpstreamUnavailable(format!("holiday: bad payload: {e}")))?;

        let names: Vec<String> = parsed.into_iter().map(|h| h.name).collect();
        let mut cache = self.cache.lock().await;
        cache.insert(key, names.clone());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHoliday(Vec<String>);

    #[async_trait]
    impl HolidayProvider for FakeHoliday {
        async fn holidays(&self, _country: &str, _date: NaiveDate) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fake_provider_returns_configured_holidays() {
        let fake = FakeHoliday(vec!["Independence Day".into()]);
        let names = fake.holidays("BD", NaiveDate::from_ymd_opt(2026, 3, 26).unwrap()).await.unwrap();
        assert_eq!(names, vec!["Independence Day".to_string()]);
    }
}

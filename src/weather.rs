use crate::error::{DigestError, Result};
use crate::model::WeatherSnapshot;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Weather collaborator contract: `current(location)` with a
/// 30-minute result cache, implemented as a trait so the Assembler can be
/// tested against a fake.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, location: &str) -> Result<WeatherSnapshot>;
}

#[derive(Deserialize)]
struct WeatherResponse {
    temp_c_min: f64,
    temp_c_max: f64,
    condition: String,
    aqi: u32,
    uv: f64,
}

pub struct HttpWeatherProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Mutex<HashMap<String, (Instant, WeatherSnapshot)>>,
}

impl HttpWeatherProvider {
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
impl WeatherProvider for HttpWeatherProvider {
    async fn current(&self, location: &str) -> Result<WeatherSnapshot> {
        {
            let cache = self.cache.lock().await;
            if let Some((at, snap)) = cache.get(location) {
                if at.elapsed() < CACHE_TTL {
                    return Ok(snap.clone());
                }
            }
        }

        let mut req = self
            .client
            .get(format!("{}/current", self.base_url))
            .query(&[("location", location)]);
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key.as_str())]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DigestError::UpstreamTransient(format!("weather: {e}")))?;
        if !resp.status().is_success() {
            return Err(DigestError::UpstreamUnavailable(format!(
                "weather: HTTP {}",
                resp.status()
            )));
        }
        let parsed: WeatherResponse = resp
            .json()
            .await
            .map_err(|e| DigestError::UpstreamUnavailable(format!("weather: bad payload: {e}")))?;

        let snap = WeatherSnapshot {
            temp_c_min: parsed.temp_c_min,
            temp_c_max: parsed.temp_c_max,
            condition: parsed.condition,
            aqi: parsed.aqi,
            uv: parsed.uv,
        };

        let mut cache = self.cache.lock().await;
        cache.insert(location.to_string(), (Instant::now(), snap.clone()));
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeWeather(WeatherSnapshot);

    #[async_trait]
    impl WeatherProvider for FakeWeather {
        async fn current(&self, _location: &str) -> Result<WeatherSnapshot> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fake_provider_returns_fixed_snapshot() {
        let fake = FakeWeather(WeatherSnapshot {
            temp_c_min: 20.0,
            temp_c_max: 28.0,
            condition: "Partly cloudy".into(),
            aqi: 80,
            uv: 6.0,
        });
        let snap = fake.current("Dhaka").await.unwrap();
        assert_eq!(snap.condition, "Partly cloudy");
    }
}

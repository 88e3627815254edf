use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use super::MarketData;
use crate::error::EngineError;
use crate::models::{Candle, Timeframe};
use crate::Result;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_RPM: u32 = 600;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Public REST market data client (Binance spot API layout)
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

impl BinanceClient {
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://api.binance.com"
    /// * `requests_per_minute` - Client-side request budget
    pub fn new(base_url: impl Into<String>, requests_per_minute: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .or(NonZeroU32::new(DEFAULT_RPM))
            .ok_or_else(|| EngineError::MarketData("invalid rate limit".to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
        })
    }

    /// Rate-limited GET with retry on 429/5xx and transport errors
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = Some(EngineError::MarketData(format!(
                            "{} returned {}",
                            path, status
                        )));
                    } else {
                        return Ok(response);
                    }
                }
                Err(e) => last_error = Some(EngineError::Http(e)),
            }

            if attempt < MAX_RETRIES {
                let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                tracing::warn!(
                    path,
                    attempt,
                    backoff_ms,
                    "Market data request failed, retrying"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| EngineError::MarketData("all retry attempts failed".to_string())))
    }
}

fn parse_number(value: &serde_json::Value) -> Result<f64> {
    match value {
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| EngineError::MarketData(format!("bad number '{}'", s))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::MarketData(format!("bad number {}", n))),
        other => Err(EngineError::MarketData(format!("unexpected value {}", other))),
    }
}

/// Kline row: [open_time, open, high, low, close, volume, close_time, ...]
fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(EngineError::MarketData("short kline row".to_string()));
    }
    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| EngineError::MarketData("kline without open time".to_string()))?;
    let timestamp = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| EngineError::MarketData(format!("bad kline time {}", open_time)))?;

    Ok(Candle {
        timestamp,
        open: parse_number(&row[1])?,
        high: parse_number(&row[2])?,
        low: parse_number(&row[3])?,
        close: parse_number(&row[4])?,
        volume: parse_number(&row[5])?,
    })
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        let response = self
            .get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            tracing::debug!(symbol, "No ticker for symbol");
            return Ok(None);
        }

        let ticker: TickerPrice = response.error_for_status()?.json().await?;
        let price = ticker
            .price
            .parse::<f64>()
            .map_err(|_| EngineError::MarketData(format!("bad price '{}'", ticker.price)))?;

        Ok(Some(price))
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?
            .error_for_status()?
            .json()
            .await?;

        // API answers oldest first
        let mut candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();

        tracing::debug!(symbol, timeframe = %timeframe, count = candles.len(), "Fetched candles");
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_get_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol":"BTCUSDT","price":"95000.50"}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        let price = client.get_price("BTCUSDT").await.unwrap();

        assert_eq!(price, Some(95000.50));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_has_no_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        assert_eq!(client.get_price("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_candles_newest_first() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "15m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    [1700000000000,"109500.0","109800.0","109000.0","109300.0","12.5",1700000899999,"0",10,"0","0","0"],
                    [1700000900000,"109300.0","109400.0","108700.0","108900.0","8.0",1700001799999,"0",7,"0","0","0"]
                ]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        let candles = client
            .get_candles("BTCUSDT", Timeframe::M15, 2)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 108900.0);
        assert_eq!(candles[1].close, 109300.0);
        assert_eq!(candles[1].low, 109000.0);
        assert!(candles[0].timestamp > candles[1].timestamp);
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row = vec![serde_json::json!(1700000000000i64), serde_json::json!("1.0")];
        assert!(parse_kline(&row).is_err());
    }
}

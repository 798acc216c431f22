use super::{BarSource, SourceError};
use crate::{Bar, SeriesKey, Symbol, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::{env, time::Duration};

const DEFAULT_ENDPOINT: &str = "https://api.kucoin.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Kucoin {
    client: reqwest::Client,
    endpoint: String,
}

impl Kucoin {
    pub fn new() -> Self {
        let endpoint = env::var("KUCOIN_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());

        Kucoin {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Could not build the HTTP client."),
            endpoint,
        }
    }

    async fn request_candles(
        &self,
        key: SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        let url = format!("{}/api/v1/market/candles", self.endpoint);
        let params = [
            ("type", interval_code(key.timeframe).to_owned()),
            ("symbol", self.format_symbol(key.symbol)),
            ("startAt", start.timestamp().to_string()),
            ("endAt", end.timestamp().to_string()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|_| SourceError::Network)?;
        if !response.status().is_success() {
            log::warn!(
                "KuCoin answered with status {} for {}.",
                response.status(),
                key
            );
            return Err(SourceError::Network);
        }
        let body = response.text().await.map_err(|_| SourceError::Network)?;

        decode_candles(&body)
    }
}

#[async_trait]
impl BarSource for Kucoin {
    const NAME: &'static str = "KuCoin";

    fn format_symbol(&self, symbol: Symbol) -> String {
        symbol.as_str().replace('/', "-")
    }

    async fn fetch_latest(&self, key: SeriesKey) -> Result<Option<Bar>, SourceError> {
        // Two buckets of lookback so a just-opened bucket is always covered.
        let end = Utc::now();
        let start = end - key.timeframe.duration() * 2;
        let bars = self.request_candles(key, start, end).await?;

        Ok(bars.into_iter().last())
    }

    async fn fetch_window(&self, key: SeriesKey, count: usize) -> Result<Vec<Bar>, SourceError> {
        let end = Utc::now();
        let start = end - key.timeframe.duration() * (count as i32 + 2);
        let mut bars = self.request_candles(key, start, end).await?;

        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }
}

fn interval_code(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1min",
        Timeframe::M3 => "3min",
        Timeframe::M5 => "5min",
        Timeframe::M15 => "15min",
        Timeframe::M30 => "30min",
        Timeframe::H1 => "1hour",
        Timeframe::H2 => "2hour",
        Timeframe::H4 => "4hour",
        Timeframe::H6 => "6hour",
        Timeframe::H8 => "8hour",
        Timeframe::H12 => "12hour",
        Timeframe::D1 => "1day",
        Timeframe::W1 => "1week",
    }
}

#[derive(Deserialize)]
struct CandleResponse {
    code: String,
    #[serde(default)]
    data: Vec<Vec<String>>,
    msg: Option<String>,
}

/// Decode a candles response body into bars, oldest first.
fn decode_candles(body: &str) -> Result<Vec<Bar>, SourceError> {
    let response: CandleResponse = serde_json::from_str(body).map_err(|_| SourceError::Api)?;
    if response.code != "200000" {
        log::warn!(
            "KuCoin rejected a candles request: code {}, message: {}.",
            response.code,
            response.msg.as_deref().unwrap_or("none")
        );
        return Err(SourceError::Api);
    }

    let mut bars = response
        .data
        .iter()
        .map(|row| parse_row(row))
        .collect::<Result<Vec<Bar>, SourceError>>()?;
    // KuCoin serves rows newest first.
    bars.reverse();

    Ok(bars)
}

// A row is [time, open, close, high, low, volume, turnover], every entry a
// string, the time in seconds.
fn parse_row(row: &[String]) -> Result<Bar, SourceError> {
    if row.len() < 6 {
        return Err(SourceError::Api);
    }
    let seconds: i64 = row[0].parse().map_err(|_| SourceError::Api)?;
    let open_time = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .ok_or(SourceError::Api)?;

    Ok(Bar {
        open_time,
        open: parse_decimal(&row[1])?,
        high: parse_decimal(&row[3])?,
        low: parse_decimal(&row[4])?,
        close: parse_decimal(&row[2])?,
        volume: parse_decimal(&row[5])?,
    })
}

fn parse_decimal(value: &str) -> Result<Decimal, SourceError> {
    Decimal::from_str(value).map_err(|_| SourceError::Api)
}

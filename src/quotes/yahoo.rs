//! Yahoo Finance Quote Provider
//!
//! Supports:
//! - Latest price
//! - Daily history
//! - Adjusted close (dividend adjusted)

use super::{LatestQuote, PriceFeed, Quote, QuoteError};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use tokio::runtime::Runtime;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Blocking Yahoo feed. Owns a current-thread runtime for the async client.
pub struct YahooFeed {
    client: reqwest::Client,
    runtime: Runtime,
    adjusted: bool,
}

impl YahooFeed {
    pub fn new(adjusted: bool) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to start runtime: {}", e))?;
        Ok(Self {
            client: create_client()?,
            runtime,
            adjusted,
        })
    }

    pub fn is_adjusted(&self) -> bool {
        self.adjusted
    }
}

impl PriceFeed for YahooFeed {
    fn latest(&self, symbol: &str) -> std::result::Result<LatestQuote, QuoteError> {
        self.runtime.block_on(fetch_quote(&self.client, symbol))
    }

    fn history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<Vec<Quote>, QuoteError> {
        self.runtime
            .block_on(fetch_historical(&self.client, symbol, from, to, self.adjusted))
    }
}

/// Build the HTTP client with browser headers
fn create_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

/// Fetch the current price
pub async fn fetch_quote(
    client: &reqwest::Client,
    symbol: &str,
) -> std::result::Result<LatestQuote, QuoteError> {
    let url = format!("{}?interval=1d&range=1d", symbol_url(symbol));
    log::debug!("Fetching Yahoo quote for {} from {}", symbol, url);

    let data = get_chart(client, symbol, &url).await?;
    parse_latest_quote(symbol, &data)
}

/// Fetch daily history between two dates, inclusive
pub async fn fetch_historical(
    client: &reqwest::Client,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    adjusted: bool,
) -> std::result::Result<Vec<Quote>, QuoteError> {
    // Yahoo expects Unix timestamps
    let from_ts = from
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    let to_ts = to
        .and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);

    let url = format!(
        "{}?period1={}&period2={}&interval=1d&events=history",
        symbol_url(symbol),
        from_ts,
        to_ts
    );
    log::debug!("Fetching Yahoo history for {} from {}", symbol, url);

    let data = get_chart(client, symbol, &url).await?;
    let mut quotes = parse_historical_quotes(symbol, &data, adjusted)?;
    quotes.retain(|q| q.date >= from && q.date <= to);
    Ok(quotes)
}

async fn get_chart(
    client: &reqwest::Client,
    symbol: &str,
    url: &str,
) -> std::result::Result<serde_json::Value, QuoteError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| QuoteError::request(symbol, e.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(QuoteError::not_found(symbol, "Yahoo returned 404"));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::error!("Yahoo API error for {}: {} - {}", symbol, status, body);
        return Err(QuoteError::request(symbol, format!("HTTP {}", status)));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| QuoteError::parse(symbol, e.to_string()))?;

    check_chart_error(symbol, &data)?;
    Ok(data)
}

/// Yahoo reports unknown symbols inside a 200 body as `chart.error`
fn check_chart_error(symbol: &str, data: &serde_json::Value) -> std::result::Result<(), QuoteError> {
    if let Some(error) = data.get("chart").and_then(|c| c.get("error")).and_then(|e| e.as_object()) {
        let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let desc = error.get("description").and_then(|d| d.as_str()).unwrap_or("No description");
        log::error!("Yahoo API returned error for {}: {} - {}", symbol, code, desc);
        if code.eq_ignore_ascii_case("Not Found") {
            return Err(QuoteError::not_found(symbol, desc));
        }
        return Err(QuoteError::request(symbol, format!("{} - {}", code, desc)));
    }
    Ok(())
}

/// Encoded chart URL for a symbol
fn symbol_url(symbol: &str) -> String {
    let encoded = urlencoding::encode(symbol);
    format!("{}/{}", BASE_URL, encoded)
}

fn chart_result<'a>(
    symbol: &str,
    data: &'a serde_json::Value,
) -> std::result::Result<&'a serde_json::Value, QuoteError> {
    data.get("chart")
        .and_then(|c| c.get("result"))
        .and_then(|r| r.get(0))
        .ok_or_else(|| QuoteError::not_found(symbol, "empty chart result"))
}

/// Parse the latest quote out of a chart response
fn parse_latest_quote(
    symbol: &str,
    data: &serde_json::Value,
) -> std::result::Result<LatestQuote, QuoteError> {
    let chart = chart_result(symbol, data)?;

    let meta = chart
        .get("meta")
        .ok_or_else(|| QuoteError::parse(symbol, "missing meta"))?;

    let quote_data = chart
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0));

    let last_of = |field: &str| {
        quote_data
            .and_then(|q| q.get(field))
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.iter().rev().find(|v| !v.is_null()))
    };

    // Current price, falling back to the last close in the series
    let close = meta
        .get("regularMarketPrice")
        .and_then(|p| p.as_f64())
        .or_else(|| last_of("close").and_then(|v| v.as_f64()))
        .ok_or_else(|| QuoteError::parse(symbol, "missing close price"))?;

    let timestamp = meta
        .get("regularMarketTime")
        .and_then(|t| t.as_i64())
        .ok_or_else(|| QuoteError::parse(symbol, "missing timestamp"))?;

    let date = chrono::DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| QuoteError::parse(symbol, "invalid timestamp"))?
        .date_naive();

    let name = meta.get("shortName").and_then(|n| n.as_str()).map(String::from);
    let currency = meta.get("currency").and_then(|c| c.as_str()).map(String::from);

    Ok(LatestQuote {
        symbol: symbol.to_string(),
        name,
        currency,
        quote: Quote {
            date,
            close,
            high: last_of("high").and_then(|v| v.as_f64()),
            low: last_of("low").and_then(|v| v.as_f64()),
            open: last_of("open").and_then(|v| v.as_f64()),
            volume: last_of("volume").and_then(|v| v.as_i64()),
        },
    })
}

/// Parse daily quotes out of a chart response
fn parse_historical_quotes(
    symbol: &str,
    data: &serde_json::Value,
    adjusted: bool,
) -> std::result::Result<Vec<Quote>, QuoteError> {
    let chart = chart_result(symbol, data)?;

    // No trading days in range: Yahoo omits the timestamp array entirely
    let timestamps = match chart.get("timestamp").and_then(|t| t.as_array()) {
        Some(ts) => ts,
        None => return Ok(Vec::new()),
    };

    let quote_data = chart
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0))
        .ok_or_else(|| QuoteError::parse(symbol, "missing quote data"))?;

    let adj_close = if adjusted {
        chart
            .get("indicators")
            .and_then(|i| i.get("adjclose"))
            .and_then(|a| a.get(0))
            .and_then(|a| a.get("adjclose"))
            .and_then(|c| c.as_array())
    } else {
        None
    };

    let closes = quote_data
        .get("close")
        .and_then(|c| c.as_array())
        .ok_or_else(|| QuoteError::parse(symbol, "missing close prices"))?;
    let highs = quote_data.get("high").and_then(|h| h.as_array());
    let lows = quote_data.get("low").and_then(|l| l.as_array());
    let opens = quote_data.get("open").and_then(|o| o.as_array());
    let volumes = quote_data.get("volume").and_then(|v| v.as_array());

    let mut quotes: Vec<Quote> = Vec::with_capacity(timestamps.len());

    for (i, ts) in timestamps.iter().enumerate() {
        let date = match ts.as_i64().and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
            Some(dt) => dt.date_naive(),
            None => continue,
        };

        let close = if adjusted {
            adj_close
                .and_then(|arr| arr.get(i))
                .and_then(|v| v.as_f64())
                .or_else(|| closes.get(i).and_then(|v| v.as_f64()))
        } else {
            closes.get(i).and_then(|v| v.as_f64())
        };

        let close = match close {
            Some(c) => c,
            None => continue, // halted day
        };

        // Intraday rows can repeat the last session's date
        if quotes.last().map(|q| q.date) == Some(date) {
            quotes.pop();
        }

        quotes.push(Quote {
            date,
            close,
            high: highs.and_then(|arr| arr.get(i)).and_then(|v| v.as_f64()),
            low: lows.and_then(|arr| arr.get(i)).and_then(|v| v.as_f64()),
            open: opens.and_then(|arr| arr.get(i)).and_then(|v| v.as_f64()),
            volume: volumes.and_then(|arr| arr.get(i)).and_then(|v| v.as_i64()),
        });
    }

    quotes.sort_by_key(|q| q.date);
    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_fixture() -> serde_json::Value {
        // 2024-01-02, 2024-01-03, 2024-01-04 at 14:30 UTC
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "USD",
                        "symbol": "AAPL",
                        "shortName": "Apple Inc.",
                        "regularMarketPrice": 181.91,
                        "regularMarketTime": 1704398400
                    },
                    "timestamp": [1704205800, 1704292200, 1704378600],
                    "indicators": {
                        "quote": [{
                            "close": [185.64, 184.25, null],
                            "open": [187.15, 184.22, 182.15],
                            "high": [188.44, 185.88, 183.09],
                            "low": [183.89, 183.43, 180.88],
                            "volume": [82488700, 58414500, 71983600]
                        }],
                        "adjclose": [{
                            "adjclose": [184.73, 183.35, 181.02]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_parse_latest_quote() {
        let latest = parse_latest_quote("AAPL", &chart_fixture()).unwrap();
        assert_eq!(latest.symbol, "AAPL");
        assert_eq!(latest.name.as_deref(), Some("Apple Inc."));
        assert_eq!(latest.currency.as_deref(), Some("USD"));
        assert_eq!(latest.quote.close, 181.91);
        assert_eq!(latest.quote.date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(latest.quote.volume, Some(71983600));
    }

    #[test]
    fn test_parse_historical_skips_missing_close() {
        let quotes = parse_historical_quotes("AAPL", &chart_fixture(), false).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(quotes[1].close, 184.25);
    }

    #[test]
    fn test_parse_historical_adjusted() {
        let quotes = parse_historical_quotes("AAPL", &chart_fixture(), true).unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].close, 184.73);
        assert_eq!(quotes[2].close, 181.02);
    }

    #[test]
    fn test_parse_historical_without_timestamps_is_empty() {
        let data = json!({
            "chart": {
                "result": [{ "meta": {}, "indicators": { "quote": [{}] } }],
                "error": null
            }
        });
        assert!(parse_historical_quotes("AAPL", &data, false).unwrap().is_empty());
    }

    #[test]
    fn test_chart_error_maps_to_not_found() {
        let data = json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
            }
        });
        let err = check_chart_error("XXXX", &data).unwrap_err();
        assert!(matches!(err, QuoteError::SymbolNotFound { .. }));
        assert_eq!(err.symbol(), "XXXX");
    }

    #[test]
    fn test_symbol_url_is_encoded() {
        assert_eq!(symbol_url("^GSPC"), format!("{}/%5EGSPC", BASE_URL));
    }
}

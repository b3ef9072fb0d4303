//! Local history cache
//!
//! Stores daily closes per symbol in SQLite together with the date range
//! already fetched, so repeated optimizations over the same window do not
//! hit the remote provider again. Rows are keyed by the provider name as well,
//! so switching providers on the same database never mixes their series.
//! Latest quotes are always passed through.

use super::{price_from_db, price_to_db, LatestQuote, PriceFeed, Quote, QuoteError};
use chrono::{Duration, Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

/// Coverage record for one cached symbol
#[derive(Debug, Clone, PartialEq)]
pub struct TickerCoverage {
    pub source: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub observations: i64,
    pub fetched_at: NaiveDate,
}

impl TickerCoverage {
    fn contains(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start <= from && self.end >= to
    }

    /// Ranges that overlap or touch can be merged into one coverage record.
    fn joins(&self, from: NaiveDate, to: NaiveDate) -> bool {
        from <= self.end + Duration::days(1) && to + Duration::days(1) >= self.start
    }
}

pub struct CachedFeed<F> {
    inner: F,
    conn: Connection,
    /// Provider name the cached rows belong to, e.g. `yahoo-adjusted`
    source: String,
}

impl<F: PriceFeed> CachedFeed<F> {
    pub fn new(inner: F, conn: Connection, source: &str) -> rusqlite::Result<Self> {
        init_cache_tables(&conn)?;
        Ok(Self {
            inner,
            conn,
            source: source.to_string(),
        })
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn coverage(&self, symbol: &str) -> rusqlite::Result<Option<TickerCoverage>> {
        self.conn
            .query_row(
                "SELECT source, symbol, start_date, end_date, observations, fetched_at
                 FROM ticker_data WHERE source = ?1 AND symbol = ?2",
                params![self.source, symbol],
                |row| {
                    Ok(TickerCoverage {
                        source: row.get(0)?,
                        symbol: row.get(1)?,
                        start: row.get(2)?,
                        end: row.get(3)?,
                        observations: row.get(4)?,
                        fetched_at: row.get(5)?,
                    })
                },
            )
            .optional()
    }

    fn load(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> rusqlite::Result<Vec<Quote>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, close FROM price_history
             WHERE source = ?1 AND symbol = ?2 AND date >= ?3 AND date <= ?4
             ORDER BY date",
        )?;
        let rows = stmt.query_map(params![self.source, symbol, from, to], |row| {
            let date: NaiveDate = row.get(0)?;
            let close: i64 = row.get(1)?;
            Ok(Quote::close_only(date, price_from_db(close)))
        })?;
        rows.collect()
    }

    fn store(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        quotes: &[Quote],
        previous: Option<&TickerCoverage>,
    ) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let (start, end) = match previous {
            Some(cov) if cov.joins(from, to) => (cov.start.min(from), cov.end.max(to)),
            Some(_) => {
                // Disjoint window: the old block is dropped rather than leaving a gap
                tx.execute(
                    "DELETE FROM price_history WHERE source = ?1 AND symbol = ?2",
                    params![self.source, symbol],
                )?;
                (from, to)
            }
            None => (from, to),
        };

        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO price_history (source, symbol, date, close)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for quote in quotes {
                insert.execute(params![self.source, symbol, quote.date, price_to_db(quote.close)])?;
            }
        }

        let observations: i64 = tx.query_row(
            "SELECT COUNT(*) FROM price_history WHERE source = ?1 AND symbol = ?2",
            params![self.source, symbol],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT OR REPLACE INTO ticker_data
                 (source, symbol, start_date, end_date, observations, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![self.source, symbol, start, end, observations, Local::now().date_naive()],
        )?;

        tx.commit()
    }
}

impl<F: PriceFeed> PriceFeed for CachedFeed<F> {
    fn latest(&self, symbol: &str) -> Result<LatestQuote, QuoteError> {
        self.inner.latest(symbol)
    }

    fn history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Quote>, QuoteError> {
        let previous = match self.coverage(symbol) {
            Ok(cov) => cov,
            Err(e) => {
                log::warn!("History cache unreadable for {}: {}", symbol, e);
                None
            }
        };

        if let Some(cov) = previous.as_ref().filter(|c| c.contains(from, to)) {
            match self.load(symbol, from, to) {
                Ok(quotes) => {
                    log::debug!(
                        "History cache hit for {} ({} to {}, cached {} to {})",
                        symbol,
                        from,
                        to,
                        cov.start,
                        cov.end
                    );
                    return Ok(quotes);
                }
                Err(e) => log::warn!("History cache read failed for {}: {}", symbol, e),
            }
        }

        let quotes = self.inner.history(symbol, from, to)?;
        if let Err(e) = self.store(symbol, from, to, &quotes, previous.as_ref()) {
            log::warn!("Could not cache history for {}: {}", symbol, e);
        }
        Ok(quotes)
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn init_cache_tables(conn: &Connection) -> rusqlite::Result<()> {
    // Caches written before rows carried their provider cannot be attributed;
    // they are rebuilt from the next fetches.
    let table_present = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'ticker_data'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if table_present && !column_exists(conn, "ticker_data", "source")? {
        log::info!("Migration: dropping history cache without provider column");
        conn.execute_batch("DROP TABLE IF EXISTS ticker_data; DROP TABLE IF EXISTS price_history;")?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ticker_data (
            source TEXT NOT NULL,
            symbol TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            observations INTEGER NOT NULL DEFAULT 0,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (source, symbol)
        );

        CREATE TABLE IF NOT EXISTS price_history (
            source TEXT NOT NULL,
            symbol TEXT NOT NULL,
            date TEXT NOT NULL,
            close INTEGER NOT NULL,
            PRIMARY KEY (source, symbol, date)
        );
        "#,
    )
}

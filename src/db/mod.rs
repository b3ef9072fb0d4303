//! Portfolio persistence
//!
//! SQLite schema, migrations and the [`Repository`] seam used by the
//! valuation engine and the optimization pipeline.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{Holding, Portfolio};

/// Sort order for [`Repository::list_portfolios`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortfolioOrder {
    #[default]
    Name,
    MarketValueDesc,
}

/// Transactional store of portfolios and their holdings.
pub trait Repository {
    /// Insert a new portfolio with market value equal to its cash.
    fn create_portfolio(&self, name: &str, cash: f64) -> Result<Portfolio>;

    /// Load a portfolio with its holdings, ordered by weight descending.
    fn find_portfolio(&self, name: &str) -> Result<Option<Portfolio>>;

    fn list_portfolios(&self, order: PortfolioOrder) -> Result<Vec<Portfolio>>;

    /// Write the portfolio row, every holding and the `removed` deletions in
    /// one transaction. Holdings without an id are inserted and get one.
    fn save_portfolio(&self, portfolio: &mut Portfolio, removed: &[i64]) -> Result<()>;

    /// Delete a portfolio and, by cascade, its holdings.
    fn delete_portfolio(&self, name: &str) -> Result<()>;

    fn get_portfolio(&self, name: &str) -> Result<Portfolio> {
        self.find_portfolio(name)?
            .ok_or_else(|| Error::PortfolioNotFound(name.to_string()))
    }
}

pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::InvalidInput(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        log::info!("Opened portfolio database at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn portfolio_row(row: &Row<'_>) -> rusqlite::Result<Portfolio> {
        let mut portfolio = Portfolio::new(row.get(0)?, row.get(1)?, row.get(2)?);
        portfolio.market_value = row.get(3)?;
        portfolio.invested = row.get(4)?;
        portfolio.total_profit = row.get(5)?;
        portfolio.profit_pct = row.get(6)?;
        portfolio.holding_count = row.get::<_, i64>(7)? as usize;
        Ok(portfolio)
    }

    fn holding_row(row: &Row<'_>) -> rusqlite::Result<Holding> {
        Ok(Holding {
            id: Some(row.get(0)?),
            portfolio_id: row.get(1)?,
            symbol: row.get(2)?,
            shares: row.get(3)?,
            purchase_date: row.get(4)?,
            purchase_price: row.get(5)?,
            last_price: row.get(6)?,
            market_value: row.get(7)?,
            total_profit: row.get(8)?,
            profit_pct: row.get(9)?,
            weight_pct: row.get(10)?,
            price_date: row.get::<_, Option<NaiveDate>>(11)?,
        })
    }

    fn load_holdings(&self, portfolio: &mut Portfolio) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT id, portfolio_id, symbol, shares, purchase_date, purchase_price,
                    last_price, market_value, total_profit, profit_pct, weight_pct, price_date
             FROM holding
             WHERE portfolio_id = ?1
             ORDER BY weight_pct DESC, id",
        )?;
        portfolio.holdings = stmt
            .query_map([portfolio.id], Self::holding_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(())
    }
}

const PORTFOLIO_COLUMNS: &str =
    "id, name, cash, market_value, invested, total_profit, profit_pct, holding_count";

impl Repository for SqliteRepository {
    fn create_portfolio(&self, name: &str, cash: f64) -> Result<Portfolio> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("portfolio name must not be empty".to_string()));
        }
        if !cash.is_finite() || cash < 0.0 {
            return Err(Error::InvalidInput(format!("cash must be non-negative, got {}", cash)));
        }

        let exists: Option<i64> = self
            .conn
            .query_row("SELECT id FROM portfolio WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(Error::NameCollision(name.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO portfolio (name, cash, market_value, created_at, updated_at)
             VALUES (?1, ?2, ?2, ?3, ?3)",
            params![name, cash, now],
        )?;

        let id = self.conn.last_insert_rowid();
        log::info!("Created portfolio '{}' (id {}) with cash {:.2}", name, id, cash);
        Ok(Portfolio::new(id, name.to_string(), cash))
    }

    fn find_portfolio(&self, name: &str) -> Result<Option<Portfolio>> {
        let sql = format!("SELECT {} FROM portfolio WHERE name = ?1", PORTFOLIO_COLUMNS);
        let found = self
            .conn
            .query_row(&sql, [name.trim()], Self::portfolio_row)
            .optional()?;

        match found {
            Some(mut portfolio) => {
                self.load_holdings(&mut portfolio)?;
                Ok(Some(portfolio))
            }
            None => Ok(None),
        }
    }

    fn list_portfolios(&self, order: PortfolioOrder) -> Result<Vec<Portfolio>> {
        let order_by = match order {
            PortfolioOrder::Name => "name",
            PortfolioOrder::MarketValueDesc => "market_value DESC, name",
        };
        let sql = format!("SELECT {} FROM portfolio ORDER BY {}", PORTFOLIO_COLUMNS, order_by);

        let mut portfolios = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], Self::portfolio_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for portfolio in &mut portfolios {
            self.load_holdings(portfolio)?;
        }
        Ok(portfolios)
    }

    fn save_portfolio(&self, portfolio: &mut Portfolio, removed: &[i64]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE portfolio
             SET cash = ?1, market_value = ?2, invested = ?3, total_profit = ?4,
                 profit_pct = ?5, holding_count = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                portfolio.cash,
                portfolio.market_value,
                portfolio.invested,
                portfolio.total_profit,
                portfolio.profit_pct,
                portfolio.holding_count as i64,
                Utc::now().to_rfc3339(),
                portfolio.id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::PortfolioNotFound(portfolio.name.clone()));
        }

        // Ids are handed out only after commit so a rollback leaves the value untouched
        let mut assigned: Vec<(usize, i64)> = Vec::new();
        for (idx, holding) in portfolio.holdings.iter().enumerate() {
            match holding.id {
                Some(id) => {
                    let n = tx.execute(
                        "UPDATE holding
                         SET symbol = ?1, shares = ?2, purchase_date = ?3, purchase_price = ?4,
                             last_price = ?5, market_value = ?6, total_profit = ?7,
                             profit_pct = ?8, weight_pct = ?9, price_date = ?10
                         WHERE id = ?11 AND portfolio_id = ?12",
                        params![
                            holding.symbol,
                            holding.shares,
                            holding.purchase_date,
                            holding.purchase_price,
                            holding.last_price,
                            holding.market_value,
                            holding.total_profit,
                            holding.profit_pct,
                            holding.weight_pct,
                            holding.price_date,
                            id,
                            portfolio.id,
                        ],
                    )?;
                    if n == 0 {
                        return Err(Error::HoldingNotFound(id));
                    }
                }
                None => {
                    tx.execute(
                        "INSERT INTO holding (portfolio_id, symbol, shares, purchase_date, purchase_price,
                                              last_price, market_value, total_profit, profit_pct,
                                              weight_pct, price_date)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        params![
                            portfolio.id,
                            holding.symbol,
                            holding.shares,
                            holding.purchase_date,
                            holding.purchase_price,
                            holding.last_price,
                            holding.market_value,
                            holding.total_profit,
                            holding.profit_pct,
                            holding.weight_pct,
                            holding.price_date,
                        ],
                    )?;
                    assigned.push((idx, tx.last_insert_rowid()));
                }
            }
        }

        for id in removed {
            tx.execute(
                "DELETE FROM holding WHERE id = ?1 AND portfolio_id = ?2",
                params![id, portfolio.id],
            )?;
        }

        tx.commit()?;

        for (idx, id) in assigned {
            portfolio.holdings[idx].id = Some(id);
        }
        log::debug!(
            "Saved portfolio '{}': {} holdings, {} removed",
            portfolio.name,
            portfolio.holdings.len(),
            removed.len()
        );
        Ok(())
    }

    fn delete_portfolio(&self, name: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM portfolio WHERE name = ?1", [name.trim()])?;
        if deleted == 0 {
            return Err(Error::PortfolioNotFound(name.to_string()));
        }
        log::info!("Deleted portfolio '{}'", name);
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS portfolio (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            cash REAL NOT NULL DEFAULT 0,
            market_value REAL NOT NULL DEFAULT 0,
            invested REAL NOT NULL DEFAULT 0,
            total_profit REAL NOT NULL DEFAULT 0,
            profit_pct REAL NOT NULL DEFAULT 0,
            holding_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS holding (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            portfolio_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            shares INTEGER NOT NULL DEFAULT 0,
            purchase_date TEXT NOT NULL,
            purchase_price REAL NOT NULL DEFAULT 0,
            last_price REAL NOT NULL DEFAULT 0,
            market_value REAL NOT NULL DEFAULT 0,
            total_profit REAL NOT NULL DEFAULT 0,
            profit_pct REAL NOT NULL DEFAULT 0,
            weight_pct REAL NOT NULL DEFAULT 0,
            price_date TEXT,
            FOREIGN KEY (portfolio_id) REFERENCES portfolio(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_holding_portfolio ON holding(portfolio_id);
        CREATE INDEX IF NOT EXISTS idx_holding_symbol ON holding(symbol);
        "#,
    )?;

    // Run migrations for existing databases
    run_migrations(conn)?;
    Ok(())
}

/// Add columns introduced after the first schema version
fn run_migrations(conn: &Connection) -> Result<()> {
    // Helper to check if a column exists in a table
    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let sql = format!("PRAGMA table_info({})", table);
        if let Ok(mut stmt) = conn.prepare(&sql) {
            if let Ok(rows) = stmt.query_map([], |row| {
                let name: String = row.get(1)?;
                Ok(name)
            }) {
                for name in rows.flatten() {
                    if name == column {
                        return true;
                    }
                }
            }
        }
        false
    }

    // Migration: Add updated_at column to portfolio if missing
    if !column_exists(conn, "portfolio", "updated_at") {
        conn.execute("ALTER TABLE portfolio ADD COLUMN updated_at TEXT", [])?;
        log::info!("Migration: Added updated_at column to portfolio");
    }

    // Migration: Add price_date column to holding (daily refresh stamp)
    if !column_exists(conn, "holding", "price_date") {
        conn.execute("ALTER TABLE holding ADD COLUMN price_date TEXT", [])?;
        log::info!("Migration: Added price_date column to holding");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewHolding;

    fn holding(portfolio: &Portfolio, symbol: &str, shares: i64, price: f64) -> Holding {
        Holding::new(
            portfolio.id(),
            &NewHolding {
                symbol: symbol.to_string(),
                shares,
                purchase_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                purchase_price: price,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let created = repo.create_portfolio("Tech", 1000.0).unwrap();
        assert_eq!(created.market_value(), 1000.0);

        let found = repo.find_portfolio("Tech").unwrap().unwrap();
        assert_eq!(found.id(), created.id());
        assert_eq!(found.cash(), 1000.0);
        assert_eq!(found.market_value(), 1000.0);
        assert!(found.holdings().is_empty());
        assert!(repo.find_portfolio("Other").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create_portfolio("Tech", 0.0).unwrap();
        let err = repo.create_portfolio("Tech", 5.0).unwrap_err();
        assert!(matches!(err, Error::NameCollision(ref n) if n == "Tech"));
    }

    #[test]
    fn test_save_assigns_ids_and_deletes_removed() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut portfolio = repo.create_portfolio("Tech", 0.0).unwrap();
        portfolio.holdings.push(holding(&portfolio, "AAPL", 10, 100.0));
        portfolio.holdings.push(holding(&portfolio, "MSFT", 5, 300.0));
        repo.save_portfolio(&mut portfolio, &[]).unwrap();

        let ids: Vec<i64> = portfolio.holdings().iter().map(|h| h.id().unwrap()).collect();
        assert_eq!(ids.len(), 2);

        let removed = portfolio.holdings.remove(0);
        repo.save_portfolio(&mut portfolio, &[removed.id().unwrap()]).unwrap();

        let reloaded = repo.get_portfolio("Tech").unwrap();
        assert_eq!(reloaded.holdings().len(), 1);
        assert_eq!(reloaded.holdings()[0].symbol(), "MSFT");
    }

    #[test]
    fn test_holdings_load_by_weight_descending() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut portfolio = repo.create_portfolio("Tech", 0.0).unwrap();
        let mut light = holding(&portfolio, "AAPL", 1, 1.0);
        light.weight_pct = 0.2;
        let mut heavy = holding(&portfolio, "MSFT", 1, 1.0);
        heavy.weight_pct = 0.8;
        portfolio.holdings = vec![light, heavy];
        repo.save_portfolio(&mut portfolio, &[]).unwrap();

        let reloaded = repo.get_portfolio("Tech").unwrap();
        let symbols: Vec<&str> = reloaded.holdings().iter().map(|h| h.symbol()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL"]);
    }

    #[test]
    fn test_list_orders() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create_portfolio("b", 10.0).unwrap();
        repo.create_portfolio("a", 5.0).unwrap();
        repo.create_portfolio("c", 20.0).unwrap();

        let by_name: Vec<String> = repo
            .list_portfolios(PortfolioOrder::Name)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(by_name, vec!["a", "b", "c"]);

        let by_value: Vec<String> = repo
            .list_portfolios(PortfolioOrder::MarketValueDesc)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(by_value, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_delete_cascades_to_holdings() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut portfolio = repo.create_portfolio("Tech", 0.0).unwrap();
        portfolio.holdings.push(holding(&portfolio, "AAPL", 1, 1.0));
        repo.save_portfolio(&mut portfolio, &[]).unwrap();

        repo.delete_portfolio("Tech").unwrap();
        let remaining: i64 = repo
            .connection()
            .query_row("SELECT COUNT(*) FROM holding", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(matches!(repo.delete_portfolio("Tech"), Err(Error::PortfolioNotFound(_))));
    }

    #[test]
    fn test_migration_adds_price_date_to_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE portfolio (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE,
                 cash REAL NOT NULL DEFAULT 0, market_value REAL NOT NULL DEFAULT 0,
                 invested REAL NOT NULL DEFAULT 0, total_profit REAL NOT NULL DEFAULT 0,
                 profit_pct REAL NOT NULL DEFAULT 0, holding_count INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT NOT NULL);
             CREATE TABLE holding (id INTEGER PRIMARY KEY AUTOINCREMENT, portfolio_id INTEGER NOT NULL,
                 symbol TEXT NOT NULL, shares INTEGER NOT NULL DEFAULT 0, purchase_date TEXT NOT NULL,
                 purchase_price REAL NOT NULL DEFAULT 0, last_price REAL NOT NULL DEFAULT 0,
                 market_value REAL NOT NULL DEFAULT 0, total_profit REAL NOT NULL DEFAULT 0,
                 profit_pct REAL NOT NULL DEFAULT 0, weight_pct REAL NOT NULL DEFAULT 0);",
        )
        .unwrap();

        let repo = SqliteRepository::from_connection(conn).unwrap();
        let mut portfolio = repo.create_portfolio("Legacy", 0.0).unwrap();
        let mut h = holding(&portfolio, "IBM", 1, 1.0);
        h.price_date = NaiveDate::from_ymd_opt(2024, 2, 2);
        portfolio.holdings.push(h);
        repo.save_portfolio(&mut portfolio, &[]).unwrap();

        let reloaded = repo.get_portfolio("Legacy").unwrap();
        assert_eq!(reloaded.holdings()[0].price_date(), NaiveDate::from_ymd_opt(2024, 2, 2));
    }
}

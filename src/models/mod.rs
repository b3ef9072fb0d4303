use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Suffix appended to a portfolio name for its optimized shadow copy.
pub const OPTIMIZED_SUFFIX: &str = "_opt";

static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-^=]{0,14}$").expect("valid symbol pattern"));

/// Trim and upper-case a ticker symbol, rejecting anything that cannot be one.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_uppercase();
    if SYMBOL_RE.is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(Error::InvalidInput(format!("'{}' is not a ticker symbol", raw)))
    }
}

/// A cash balance plus equity holdings.
///
/// Market value, invested total, profit and the holding count are caches
/// derived from `cash` and the holdings; only the valuation engine writes them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) cash: f64,
    pub(crate) market_value: f64,
    pub(crate) invested: f64,
    pub(crate) total_profit: f64,
    pub(crate) profit_pct: f64,
    pub(crate) holding_count: usize,
    pub(crate) holdings: Vec<Holding>,
}

impl Portfolio {
    pub(crate) fn new(id: i64, name: String, cash: f64) -> Self {
        Self {
            id,
            name,
            cash,
            market_value: cash,
            invested: 0.0,
            total_profit: 0.0,
            profit_pct: 0.0,
            holding_count: 0,
            holdings: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Cash plus the market value of every holding.
    pub fn market_value(&self) -> f64 {
        self.market_value
    }

    /// Cost basis of the holdings, cash excluded.
    pub fn invested(&self) -> f64 {
        self.invested
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    /// Total profit over invested, as a fraction. Zero when nothing is invested.
    pub fn profit_pct(&self) -> f64 {
        self.profit_pct
    }

    pub fn holding_count(&self) -> usize {
        self.holding_count
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn holding(&self, id: i64) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.id == Some(id))
    }

    pub fn shadow_name(&self) -> String {
        format!("{}{}", self.name, OPTIMIZED_SUFFIX)
    }

    /// Replace the cash balance. Takes effect on the next refresh.
    pub fn set_cash(&mut self, cash: f64) -> Result<()> {
        if !cash.is_finite() || cash < 0.0 {
            return Err(Error::InvalidInput(format!("cash must be non-negative, got {}", cash)));
        }
        self.cash = cash;
        Ok(())
    }

    /// Distinct symbols in holding order.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.holdings.len());
        for holding in &self.holdings {
            if !symbols.contains(&holding.symbol) {
                symbols.push(holding.symbol.clone());
            }
        }
        symbols
    }
}

/// Shares of one symbol owned by a portfolio.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub(crate) id: Option<i64>,
    pub(crate) portfolio_id: i64,
    pub(crate) symbol: String,
    pub(crate) shares: i64,
    pub(crate) purchase_date: NaiveDate,
    pub(crate) purchase_price: f64,
    pub(crate) last_price: f64,
    pub(crate) market_value: f64,
    pub(crate) total_profit: f64,
    pub(crate) profit_pct: f64,
    pub(crate) weight_pct: f64,
    pub(crate) price_date: Option<NaiveDate>,
}

impl Holding {
    /// Build an unsaved holding. It gets an id when its portfolio is saved.
    pub fn new(portfolio_id: i64, new: &NewHolding) -> Result<Self> {
        let symbol = normalize_symbol(&new.symbol)?;
        validate_shares(new.shares)?;
        validate_price(new.purchase_price)?;
        Ok(Self {
            id: None,
            portfolio_id,
            symbol,
            shares: new.shares,
            purchase_date: new.purchase_date,
            purchase_price: new.purchase_price,
            last_price: 0.0,
            market_value: 0.0,
            total_profit: 0.0,
            profit_pct: 0.0,
            weight_pct: 0.0,
            price_date: None,
        })
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn portfolio_id(&self) -> i64 {
        self.portfolio_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn shares(&self) -> i64 {
        self.shares
    }

    pub fn purchase_date(&self) -> NaiveDate {
        self.purchase_date
    }

    pub fn purchase_price(&self) -> f64 {
        self.purchase_price
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    pub fn market_value(&self) -> f64 {
        self.market_value
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    /// Last price over purchase price minus one.
    pub fn profit_pct(&self) -> f64 {
        self.profit_pct
    }

    /// Share of the parent portfolio's market value, as a fraction.
    pub fn weight_pct(&self) -> f64 {
        self.weight_pct
    }

    /// Date of the last successful price refresh.
    pub fn price_date(&self) -> Option<NaiveDate> {
        self.price_date
    }

    /// Apply user edits. Derived metrics are stale until the next refresh.
    pub fn apply(&mut self, edit: &HoldingEdit) -> Result<()> {
        if let Some(shares) = edit.shares {
            validate_shares(shares)?;
            self.shares = shares;
        }
        if let Some(price) = edit.purchase_price {
            validate_price(price)?;
            self.purchase_price = price;
        }
        if let Some(date) = edit.purchase_date {
            self.purchase_date = date;
        }
        Ok(())
    }
}

/// Input for adding a holding to a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHolding {
    pub symbol: String,
    pub shares: i64,
    pub purchase_date: NaiveDate,
    pub purchase_price: f64,
}

/// User-editable holding attributes; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingEdit {
    pub shares: Option<i64>,
    pub purchase_price: Option<f64>,
    pub purchase_date: Option<NaiveDate>,
}

fn validate_shares(shares: i64) -> Result<()> {
    if shares < 0 {
        return Err(Error::InvalidInput(format!("share count must be non-negative, got {}", shares)));
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidInput(format!("purchase price must be non-negative, got {}", price)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("brk-b").unwrap(), "BRK-B");
        assert_eq!(normalize_symbol("sap.de").unwrap(), "SAP.DE");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("not a symbol").is_err());
    }

    #[test]
    fn test_new_holding_rejects_negative_shares() {
        let new = NewHolding {
            symbol: "msft".to_string(),
            shares: -1,
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            purchase_price: 100.0,
        };
        assert!(matches!(Holding::new(1, &new), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_symbols_are_distinct_in_holding_order() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut portfolio = Portfolio::new(1, "Tech".to_string(), 0.0);
        for symbol in ["msft", "aapl", "MSFT"] {
            let new = NewHolding {
                symbol: symbol.to_string(),
                shares: 1,
                purchase_date: date,
                purchase_price: 1.0,
            };
            portfolio.holdings.push(Holding::new(1, &new).unwrap());
        }
        assert_eq!(portfolio.symbols(), vec!["MSFT".to_string(), "AAPL".to_string()]);
    }

    #[test]
    fn test_apply_edit() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let new = NewHolding {
            symbol: "AAPL".to_string(),
            shares: 10,
            purchase_date: date,
            purchase_price: 100.0,
        };
        let mut holding = Holding::new(1, &new).unwrap();
        holding
            .apply(&HoldingEdit {
                shares: Some(0),
                purchase_price: None,
                purchase_date: None,
            })
            .unwrap();
        assert_eq!(holding.shares(), 0);
        assert_eq!(holding.purchase_price(), 100.0);
        assert!(holding.apply(&HoldingEdit { purchase_price: Some(-2.0), ..Default::default() }).is_err());
    }
}

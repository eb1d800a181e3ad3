// src/reports.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::error::{Error, Result};
use crate::llm::{TextGenerator, generate_json};
use crate::store::{
    self, BrandSales, CatalogStore, MonthlyTrend, Period, ProductDemand, ProductSales, StatusTotal,
    StockLevel,
};

const TOP_PRODUCTS: usize = 10;
const TOP_BRANDS: usize = 5;

const RESTOCK_WINDOW_DAYS: i64 = 30;
const RESTOCK_MIN_SOLD: i64 = 3;
const RESTOCK_MAX_STOCK: i64 = 30;

const LOW_STOCK: i64 = 10;
const TRENDING_WINDOW_DAYS: i64 = 7;
const SHORTLIST: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    FinancialSummary,
    RestockAlerts,
    DemandForecast,
    NextBestAction,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::FinancialSummary,
        ReportKind::RestockAlerts,
        ReportKind::DemandForecast,
        ReportKind::NextBestAction,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ReportKind::FinancialSummary => "financial-summary",
            ReportKind::RestockAlerts => "restock-alerts",
            ReportKind::DemandForecast => "demand-forecast",
            ReportKind::NextBestAction => "next-best-action",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            ReportKind::FinancialSummary => include_str!("prompts/financial_summary.txt"),
            ReportKind::RestockAlerts => include_str!("prompts/restock_alerts.txt"),
            ReportKind::DemandForecast => include_str!("prompts/demand_forecast.txt"),
            ReportKind::NextBestAction => include_str!("prompts/next_best_action.txt"),
        }
    }
}

impl FromStr for ReportKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        ReportKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag.trim())
            .ok_or_else(|| Error::UnknownReport(tag.to_string()))
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Aggregates sent to the model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RevenueOverview {
    pub total_revenue: f64,
    pub total_orders: i64,
    pub period: Period,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinancialData {
    pub overview: RevenueOverview,
    pub top_products: Vec<ProductSales>,
    pub statuses: Vec<StatusTotal>,
    pub top_brands: Vec<BrandSales>,
}

pub fn financial_data(store: &CatalogStore) -> Result<FinancialData> {
    let (total_revenue, total_orders) = store.revenue_summary()?;
    Ok(FinancialData {
        overview: RevenueOverview {
            total_revenue,
            total_orders,
            period: store.order_period()?,
        },
        top_products: store.top_products_by_quantity(TOP_PRODUCTS)?,
        statuses: store.status_breakdown()?,
        top_brands: store.top_brands_by_revenue(TOP_BRANDS)?,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestockCandidate {
    pub id: String,
    pub name: String,
    pub sku: Option<String>,
    pub stock: i64,
    pub sold_last_30_days: i64,
    pub days_of_stock_left: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestockData {
    pub products: Vec<RestockCandidate>,
}

/// Fast sellers running low: enough units sold in the window and little stock left.
pub fn restock_data(store: &CatalogStore, now: OffsetDateTime) -> Result<RestockData> {
    let since = store::timestamp(now - Duration::days(RESTOCK_WINDOW_DAYS));

    let products = store
        .sales_since(&since)?
        .into_iter()
        .filter_map(|sales| {
            let stock = sales.stock.filter(|&s| s <= RESTOCK_MAX_STOCK)?;
            (sales.sold >= RESTOCK_MIN_SOLD).then(|| RestockCandidate {
                days_of_stock_left: round1(stock as f64 / sales.sold as f64 * RESTOCK_WINDOW_DAYS as f64),
                id: sales.id,
                name: sales.name,
                sku: sales.sku,
                stock,
                sold_last_30_days: sales.sold,
            })
        })
        .collect();

    Ok(RestockData { products })
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DemandData {
    pub period: Period,
    pub products: Vec<ProductDemand>,
    pub monthly: Vec<MonthlyTrend>,
}

pub fn demand_data(store: &CatalogStore) -> Result<DemandData> {
    Ok(DemandData {
        period: store.order_period()?,
        products: store.product_demand()?,
        monthly: store.monthly_trend()?,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinancialSnapshot {
    pub total_revenue: f64,
    pub total_orders: i64,
    pub average_ticket: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationalSnapshot {
    pub pending_orders: i64,
    pub low_stock_products: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendingProduct {
    pub id: String,
    pub name: String,
    pub sold_last_7_days: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NextActionData {
    pub financial: FinancialSnapshot,
    pub operational: OperationalSnapshot,
    pub out_of_stock: Vec<StockLevel>,
    pub trending: Vec<TrendingProduct>,
}

pub fn next_action_data(store: &CatalogStore, now: OffsetDateTime) -> Result<NextActionData> {
    let (total_revenue, total_orders) = store.revenue_summary()?;
    let average_ticket = if total_orders > 0 {
        total_revenue / total_orders as f64
    } else {
        0.0
    };

    let since = store::timestamp(now - Duration::days(TRENDING_WINDOW_DAYS));
    let trending = store
        .sales_since(&since)?
        .into_iter()
        .take(SHORTLIST)
        .map(|sales| TrendingProduct {
            id: sales.id,
            name: sales.name,
            sold_last_7_days: sales.sold,
        })
        .collect();

    Ok(NextActionData {
        financial: FinancialSnapshot {
            total_revenue,
            total_orders,
            average_ticket,
        },
        operational: OperationalSnapshot {
            pending_orders: store.count_orders_with_status("pendente")?,
            low_stock_products: store.count_products_with_stock_at_most(LOW_STOCK)?,
        },
        out_of_stock: store.products_with_stock_at_most(0, SHORTLIST)?,
        trending,
    })
}

// ---------------------------------------------------------------------------
// Expected model answers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Alta,
    #[serde(alias = "média")]
    Media,
    Baixa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Alta,
    #[serde(alias = "estável")]
    Estavel,
    Queda,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub summary: String,
    pub total_revenue: f64,
    pub total_orders: i64,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockAlert {
    pub product_id: String,
    pub name: String,
    pub priority: Priority,
    pub suggested_quantity: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockReport {
    pub alerts: Vec<RestockAlert>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductForecast {
    pub product_id: String,
    pub name: String,
    pub expected_units: i64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandReport {
    pub forecast: Vec<ProductForecast>,
    pub expected_revenue: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub area: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextActionReport {
    pub actions: Vec<SuggestedAction>,
    pub summary: String,
}

/// Aggregate the store for `kind`, hand it to the model and return its
/// answer once it matches the report's shape.
pub async fn generate_report(
    store: &CatalogStore,
    generator: &dyn TextGenerator,
    kind: ReportKind,
    now: OffsetDateTime,
) -> Result<serde_json::Value> {
    let data = match kind {
        ReportKind::FinancialSummary => serde_json::to_value(financial_data(store)?)?,
        ReportKind::RestockAlerts => serde_json::to_value(restock_data(store, now)?)?,
        ReportKind::DemandForecast => serde_json::to_value(demand_data(store)?)?,
        ReportKind::NextBestAction => serde_json::to_value(next_action_data(store, now)?)?,
    };

    let prompt = format!("{}\n\nDados:\n{}", kind.prompt(), serde_json::to_string_pretty(&data)?);
    info!(report = %kind, prompt_chars = prompt.len(), "Requesting report");

    let report = match kind {
        ReportKind::FinancialSummary => {
            serde_json::to_value(generate_json::<FinancialReport>(generator, &prompt).await?)?
        }
        ReportKind::RestockAlerts => {
            serde_json::to_value(generate_json::<RestockReport>(generator, &prompt).await?)?
        }
        ReportKind::DemandForecast => {
            serde_json::to_value(generate_json::<DemandReport>(generator, &prompt).await?)?
        }
        ReportKind::NextBestAction => {
            serde_json::to_value(generate_json::<NextActionReport>(generator, &prompt).await?)?
        }
    };

    info!(report = %kind, "Report generated");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeGenerator;
    use crate::store::fixtures::{brand, order, product};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-10-17 12:00 UTC);

    fn days_ago(days: i64) -> String {
        store::timestamp(NOW - Duration::days(days))
    }

    #[test]
    fn test_report_tags() {
        for kind in ReportKind::ALL {
            assert_eq!(kind.tag().parse::<ReportKind>().unwrap(), kind);
        }
        let err = "relatorio-x".parse::<ReportKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownReport(_)));
        assert_eq!(err.status().code(), 404);
    }

    #[test]
    fn test_restock_thresholds() {
        let store = CatalogStore::open_in_memory().unwrap();
        let b = brand(&store, "Boticário");
        let hot = product(&store, &b, "Malbec", "BOT-1", Some(6));
        let slow = product(&store, &b, "Lily", "BOT-2", Some(1));
        let stocked = product(&store, &b, "Egeo", "BOT-3", Some(31));
        let untracked = product(&store, &b, "Floratta", "BOT-4", None);
        let old = product(&store, &b, "Quasar", "BOT-5", Some(2));

        order(&store, Some("Pago"), &days_ago(3), &[(&hot, 9, 89.9), (&slow, 2, 10.0), (&stocked, 8, 5.0), (&untracked, 5, 1.0)]);
        order(&store, Some("Pago"), &days_ago(45), &[(&old, 20, 3.0)]);

        let data = restock_data(&store, NOW).unwrap();
        assert_eq!(data.products.len(), 1);
        let candidate = &data.products[0];
        assert_eq!(candidate.id, hot);
        assert_eq!(candidate.sold_last_30_days, 9);
        assert_eq!(candidate.stock, 6);
        assert_eq!(candidate.days_of_stock_left, 20.0);
    }

    #[test]
    fn test_restock_rounding() {
        let store = CatalogStore::open_in_memory().unwrap();
        let b = brand(&store, "Natura");
        let p = product(&store, &b, "Kaiak", "NAT-1", Some(5));
        order(&store, None, &days_ago(1), &[(&p, 7, 1.0)]);
        let data = restock_data(&store, NOW).unwrap();
        // 5 / 7 * 30 = 21.428...
        assert_eq!(data.products[0].days_of_stock_left, 21.4);
    }

    #[test]
    fn test_next_action_snapshot() {
        let store = CatalogStore::open_in_memory().unwrap();
        let b = brand(&store, "Avon");
        let gone = product(&store, &b, "Batom", "AVN-1", Some(0));
        let low = product(&store, &b, "Rímel", "AVN-2", Some(8));
        let fine = product(&store, &b, "Creme", "AVN-3", Some(50));

        order(&store, Some("Pendente"), &days_ago(2), &[(&fine, 4, 10.0)]);
        order(&store, Some("PENDENTE"), &days_ago(20), &[(&low, 1, 20.0)]);
        order(&store, Some("Pago"), &days_ago(1), &[(&gone, 2, 15.0)]);

        let data = next_action_data(&store, NOW).unwrap();
        assert_eq!(data.financial.total_orders, 3);
        assert!((data.financial.total_revenue - 90.0).abs() < 1e-9);
        assert!((data.financial.average_ticket - 30.0).abs() < 1e-9);
        assert_eq!(data.operational.pending_orders, 2);
        assert_eq!(data.operational.low_stock_products, 2);
        assert_eq!(data.out_of_stock.len(), 1);
        assert_eq!(data.out_of_stock[0].id, gone);

        let trending: Vec<&str> = data.trending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(trending, [fine.as_str(), gone.as_str()]);
    }

    #[test]
    fn test_next_action_empty_store() {
        let store = CatalogStore::open_in_memory().unwrap();
        let data = next_action_data(&store, NOW).unwrap();
        assert_eq!(data.financial.average_ticket, 0.0);
        assert!(data.trending.is_empty());
    }

    #[test]
    fn test_financial_data() {
        let store = CatalogStore::open_in_memory().unwrap();
        let bot = brand(&store, "Boticário");
        let nat = brand(&store, "Natura");
        let malbec = product(&store, &bot, "Malbec", "BOT-1", Some(10));
        let kaiak = product(&store, &nat, "Kaiak", "NAT-1", Some(10));
        order(&store, Some("Pago"), "2026-08-01T10:00:00Z", &[(&malbec, 1, 100.0), (&kaiak, 5, 10.0)]);
        order(&store, Some("Pago"), "2026-09-01T10:00:00Z", &[(&kaiak, 1, 10.0)]);

        let data = financial_data(&store).unwrap();
        assert_eq!(data.overview.total_orders, 2);
        assert_eq!(data.overview.period.start.as_deref(), Some("2026-08-01T10:00:00Z"));
        assert_eq!(data.overview.period.end.as_deref(), Some("2026-09-01T10:00:00Z"));
        assert_eq!(data.top_products[0].name, "Kaiak");
        assert_eq!(data.top_products[0].quantity, 6);
        assert_eq!(data.top_brands[0].name, "Boticário");
        assert_eq!(data.statuses.len(), 1);
        assert_eq!(data.statuses[0].orders, 2);
    }

    #[tokio::test]
    async fn test_generate_report_validates_reply() {
        let store = CatalogStore::open_in_memory().unwrap();
        let fake = FakeGenerator::new(
            "```json\n{\"actions\": [{\"title\": \"Repor batons\", \"description\": \"Estoque zerado\", \"priority\": \"média\", \"area\": \"estoque\"}], \"summary\": \"ok\"}\n```",
        );
        let report = generate_report(&store, &fake, ReportKind::NextBestAction, NOW)
            .await
            .unwrap();
        assert_eq!(report["actions"][0]["priority"], "media");

        let prompt = fake.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Dados:"));
        assert!(prompt.contains("\"pending_orders\": 0"));
    }

    #[tokio::test]
    async fn test_generate_report_rejects_off_schema_reply() {
        let store = CatalogStore::open_in_memory().unwrap();
        let fake = FakeGenerator::new("{\"relatorio\": \"tudo certo\"}");
        let err = generate_report(&store, &fake, ReportKind::FinancialSummary, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamGeneration(_)));
    }
}

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use serde::Serialize;
use std::path::Path;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

use crate::error::Result;

pub struct CatalogStore {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct Brand {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub sku: Option<String>,
    pub unit_price: Option<f64>,
    pub sale_price: Option<f64>,
    /// Units in stock. `None` when stock is not tracked.
    pub quantity: Option<i64>,
    pub in_catalog: bool,
    pub tag: Option<String>,
    pub image_url: Option<String>,
    pub brand_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Sale {
    pub id: String,
    pub sold_at: Option<String>,
    pub total_value: Option<f64>,
    pub discount: Option<f64>,
    pub paid: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub user_id: Option<String>,
    pub sale_id: Option<String>,
    pub status: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Period {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductSales {
    pub name: String,
    pub quantity: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusTotal {
    pub status: String,
    pub orders: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BrandSales {
    pub name: String,
    pub revenue: f64,
    pub quantity: i64,
}

/// Units of one product sold inside a time window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentSales {
    pub id: String,
    pub name: String,
    pub sku: Option<String>,
    pub stock: Option<i64>,
    pub sold: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductDemand {
    pub id: String,
    pub name: String,
    pub stock: i64,
    pub total_sold: i64,
    pub orders: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyTrend {
    /// `YYYY-MM`
    pub month: String,
    pub orders: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StockLevel {
    pub id: String,
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreCounts {
    pub brands: usize,
    pub products: usize,
    pub users: usize,
    pub orders: usize,
    pub order_items: usize,
    pub imported_invoices: usize,
}

/// Revenue of an order item with missing values counted as zero.
const ITEM_REVENUE: &str = "COALESCE(oi.unit_price, 0) * COALESCE(oi.quantity, 0)";

const PRODUCT_COLUMNS: &str = "id, name, description, sku, unit_price, sale_price, quantity, in_catalog, tag, image_url, brand_id, created_at";

/// UTC timestamp in the one format stored in every `*_at` column, so that
/// string order is time order.
pub fn timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl CatalogStore {
    /// Create a new catalog store with SQLite backend
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS brands (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                image_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                sku TEXT UNIQUE,
                unit_price REAL,
                sale_price REAL,
                quantity INTEGER,
                in_catalog INTEGER NOT NULL DEFAULT 0,
                tag TEXT,
                image_url TEXT,
                brand_id TEXT REFERENCES brands(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                surname TEXT,
                email TEXT,
                phone TEXT,
                role TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sales (
                id TEXT PRIMARY KEY,
                sold_at TEXT,
                total_value REAL,
                discount REAL,
                paid INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                user_id TEXT REFERENCES users(id),
                sale_id TEXT REFERENCES sales(id),
                status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS order_items (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id TEXT NOT NULL REFERENCES products(id),
                quantity INTEGER,
                unit_price REAL
            );

            CREATE TABLE IF NOT EXISTS imported_invoices (
                digest TEXT PRIMARY KEY,
                layout TEXT NOT NULL,
                filename TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                imported_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_products_brand_id ON products(brand_id);
            CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id);
            CREATE INDEX IF NOT EXISTS idx_order_items_product_id ON order_items(product_id);",
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Run `f` inside one transaction; rolled back if it fails.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn insert_brand(&self, brand: &Brand) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO brands (id, name, description, image_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                brand.id,
                brand.name,
                brand.description,
                brand.image_url,
                brand.created_at,
            ],
        )?;
        info!(id = %brand.id, name = %brand.name, "Brand stored");
        Ok(())
    }

    pub fn insert_product(&self, product: &Product) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO products
                (id, name, description, sku, unit_price, sale_price, quantity, in_catalog, tag, image_url, brand_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                product.id,
                product.name,
                product.description,
                product.sku,
                product.unit_price,
                product.sale_price,
                product.quantity,
                product.in_catalog,
                product.tag,
                product.image_url,
                product.brand_id,
                product.created_at,
            ],
        )?;
        info!(id = %product.id, sku = ?product.sku, "Product stored");
        Ok(())
    }

    pub fn insert_user(&self, user: &User) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, surname, email, phone, role, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                user.id,
                user.name,
                user.surname,
                user.email,
                user.phone,
                user.role,
                user.active,
                user.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_sale(&self, sale: &Sale) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO sales (id, sold_at, total_value, discount, paid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                sale.id,
                sale.sold_at,
                sale.total_value,
                sale.discount,
                sale.paid,
                sale.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_order(&self, order: &Order) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO orders (id, user_id, sale_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                order.id,
                order.user_id,
                order.sale_id,
                order.status,
                order.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_order_item(&self, item: &OrderItem) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                item.id,
                item.order_id,
                item.product_id,
                item.quantity,
                item.unit_price,
            ],
        )?;
        Ok(())
    }

    /// Add `added` units to a product's stock and refresh its cost price.
    pub fn restock_product(
        &self,
        product_id: &str,
        added: i64,
        unit_price: f64,
        now: &str,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE products
             SET quantity = COALESCE(quantity, 0) + ?1, unit_price = ?2, updated_at = ?3
             WHERE id = ?4",
            params![added, unit_price, now, product_id],
        )?;
        info!(id = %product_id, added, "Product restocked");
        Ok(())
    }

    pub fn record_import(
        &self,
        digest: &str,
        layout: &str,
        filename: &str,
        rows: usize,
        now: &str,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO imported_invoices (digest, layout, filename, row_count, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![digest, layout, filename, rows as i64, now],
        )?;
        info!(digest = %digest, filename = %filename, rows, "Invoice import recorded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn is_imported(&self, digest: &str) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM imported_invoices WHERE digest = ?1)",
            params![digest],
            |row| row.get(0),
        )
    }

    /// Case-insensitive lookup (ASCII folding only).
    pub fn find_brand_by_name(&self, name: &str) -> SqliteResult<Option<Brand>> {
        self.conn
            .query_row(
                "SELECT id, name, description, image_url, created_at
                 FROM brands WHERE name = ?1 COLLATE NOCASE
                 ORDER BY created_at LIMIT 1",
                params![name],
                |row| {
                    Ok(Brand {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        image_url: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn find_product_by_sku(&self, sku: &str) -> SqliteResult<Option<Product>> {
        self.conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"),
                params![sku],
                Self::row_to_product,
            )
            .optional()
    }

    /// Helper: map a row with the product projection to `Product`.
    fn row_to_product(row: &Row<'_>) -> SqliteResult<Product> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            sku: row.get(3)?,
            unit_price: row.get(4)?,
            sale_price: row.get(5)?,
            quantity: row.get(6)?,
            in_catalog: row.get(7)?,
            tag: row.get(8)?,
            image_url: row.get(9)?,
            brand_id: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Total revenue and number of distinct orders that have items.
    pub fn revenue_summary(&self) -> SqliteResult<(f64, i64)> {
        self.conn.query_row(
            &format!(
                "SELECT COALESCE(SUM({ITEM_REVENUE}), 0.0), COUNT(DISTINCT o.id)
                 FROM orders o JOIN order_items oi ON oi.order_id = o.id"
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    pub fn order_period(&self) -> SqliteResult<Period> {
        self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM orders",
            [],
            |row| {
                Ok(Period {
                    start: row.get(0)?,
                    end: row.get(1)?,
                })
            },
        )
    }

    pub fn top_products_by_quantity(&self, limit: usize) -> SqliteResult<Vec<ProductSales>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.name, COALESCE(SUM(oi.quantity), 0) AS sold, COALESCE(SUM({ITEM_REVENUE}), 0.0)
             FROM products p JOIN order_items oi ON oi.product_id = p.id
             GROUP BY p.id, p.name
             ORDER BY sold DESC, p.name
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ProductSales {
                name: row.get(0)?,
                quantity: row.get(1)?,
                revenue: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn status_breakdown(&self) -> SqliteResult<Vec<StatusTotal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT COALESCE(o.status, 'Sem status'), COUNT(DISTINCT o.id), COALESCE(SUM({ITEM_REVENUE}), 0.0)
             FROM orders o JOIN order_items oi ON oi.order_id = o.id
             GROUP BY o.status
             ORDER BY 1"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(StatusTotal {
                status: row.get(0)?,
                orders: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn top_brands_by_revenue(&self, limit: usize) -> SqliteResult<Vec<BrandSales>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT b.name, COALESCE(SUM({ITEM_REVENUE}), 0.0) AS revenue, COALESCE(SUM(oi.quantity), 0)
             FROM brands b
             JOIN products p ON p.brand_id = b.id
             JOIN order_items oi ON oi.product_id = p.id
             GROUP BY b.id, b.name
             ORDER BY revenue DESC, b.name
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(BrandSales {
                name: row.get(0)?,
                revenue: row.get(1)?,
                quantity: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Products with at least one unit sold in orders created at or after
    /// `since`, best sellers first.
    pub fn sales_since(&self, since: &str) -> SqliteResult<Vec<RecentSales>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.sku, p.quantity, SUM(oi.quantity) AS sold
             FROM order_items oi
             JOIN orders o ON o.id = oi.order_id
             JOIN products p ON p.id = oi.product_id
             WHERE o.created_at >= ?1
             GROUP BY p.id
             HAVING SUM(oi.quantity) > 0
             ORDER BY sold DESC, p.name",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(RecentSales {
                id: row.get(0)?,
                name: row.get(1)?,
                sku: row.get(2)?,
                stock: row.get(3)?,
                sold: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn product_demand(&self) -> SqliteResult<Vec<ProductDemand>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COALESCE(p.quantity, 0), COALESCE(SUM(oi.quantity), 0), COUNT(DISTINCT o.id)
             FROM products p
             JOIN order_items oi ON oi.product_id = p.id
             JOIN orders o ON o.id = oi.order_id
             GROUP BY p.id, p.name, p.quantity
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProductDemand {
                id: row.get(0)?,
                name: row.get(1)?,
                stock: row.get(2)?,
                total_sold: row.get(3)?,
                orders: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn monthly_trend(&self) -> SqliteResult<Vec<MonthlyTrend>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT substr(o.created_at, 1, 7) AS month, COUNT(DISTINCT o.id), COALESCE(SUM({ITEM_REVENUE}), 0.0)
             FROM orders o JOIN order_items oi ON oi.order_id = o.id
             GROUP BY month
             ORDER BY month"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(MonthlyTrend {
                month: row.get(0)?,
                orders: row.get(1)?,
                revenue: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Orders whose status equals `status`, ignoring case.
    pub fn count_orders_with_status(&self, status: &str) -> SqliteResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE status = ?1 COLLATE NOCASE",
            params![status],
            |row| row.get(0),
        )
    }

    pub fn count_products_with_stock_at_most(&self, max: i64) -> SqliteResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM products WHERE quantity <= ?1",
            params![max],
            |row| row.get(0),
        )
    }

    pub fn products_with_stock_at_most(&self, max: i64, limit: usize) -> SqliteResult<Vec<StockLevel>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, quantity FROM products
             WHERE quantity <= ?1
             ORDER BY quantity, name
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![max, limit as i64], |row| {
            Ok(StockLevel {
                id: row.get(0)?,
                name: row.get(1)?,
                quantity: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn get_counts(&self) -> SqliteResult<StoreCounts> {
        let count = |table: &str| -> SqliteResult<usize> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(StoreCounts {
            brands: count("brands")?,
            products: count("products")?,
            users: count("users")?,
            orders: count("orders")?,
            order_items: count("order_items")?,
            imported_invoices: count("imported_invoices")?,
        })
    }
}

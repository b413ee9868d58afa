//! # Sale Repository
//!
//! Persists committed sales: one header row in `sales` and one row per line
//! in `sale_items`, always written together.
//!
//! ```text
//! insert_sale(sale)
//!     │
//!     ├── BEGIN
//!     ├── INSERT INTO sales ...            (header)
//!     ├── INSERT INTO sale_items ... × N   (lines, in cart order)
//!     └── COMMIT                           any failure → ROLLBACK, nothing kept
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use vendra_core::{PaymentMethod, Sale, SaleLine, SaleStatus};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: i64,
    sale_number: String,
    user_id: Option<i64>,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    total_amount_cents: i64,
    discount_amount_cents: i64,
    tax_amount_cents: i64,
    payment_method: PaymentMethod,
    status: SaleStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(self, lines: Vec<SaleLine>) -> Sale {
        Sale {
            id: Some(self.id),
            sale_number: self.sale_number,
            user_id: self.user_id,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            lines,
            total_amount_cents: self.total_amount_cents,
            discount_amount_cents: self.discount_amount_cents,
            tax_amount_cents: self.tax_amount_cents,
            payment_method: self.payment_method,
            status: self.status,
            notes: self.notes,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    product_id: i64,
    product_code: String,
    product_name: String,
    unit_price_cents: i64,
    quantity: i64,
    discount_bps: i64,
    subtotal_cents: i64,
}

impl From<LineRow> for SaleLine {
    fn from(row: LineRow) -> Self {
        SaleLine {
            product_id: row.product_id,
            product_code: row.product_code,
            product_name: row.product_name,
            unit_price_cents: row.unit_price_cents,
            quantity: row.quantity,
            discount_bps: row.discount_bps.clamp(0, 10_000) as u32,
            subtotal_cents: row.subtotal_cents,
        }
    }
}

const SALE_COLUMNS: &str = r#"
    id, sale_number, user_id, customer_name, customer_phone,
    total_amount_cents, discount_amount_cents, tax_amount_cents,
    payment_method, status, notes, created_at
"#;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Writes the header and every line in one transaction.
    ///
    /// ## Returns
    /// * `Ok(id)` - Database id of the new sale
    /// * `Err(DbError::UniqueViolation)` - Sale number already used
    /// * `Err(DbError::ForeignKeyViolation)` - Unknown user or product;
    ///   nothing is written
    pub async fn insert_sale(&self, sale: &Sale) -> DbResult<i64> {
        debug!(
            sale_number = %sale.sale_number,
            lines = sale.lines.len(),
            "Inserting sale"
        );

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO sales (
                sale_number, user_id, customer_name, customer_phone,
                total_amount_cents, discount_amount_cents, tax_amount_cents,
                payment_method, status, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&sale.sale_number)
        .bind(sale.user_id)
        .bind(&sale.customer_name)
        .bind(&sale.customer_phone)
        .bind(sale.total_amount_cents)
        .bind(sale.discount_amount_cents)
        .bind(sale.tax_amount_cents)
        .bind(sale.payment_method)
        .bind(sale.status)
        .bind(&sale.notes)
        .bind(sale.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("sale number", &sale.sale_number),
            other => other,
        })?;

        let sale_id = result.last_insert_rowid();

        for (line_no, line) in sale.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    sale_id, line_no, product_id, product_code, product_name,
                    unit_price_cents, quantity, discount_bps, subtotal_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(sale_id)
            .bind(line_no as i64)
            .bind(line.product_id)
            .bind(&line.product_code)
            .bind(&line.product_name)
            .bind(line.unit_price_cents)
            .bind(line.quantity)
            .bind(line.discount_bps as i64)
            .bind(line.subtotal_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            sale_number = %sale.sale_number,
            sale_id = %sale_id,
            final_amount = %sale.final_amount(),
            "Sale persisted"
        );
        Ok(sale_id)
    }

    /// Loads a sale and its lines by sale number.
    pub async fn get_by_number(&self, sale_number: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE sale_number = ?1");
        let row: Option<SaleRow> = sqlx::query_as(&sql)
            .bind(sale_number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let lines = self.get_lines(row.id).await?;
                Ok(Some(row.into_sale(lines)))
            }
            None => Ok(None),
        }
    }

    /// Lines of a sale in their original order.
    pub async fn get_lines(&self, sale_id: i64) -> DbResult<Vec<SaleLine>> {
        let rows: Vec<LineRow> = sqlx::query_as(
            r#"
            SELECT product_id, product_code, product_name,
                   unit_price_cents, quantity, discount_bps, subtotal_cents
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SaleLine::from).collect())
    }

    /// COMMITTED → VOID. Returns the voided sale.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - No such sale number
    /// * `Err(DbError::InvalidState)` - Sale is not COMMITTED
    pub async fn void_sale(&self, sale_number: &str) -> DbResult<Sale> {
        debug!(sale_number = %sale_number, "Voiding sale");

        let result = sqlx::query(
            "UPDATE sales SET status = ?2 WHERE sale_number = ?1 AND status = ?3",
        )
        .bind(sale_number)
        .bind(SaleStatus::Void)
        .bind(SaleStatus::Committed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_number(sale_number).await? {
                Some(sale) => Err(DbError::InvalidState(format!(
                    "sale {sale_number} is {}",
                    sale.status
                ))),
                None => Err(DbError::not_found("Sale", sale_number)),
            };
        }

        let sale = self
            .get_by_number(sale_number)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_number))?;

        info!(sale_number = %sale_number, "Sale voided");
        Ok(sale)
    }

    /// Counts sales in any status.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

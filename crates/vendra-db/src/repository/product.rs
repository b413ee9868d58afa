//! # Product Repository
//!
//! Database operations for products and their stock movements.
//!
//! ## Stock Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                            │
//! │                                                                     │
//! │  ❌ Absolute update                                                  │
//! │     UPDATE products SET quantity = 7 WHERE id = ?                   │
//! │                                                                     │
//! │  ✅ Delta update + audit row, one transaction                       │
//! │     UPDATE products SET quantity = quantity - 3 WHERE id = ?        │
//! │     INSERT INTO stock_movements (..., 'OUT', 3, ...)                │
//! │                                                                     │
//! │  The CHECK (quantity >= 0) constraint backs up the explicit check.  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use vendra_core::validation::{validate_price_cents, validate_product_code, validate_product_name};
use vendra_core::{Category, MovementType, Product, StockMovement, ValidationError};

const PRODUCT_COLUMNS: &str = r#"
    id, code, name, description, category_id,
    purchase_price_cents, selling_price_cents,
    quantity, alert_threshold, is_active,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    code: String,
    name: String,
    description: Option<String>,
    category_id: Option<i64>,
    purchase_price_cents: i64,
    selling_price_cents: i64,
    quantity: i64,
    alert_threshold: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            code: row.code,
            name: row.name,
            description: row.description,
            category_id: row.category_id,
            purchase_price_cents: row.purchase_price_cents,
            selling_price_cents: row.selling_price_cents,
            quantity: row.quantity,
            alert_threshold: row.alert_threshold,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: i64,
    product_id: i64,
    movement_type: MovementType,
    quantity: i64,
    reason: Option<String>,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<MovementRow> for StockMovement {
    fn from(row: MovementRow) -> Self {
        StockMovement {
            id: Some(row.id),
            product_id: row.product_id,
            movement_type: row.movement_type,
            quantity: row.quantity,
            reason: row.reason,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Fields needed to create a product. Id and timestamps are assigned on
/// insert.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub purchase_price_cents: i64,
    pub selling_price_cents: i64,
    pub quantity: i64,
    pub alert_threshold: i64,
}

impl NewProduct {
    /// A product with the given code, name, price and stock, default
    /// threshold and no purchase price.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        selling_price_cents: i64,
        quantity: i64,
    ) -> Self {
        NewProduct {
            code: code.into(),
            name: name.into(),
            description: None,
            category_id: None,
            purchase_price_cents: 0,
            selling_price_cents,
            quantity,
            alert_threshold: vendra_core::DEFAULT_ALERT_THRESHOLD,
        }
    }

    fn validate(&self) -> DbResult<()> {
        validate_product_code(&self.code)?;
        validate_product_name(&self.name)?;
        validate_price_cents(self.purchase_price_cents)?;
        validate_price_cents(self.selling_price_cents)?;
        if self.quantity < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "quantity".to_string(),
            }
            .into());
        }
        if self.alert_threshold < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "alert threshold".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by surrogate id, active or not.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        debug!(product_id = %id, "Loading product by id");

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Product::from))
    }

    /// Gets a product by its business code, active or not.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let code = code.trim();
        debug!(code = %code, "Loading product by code");

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Product::from))
    }

    /// Lists active products ordered by name.
    pub async fn list_active(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name");
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        debug!(count = rows.len(), "Listed active products");
        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Active products at or below their alert threshold, emptiest first.
    pub async fn list_low_stock(&self) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND quantity <= alert_threshold \
             ORDER BY quantity, name"
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Inserts a new product and returns it with its assigned id.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - Code already exists
    /// * `Err(DbError::Validation)` - Bad code, name, price or quantity
    pub async fn insert(&self, product: &NewProduct) -> DbResult<Product> {
        product.validate()?;
        debug!(code = %product.code, "Inserting product");

        let now = Utc::now();
        let code = product.code.trim();

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                code, name, description, category_id,
                purchase_price_cents, selling_price_cents,
                quantity, alert_threshold, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
            "#,
        )
        .bind(code)
        .bind(product.name.trim())
        .bind(&product.description)
        .bind(product.category_id)
        .bind(product.purchase_price_cents)
        .bind(product.selling_price_cents)
        .bind(product.quantity)
        .bind(product.alert_threshold)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("code", code),
            other => other,
        })?;

        Ok(Product {
            id: result.last_insert_rowid(),
            code: code.to_string(),
            name: product.name.trim().to_string(),
            description: product.description.clone(),
            category_id: product.category_id,
            purchase_price_cents: product.purchase_price_cents,
            selling_price_cents: product.selling_price_cents,
            quantity: product.quantity,
            alert_threshold: product.alert_threshold,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a signed quantity change and records the stock movement in
    /// the same transaction.
    ///
    /// ## Arguments
    /// * `id` - Product id
    /// * `delta` - Negative for sales, positive for receipts and releases
    /// * `movement` - Audit category of the change
    /// * `reason` - Free-text audit note
    ///
    /// ## Returns
    /// * `Ok(new_quantity)`
    /// * `Err(DbError::NotFound)` - No such product
    /// * `Err(DbError::CheckViolation)` - Quantity would go below zero;
    ///   nothing is written
    pub async fn adjust_quantity(
        &self,
        id: i64,
        delta: i64,
        movement: MovementType,
        reason: Option<&str>,
    ) -> DbResult<i64> {
        debug!(product_id = %id, delta = %delta, movement = %movement, "Adjusting quantity");

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Bound check and write in one statement
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET quantity = quantity + ?2, updated_at = ?3
            WHERE id = ?1 AND quantity + ?2 >= 0
            RETURNING quantity
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                None => DbError::not_found("Product", id),
                Some(current) => DbError::CheckViolation(format!(
                    "product {id} quantity {current} cannot change by {delta}"
                )),
            });
        };

        // IN/OUT rows carry the magnitude, ADJUSTMENT rows the signed delta
        let recorded = match movement {
            MovementType::Adjustment => delta,
            MovementType::In | MovementType::Out => delta.abs(),
        };
        sqlx::query(
            r#"
            INSERT INTO stock_movements (product_id, movement_type, quantity, reason, user_id, created_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5)
            "#,
        )
        .bind(id)
        .bind(movement)
        .bind(recorded)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Stock movements of one product, oldest first.
    pub async fn movements(&self, product_id: i64) -> DbResult<Vec<StockMovement>> {
        let rows: Vec<MovementRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, movement_type, quantity, reason, user_id, created_at
            FROM stock_movements
            WHERE product_id = ?1
            ORDER BY id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    /// Soft-deletes a product. Historical sales keep referencing it.
    pub async fn soft_delete(&self, id: i64) -> DbResult<()> {
        debug!(product_id = %id, "Soft-deleting product");

        let result = sqlx::query("UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        info!(product_id = %id, "Product deactivated");
        Ok(())
    }

    /// Counts active products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts active products at or below their alert threshold.
    pub async fn count_low_stock(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE is_active = 1 AND quantity <= alert_threshold",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Categories
    // -------------------------------------------------------------------------

    /// Inserts a category (reference data for products).
    pub async fn insert_category(&self, name: &str, description: Option<&str>) -> DbResult<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "category name".to_string(),
            }
            .into());
        }

        let result = sqlx::query(
            "INSERT INTO categories (name, description, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("category", name),
            other => other,
        })?;

        Ok(Category {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = db().await;
        let repo = db.products();

        let inserted = repo
            .insert(&NewProduct::new("P-RICE", "Rice 5kg", 100_000, 12))
            .await
            .unwrap();
        assert!(inserted.id > 0);

        let by_code = repo.get_by_code("P-RICE").await.unwrap().unwrap();
        assert_eq!(by_code, repo.get_by_id(inserted.id).await.unwrap().unwrap());
        assert_eq!(by_code.selling_price_cents, 100_000);
        assert_eq!(by_code.alert_threshold, 10);
        assert!(repo.get_by_code("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let db = db().await;
        let repo = db.products();

        repo.insert(&NewProduct::new("P1", "One", 100, 1)).await.unwrap();
        let err = repo
            .insert(&NewProduct::new("P1", "Other", 100, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_product_rejected() {
        let db = db().await;
        let err = db
            .products()
            .insert(&NewProduct::new("bad code", "X", 100, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[tokio::test]
    async fn test_adjust_quantity_records_movement() {
        let db = db().await;
        let repo = db.products();
        let p = repo.insert(&NewProduct::new("P1", "One", 100, 5)).await.unwrap();

        let left = repo
            .adjust_quantity(p.id, -3, MovementType::Out, Some("sale VNT-1"))
            .await
            .unwrap();
        assert_eq!(left, 2);

        let movements = repo.movements(p.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        assert_eq!(movements[0].quantity, 3);
        assert_eq!(movements[0].reason.as_deref(), Some("sale VNT-1"));
    }

    #[tokio::test]
    async fn test_adjust_quantity_never_goes_negative() {
        let db = db().await;
        let repo = db.products();
        let p = repo.insert(&NewProduct::new("P1", "One", 100, 2)).await.unwrap();

        let err = repo
            .adjust_quantity(p.id, -3, MovementType::Out, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation(_)));

        // Nothing written
        assert_eq!(repo.get_by_id(p.id).await.unwrap().unwrap().quantity, 2);
        assert!(repo.movements(p.id).await.unwrap().is_empty());

        let err = repo
            .adjust_quantity(999, 1, MovementType::In, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adjustments_on_shared_file() {
        let path = std::env::temp_dir().join(format!(
            "vendra-adjust-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let db = Database::new(DbConfig::new(path.clone()).max_connections(4)).await.unwrap();
        let p = db
            .products()
            .insert(&NewProduct::new("P1", "One", 100, 5))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = db.products();
            handles.push(tokio::spawn(async move {
                let note = format!("sale VNT-{i}");
                repo.adjust_quantity(p.id, -1, MovementType::Out, Some(&note)).await
            }));
        }

        let mut taken = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => taken += 1,
                Err(e) => assert!(matches!(e, DbError::CheckViolation(_)), "{e}"),
            }
        }

        let repo = db.products();
        assert_eq!(taken, 5);
        assert_eq!(repo.get_by_id(p.id).await.unwrap().unwrap().quantity, 0);
        assert_eq!(repo.movements(p.id).await.unwrap().len(), 5);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn test_low_stock_and_soft_delete() {
        let db = db().await;
        let repo = db.products();

        let mut low = NewProduct::new("LOW", "Low", 100, 3);
        low.alert_threshold = 5;
        let low = repo.insert(&low).await.unwrap();
        repo.insert(&NewProduct::new("FULL", "Full", 100, 50)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.count_low_stock().await.unwrap(), 1);
        assert_eq!(repo.list_low_stock().await.unwrap()[0].code, "LOW");

        repo.soft_delete(low.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.count_low_stock().await.unwrap(), 0);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);

        // Soft-deleted products are still loadable
        assert!(!repo.get_by_id(low.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_category_reference() {
        let db = db().await;
        let repo = db.products();

        let cat = repo.insert_category("Grocery", None).await.unwrap();
        let mut new = NewProduct::new("P1", "Rice", 100, 1);
        new.category_id = Some(cat.id);
        let p = repo.insert(&new).await.unwrap();
        assert_eq!(p.category_id, Some(cat.id));

        let mut orphan = NewProduct::new("P2", "Oil", 100, 1);
        orphan.category_id = Some(cat.id + 100);
        assert!(matches!(
            repo.insert(&orphan).await.unwrap_err(),
            DbError::ForeignKeyViolation { .. }
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaleError {
    #[error("product {0} not found")]
    UnknownProduct(i64),
    #[error("product {0} is inactive")]
    InactiveProduct(i64),
    #[error("insufficient stock for product {product_id} (requested {requested}, available {available})")]
    OutOfStock {
        product_id: i64,
        requested: i32,
        available: i32,
    },
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct NewSaleLine {
    pub product_id: i64,
    pub qty: i32,
}

#[derive(Debug, Serialize, Clone)]
pub struct SaleLine {
    pub product_id: i64,
    pub qty: i32,
    pub unit_price: i64,
}

#[derive(Debug, Serialize)]
pub struct Sale {
    pub id: i64,
    pub manager_id: i64,
    pub customer_id: i64,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<SaleLine>,
}

#[derive(FromRow)]
struct SaleHeaderRow {
    id: i64,
    created_at: DateTime<Utc>,
}

struct ReservedLine {
    unit_price: i64,
}

/// Records a sale as one atomic unit of work: header, per-line stock
/// reservation, line rows. Any line failure drops the transaction, so no
/// header, line, or stock decrement from this call survives.
///
/// Line prices are captured from the locked product rows at sale time; the
/// request never supplies them.
pub async fn record_sale(
    pool: &PgPool,
    manager_id: i64,
    customer_id: i64,
    lines: &[NewSaleLine],
) -> Result<Sale, SaleError> {
    let mut tx = pool.begin().await?;

    let header = sqlx::query_as::<_, SaleHeaderRow>(
        "INSERT INTO sales (manager_id, customer_id) VALUES ($1, $2) RETURNING id, created_at",
    )
    .bind(manager_id)
    .bind(customer_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut recorded = Vec::with_capacity(lines.len());
    for line in lines {
        let reserved = reserve_stock(&mut tx, line.product_id, line.qty).await?;
        sqlx::query(
            "INSERT INTO sale_lines (sale_id, product_id, qty, unit_price) VALUES ($1, $2, $3, $4)",
        )
        .bind(header.id)
        .bind(line.product_id)
        .bind(line.qty)
        .bind(reserved.unit_price)
        .execute(&mut *tx)
        .await?;
        recorded.push(SaleLine {
            product_id: line.product_id,
            qty: line.qty,
            unit_price: reserved.unit_price,
        });
    }

    tx.commit().await?;

    Ok(Sale {
        id: header.id,
        manager_id,
        customer_id,
        created_at: header.created_at,
        lines: recorded,
    })
}

/// One reservation step: lock the product row for the rest of the enclosing
/// transaction, validate, decrement. The `FOR UPDATE` lock serialises
/// concurrent reservations of the same product, so two sales can never both
/// pass the stock check against a stale quantity.
async fn reserve_stock(
    tx: &mut Transaction<'_, Postgres>,
    product_id: i64,
    qty: i32,
) -> Result<ReservedLine, SaleError> {
    let row = sqlx::query("SELECT price, qty, active FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await?;

    let Some(row) = row else {
        return Err(SaleError::UnknownProduct(product_id));
    };
    let unit_price: i64 = row.try_get("price")?;
    let on_hand: i32 = row.try_get("qty")?;
    let active: bool = row.try_get("active")?;

    if !active {
        return Err(SaleError::InactiveProduct(product_id));
    }
    if qty > on_hand {
        return Err(SaleError::OutOfStock {
            product_id,
            requested: qty,
            available: on_hand,
        });
    }

    sqlx::query("UPDATE products SET qty = qty - $1 WHERE id = $2")
        .bind(qty)
        .bind(product_id)
        .execute(&mut **tx)
        .await?;

    Ok(ReservedLine { unit_price })
}

/// Total revenue recorded by one manager across all their sales.
pub async fn sales_total(pool: &PgPool, manager_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(sl.qty * sl.unit_price), 0)::BIGINT
         FROM sales s
         JOIN sale_lines sl ON sl.sale_id = s.id
         WHERE s.manager_id = $1",
    )
    .bind(manager_id)
    .fetch_one(pool)
    .await
}

use chrono::Utc;
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::{sqlite::SqliteDatabaseError, traits::InventoryWrite},
    db_types::{Inventory, ProductId},
};

pub async fn fetch_inventory(
    product_id: ProductId,
    conn: &mut SqliteConnection,
) -> Result<Option<Inventory>, SqliteDatabaseError> {
    let inventory = sqlx::query_as::<_, Inventory>(
        r#"
            SELECT product_id, quantity, locked_quantity, threshold_quantity, version, updated_at
            FROM inventory
            WHERE product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await?;
    Ok(inventory)
}

pub async fn insert_inventory(
    product_id: ProductId,
    quantity: i64,
    threshold_quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<Inventory, SqliteDatabaseError> {
    let inventory = sqlx::query_as::<_, Inventory>(
        r#"
            INSERT INTO inventory (product_id, quantity, locked_quantity, threshold_quantity, version, updated_at)
            VALUES ($1, $2, 0, $3, 0, $4)
            RETURNING product_id, quantity, locked_quantity, threshold_quantity, version, updated_at
        "#,
    )
    .bind(product_id)
    .bind(quantity)
    .bind(threshold_quantity)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Inventory row created for product #{product_id}");
    Ok(inventory)
}

/// A single conditional update. Zero rows affected means the version moved on under us.
pub async fn compare_and_set(
    product_id: ProductId,
    write: InventoryWrite,
    conn: &mut SqliteConnection,
) -> Result<bool, SqliteDatabaseError> {
    let result = sqlx::query(
        r#"
            UPDATE inventory
            SET quantity = $1,
                locked_quantity = $2,
                threshold_quantity = $3,
                version = version + 1,
                updated_at = $4
            WHERE product_id = $5 AND version = $6
        "#,
    )
    .bind(write.quantity)
    .bind(write.locked_quantity)
    .bind(write.threshold_quantity)
    .bind(Utc::now())
    .bind(product_id)
    .bind(write.expected_version)
    .execute(conn)
    .await?;
    let updated = result.rows_affected() == 1;
    trace!("🗃️ Inventory CAS for product #{product_id} at version {}: {updated}", write.expected_version);
    Ok(updated)
}

use chrono::Utc;
use log::{debug, trace};
use sqlx::{types::Json, FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db::{sqlite::SqliteDatabaseError, traits::OrderQueryFilter},
    db_types::{
        Actor,
        Money,
        NewOrder,
        Order,
        OrderEvent,
        OrderItem,
        OrderLog,
        OrderNo,
        OrderStatus,
        ProductId,
        ProductSnapshot,
    },
};

const ORDER_COLUMNS: &str = "id, order_no, user_id, store_id, status, total_amount, refunded_amount, remark, \
                             payment_no, created_at, updated_at";

#[derive(FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    product_id: ProductId,
    quantity: i64,
    snapshot: Json<ProductSnapshot>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            snapshot: row.snapshot.0,
        }
    }
}

/// Inserts a new order and its line items using the given connection. This is not atomic. Embed this call
/// inside a transaction if you need to ensure atomicity.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SqliteDatabaseError> {
    let now = Utc::now();
    let total = order.total_amount();
    let sql = format!(
        r#"
            INSERT INTO orders (order_no, user_id, store_id, status, total_amount, refunded_amount, remark, payment_no,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $8)
            RETURNING {ORDER_COLUMNS}
        "#
    );
    let mut inserted = sqlx::query_as::<_, Order>(&sql)
        .bind(&order.order_no)
        .bind(order.user_id)
        .bind(order.store_id)
        .bind(OrderStatus::AwaitingPayment)
        .bind(total)
        .bind(&order.remark)
        .bind(&order.payment_no)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
    for item in order.items {
        sqlx::query(
            r#"
                INSERT INTO order_items (order_id, product_id, quantity, snapshot)
                VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(inserted.id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(Json(&item.snapshot))
        .execute(&mut *conn)
        .await?;
    }
    inserted.items = fetch_order_items(inserted.id, conn).await?;
    debug!("🗃️ Order {} saved with id {} ({} items, total {total})", inserted.order_no, inserted.id, inserted.items.len());
    Ok(inserted)
}

async fn fetch_order_items(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, SqliteDatabaseError> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT id, order_id, product_id, quantity, snapshot FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(OrderItem::from).collect())
}

async fn with_items(order: Option<Order>, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    match order {
        Some(mut order) => {
            order.items = fetch_order_items(order.id, conn).await?;
            Ok(Some(order))
        },
        None => Ok(None),
    }
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let order = sqlx::query_as::<_, Order>(&sql).bind(id).fetch_optional(&mut *conn).await?;
    with_items(order, conn).await
}

pub async fn fetch_order_by_no(
    order_no: &OrderNo,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1");
    let order = sqlx::query_as::<_, Order>(&sql).bind(order_no).fetch_optional(&mut *conn).await?;
    with_items(order, conn).await
}

/// Fetches orders matching every criterion in the filter, oldest first.
pub async fn search_orders(
    query: OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders "));
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(store_id) = query.store_id {
        where_clause.push("store_id = ");
        where_clause.push_bind_unseparated(store_id);
    }
    if let Some(payment_no) = query.payment_no {
        where_clause.push("payment_no = ");
        where_clause.push_bind_unseparated(payment_no);
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    if let Some(statuses) = query.status.filter(|s| !s.is_empty()) {
        where_clause.push("status IN (");
        let mut first = true;
        for status in statuses {
            if !first {
                where_clause.push_unseparated(", ");
            }
            where_clause.push_bind_unseparated(status);
            first = false;
        }
        where_clause.push_unseparated(")");
    }
    builder.push(" ORDER BY id ASC");
    trace!("🗃️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(&mut *conn).await?;
    let mut result = Vec::with_capacity(orders.len());
    for mut order in orders {
        order.items = fetch_order_items(order.id, conn).await?;
        result.push(order);
    }
    trace!("🗃️ Result of search_orders: {}", result.len());
    Ok(result)
}

/// Compare-and-swap on the order status. Returns `false` if the order was not in status `from`.
pub async fn update_order_status(
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<bool, SqliteDatabaseError> {
    let result = sqlx::query("UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4")
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(from)
        .execute(conn)
        .await?;
    trace!("🗃️ Order #{id} status {from} -> {to}: {} rows", result.rows_affected());
    Ok(result.rows_affected() == 1)
}

pub async fn set_refunded_amount(id: i64, amount: Money, conn: &mut SqliteConnection) -> Result<(), SqliteDatabaseError> {
    sqlx::query("UPDATE orders SET refunded_amount = $1, updated_at = $2 WHERE id = $3")
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_order_log(
    order_id: i64,
    event: OrderEvent,
    status: OrderStatus,
    message: &str,
    actor: Actor,
    conn: &mut SqliteConnection,
) -> Result<OrderLog, SqliteDatabaseError> {
    let log = sqlx::query_as::<_, OrderLog>(
        r#"
            INSERT INTO order_logs (order_id, event, status, message, actor, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, event, status, message, actor, created_at
        "#,
    )
    .bind(order_id)
    .bind(event)
    .bind(status)
    .bind(message)
    .bind(actor.to_string())
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(log)
}

pub async fn fetch_order_logs(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderLog>, SqliteDatabaseError> {
    let logs = sqlx::query_as::<_, OrderLog>(
        r#"
            SELECT id, order_id, event, status, message, actor, created_at
            FROM order_logs
            WHERE order_id = $1
            ORDER BY id ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    Ok(logs)
}

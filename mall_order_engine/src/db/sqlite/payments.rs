use chrono::Utc;
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::{sqlite::SqliteDatabaseError, traits::PaymentUpdate},
    db_types::{NewPayment, Payment, PaymentMethod, PaymentNo, PaymentStatus, PayoutAccount, StoreId},
};

const PAYMENT_COLUMNS: &str = "id, payment_no, user_id, status, amount, refunded_amount, payment_method, entity_type, \
                               entity_id, trade_no, created_at, payment_request_time, transaction_time, updated_at";

pub async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, SqliteDatabaseError> {
    let sql = format!(
        r#"
            INSERT INTO payments (payment_no, user_id, status, amount, refunded_amount, entity_type, entity_id,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $7)
            RETURNING {PAYMENT_COLUMNS}
        "#
    );
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(&payment.payment_no)
        .bind(payment.user_id)
        .bind(PaymentStatus::Pending)
        .bind(payment.amount)
        .bind(payment.entity_type)
        .bind(payment.entity_id)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;
    debug!("🗃️ Payment {} saved with id {} for {}", payment.payment_no, payment.id, payment.amount);
    Ok(payment)
}

pub async fn fetch_payment_by_no(
    payment_no: &PaymentNo,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SqliteDatabaseError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_no = $1");
    let payment = sqlx::query_as::<_, Payment>(&sql).bind(payment_no).fetch_optional(conn).await?;
    Ok(payment)
}

/// Applies the update if, and only if, the payment is still in the `expected` status.
pub async fn update_payment(
    payment_no: &PaymentNo,
    expected: PaymentStatus,
    update: PaymentUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE payments SET updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ");
        builder.push_bind(status);
    }
    if let Some(method) = update.payment_method {
        builder.push(", payment_method = ");
        builder.push_bind(method);
    }
    if let Some(at) = update.payment_request_time {
        builder.push(", payment_request_time = ");
        builder.push_bind(at);
    }
    if let Some(trade_no) = update.trade_no {
        builder.push(", trade_no = ");
        builder.push_bind(trade_no);
    }
    if let Some(at) = update.transaction_time {
        builder.push(", transaction_time = ");
        builder.push_bind(at);
    }
    if let Some(amount) = update.refunded_amount {
        builder.push(", refunded_amount = ");
        builder.push_bind(amount);
    }
    builder.push(" WHERE payment_no = ");
    builder.push_bind(payment_no);
    builder.push(" AND status = ");
    builder.push_bind(expected);
    builder.push(format!(" RETURNING {PAYMENT_COLUMNS}"));
    trace!("🗃️ Executing query: {}", builder.sql());
    let payment = builder.build_query_as::<Payment>().fetch_optional(conn).await?;
    if payment.is_none() {
        debug!("🗃️ Payment {payment_no} was not in {expected} status. Nothing was updated");
    }
    Ok(payment)
}

pub async fn fetch_payments_with_status(
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, SqliteDatabaseError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = $1 ORDER BY id ASC");
    let payments = sqlx::query_as::<_, Payment>(&sql).bind(status).fetch_all(conn).await?;
    Ok(payments)
}

pub async fn fetch_payout_account(
    store_id: StoreId,
    method: PaymentMethod,
    conn: &mut SqliteConnection,
) -> Result<Option<PayoutAccount>, SqliteDatabaseError> {
    let account = sqlx::query_as::<_, PayoutAccount>(
        r#"
            SELECT store_id, payment_method, account, updated_at
            FROM payout_accounts
            WHERE store_id = $1 AND payment_method = $2
        "#,
    )
    .bind(store_id)
    .bind(method)
    .fetch_optional(conn)
    .await?;
    Ok(account)
}

pub async fn upsert_payout_account(
    store_id: StoreId,
    method: PaymentMethod,
    account: &str,
    conn: &mut SqliteConnection,
) -> Result<PayoutAccount, SqliteDatabaseError> {
    let account = sqlx::query_as::<_, PayoutAccount>(
        r#"
            INSERT INTO payout_accounts (store_id, payment_method, account, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (store_id, payment_method) DO UPDATE SET account = excluded.account, updated_at = excluded.updated_at
            RETURNING store_id, payment_method, account, updated_at
        "#,
    )
    .bind(store_id)
    .bind(method)
    .bind(account)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payout account for store #{store_id} ({method}) updated");
    Ok(account)
}

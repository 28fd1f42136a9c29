use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewPayment, NewPaymentRow, PaymentRecord, PaymentRow, PaymentStatus, Settlement};
use crate::schema::payments;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),
    #[error("database query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("corrupt payment record: {0}")]
    Corrupt(String),
}

/// External ids of synchronous confirmations start with this.
pub fn confirmation_prefix(order_id: Uuid) -> String {
    format!("{order_id}-confirm-")
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts the payment unless its external id is known, then returns the
    /// stored record. Existing records are never modified.
    async fn register(&self, payment: &NewPayment) -> Result<PaymentRecord, StoreError>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<PaymentRecord>, StoreError>;

    /// Settles a PENDING payment. `None` if it was settled already.
    async fn settle(&self, id: Uuid, settlement: &Settlement) -> Result<Option<PaymentRecord>, StoreError>;

    /// Stores approved payments in one transaction. Known external ids are
    /// overwritten so a repeated confirmation does not add rows, and
    /// confirmation rows of the order missing from `confirmed` are deleted.
    async fn record_confirmed(
        &self,
        order_id: Uuid,
        confirmed: &[NewPayment],
    ) -> Result<Vec<PaymentRecord>, StoreError>;

    /// Newest first.
    async fn for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError>;
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn register(&self, payment: &NewPayment) -> Result<PaymentRecord, StoreError> {
        let row = NewPaymentRow::try_from(payment)?;
        let mut conn = self.pool.get().await?;

        diesel::insert_into(payments::table)
            .values(&row)
            .on_conflict(payments::external_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        let stored = payments::table
            .filter(payments::external_id.eq(&row.external_id))
            .select(PaymentRow::as_select())
            .first::<PaymentRow>(&mut conn)
            .await?;
        stored.try_into()
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = payments::table
            .filter(payments::external_id.eq(external_id))
            .select(PaymentRow::as_select())
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()?;
        row.map(PaymentRecord::try_from).transpose()
    }

    async fn settle(&self, id: Uuid, settlement: &Settlement) -> Result<Option<PaymentRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            payments::table
                .filter(payments::id.eq(id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(settlement.status.as_str()),
            payments::success.eq(settlement.status == PaymentStatus::Approved),
            payments::failure_reason.eq(settlement.failure_reason.as_deref()),
            payments::updated_at.eq(Utc::now()),
        ))
        .returning(PaymentRow::as_returning())
        .get_result::<PaymentRow>(&mut conn)
        .await
        .optional()?;
        row.map(PaymentRecord::try_from).transpose()
    }

    async fn record_confirmed(
        &self,
        order_id: Uuid,
        confirmed: &[NewPayment],
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let rows = confirmed
            .iter()
            .map(NewPaymentRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let keep: Vec<String> = rows.iter().map(|row| row.external_id.clone()).collect();
        let mut conn = self.pool.get().await?;

        let stored = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    diesel::delete(
                        payments::table
                            .filter(payments::order_id.eq(order_id))
                            .filter(payments::external_id.like(confirmation_prefix(order_id) + "%"))
                            .filter(payments::external_id.ne_all(keep)),
                    )
                    .execute(conn)
                    .await?;

                    let mut stored = Vec::with_capacity(rows.len());
                    for row in &rows {
                        let saved = diesel::insert_into(payments::table)
                            .values(row)
                            .on_conflict(payments::external_id)
                            .do_update()
                            .set((
                                payments::method.eq(excluded(payments::method)),
                                payments::amount.eq(excluded(payments::amount)),
                                payments::status.eq(excluded(payments::status)),
                                payments::success.eq(excluded(payments::success)),
                                payments::failure_reason.eq(None::<String>),
                                payments::updated_at.eq(Utc::now()),
                            ))
                            .returning(PaymentRow::as_returning())
                            .get_result::<PaymentRow>(conn)
                            .await?;
                        stored.push(saved);
                    }
                    Ok(stored)
                })
            })
            .await?;

        stored.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = payments::table
            .filter(payments::order_id.eq(order_id))
            .order(payments::created_at.desc())
            .select(PaymentRow::as_select())
            .load::<PaymentRow>(&mut conn)
            .await?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{OrderStatus, OrderView};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewOrder, NewOrderRow, OrderRow};
use crate::schema::orders;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),
    #[error("database query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("corrupt order record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &NewOrder) -> Result<OrderView, StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<OrderView>, StoreError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<OrderView>, StoreError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<OrderView>, StoreError>;

    /// Moves the order to `to` only while it is still in `from`. Returns the
    /// updated order, or `None` if the order is missing or already moved on.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderView>, StoreError>;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn views(rows: Vec<OrderRow>) -> Result<Vec<OrderView>, StoreError> {
    rows.into_iter().map(OrderView::try_from).collect()
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &NewOrder) -> Result<OrderView, StoreError> {
        let row = NewOrderRow::try_from(order)?;
        let mut conn = self.pool.get().await?;
        let stored = diesel::insert_into(orders::table)
            .values(&row)
            .returning(OrderRow::as_returning())
            .get_result::<OrderRow>(&mut conn)
            .await?;
        stored.try_into()
    }

    async fn find(&self, id: Uuid) -> Result<Option<OrderView>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table
            .filter(orders::id.eq(id))
            .select(OrderRow::as_select())
            .first::<OrderRow>(&mut conn)
            .await
            .optional()?;
        row.map(OrderView::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<OrderView>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .order(orders::created_at.desc())
            .select(OrderRow::as_select())
            .load::<OrderRow>(&mut conn)
            .await?;
        views(rows)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<OrderView>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .select(OrderRow::as_select())
            .load::<OrderRow>(&mut conn)
            .await?;
        views(rows)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderView>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            orders::table
                .filter(orders::id.eq(id))
                .filter(orders::status.eq(from.as_str())),
        )
        .set((
            orders::status.eq(to.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(OrderRow::as_returning())
        .get_result::<OrderRow>(&mut conn)
        .await
        .optional()?;
        row.map(OrderView::try_from).transpose()
    }
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::money::{from_decimal, to_decimal};
use shared::{OrderItem, OrderStatus, OrderView};
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: i64,
    pub total: BigDecimal,
    pub items: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrderRow {
    pub id: Uuid,
    pub user_id: i64,
    pub total: BigDecimal,
    pub items: serde_json::Value,
    pub status: String,
}

/// An order about to be persisted as PENDING.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: i64,
    pub total: f64,
    pub items: Vec<OrderItem>,
}

impl TryFrom<&NewOrder> for NewOrderRow {
    type Error = StoreError;

    fn try_from(order: &NewOrder) -> Result<Self, Self::Error> {
        let total = to_decimal(order.total)
            .ok_or_else(|| StoreError::Corrupt(format!("order total {} is not finite", order.total)))?;
        let items = serde_json::to_value(&order.items)
            .map_err(|e| StoreError::Corrupt(format!("order items: {e}")))?;
        Ok(Self {
            id: order.id,
            user_id: order.user_id,
            total,
            items,
            status: OrderStatus::Pending.as_str().to_string(),
        })
    }
}

impl TryFrom<OrderRow> for OrderView {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", row.id)))?;
        let total = from_decimal(&row.total)
            .ok_or_else(|| StoreError::Corrupt(format!("order {}: total out of range", row.id)))?;
        let items: Vec<OrderItem> = serde_json::from_value(row.items)
            .map_err(|e| StoreError::Corrupt(format!("order {}: items: {e}", row.id)))?;

        Ok(OrderView {
            id: row.id,
            user_id: row.user_id,
            total,
            items,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(status: &str, items: serde_json::Value) -> OrderRow {
        OrderRow {
            id: Uuid::new_v4(),
            user_id: 4,
            total: BigDecimal::from_str("300.50").unwrap(),
            items,
            status: status.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rows_become_views() {
        let items = serde_json::json!([{ "productId": 1, "quantity": 2, "subtotal": 300.5 }]);
        let view = OrderView::try_from(row("PAID", items)).unwrap();
        assert_eq!(view.status, OrderStatus::Paid);
        assert_eq!(view.total, 300.5);
        assert_eq!(view.items[0].product_id, 1);
    }

    #[test]
    fn unknown_statuses_are_reported_as_corrupt() {
        let err = OrderView::try_from(row("SHIPPED", serde_json::json!([]))).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn new_orders_are_stored_pending_with_cent_totals() {
        let order = NewOrder {
            id: Uuid::new_v4(),
            user_id: 1,
            total: 0.1 + 0.2,
            items: vec![],
        };
        let row = NewOrderRow::try_from(&order).unwrap();
        assert_eq!(row.status, "PENDING");
        assert_eq!(row.total, BigDecimal::from_str("0.30").unwrap());
    }
}

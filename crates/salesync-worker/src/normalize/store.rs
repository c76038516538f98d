//! Normalized table writes
//!
//! One sale is written in a single transaction: customer, order, then the
//! child collections. Items, choices, payments and delivery are replaced
//! wholesale (delete, then insert) so re-applying the same snapshot never
//! duplicates rows. Status history is upserted per `(provider, history_id)`.

use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;

use super::customer::upsert_customer;
use super::extract::{DeliveryFacts, ItemLine, NormalizedSale, PaymentLine, StatusEntry};
use crate::error::WorkerResult;

/// Rows per multi-row INSERT, well under the bind parameter limit
const INSERT_CHUNK: usize = 500;

/// Natural key of an order
#[derive(Debug, Clone, Copy)]
pub struct OrderKey<'a> {
    pub provider: &'a str,
    pub store_id: &'a str,
    pub order_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredSale {
    pub order_ref: i64,
    pub customer_id: Option<i64>,
}

/// Write one normalized sale. Nothing is committed if any step fails.
pub async fn store_sale(
    pool: &PgPool,
    key: OrderKey<'_>,
    received_at: chrono::DateTime<chrono::Utc>,
    sale: &NormalizedSale,
) -> WorkerResult<StoredSale> {
    let mut tx = pool.begin().await?;

    let customer_id = match &sale.customer {
        Some(candidate) => upsert_customer(&mut tx, key.provider, candidate).await?,
        None => None,
    };

    let order_ref = upsert_order(&mut tx, key, received_at, sale, customer_id).await?;

    replace_items(&mut tx, key, &sale.items).await?;
    replace_delivery(&mut tx, order_ref, sale.delivery.as_ref()).await?;
    replace_payments(&mut tx, order_ref, &sale.payments).await?;
    upsert_status_history(&mut tx, key.provider, order_ref, &sale.status_history).await?;

    tx.commit().await?;

    Ok(StoredSale {
        order_ref,
        customer_id,
    })
}

async fn upsert_order(
    tx: &mut Transaction<'_, Postgres>,
    key: OrderKey<'_>,
    received_at: chrono::DateTime<chrono::Utc>,
    sale: &NormalizedSale,
    customer_id: Option<i64>,
) -> WorkerResult<i64> {
    let order = &sale.order;
    let customer_name = match customer_id {
        Some(_) => None,
        None => sale.customer_name.as_deref(),
    };

    let order_ref: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO orders (
            provider, store_id, order_id, received_at,
            sale_type_id, shift_date, source_created_at, source_updated_at,
            sale_number, description, canceled, canceled_items_count,
            notes, discount_reason, increase_reason,
            total_amount, total_discount, total_increase, total_items_amount,
            items_count, customer_id, customer_name, updated_at
        )
        VALUES (
            $1, $2, $3, $4,
            $5, $6, $7, $8,
            $9, $10, $11, $12,
            $13, $14, $15,
            $16, $17, $18, $19,
            $20, $21, $22, NOW()
        )
        ON CONFLICT (provider, store_id, order_id) DO UPDATE SET
            received_at = EXCLUDED.received_at,
            sale_type_id = EXCLUDED.sale_type_id,
            shift_date = EXCLUDED.shift_date,
            source_created_at = EXCLUDED.source_created_at,
            source_updated_at = EXCLUDED.source_updated_at,
            sale_number = EXCLUDED.sale_number,
            description = EXCLUDED.description,
            canceled = EXCLUDED.canceled,
            canceled_items_count = EXCLUDED.canceled_items_count,
            notes = EXCLUDED.notes,
            discount_reason = EXCLUDED.discount_reason,
            increase_reason = EXCLUDED.increase_reason,
            total_amount = EXCLUDED.total_amount,
            total_discount = EXCLUDED.total_discount,
            total_increase = EXCLUDED.total_increase,
            total_items_amount = EXCLUDED.total_items_amount,
            items_count = EXCLUDED.items_count,
            customer_id = EXCLUDED.customer_id,
            customer_name = EXCLUDED.customer_name,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(key.provider)
    .bind(key.store_id)
    .bind(key.order_id)
    .bind(received_at)
    .bind(order.sale_type_id)
    .bind(order.shift_date)
    .bind(order.source_created_at)
    .bind(order.source_updated_at)
    .bind(&order.sale_number)
    .bind(&order.description)
    .bind(order.canceled)
    .bind(order.canceled_items_count)
    .bind(&order.notes)
    .bind(&order.discount_reason)
    .bind(&order.increase_reason)
    .bind(order.total_amount)
    .bind(order.total_discount)
    .bind(order.total_increase)
    .bind(order.total_items_amount)
    .bind(order.items_count)
    .bind(customer_id)
    .bind(customer_name)
    .fetch_one(&mut **tx)
    .await?;

    Ok(order_ref)
}

async fn replace_items(
    tx: &mut Transaction<'_, Postgres>,
    key: OrderKey<'_>,
    items: &[ItemLine],
) -> WorkerResult<()> {
    sqlx::query(
        "DELETE FROM order_item_choices WHERE provider = $1 AND store_id = $2 AND order_id = $3",
    )
    .bind(key.provider)
    .bind(key.store_id)
    .bind(key.order_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM order_items WHERE provider = $1 AND store_id = $2 AND order_id = $3")
        .bind(key.provider)
        .bind(key.store_id)
        .bind(key.order_id)
        .execute(&mut **tx)
        .await?;

    for chunk in items.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO order_items (
                provider, store_id, order_id, line, source_item_id, name,
                integration_code, quantity, unit_price, total_price, deleted, raw_item
            )
            "#,
        );

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(key.provider)
                .push_bind(key.store_id)
                .push_bind(key.order_id)
                .push_bind(item.line)
                .push_bind(&item.source_item_id)
                .push_bind(&item.name)
                .push_bind(&item.integration_code)
                .push_bind(item.quantity)
                .push_bind(item.unit_price)
                .push_bind(item.total_price)
                .push_bind(item.deleted)
                .push_bind(&item.raw);
        });

        builder.build().execute(&mut **tx).await?;
    }

    let choices: Vec<_> = items
        .iter()
        .flat_map(|item| item.choices.iter().map(move |choice| (item.line, choice)))
        .collect();

    for chunk in choices.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO order_item_choices (
                provider, store_id, order_id, line, choice_line, name,
                integration_code, quantity, additional_price, raw_choice
            )
            "#,
        );

        builder.push_values(chunk, |mut b, (line, choice)| {
            b.push_bind(key.provider)
                .push_bind(key.store_id)
                .push_bind(key.order_id)
                .push_bind(*line)
                .push_bind(choice.choice_line)
                .push_bind(&choice.name)
                .push_bind(&choice.integration_code)
                .push_bind(choice.quantity)
                .push_bind(choice.additional_price)
                .push_bind(&choice.raw);
        });

        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

async fn replace_delivery(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: i64,
    delivery: Option<&DeliveryFacts>,
) -> WorkerResult<()> {
    sqlx::query("DELETE FROM order_deliveries WHERE order_ref = $1")
        .bind(order_ref)
        .execute(&mut **tx)
        .await?;

    let Some(delivery) = delivery else {
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO order_deliveries (
            order_ref, delivery_fee, delivered_by, street, street_number, complement,
            district, city, state, postal_code, reference, raw_delivery
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order_ref)
    .bind(delivery.delivery_fee)
    .bind(&delivery.delivered_by)
    .bind(&delivery.street)
    .bind(&delivery.street_number)
    .bind(&delivery.complement)
    .bind(&delivery.district)
    .bind(&delivery.city)
    .bind(&delivery.state)
    .bind(&delivery.postal_code)
    .bind(&delivery.reference)
    .bind(&delivery.raw)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn replace_payments(
    tx: &mut Transaction<'_, Postgres>,
    order_ref: i64,
    payments: &[PaymentLine],
) -> WorkerResult<()> {
    sqlx::query("DELETE FROM order_payments WHERE order_ref = $1")
        .bind(order_ref)
        .execute(&mut **tx)
        .await?;

    for chunk in payments.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO order_payments (order_ref, line, method, amount, change_for, raw_payment) ",
        );

        builder.push_values(chunk, |mut b, payment| {
            b.push_bind(order_ref)
                .push_bind(payment.line)
                .push_bind(&payment.method)
                .push_bind(payment.amount)
                .push_bind(payment.change_for)
                .push_bind(&payment.raw);
        });

        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

async fn upsert_status_history(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    order_ref: i64,
    entries: &[StatusEntry],
) -> WorkerResult<()> {
    let entries = latest_per_history_id(entries);

    for chunk in entries.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO order_status_history (provider, history_id, order_ref, status, changed_at, raw_history) ",
        );

        builder.push_values(chunk, |mut b, entry| {
            b.push_bind(provider)
                .push_bind(&entry.history_id)
                .push_bind(order_ref)
                .push_bind(&entry.status)
                .push_bind(entry.changed_at)
                .push_bind(&entry.raw);
        });

        builder.push(
            r#"
            ON CONFLICT (provider, history_id) DO UPDATE SET
                order_ref = EXCLUDED.order_ref,
                status = EXCLUDED.status,
                changed_at = EXCLUDED.changed_at,
                raw_history = EXCLUDED.raw_history,
                updated_at = NOW()
            "#,
        );

        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

/// A single INSERT ... ON CONFLICT cannot touch the same key twice; the last
/// entry for an id wins
fn latest_per_history_id(entries: &[StatusEntry]) -> Vec<&StatusEntry> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&StatusEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match position.get(entry.history_id.as_str()) {
            Some(&index) => unique[index] = entry,
            None => {
                position.insert(entry.history_id.as_str(), unique.len());
                unique.push(entry);
            }
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, status: &str) -> StatusEntry {
        StatusEntry {
            history_id: id.into(),
            status: Some(status.into()),
            changed_at: None,
            raw: json!({}),
        }
    }

    #[test]
    fn test_duplicate_history_ids_keep_last() {
        let entries = [entry("1", "NEW"), entry("2", "NEW"), entry("1", "CONFIRMED")];
        let unique = latest_per_history_id(&entries);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].history_id, "1");
        assert_eq!(unique[0].status.as_deref(), Some("CONFIRMED"));
        assert_eq!(unique[1].history_id, "2");
    }
}

//! Customer deduplication
//!
//! Customers are unique per provider on each strong identifier independently.
//! The highest-priority identifier present (tax id, then email, phone and
//! external id) is the conflict target of the upsert. On conflict the key
//! column takes the new value and every other column is only back-filled when
//! the stored value is null.

use sqlx::{Postgres, Transaction};

use super::extract::CustomerCandidate;
use crate::error::WorkerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerKey {
    DocumentNumber,
    Email,
    Phone,
    ExternalId,
}

impl CustomerKey {
    /// Resolution order, strongest first
    pub const PRIORITY: [CustomerKey; 4] = [
        CustomerKey::DocumentNumber,
        CustomerKey::Email,
        CustomerKey::Phone,
        CustomerKey::ExternalId,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            CustomerKey::DocumentNumber => "document_number",
            CustomerKey::Email => "email",
            CustomerKey::Phone => "phone",
            CustomerKey::ExternalId => "external_id",
        }
    }

    pub fn value<'a>(&self, candidate: &'a CustomerCandidate) -> Option<&'a str> {
        match self {
            CustomerKey::DocumentNumber => candidate.document_number.as_deref(),
            CustomerKey::Email => candidate.email.as_deref(),
            CustomerKey::Phone => candidate.phone.as_deref(),
            CustomerKey::ExternalId => candidate.external_id.as_deref(),
        }
    }

    fn clear(&self, candidate: &mut CustomerCandidate) {
        match self {
            CustomerKey::DocumentNumber => candidate.document_number = None,
            CustomerKey::Email => candidate.email = None,
            CustomerKey::Phone => candidate.phone = None,
            CustomerKey::ExternalId => candidate.external_id = None,
        }
    }

    /// The identifier that selects the conflict target
    pub fn primary(candidate: &CustomerCandidate) -> Option<CustomerKey> {
        Self::PRIORITY
            .into_iter()
            .find(|key| key.value(candidate).is_some())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerIdentity {
    id: i64,
    document_number: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    external_id: Option<String>,
}

impl CustomerIdentity {
    fn holds(&self, key: CustomerKey, value: &str) -> bool {
        let held = match key {
            CustomerKey::DocumentNumber => self.document_number.as_deref(),
            CustomerKey::Email => self.email.as_deref(),
            CustomerKey::Phone => self.phone.as_deref(),
            CustomerKey::ExternalId => self.external_id.as_deref(),
        };
        held == Some(value)
    }
}

/// Upsert statement for a given conflict key
pub fn upsert_sql(key: CustomerKey) -> String {
    let assignments: Vec<String> = CustomerKey::PRIORITY
        .iter()
        .map(|column| {
            let name = column.column();
            if *column == key {
                format!("{name} = EXCLUDED.{name}")
            } else {
                format!("{name} = COALESCE(customers.{name}, EXCLUDED.{name})")
            }
        })
        .collect();

    let target = key.column();
    format!(
        r#"
        INSERT INTO customers (provider, document_number, email, phone, external_id, name, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        ON CONFLICT (provider, {target}) WHERE {target} IS NOT NULL
        DO UPDATE SET
            {assignments},
            name = COALESCE(customers.name, EXCLUDED.name),
            updated_at = NOW()
        RETURNING id
        "#,
        assignments = assignments.join(",\n            "),
    )
}

/// Resolve the candidate to a customer id, creating the customer if needed.
///
/// Returns `None` when the candidate has no strong identifier.
pub async fn upsert_customer(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    candidate: &CustomerCandidate,
) -> WorkerResult<Option<i64>> {
    let Some(key) = CustomerKey::primary(candidate) else {
        return Ok(None);
    };

    let existing: Vec<CustomerIdentity> = sqlx::query_as(
        r#"
        SELECT id, document_number, email, phone, external_id
        FROM customers
        WHERE provider = $1
          AND (document_number = $2 OR email = $3 OR phone = $4 OR external_id = $5)
        "#,
    )
    .bind(provider)
    .bind(&candidate.document_number)
    .bind(&candidate.email)
    .bind(&candidate.phone)
    .bind(&candidate.external_id)
    .fetch_all(&mut **tx)
    .await?;

    let candidate = without_foreign_identifiers(candidate, key, &existing);

    let id: i64 = sqlx::query_scalar(&upsert_sql(key))
        .bind(provider)
        .bind(&candidate.document_number)
        .bind(&candidate.email)
        .bind(&candidate.phone)
        .bind(&candidate.external_id)
        .bind(&candidate.name)
        .fetch_one(&mut **tx)
        .await?;

    Ok(Some(id))
}

/// Drop secondary identifiers already owned by a different customer than the
/// one matched by `key`, so the upsert cannot trip another unique index.
fn without_foreign_identifiers(
    candidate: &CustomerCandidate,
    key: CustomerKey,
    existing: &[CustomerIdentity],
) -> CustomerCandidate {
    let owner = key
        .value(candidate)
        .and_then(|value| existing.iter().find(|c| c.holds(key, value)))
        .map(|c| c.id);

    let mut kept = candidate.clone();

    for secondary in CustomerKey::PRIORITY.into_iter().filter(|k| *k != key) {
        let Some(value) = secondary.value(candidate) else {
            continue;
        };

        let foreign = existing
            .iter()
            .any(|c| Some(c.id) != owner && c.holds(secondary, value));

        if foreign {
            tracing::debug!(
                identifier = secondary.column(),
                "Identifier belongs to another customer; not copied"
            );
            secondary.clear(&mut kept);
        }
    }

    kept
}

//! Canonical sale extraction
//!
//! Turns a raw provider payload into a [`NormalizedSale`] without touching the
//! database. Every field is read through an ordered alias list; values that
//! cannot be interpreted are left empty.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use super::coerce;
use super::probe::{self, array_field, field, object_field, SALE_ENVELOPE};
use crate::error::{WorkerError, WorkerResult};

const ITEMS: &[&str] = &["items", "sale_items", "itens", "products", "order_items"];
const ITEMS_COUNT: &[&str] = &["total_items", "items_count"];

const ITEM_ID: &[&str] = &["id_sale_item", "id_item", "id"];
const ITEM_NAME: &[&str] = &["name", "desc_sale_item", "desc_item", "description"];
const INTEGRATION_CODE: &[&str] = &["integration_code", "cod_pdv", "code"];
const QUANTITY: &[&str] = &["quantity", "qty"];
const UNIT_PRICE: &[&str] = &["unit_price", "price"];
const TOTAL_PRICE: &[&str] = &["total_price", "total"];

const CHOICES: &[&str] = &["choices", "sale_item_choices", "options"];
const CHOICE_NAME: &[&str] = &["name", "desc_sale_item_choice", "desc_choice"];
const ADDITIONAL_PRICE: &[&str] = &["additional_price", "aditional_price", "price"];

const DELIVERY: &[&str] = &["delivery", "sale_delivery"];
const DELIVERY_FEE: &[&str] = &["delivery_fee", "fee"];
const DELIVERED_BY: &[&str] = &["delivery_man", "delivered_by", "delivery_by"];
const STREET: &[&str] = &["street_name", "street", "address"];
const STREET_NUMBER: &[&str] = &["street_number", "number"];
const COMPLEMENT: &[&str] = &["complement", "address_complement"];
const DISTRICT: &[&str] = &["district", "neighborhood"];
const CITY: &[&str] = &["city"];
const STATE: &[&str] = &["state", "uf"];
const POSTAL_CODE: &[&str] = &["postal_code", "zip_code", "cep"];
const REFERENCE: &[&str] = &["reference", "address_reference"];

const PAYMENTS: &[&str] = &["payments", "sale_payments", "payment_types"];
const PAYMENT_METHOD: &[&str] = &["payment_type", "desc_store_payment_type", "method"];
const PAYMENT_AMOUNT: &[&str] = &["payment_amount", "amount", "value"];
const CHANGE_FOR: &[&str] = &["change_for", "change"];

const STATUS_HISTORIES: &[&str] = &["status_histories", "sales_status_histories", "status_history"];
const HISTORY_ID: &[&str] = &["id_sale_status_history", "id"];
const HISTORY_STATUS: &[&str] = &["status", "desc_sale_status", "id_sale_status"];
const HISTORY_CHANGED_AT: &[&str] = &["created_at", "changed_at", "date"];

const CUSTOMER: &[&str] = &["customer"];
const CUSTOMER_EXTERNAL_ID: &[&str] = &["id_customer", "external_id"];
const CUSTOMER_EMAIL: &[&str] = &["email"];
const CUSTOMER_PHONE: &[&str] = &["phone", "phones"];
const CUSTOMER_DOCUMENT: &[&str] = &["cpf_cnpj", "document_number", "cpf"];
const CUSTOMER_NAME: &[&str] = &["name"];

/// Order-level business fields, written latest-wins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFacts {
    pub sale_type_id: Option<i64>,
    pub shift_date: Option<NaiveDate>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub sale_number: Option<String>,
    pub description: Option<String>,
    pub canceled: bool,
    pub canceled_items_count: Option<i32>,
    pub notes: Option<String>,
    pub discount_reason: Option<String>,
    pub increase_reason: Option<String>,
    pub total_amount: Option<f64>,
    pub total_discount: Option<f64>,
    pub total_increase: Option<f64>,
    pub total_items_amount: Option<f64>,
    pub items_count: i32,
}

/// Customer identity read from the sale; only built when a strong identifier exists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerCandidate {
    pub document_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemLine {
    pub line: i32,
    pub source_item_id: Option<String>,
    pub name: Option<String>,
    pub integration_code: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub deleted: Option<bool>,
    pub raw: Value,
    pub choices: Vec<ChoiceLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceLine {
    pub choice_line: i32,
    pub name: Option<String>,
    pub integration_code: Option<String>,
    pub quantity: Option<f64>,
    pub additional_price: Option<f64>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFacts {
    pub delivery_fee: Option<f64>,
    pub delivered_by: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub reference: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLine {
    pub line: i32,
    pub method: Option<String>,
    pub amount: Option<f64>,
    pub change_for: Option<f64>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub history_id: String,
    pub status: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// Everything the store step writes for one order
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSale {
    pub order: OrderFacts,
    pub customer: Option<CustomerCandidate>,
    /// Display name kept on the order when no customer row is created
    pub customer_name: Option<String>,
    pub items: Vec<ItemLine>,
    pub delivery: Option<DeliveryFacts>,
    pub payments: Vec<PaymentLine>,
    pub status_history: Vec<StatusEntry>,
}

impl NormalizedSale {
    /// Extract a sale from a raw payload. `snapshot_canceled` is used when the
    /// payload carries no cancellation flag of its own.
    pub fn from_payload(payload: &Value, snapshot_canceled: bool) -> WorkerResult<Self> {
        let sale = resolve_sale(payload)
            .ok_or_else(|| WorkerError::malformed("sale document is not an object"))?;

        let items: Vec<ItemLine> = array_field(sale, ITEMS)
            .iter()
            .enumerate()
            .map(|(index, raw)| item_line(line_number(index), raw))
            .collect();

        let (customer, customer_name) = customer(sale);

        let order = OrderFacts {
            sale_type_id: coerce::integer(field(sale, &["id_sale_type"])),
            shift_date: coerce::date(field(sale, &["shift_date"])),
            source_created_at: coerce::timestamp(field(sale, &["created_at"])),
            source_updated_at: coerce::timestamp(field(sale, &["updated_at"])),
            sale_number: coerce::text(field(sale, &["sale_number"])),
            description: coerce::text(field(sale, &["desc_sale"])),
            canceled: coerce::yes_no(field(sale, &["canceled"])).unwrap_or(snapshot_canceled),
            canceled_items_count: coerce::int32(field(sale, &["count_canceled_items"])),
            notes: coerce::text(field(sale, &["notes"])),
            discount_reason: coerce::text(field(sale, &["discount_reason"])),
            increase_reason: coerce::text(field(sale, &["increase_reason"])),
            total_amount: coerce::decimal(field(sale, &["total_amount"])),
            total_discount: coerce::decimal(field(sale, &["total_discount"])),
            total_increase: coerce::decimal(field(sale, &["total_increase"])),
            total_items_amount: coerce::decimal(field(sale, &["total_amount_items"])),
            items_count: coerce::int32(field(sale, ITEMS_COUNT))
                .unwrap_or_else(|| i32::try_from(items.len()).unwrap_or(i32::MAX)),
        };

        let payments = array_field(sale, PAYMENTS)
            .iter()
            .enumerate()
            .map(|(index, raw)| payment_line(line_number(index), raw))
            .collect();

        let status_history = array_field(sale, STATUS_HISTORIES)
            .iter()
            .filter_map(status_entry)
            .collect();

        Ok(Self {
            order,
            customer,
            customer_name,
            items,
            delivery: object_field(sale, DELIVERY).map(delivery),
            payments,
            status_history,
        })
    }
}

/// Resolve the sale document inside a payload
pub fn resolve_sale(payload: &Value) -> Option<&Map<String, Value>> {
    probe::first_object(payload, SALE_ENVELOPE)
}

/// Cancellation flag carried by the payload itself, if any
pub fn payload_canceled(payload: &Value) -> Option<bool> {
    resolve_sale(payload).and_then(|sale| coerce::yes_no(field(sale, &["canceled"])))
}

fn line_number(index: usize) -> i32 {
    i32::try_from(index + 1).unwrap_or(i32::MAX)
}

fn item_line(line: i32, raw: &Value) -> ItemLine {
    let empty = Map::new();
    let item = raw.as_object().unwrap_or(&empty);

    let choices = array_field(item, CHOICES)
        .iter()
        .enumerate()
        .map(|(index, raw)| choice_line(line_number(index), raw))
        .collect();

    ItemLine {
        line,
        source_item_id: coerce::text(field(item, ITEM_ID)),
        name: coerce::text(field(item, ITEM_NAME)),
        integration_code: coerce::text(field(item, INTEGRATION_CODE)),
        quantity: coerce::decimal(field(item, QUANTITY)),
        unit_price: coerce::decimal(field(item, UNIT_PRICE)),
        total_price: coerce::decimal(field(item, TOTAL_PRICE)),
        deleted: coerce::yes_no(field(item, &["deleted"])),
        raw: raw.clone(),
        choices,
    }
}

fn choice_line(choice_line: i32, raw: &Value) -> ChoiceLine {
    let empty = Map::new();
    let choice = raw.as_object().unwrap_or(&empty);

    ChoiceLine {
        choice_line,
        name: coerce::text(field(choice, CHOICE_NAME)),
        integration_code: coerce::text(field(choice, INTEGRATION_CODE)),
        quantity: coerce::decimal(field(choice, QUANTITY)),
        additional_price: coerce::decimal(field(choice, ADDITIONAL_PRICE)),
        raw: raw.clone(),
    }
}

fn delivery(obj: &Map<String, Value>) -> DeliveryFacts {
    DeliveryFacts {
        delivery_fee: coerce::decimal(field(obj, DELIVERY_FEE)),
        delivered_by: coerce::text(field(obj, DELIVERED_BY)),
        street: coerce::text(field(obj, STREET)),
        street_number: coerce::text(field(obj, STREET_NUMBER)),
        complement: coerce::text(field(obj, COMPLEMENT)),
        district: coerce::text(field(obj, DISTRICT)),
        city: coerce::text(field(obj, CITY)),
        state: coerce::text(field(obj, STATE)),
        postal_code: coerce::text(field(obj, POSTAL_CODE)),
        reference: coerce::text(field(obj, REFERENCE)),
        raw: Value::Object(obj.clone()),
    }
}

fn payment_line(line: i32, raw: &Value) -> PaymentLine {
    let empty = Map::new();
    let payment = raw.as_object().unwrap_or(&empty);

    PaymentLine {
        line,
        method: coerce::text(field(payment, PAYMENT_METHOD)),
        amount: coerce::decimal(field(payment, PAYMENT_AMOUNT)),
        change_for: coerce::decimal(field(payment, CHANGE_FOR)),
        raw: raw.clone(),
    }
}

/// Entries without an id cannot be deduplicated and are skipped
fn status_entry(raw: &Value) -> Option<StatusEntry> {
    let entry = raw.as_object()?;

    Some(StatusEntry {
        history_id: coerce::text(field(entry, HISTORY_ID))?,
        status: coerce::text(field(entry, HISTORY_STATUS)),
        changed_at: coerce::timestamp(field(entry, HISTORY_CHANGED_AT)),
        raw: raw.clone(),
    })
}

/// Split the sale's customer into a dedupable candidate or a bare display name
fn customer(sale: &Map<String, Value>) -> (Option<CustomerCandidate>, Option<String>) {
    let Some(obj) = object_field(sale, CUSTOMER) else {
        return (None, None);
    };

    let candidate = CustomerCandidate {
        document_number: coerce::digits(field(obj, CUSTOMER_DOCUMENT)),
        email: coerce::text(field(obj, CUSTOMER_EMAIL)).map(|email| email.to_lowercase()),
        phone: coerce::phone(field(obj, CUSTOMER_PHONE)),
        external_id: coerce::text(field(obj, CUSTOMER_EXTERNAL_ID)),
        name: coerce::text(field(obj, CUSTOMER_NAME)),
    };

    if candidate.has_strong_identifier() {
        (Some(candidate), None)
    } else {
        (None, candidate.name)
    }
}

impl CustomerCandidate {
    pub fn has_strong_identifier(&self) -> bool {
        self.document_number.is_some()
            || self.email.is_some()
            || self.phone.is_some()
            || self.external_id.is_some()
    }
}

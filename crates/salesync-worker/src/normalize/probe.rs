//! Shape probing over loosely structured JSON
//!
//! Provider payloads name the same thing in several ways. Instead of branching
//! inline, every lookup is an ordered list of candidates tried in sequence;
//! the first candidate of the right shape wins.

use serde_json::{Map, Value};

/// One place to look for a value inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A top-level member of the document
    Field(&'static str),
    /// The document itself
    Root,
}

impl Probe {
    fn apply<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        match self {
            Probe::Field(name) => doc.get(*name),
            Probe::Root => Some(doc),
        }
    }
}

/// Wrappers the sale document may arrive in, falling back to the payload itself
pub const SALE_ENVELOPE: &[Probe] = &[Probe::Field("data"), Probe::Field("sale"), Probe::Root];

/// Where a page of listing results keeps its rows
pub const PAGE_ROWS: &[Probe] = &[Probe::Root, Probe::Field("data"), Probe::Field("items")];

/// First probe that resolves to a JSON object
pub fn first_object<'a>(doc: &'a Value, probes: &[Probe]) -> Option<&'a Map<String, Value>> {
    probes
        .iter()
        .filter_map(|probe| probe.apply(doc))
        .find_map(Value::as_object)
}

/// First probe that resolves to a JSON array
pub fn first_array<'a>(doc: &'a Value, probes: &[Probe]) -> Option<&'a Vec<Value>> {
    probes
        .iter()
        .filter_map(|probe| probe.apply(doc))
        .find_map(Value::as_array)
}

/// First alias present with a non-null value
pub fn field<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find(|value| !value.is_null())
}

/// First alias holding an array; a missing collection is empty
pub fn array_field<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> &'a [Value] {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find_map(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First alias holding an object
pub fn object_field<'a>(
    obj: &'a Map<String, Value>,
    aliases: &[&str],
) -> Option<&'a Map<String, Value>> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find_map(Value::as_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_prefers_data_then_sale() {
        let wrapped = json!({"data": {"id_sale": 1}, "sale": {"id_sale": 2}});
        assert_eq!(first_object(&wrapped, SALE_ENVELOPE).unwrap()["id_sale"], 1);

        let sale_only = json!({"sale": {"id_sale": 2}});
        assert_eq!(first_object(&sale_only, SALE_ENVELOPE).unwrap()["id_sale"], 2);
    }

    #[test]
    fn test_envelope_falls_back_to_root() {
        let bare = json!({"id_sale": 3, "items": []});
        assert_eq!(first_object(&bare, SALE_ENVELOPE).unwrap()["id_sale"], 3);
    }

    #[test]
    fn test_envelope_skips_non_object_wrappers() {
        let doc = json!({"data": [1, 2], "id_sale": 4});
        let sale = first_object(&doc, SALE_ENVELOPE).unwrap();
        assert_eq!(sale["id_sale"], 4);
    }

    #[test]
    fn test_envelope_rejects_scalars() {
        assert!(first_object(&json!("nope"), SALE_ENVELOPE).is_none());
        assert!(first_object(&json!([{"id": 1}]), SALE_ENVELOPE).is_none());
    }

    #[test]
    fn test_page_rows() {
        assert_eq!(first_array(&json!([1, 2]), PAGE_ROWS).unwrap().len(), 2);
        assert_eq!(first_array(&json!({"data": [1]}), PAGE_ROWS).unwrap().len(), 1);
        assert_eq!(first_array(&json!({"items": [1, 2, 3]}), PAGE_ROWS).unwrap().len(), 3);
        assert!(first_array(&json!({"rows": [1]}), PAGE_ROWS).is_none());
    }

    #[test]
    fn test_field_skips_nulls() {
        let obj = json!({"name": null, "desc_sale_item": "Coffee"});
        let obj = obj.as_object().unwrap();
        assert_eq!(field(obj, &["name", "desc_sale_item"]), Some(&json!("Coffee")));
        assert_eq!(field(obj, &["missing"]), None);
    }

    #[test]
    fn test_array_field_first_array_wins() {
        let obj = json!({"items": "broken", "sale_items": [{"a": 1}], "itens": [{}, {}]});
        let obj = obj.as_object().unwrap();
        assert_eq!(array_field(obj, &["items", "sale_items", "itens"]).len(), 1);
        assert!(array_field(obj, &["products"]).is_empty());
    }
}

//! Product payload handling shared by `/scan` and the direct trigger endpoint.
//!
//! Products are kept as JSON objects so the worker receives every field the
//! caller sent. Only `title` and `price_eur` are checked and rewritten.

use serde_json::{json, Map, Value};

/// Outcome of parsing the argument of `/scan`
#[derive(Debug, Clone, PartialEq)]
pub enum ScanArgument {
    /// No argument: the worker picks its own products
    Empty,
    /// Something was given but it is not usable; the reason is shown to the user
    Invalid(String),
    Products(Vec<Value>),
}

pub fn parse_scan_argument(raw: &str) -> ScanArgument {
    if raw.trim().is_empty() {
        return ScanArgument::Empty;
    }

    let body = strip_code_fence(raw);
    if body.is_empty() {
        return ScanArgument::Invalid("the JSON payload is empty".to_string());
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return ScanArgument::Invalid(format!("invalid JSON ({})", e)),
    };
    if !value.is_object() && !value.is_array() {
        return ScanArgument::Invalid("expected a JSON object or array".to_string());
    }

    let products = normalize_products(&value);
    if products.is_empty() {
        return ScanArgument::Invalid(
            "no valid products (each needs a title and a positive price_eur)".to_string(),
        );
    }
    ScanArgument::Products(products)
}

/// Remove Markdown code fences (```json ... ``` or `...`) around a payload.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(body) = trimmed.strip_prefix("```") {
        let body = body.strip_suffix("```").unwrap_or(body);
        // Info string such as `json` or `json5` runs up to the line break or the payload
        let start = body
            .find(|c: char| c == '\n' || c == '{' || c == '[')
            .unwrap_or(body.len());
        return body[start..].trim();
    }

    if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
        return trimmed[1..trimmed.len() - 1].trim();
    }

    trimmed
}

/// Accepts `{ products: [...] }`, `{ products: {...} }`, `{ product: {...} }`,
/// a bare array, or a single product object. Invalid entries are dropped.
pub fn normalize_products(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.iter().filter_map(normalize_product).collect(),
        Value::Object(obj) => {
            if let Some(products) = obj.get("products") {
                return normalize_products(products);
            }
            if let Some(product) = obj.get("product").filter(|p| p.is_object()) {
                return normalize_product(product).into_iter().collect();
            }
            normalize_product(value).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

/// Returns the product with a trimmed `title` and a numeric `price_eur`, or
/// `None` when either is missing or unusable.
pub fn normalize_product(value: &Value) -> Option<Value> {
    let obj = value.as_object()?;

    let title = obj.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }

    let price = obj
        .get("price_eur")
        .filter(|v| !v.is_null())
        .or_else(|| obj.get("price"))
        .and_then(coerce_price)?;

    let mut normalized: Map<String, Value> = obj.clone();
    normalized.insert("title".to_string(), Value::String(title.to_string()));
    normalized.insert("price_eur".to_string(), json!(price));
    Some(Value::Object(normalized))
}

fn coerce_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_start_matches('€')
            .trim_end_matches('€')
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Fixed product list for `/smoke`: cheap end-to-end check of the worker.
pub fn smoke_products() -> Vec<Value> {
    vec![
        json!({
            "title": "Apple iPhone 13 128GB Midnight",
            "price_eur": 389.0,
            "category": "apple_phone",
        }),
        json!({
            "title": "Sony Alpha 7 III Body",
            "price_eur": 949.0,
            "category": "photography",
        }),
        json!({
            "title": "Apple iPad Air 5 64GB Wi-Fi",
            "price_eur": 419.0,
            "category": "general_tech",
        }),
    ]
}

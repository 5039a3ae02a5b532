use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct OrderPlaced {
    order_id: String,
    quantity: u32,
    #[serde(default)]
    note: Option<String>,
}

#[test]
fn decodes_trailing_commas_and_mismatched_case() {
    let payload = br#"{
        "ORDER_ID": "A-17",
        "Quantity": 3,
    }"#;

    let order: OrderPlaced = decode(payload).unwrap();
    assert_eq!(order.order_id, "A-17");
    assert_eq!(order.quantity, 3);
    assert_eq!(order.note, None);
}

#[test]
fn skips_line_and_block_comments() {
    let payload = br#"
        // leading comment
        {
            "order_id": "B-2", /* inline */
            "quantity": 1 // trailing
        }
    "#;

    let order: OrderPlaced = decode(payload).unwrap();
    assert_eq!(order.order_id, "B-2");
}

#[test]
fn comment_markers_inside_strings_are_kept() {
    let payload = br#"{"order_id": "http://x/*y*/", "quantity": 2, "note": "a, }"}"#;

    let order: OrderPlaced = decode(payload).unwrap();
    assert_eq!(order.order_id, "http://x/*y*/");
    assert_eq!(order.note.as_deref(), Some("a, }"));
}

#[test]
fn escaped_quotes_do_not_end_strings() {
    let payload = br#"{"order_id": "say \"hi\", // not a comment", "quantity": 5,}"#;

    let order: OrderPlaced = decode(payload).unwrap();
    assert_eq!(order.order_id, r#"say "hi", // not a comment"#);
}

#[test]
fn trailing_comma_in_arrays() {
    let value = decode_value(b"[1, 2, 3, ]").unwrap();
    assert_eq!(value, serde_json::json!([1, 2, 3]));
}

#[test]
fn exact_key_wins_over_folded_key() {
    let payload = br#"{"order_id": "exact", "ORDER_ID": "folded", "quantity": 1}"#;

    let order: OrderPlaced = decode(payload).unwrap();
    assert_eq!(order.order_id, "exact");
}

#[test]
fn malformed_payload_is_a_syntax_error() {
    let err = decode::<OrderPlaced>(b"{\"order_id\": ").unwrap_err();
    assert!(matches!(err, CodecError::Syntax(_)));

    let err = decode::<OrderPlaced>(&[0xff, 0xfe]).unwrap_err();
    assert!(matches!(err, CodecError::Utf8(_)));
}

#[test]
fn encoding_keeps_unicode_unescaped() {
    let order = OrderPlaced {
        order_id: "订单-ß".to_string(),
        quantity: 1,
        note: None,
    };

    let bytes = encode(&order).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("订单-ß"));
    assert!(!text.contains("\\u"));
}

#[test]
fn request_envelope_carries_retry_count() {
    let order = OrderPlaced {
        order_id: "C-9".to_string(),
        quantity: 4,
        note: None,
    };

    let bytes = encode_request(&order, 2).unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(raw[RETRY_COUNT_FIELD], 2);

    let (decoded, retry_count): (OrderPlaced, u32) = decode_request(&bytes).unwrap();
    assert_eq!(decoded, order);
    assert_eq!(retry_count, 2);
}

#[test]
fn retry_count_key_is_case_insensitive_and_optional() {
    let (_, count): (OrderPlaced, u32) =
        decode_request(br#"{"order_id": "D", "quantity": 1, "retryCount": 5}"#).unwrap();
    assert_eq!(count, 5);

    let (_, count): (OrderPlaced, u32) =
        decode_request(br#"{"order_id": "D", "quantity": 1}"#).unwrap();
    assert_eq!(count, 0);
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct Strict {
    id: u32,
}

#[test]
fn envelope_field_is_stripped_before_strict_types_see_it() {
    let bytes = encode_request(&Strict { id: 3 }, 1).unwrap();
    let (strict, count): (Strict, u32) = decode_request(&bytes).unwrap();
    assert_eq!(strict.id, 3);
    assert_eq!(count, 1);
}

#[derive(Debug, Deserialize, Serialize)]
struct SelfCounting {
    id: u32,
    retry_count: u32,
}

#[test]
fn request_types_declaring_the_counter_see_the_envelope_value() {
    let bytes = encode_request(
        &SelfCounting {
            id: 1,
            retry_count: 0,
        },
        3,
    )
    .unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(raw.get("retry_count").is_none());

    let (decoded, count): (SelfCounting, u32) = decode_request(&bytes).unwrap();
    assert_eq!(count, 3);
    assert_eq!(decoded.id, 1);
}

#[test]
fn envelopes_require_objects() {
    assert!(matches!(
        encode_request(&vec![1, 2], 0),
        Err(CodecError::NotAnObject)
    ));
    assert!(matches!(
        decode_request::<Vec<u32>>(b"[1, 2]"),
        Err(CodecError::NotAnObject)
    ));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Shipment {
    order_id: String,
    line: ShipmentLine,
    #[serde(default)]
    extra: Vec<ShipmentLine>,
    #[serde(default)]
    gift: Option<ShipmentLine>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct ShipmentLine {
    sku: String,
}

#[test]
fn nested_keys_match_case_insensitively() {
    let payload = br#"{
        "Order_Id": "A-1",
        "Line": {"SKU": "x",},
        "EXTRA": [{"Sku": "y"}, {"sku": "z"}],
        "Gift": {"sKu": "w"},
    }"#;

    let shipment: Shipment = decode(payload).unwrap();
    assert_eq!(shipment.order_id, "A-1");
    assert_eq!(shipment.line.sku, "x");
    assert_eq!(
        shipment.extra,
        vec![
            ShipmentLine {
                sku: "y".to_string()
            },
            ShipmentLine {
                sku: "z".to_string()
            }
        ]
    );
    assert_eq!(shipment.gift.map(|g| g.sku).as_deref(), Some("w"));
}

#[derive(Debug, Deserialize, PartialEq)]
enum Command {
    Ship { order_id: String },
    Cancel,
}

#[test]
fn enum_struct_variants_and_numeric_map_keys_still_decode() {
    let command: Command = decode(br#"{"Ship": {"ORDER_ID": "B-2"}}"#).unwrap();
    assert_eq!(
        command,
        Command::Ship {
            order_id: "B-2".to_string()
        }
    );
    let command: Command = decode(br#""Cancel""#).unwrap();
    assert_eq!(command, Command::Cancel);

    let counts: std::collections::BTreeMap<u32, String> =
        decode(br#"{"1": "one", "2": "two",}"#).unwrap();
    assert_eq!(counts[&2], "two");
}

#[test]
fn nested_request_survives_the_envelope() {
    let (shipment, count): (Shipment, u32) =
        decode_request(br#"{"order_id": "C", "LINE": {"Sku": "q"}, "RetryCount": 2}"#).unwrap();
    assert_eq!(shipment.line.sku, "q");
    assert_eq!(count, 2);
}

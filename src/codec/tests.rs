//! Codec round-trip and cross-format equivalence tests.

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use super::*;

fn ctx() -> CodecContext {
    CodecContext::default()
}

/// decode_text(encode_text(v)) == v and decode_binary(encode_binary(v)) == v,
/// and both decodes agree with each other.
fn assert_round_trip(value: PgValue, type_oid: u32) {
    let ctx = ctx();
    let text = encode_text(&value, &ctx);
    let from_text = decode_text(&text, type_oid, &ctx).unwrap();
    assert_eq!(from_text, value, "text round trip for oid {type_oid}");

    let binary = encode_binary(&value).unwrap();
    let from_binary = decode_binary(&binary, type_oid).unwrap();
    assert_eq!(from_binary, value, "binary round trip for oid {type_oid}");

    assert_eq!(
        from_text, from_binary,
        "cross-format equivalence for oid {type_oid}"
    );
}

#[test]
fn round_trip_integers() {
    assert_round_trip(PgValue::Int2(i16::MIN), oid::INT2);
    assert_round_trip(PgValue::Int2(0), oid::INT2);
    assert_round_trip(PgValue::Int4(i32::MAX), oid::INT4);
    assert_round_trip(PgValue::Int4(-1), oid::INT4);
    assert_round_trip(PgValue::Int8(i64::MIN), oid::INT8);
    assert_round_trip(PgValue::Int8(9_007_199_254_740_993), oid::INT8);
}

#[test]
fn round_trip_bool() {
    assert_round_trip(PgValue::Bool(true), oid::BOOL);
    assert_round_trip(PgValue::Bool(false), oid::BOOL);
}

#[test]
fn round_trip_floats() {
    assert_round_trip(PgValue::Float4(1.5), oid::FLOAT4);
    assert_round_trip(PgValue::Float4(-0.0), oid::FLOAT4);
    assert_round_trip(PgValue::Float8(std::f64::consts::PI), oid::FLOAT8);
    assert_round_trip(PgValue::Float8(f64::INFINITY), oid::FLOAT8);
    assert_round_trip(PgValue::Float8(f64::NEG_INFINITY), oid::FLOAT8);
    assert_round_trip(PgValue::Float8(1e-300), oid::FLOAT8);
}

#[test]
fn round_trip_numeric() {
    for text in ["0", "1.250", "-99999.0001", "123456789012345678.87654321"] {
        let value = PgValue::Numeric(Decimal::from_str_exact(text).unwrap());
        assert_round_trip(value, oid::NUMERIC);
    }
}

#[test]
fn round_trip_text_types() {
    assert_round_trip(PgValue::Text("Hello World!".to_string()), oid::TEXT);
    assert_round_trip(PgValue::Text(String::new()), oid::VARCHAR);
    assert_round_trip(PgValue::Text("nul\u{1f980}ls".to_string()), oid::BPCHAR);
}

#[test]
fn round_trip_bytea() {
    assert_round_trip(PgValue::Bytea(vec![]), oid::BYTEA);
    assert_round_trip(PgValue::Bytea(vec![0, 1, 2, 0xfe, 0xff]), oid::BYTEA);
}

#[test]
fn round_trip_datetime() {
    assert_round_trip(
        PgValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        oid::DATE,
    );
    assert_round_trip(
        PgValue::Timestamp(
            NaiveDate::from_ymd_opt(2004, 10, 19)
                .unwrap()
                .and_hms_micro_opt(10, 23, 54, 21)
                .unwrap(),
        ),
        oid::TIMESTAMP,
    );
    assert_round_trip(
        PgValue::TimestampTz(Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 40).unwrap()),
        oid::TIMESTAMPTZ,
    );
}

#[test]
fn round_trip_jsonb() {
    let value: serde_json::Value =
        serde_json::from_str(r#"{"a": [1, 2, null], "b": "x"}"#).unwrap();
    assert_round_trip(PgValue::Jsonb(value), oid::JSONB);
}

#[test]
fn round_trip_arrays() {
    assert_round_trip(
        PgValue::Array(
            oid::INT4,
            vec![Some(PgValue::Int4(1)), None, Some(PgValue::Int4(-3))],
        ),
        oid::INT4_ARRAY,
    );
    assert_round_trip(PgValue::Array(oid::TEXT, vec![]), oid::TEXT_ARRAY);
    assert_round_trip(
        PgValue::Array(
            oid::TEXT,
            vec![
                Some(PgValue::Text("plain".to_string())),
                Some(PgValue::Text("needs \"quoting\", really".to_string())),
                Some(PgValue::Text(String::new())),
                Some(PgValue::Text("NULL".to_string())),
                None,
            ],
        ),
        oid::TEXT_ARRAY,
    );
}

#[test]
fn bytea_decodes_both_text_forms() {
    let ctx = ctx();
    let hex = decode_text(b"\\xdeadBEEF", oid::BYTEA, &ctx).unwrap();
    assert_eq!(hex, PgValue::Bytea(vec![0xde, 0xad, 0xbe, 0xef]));

    let escaped = decode_text(b"a\\000\\\\b", oid::BYTEA, &ctx).unwrap();
    assert_eq!(escaped, PgValue::Bytea(vec![b'a', 0, b'\\', b'b']));
}

#[test]
fn bytea_encodes_hex_only() {
    let text = encode_text(&PgValue::Bytea(vec![0xde, 0xad]), &ctx());
    assert_eq!(text, b"\\xdead");
}

#[test]
fn integer_overflow_is_22003() {
    let err = decode_text(b"99999999999", oid::INT4, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "22003");
    let err = decode_text(b"32768", oid::INT2, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "22003");
}

#[test]
fn integer_junk_is_22p02() {
    let err = decode_text(b"12abc", oid::INT4, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "22P02");
    let err = decode_text(b"", oid::INT8, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "22P02");
}

#[test]
fn bad_date_is_22007() {
    let err = decode_text(b"not-a-date", oid::DATE, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "22007");
}

#[test]
fn timestamptz_text_accepts_iso_t_separator() {
    let value = decode_text(b"2024-01-02T03:04:05Z", oid::TIMESTAMPTZ, &ctx()).unwrap();
    assert_eq!(
        value,
        PgValue::TimestampTz(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    );
}

#[test]
fn jsonb_binary_has_version_byte() {
    let value = PgValue::Jsonb(serde_json::json!({"k": 1}));
    let binary = encode_binary(&value).unwrap();
    assert_eq!(binary[0], 1);
    assert!(decode_binary(&[2, b'{', b'}'], oid::JSONB).is_err());
}

#[test]
fn array_text_literal_forms() {
    let ctx = ctx();
    let parsed = decode_text(b"{1, 2 ,NULL}", oid::INT8_ARRAY, &ctx).unwrap();
    assert_eq!(
        parsed,
        PgValue::Array(
            oid::INT8,
            vec![Some(PgValue::Int8(1)), Some(PgValue::Int8(2)), None]
        )
    );

    let parsed = decode_text(br#"{"a,b",null,"\"x\""}"#, oid::TEXT_ARRAY, &ctx).unwrap();
    assert_eq!(
        parsed,
        PgValue::Array(
            oid::TEXT,
            vec![
                Some(PgValue::Text("a,b".to_string())),
                None,
                Some(PgValue::Text("\"x\"".to_string())),
            ]
        )
    );

    assert!(decode_text(b"{{1},{2}}", oid::INT4_ARRAY, &ctx).is_err());
    assert!(decode_text(b"1,2", oid::INT4_ARRAY, &ctx).is_err());
}

#[test]
fn unsupported_oid_is_rejected() {
    let err = decode_text(b"x", 600, &ctx()).unwrap_err();
    assert_eq!(err.sqlstate, "0A000");
}

#[test]
fn oid_catalog_is_consistent() {
    for elem in [
        oid::BOOL,
        oid::BYTEA,
        oid::INT2,
        oid::INT4,
        oid::INT8,
        oid::FLOAT4,
        oid::FLOAT8,
        oid::TEXT,
        oid::VARCHAR,
        oid::DATE,
        oid::TIMESTAMP,
        oid::TIMESTAMPTZ,
        oid::NUMERIC,
        oid::JSONB,
    ] {
        let array = oid::array_of(elem).unwrap();
        assert_eq!(oid::element_of(array), Some(elem));
        assert!(oid::is_supported(elem));
        assert!(oid::is_supported(array));
    }
}

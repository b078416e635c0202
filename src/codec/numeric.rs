//! Arbitrary-precision numeric codec.
//!
//! Binary layout per PostgreSQL: ndigits:i16, weight:i16, sign:u16,
//! dscale:u16, then ndigits base-10000 digit groups as i16. Precision and
//! scale round-trip: the dscale on the wire equals the decimal's scale.

use bytes::{Buf, BufMut, BytesMut};
use rust_decimal::Decimal;

use crate::errors::{sqlstate, PgError};

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

pub fn decode_text(text: &str) -> Result<Decimal, PgError> {
    let trimmed = text.trim();
    // Scientific notation is valid numeric input.
    Decimal::from_str_exact(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| PgError::invalid_text("numeric", text))
}

pub fn encode_binary(value: &Decimal) -> Vec<u8> {
    let dscale = value.scale() as u16;
    let mut digits_text = value.abs().to_string();

    let (int_part, frac_part) = match digits_text.find('.') {
        Some(dot) => {
            let frac = digits_text.split_off(dot + 1);
            digits_text.pop(); // drop the dot
            (digits_text, frac)
        }
        None => (digits_text, String::new()),
    };
    let int_part = int_part.trim_start_matches('0');

    // Left-pad the integer part and right-pad the fraction so both align on
    // base-10000 group boundaries around the decimal point.
    let int_groups = int_part.len().div_ceil(4);
    let frac_groups = frac_part.len().div_ceil(4);
    let mut padded = String::with_capacity((int_groups + frac_groups) * 4);
    for _ in 0..(int_groups * 4 - int_part.len()) {
        padded.push('0');
    }
    padded.push_str(int_part);
    padded.push_str(&frac_part);
    for _ in 0..(frac_groups * 4 - frac_part.len()) {
        padded.push('0');
    }

    let mut digits: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|group| {
            group
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect();

    // Strip zero groups from both ends; weight tracks the first kept group.
    let mut weight = int_groups as i16 - 1;
    while let Some(0) = digits.first() {
        digits.remove(0);
        weight -= 1;
    }
    while let Some(0) = digits.last() {
        digits.pop();
    }
    if digits.is_empty() {
        weight = 0;
    }

    let sign = if value.is_sign_negative() && !value.is_zero() {
        SIGN_NEGATIVE
    } else {
        SIGN_POSITIVE
    };

    let mut out = BytesMut::with_capacity(8 + digits.len() * 2);
    out.put_i16(digits.len() as i16);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for digit in digits {
        out.put_i16(digit);
    }
    out.to_vec()
}

pub fn decode_binary(raw: &[u8]) -> Result<Decimal, PgError> {
    let mut buf = raw;
    if buf.remaining() < 8 {
        return Err(malformed("numeric header is truncated"));
    }
    let ndigits = buf.get_i16();
    let weight = buf.get_i16();
    let sign = buf.get_u16();
    let dscale = buf.get_u16();

    if sign == SIGN_NAN {
        return Err(PgError::new(
            sqlstate::NUMERIC_VALUE_OUT_OF_RANGE,
            "numeric NaN is not supported",
        ));
    }
    if sign != SIGN_POSITIVE && sign != SIGN_NEGATIVE {
        return Err(malformed("invalid numeric sign"));
    }
    if ndigits < 0 || buf.remaining() != ndigits as usize * 2 {
        return Err(malformed("numeric digit area length mismatch"));
    }

    let mut groups = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let group = buf.get_i16();
        if !(0..=9999).contains(&group) {
            return Err(malformed("numeric digit group out of range"));
        }
        groups.push(group);
    }

    // Rebuild the decimal digit string around the implied decimal point:
    // group i carries the base-10000 digit with exponent (weight - i).
    let mut int_text = String::new();
    let mut frac_text = String::new();
    if weight >= 0 {
        for i in 0..=i32::from(weight) {
            let group = groups.get(i as usize).copied().unwrap_or(0);
            if i == 0 {
                int_text.push_str(&group.to_string());
            } else {
                int_text.push_str(&format!("{group:04}"));
            }
        }
        for group in groups.iter().skip(i32::from(weight) as usize + 1) {
            frac_text.push_str(&format!("{group:04}"));
        }
    } else {
        int_text.push('0');
        for _ in 0..((-i32::from(weight) - 1) * 4) {
            frac_text.push('0');
        }
        for group in &groups {
            frac_text.push_str(&format!("{group:04}"));
        }
    }

    let mut text = String::new();
    if sign == SIGN_NEGATIVE {
        text.push('-');
    }
    text.push_str(&int_text);
    if !frac_text.is_empty() {
        text.push('.');
        text.push_str(&frac_text);
    }

    let mut value = Decimal::from_str_exact(&text).map_err(|_| {
        PgError::new(
            sqlstate::NUMERIC_VALUE_OUT_OF_RANGE,
            "numeric value out of range",
        )
    })?;
    value.rescale(u32::from(dscale));
    if value.scale() != u32::from(dscale) {
        return Err(PgError::new(
            sqlstate::NUMERIC_VALUE_OUT_OF_RANGE,
            "numeric scale out of range",
        ));
    }
    Ok(value)
}

fn malformed(what: &str) -> PgError {
    PgError::new(sqlstate::INVALID_TEXT_REPRESENTATION, what.to_string())
}

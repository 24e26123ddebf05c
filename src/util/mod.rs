//! Internal utility functions and helpers.
//!
//! This module contains small helper functions used throughout the crate.
//! It is an implementation detail and not part of the public API.

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Renders a big-endian byte string as a base-36 number.
///
/// Leading zero bytes do not produce leading zero digits; an all-zero (or
/// empty) input renders as `"0"`.
pub(crate) fn to_base36(bytes: &[u8]) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
    if number.is_empty() {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
    while !number.is_empty() {
        // Long division of the whole number by 36.
        let mut remainder: u32 = 0;
        let mut quotient = Vec::with_capacity(number.len());
        for &byte in &number {
            let acc = (remainder << 8) | u32::from(byte);
            let q = acc / 36;
            remainder = acc % 36;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q as u8);
            }
        }
        digits.push(BASE36_DIGITS[remainder as usize]);
        number = quotient;
    }

    digits.reverse();
    // Only ASCII digits were pushed.
    digits.into_iter().map(char::from).collect()
}

/// Returns the smallest char boundary of `text` that is `>= index`.
pub(crate) fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Returns the largest char boundary of `text` that is `<= index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Splits `text` into consecutive slices no longer than `cap` bytes without
/// splitting a character.
///
/// A cut landing inside a character moves back to its start; only when that
/// would leave an empty slice (a cap below four bytes) does it move forward.
pub(crate) fn cap_pieces(text: &str, cap: usize) -> impl Iterator<Item = &str> + '_ {
    let cap = cap.max(1);
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut cut = floor_char_boundary(rest, cap);
        if cut == 0 {
            cut = ceil_char_boundary(rest, cap);
        }
        let (head, tail) = rest.split_at(cut);
        rest = tail;
        Some(head)
    })
}

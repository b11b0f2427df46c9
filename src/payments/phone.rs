use crate::ledger::{LedgerError, LedgerResult};

/// Normalise a Kenyan mobile number to the `2547XXXXXXXX` / `2541XXXXXXXX`
/// form the gateway expects. Accepts `07..`, `01..`, `7..`, `+254..` and
/// `254..` inputs with spaces or dashes.
pub fn normalize_phone(input: &str) -> LedgerResult<String> {
    let digits: String = input
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::InvalidPhoneNumber(input.to_string()));
    }

    let normalized = match digits.len() {
        12 if digits.starts_with("254") => digits,
        10 if digits.starts_with('0') => format!("254{}", &digits[1..]),
        9 => format!("254{}", digits),
        _ => return Err(LedgerError::InvalidPhoneNumber(input.to_string())),
    };

    match normalized.as_bytes()[3] {
        b'7' | b'1' => Ok(normalized),
        _ => Err(LedgerError::InvalidPhoneNumber(input.to_string())),
    }
}

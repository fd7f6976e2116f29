use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NON_DIGIT_REGEX: Regex = Regex::new(r"[^0-9]").unwrap();
}

/// Parse free-text currency input into an amount
///
/// Every character that is not an ASCII digit is dropped, so "$ 1.250"
/// and "1,250" both read as 1250. Input without digits reads as 0 and
/// input too long for a `u64` saturates at `u64::MAX`.
///
/// # Examples
/// ```
/// use daily_calculator::currency::parse_amount;
///
/// assert_eq!(parse_amount("$ 1.250"), 1250);
/// assert_eq!(parse_amount(""), 0);
/// ```
pub fn parse_amount(text: &str) -> u64 {
    let digits = NON_DIGIT_REGEX.replace_all(text, "");
    if digits.is_empty() {
        return 0;
    }
    digits.parse::<u64>().unwrap_or(u64::MAX)
}

/// Render an amount as Colombian pesos: "$ 1.234.567"
pub fn format_currency(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("$ {}", grouped)
}

pub fn format_percentage(value: f64) -> String {
    format!("{:.2}%", value)
}

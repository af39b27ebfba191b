use once_cell::sync::Lazy;
use regex::Regex;

// Leading "1k", "100x", "25 " count token, then the rest of the name.
static LEADING_QTY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([\d.]+(?:k|x)?\s*)?(.*)$").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub name: String,
    pub quantity: u32,
    pub is_bulk: bool,
}

pub fn extract(raw_name: &str) -> Extraction {
    let trimmed = raw_name.trim();

    let Some(caps) = LEADING_QTY_RE.captures(trimmed) else {
        return Extraction {
            name: trimmed.to_string(),
            quantity: 1,
            is_bulk: false,
        };
    };

    let qty_part = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    let quantity = if qty_part.is_empty() {
        1
    } else {
        convert_quantity(qty_part).unwrap_or(1)
    };

    let name = if rest.is_empty() { trimmed } else { rest };

    Extraction {
        name: name.to_string(),
        quantity,
        is_bulk: quantity > 1,
    }
}

// "1k" -> 1000, "100x" -> 100. None for zero, negative or unparseable counts.
fn convert_quantity(token: &str) -> Option<u32> {
    let lower = token.to_lowercase();
    let numeric = lower.trim_end_matches('x');

    let value = match numeric.strip_suffix('k') {
        Some(thousands) => thousands.parse::<f64>().ok()? * 1000.0,
        None => numeric.parse::<f64>().ok()?,
    };

    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 {
        return None;
    }
    Some(rounded.min(u32::MAX as f64) as u32)
}

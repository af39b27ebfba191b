use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::currency;
use crate::model::{OrderType, Rarity, RecordFields, TradeRecord, UNKNOWN};
use crate::quantity;

pub const SYSTEM_ACCOUNT: &str = "System";

// Informational channel messages, matched case-insensitively anywhere in the line.
const NOISE_PHRASES: [&str; 9] = [
    "this is the trade channel",
    "only messages starting with",
    "please pm the person",
    "you can disable receiving",
    "joined the channel",
    "left the channel",
    "view the full trade chat etiquette",
    "you can also use @ to",
    "you can also use @<name> to",
];

// Low-value materials nobody prices.
const JUNK_ITEM_KEYWORDS: [&str; 7] = ["common", "null", "fragment", "casket", "clay", "dirt", "sand"];

const MIN_TEXT_NAME_LEN: usize = 3;

static BRACKET_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("static regex"));
static ANGLE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static SELLER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").expect("static regex"));
static FOR_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfor\s+\d+(?:[.,]\d+)?").expect("static regex"));
static ACTION_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:wtb|wts|buying|selling|for)\b").expect("static regex"));
static TRAILING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s\d+(?:[.,]\d+)?\s*$").expect("static regex"));
static NAME_JUNK_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s-]").expect("static regex"));

#[derive(Debug, Default, Deserialize)]
struct JsonItem {
    ql: Option<Value>,
}

// Recognized JSON-lines fields; anything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct JsonLine {
    raw_text: Option<String>,
    player: Option<String>,
    main_item: Option<String>,
    main_qty: Option<Value>,
    main_ql: Option<Value>,
    price_s: Option<Value>,
    operation: Option<String>,
    server: Option<String>,
    date: Option<String>,
    items: Option<Vec<JsonItem>>,
}

/// Turns one raw log line into at most one `TradeRecord`. Never fails: a
/// line that can't be understood is simply dropped.
#[derive(Debug, Clone)]
pub struct TradeLineParser {
    fallback_date: String,
}

impl Default for TradeLineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeLineParser {
    /// Lines without their own date are stamped with today's date.
    pub fn new() -> Self {
        Self::with_fallback_date(chrono::Local::now().format("%Y-%m-%d").to_string())
    }

    pub fn with_fallback_date(date: impl Into<String>) -> Self {
        TradeLineParser {
            fallback_date: date.into(),
        }
    }

    pub fn parse(&self, raw_line: &str, line_index: usize) -> Option<TradeRecord> {
        let line = raw_line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || is_noise(line) {
            return None;
        }

        if line.starts_with('{') {
            let json: JsonLine = serde_json::from_str(line).ok()?;
            self.parse_json(json, line_index)
        } else {
            self.parse_text(line, line_index)
        }
    }

    /// Structured path for callers that already hold a decoded JSON object.
    pub fn parse_value(&self, value: Value, line_index: usize) -> Option<TradeRecord> {
        let json: JsonLine = serde_json::from_value(value).ok()?;
        if json.raw_text.as_deref().is_some_and(is_noise) {
            return None;
        }
        self.parse_json(json, line_index)
    }

    fn parse_json(&self, json: JsonLine, line_index: usize) -> Option<TradeRecord> {
        let seller = non_empty(json.player.as_deref()).unwrap_or(UNKNOWN);
        if seller == SYSTEM_ACCOUNT {
            return None;
        }

        let raw_name = non_empty(json.main_item.as_deref())?;
        let extraction = quantity::extract(raw_name);
        if is_junk_item(&extraction.name) {
            return None;
        }

        let raw_text = json.raw_text.as_deref().unwrap_or("");
        let mut total_price = json
            .price_s
            .as_ref()
            .and_then(value_as_text)
            .map(|text| currency::normalize(&text))
            .unwrap_or(0.0);
        if total_price == 0.0 && !raw_text.is_empty() {
            total_price = currency::normalize(raw_text);
        }

        let quantity = match json.main_qty.as_ref().and_then(value_as_f64) {
            Some(qty) if qty > 1.0 => qty.round().min(u32::MAX as f64) as u32,
            _ => extraction.quantity,
        };

        let quality = json
            .main_ql
            .as_ref()
            .and_then(value_as_f64)
            .or_else(|| {
                json.items
                    .as_ref()
                    .and_then(|items| items.first())
                    .and_then(|item| item.ql.as_ref())
                    .and_then(value_as_f64)
            })
            .unwrap_or(0.0);

        let name = sanitize_name(&extraction.name);
        if name.is_empty() {
            return None;
        }

        Some(TradeRecord::new(RecordFields {
            id: format!("json-{line_index}"),
            name,
            material: UNKNOWN.to_string(),
            quality,
            rarity: detect_rarity(raw_name),
            unit_price: total_price / quantity as f64,
            quantity,
            order_type: detect_order_type(raw_text, json.operation.as_deref()),
            seller: seller.to_string(),
            location: non_empty(json.server.as_deref()).unwrap_or(UNKNOWN).to_string(),
            timestamp: non_empty(json.date.as_deref())
                .unwrap_or(self.fallback_date.as_str())
                .to_string(),
        }))
    }

    fn parse_text(&self, line: &str, line_index: usize) -> Option<TradeRecord> {
        let seller = SELLER_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN);
        if seller == SYSTEM_ACCOUNT {
            return None;
        }

        let untagged = strip_tags(line);
        let total_price = currency::normalize(&untagged);

        let dirty_name = strip_offer_words(&untagged);
        let extraction = quantity::extract(&dirty_name);
        if extraction.name.chars().count() < MIN_TEXT_NAME_LEN
            || !extraction.name.chars().any(char::is_alphabetic)
            || is_junk_item(&extraction.name)
        {
            return None;
        }

        let name = sanitize_name(&extraction.name);
        if name.is_empty() {
            return None;
        }

        Some(TradeRecord::new(RecordFields {
            id: format!("raw-{line_index}"),
            name,
            material: UNKNOWN.to_string(),
            quality: 0.0,
            rarity: detect_rarity(&dirty_name),
            unit_price: total_price / extraction.quantity as f64,
            quantity: extraction.quantity,
            order_type: detect_order_type(&untagged, None),
            seller: seller.to_string(),
            location: UNKNOWN.to_string(),
            timestamp: self.fallback_date.clone(),
        }))
    }
}

pub fn is_noise(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOISE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

pub fn is_junk_item(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    Rarity::KEYWORDS.contains(&lower.as_str())
        || JUNK_ITEM_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn detect_rarity(name: &str) -> Rarity {
    let lower = name.to_lowercase();
    if lower.contains("fantastic") {
        Rarity::Fantastic
    } else if lower.contains("supreme") {
        Rarity::Supreme
    } else if lower.contains("rare") {
        Rarity::Rare
    } else {
        Rarity::Common
    }
}

pub fn detect_order_type(text: &str, operation: Option<&str>) -> OrderType {
    match operation.map(str::trim) {
        Some("WTB") => return OrderType::Wtb,
        Some("WTS") => return OrderType::Wts,
        _ => {}
    }

    let upper = text.to_uppercase();
    if ["WTB", "BUYING", "BUY"].iter().any(|kw| upper.contains(kw)) {
        OrderType::Wtb
    } else if ["WTS", "SELLING", "SELL"].iter().any(|kw| upper.contains(kw)) {
        OrderType::Wts
    } else {
        OrderType::Unknown
    }
}

/// Keeps letters, digits, whitespace and hyphens; collapses runs of whitespace.
pub fn sanitize_name(name: &str) -> String {
    collapse_whitespace(&NAME_JUNK_CHARS_RE.replace_all(name, ""))
}

fn strip_tags(line: &str) -> String {
    let without_brackets = BRACKET_TAG_RE.replace_all(line, " ");
    ANGLE_TAG_RE.replace_all(&without_brackets, " ").into_owned()
}

// Everything in an offer line that isn't the item: prices and trade verbs.
fn strip_offer_words(untagged: &str) -> String {
    let text = currency::strip_currency_tokens(untagged);
    let text = FOR_AMOUNT_RE.replace_all(&text, " ");
    let text = ACTION_WORD_RE.replace_all(&text, " ");
    let text = collapse_whitespace(&text);
    TRAILING_NUMBER_RE.replace(&text, "").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TradeLineParser {
        TradeLineParser::with_fallback_date("2024-05-01")
    }

    #[test]
    fn test_text_sell_line() {
        let r = parser().parse("WTS 10x iron lump for 1s <Bob>", 0).unwrap();
        assert_eq!(r.id, "raw-0");
        assert_eq!(r.name, "iron lump");
        assert_eq!(r.quantity, 10);
        assert_eq!(r.unit_price, 10.0);
        assert_eq!(r.order_type, OrderType::Wts);
        assert_eq!(r.seller, "Bob");
        assert_eq!(r.material, "Unknown");
        assert_eq!(r.timestamp, "2024-05-01");
        assert_eq!(r.searchable_text(), "iron lump bob unknown wts");
    }

    #[test]
    fn test_text_buy_line() {
        let r = parser().parse("WTB stone brick 50c <Alice>", 1).unwrap();
        assert_eq!(r.name, "stone brick");
        assert_eq!(r.quantity, 1);
        assert_eq!(r.unit_price, 50.0);
        assert_eq!(r.order_type, OrderType::Wtb);
        assert_eq!(r.seller, "Alice");
    }

    #[test]
    fn test_text_with_timestamp_and_for_amount() {
        let r = parser()
            .parse("[12:01:44] <Carol> WTS 1k stone bricks for 175", 2)
            .unwrap();
        assert_eq!(r.name, "stone bricks");
        assert_eq!(r.quantity, 1000);
        assert_eq!(r.unit_price, 0.175);
        assert_eq!(r.seller, "Carol");
    }

    #[test]
    fn test_text_rarity() {
        let r = parser().parse("WTS supreme pickaxe 2s <Dan>", 0).unwrap();
        assert_eq!(r.rarity, Rarity::Supreme);
        assert_eq!(r.name, "supreme pickaxe");
    }

    #[test]
    fn test_noise_lines_dropped() {
        let p = parser();
        assert!(p.parse("This is the Trade channel.", 0).is_none());
        assert!(p.parse("Bob joined the channel", 0).is_none());
        assert!(p.parse("<System> WTS free stuff 1s", 0).is_none());
        assert!(p.parse("", 0).is_none());
        assert!(p.parse("    ", 0).is_none());
    }

    #[test]
    fn test_junk_items_dropped() {
        let p = parser();
        assert!(p.parse("WTS 1k clay 1s <Bob>", 0).is_none());
        assert!(p.parse("WTS rare 1s <Bob>", 0).is_none());
        assert!(is_junk_item("Fantastic"));
        assert!(is_junk_item("sand bags"));
        assert!(!is_junk_item("iron lump"));
    }

    #[test]
    fn test_short_or_numeric_names_dropped() {
        let p = parser();
        assert!(p.parse("WTS ab 1s", 0).is_none());
        assert!(p.parse("WTS 500", 0).is_none());
    }

    #[test]
    fn test_json_line() {
        let line = r#"{"raw_text":"WTS 100x iron lump 1g","player":"Eve","main_item":"100x iron lump","price_s":"1g","server":"Xanadu","date":"2024-04-02","main_ql":"45.5"}"#;
        let r = parser().parse(line, 7).unwrap();
        assert_eq!(r.id, "json-7");
        assert_eq!(r.name, "iron lump");
        assert_eq!(r.quantity, 100);
        assert_eq!(r.unit_price, 100.0);
        assert_eq!(r.quality, 45.5);
        assert_eq!(r.order_type, OrderType::Wts);
        assert_eq!(r.seller, "Eve");
        assert_eq!(r.location, "Xanadu");
        assert_eq!(r.timestamp, "2024-04-02");
    }

    #[test]
    fn test_json_explicit_quantity_and_operation() {
        let line = r#"{"raw_text":"anyone have planks? 5s","player":"Finn","main_item":"plank","main_qty":10,"operation":"WTB","items":[{"ql":70}]}"#;
        let r = parser().parse(line, 0).unwrap();
        assert_eq!(r.quantity, 10);
        assert_eq!(r.unit_price, 50.0);
        assert_eq!(r.order_type, OrderType::Wtb);
        assert_eq!(r.quality, 70.0);
        assert_eq!(r.location, "Unknown");
        assert_eq!(r.timestamp, "2024-05-01");
    }

    #[test]
    fn test_json_price_falls_back_to_raw_text() {
        let line = r#"{"raw_text":"WTS lantern for 175","player":"Gus","main_item":"lantern","price_s":""}"#;
        let r = parser().parse(line, 0).unwrap();
        assert_eq!(r.unit_price, 175.0);
    }

    #[test]
    fn test_json_rejections() {
        let p = parser();
        assert!(p.parse(r#"{"player":"System","main_item":"lantern"}"#, 0).is_none());
        assert!(p.parse(r#"{"player":"Gus"}"#, 0).is_none());
        assert!(p.parse(r#"{"player":"Gus","main_item":"null fragment"}"#, 0).is_none());
        assert!(p.parse(r#"{"player": "Gus", "main_item": "#, 0).is_none());
    }

    #[test]
    fn test_order_type_keywords() {
        assert_eq!(detect_order_type("buying logs", None), OrderType::Wtb);
        assert_eq!(detect_order_type("selling logs", None), OrderType::Wts);
        assert_eq!(detect_order_type("logs", None), OrderType::Unknown);
        assert_eq!(detect_order_type("selling logs", Some("WTB")), OrderType::Wtb);
    }

    #[test]
    fn test_seller_tag_does_not_decide_order_type() {
        let r = parser().parse("WTS sword 5s <Buyerman>", 0).unwrap();
        assert_eq!(r.order_type, OrderType::Wts);
        assert_eq!(r.seller, "Buyerman");
    }

    #[test]
    fn test_leading_bom_is_ignored() {
        let line = "\u{feff}{\"player\":\"Gus\",\"main_item\":\"lantern\",\"price_s\":\"2s\"}";
        let r = parser().parse(line, 0).unwrap();
        assert_eq!(r.name, "lantern");
        assert_eq!(r.unit_price, 200.0);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("iron, lump!!"), "iron lump");
        assert_eq!(sanitize_name("  half-finished   rope "), "half-finished rope");
    }
}

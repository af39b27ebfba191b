//! Currency text -> base units (copper). 1g = 10000c, 1s = 100c, 1i = 0.01c.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// Trailing letter capture lets us reject "10 iron" or "2 sets" as currency.
static TIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([gsci])([a-z]*)").expect("static regex"));
static TIER_RE_ANY_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*([gsci])([a-z]*)").expect("static regex"));

// Spelled-out tiers. "iron" stays out: "10 iron" is an item far more often than a price.
const TIER_WORDS: [&str; 3] = ["gold", "silver", "copper"];
static FOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfor\s+(\d+(?:\.\d+)?)(?:\s|$)").expect("static regex"));
static NON_NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.]").expect("static regex"));
static JUST_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("static regex"));

pub const GOLD: f64 = 10_000.0;
pub const SILVER: f64 = 100.0;
pub const COPPER: f64 = 1.0;
pub const IRON: f64 = 0.01;

const FOR_RESCALE_BELOW: f64 = 100.0;
const LAST_NUMBER_RESCALE_BELOW: f64 = 50.0;

/// Fallback strategies, tried in `Strategy::ORDER` until one yields an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TierTagged,
    ForAmount,
    LastNumber,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [Strategy::TierTagged, Strategy::ForAmount, Strategy::LastNumber];

    /// `clean` must already be lowercased with decimal commas turned into dots.
    pub fn apply(self, clean: &str) -> Option<f64> {
        match self {
            Strategy::TierTagged => tier_tagged(clean),
            Strategy::ForAmount => for_amount(clean),
            Strategy::LastNumber => last_number(clean),
        }
    }
}

pub fn normalize(text: &str) -> f64 {
    normalize_detailed(text).map(|(_, amount)| amount).unwrap_or(0.0)
}

/// Like `normalize`, also reporting which strategy produced the amount.
pub fn normalize_detailed(text: &str) -> Option<(Strategy, f64)> {
    let clean = clean_text(text);
    if clean.is_empty() {
        return None;
    }

    Strategy::ORDER
        .iter()
        .find_map(|strategy| strategy.apply(&clean).map(|amount| (*strategy, amount)))
}

fn clean_text(text: &str) -> String {
    text.trim().to_lowercase().replace(',', ".")
}

fn tier_weight(tier: &str) -> f64 {
    match tier {
        "g" => GOLD,
        "s" => SILVER,
        "c" => COPPER,
        _ => IRON,
    }
}

fn is_tier_token(caps: &Captures) -> bool {
    let rest = caps.get(3).map_or("", |m| m.as_str());
    if rest.is_empty() {
        return true;
    }
    let word = format!("{}{}", &caps[2], rest).to_lowercase();
    TIER_WORDS.contains(&word.as_str())
}

pub fn tier_tagged(clean: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut found = false;

    for caps in TIER_RE.captures_iter(clean) {
        if !is_tier_token(&caps) {
            continue;
        }
        let Ok(value) = caps[1].parse::<f64>() else {
            continue;
        };
        found = true;
        total += value * tier_weight(&caps[2]);
    }

    found.then(|| (total * 10_000.0).round() / 10_000.0)
}

// "for 175" -> 175c, "for 1.5" -> 150c
pub fn for_amount(clean: &str) -> Option<f64> {
    let caps = FOR_RE.captures(clean)?;
    let value = caps[1].parse::<f64>().ok()?;
    Some(rescale(value, FOR_RESCALE_BELOW))
}

pub fn last_number(clean: &str) -> Option<f64> {
    let spaced = NON_NUMERIC_RE.replace_all(clean, " ");
    let value = spaced
        .split_whitespace()
        .filter_map(|token| token.parse::<f64>().ok())
        .last()?;

    if JUST_NUMBER_RE.is_match(clean) {
        return Some(value);
    }
    Some(rescale(value, LAST_NUMBER_RESCALE_BELOW))
}

// Small fractional amounts in chat are silver ("0.5" -> 50c).
fn rescale(value: f64, below: f64) -> f64 {
    if value < below && value.fract() != 0.0 {
        value * SILVER
    } else {
        value
    }
}

/// Removes tier-tagged amounts from free text, preserving its case.
pub(crate) fn strip_currency_tokens(text: &str) -> String {
    TIER_RE_ANY_CASE
        .replace_all(text, |caps: &Captures| {
            if is_tier_token(caps) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

pub fn format_price(copper: f64) -> String {
    if copper <= 0.0 {
        return "0c".to_string();
    }

    let gold = (copper / GOLD).floor();
    let silver = ((copper % GOLD) / SILVER).floor();
    let cop = (copper % SILVER).floor();
    let iron = ((copper % 1.0) * 100.0).round();

    let mut parts = Vec::new();
    if gold > 0.0 {
        parts.push(format!("{gold}g"));
    }
    if silver > 0.0 {
        parts.push(format!("{silver}s"));
    }
    if cop > 0.0 {
        parts.push(format!("{cop}c"));
    }
    if iron > 0.0 {
        parts.push(format!("{iron}i"));
    }

    if parts.is_empty() {
        "0c".to_string()
    } else {
        parts.join(" ")
    }
}

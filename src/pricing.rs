use crate::model::{PriceEvaluation, PriceRating, Rarity, ReferencePriceTable};

pub const DEFAULT_RATING_BAND: f64 = 10.0;
pub const MIN_LOOKUP_LEN: usize = 3;

/// Lowercase, drop rarity words (whole tokens only), collapse whitespace.
pub fn normalize_item_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .filter(|token| !Rarity::KEYWORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finds the reference entry for an item name: exact key, then the
/// singular/plural twin, then the longest key contained in the name (or
/// containing it).
pub fn resolve_reference<'a>(name: &str, table: &'a ReferencePriceTable) -> Option<(&'a str, f64)> {
    let key = normalize_item_name(name);
    if key.is_empty() {
        return None;
    }

    if let Some(hit) = table.get_entry(&key) {
        return Some(hit);
    }

    let twin = match key.strip_suffix('s') {
        Some(singular) => singular.to_string(),
        None => format!("{key}s"),
    };
    if let Some(hit) = table.get_entry(&twin) {
        return Some(hit);
    }

    // Longest key wins; equal lengths keep the alphabetically first.
    table
        .iter()
        .filter(|(k, _)| !k.is_empty() && (key.contains(k) || k.contains(key.as_str())))
        .fold(None, |best: Option<(&'a str, f64)>, (k, price)| match best {
            Some((b, _)) if b.len() >= k.len() => best,
            _ => Some((k, price)),
        })
}

pub fn evaluate(name: &str, price: f64, table: &ReferencePriceTable) -> PriceEvaluation {
    evaluate_with_band(name, price, table, DEFAULT_RATING_BAND)
}

/// GOOD at or below `-band` percent of the reference, BAD at or above `+band`.
pub fn evaluate_with_band(
    name: &str,
    price: f64,
    table: &ReferencePriceTable,
    band: f64,
) -> PriceEvaluation {
    let Some((_, reference_price)) = resolve_reference(name, table) else {
        return PriceEvaluation::unknown();
    };
    if reference_price == 0.0 || !reference_price.is_finite() {
        return PriceEvaluation::unknown();
    }

    let delta_percent = (price - reference_price) / reference_price * 100.0;
    let rating = if delta_percent <= -band {
        PriceRating::Good
    } else if delta_percent >= band {
        PriceRating::Bad
    } else {
        PriceRating::Fair
    };

    PriceEvaluation {
        rating,
        delta_percent,
        reference_price,
    }
}

/// Loose lookup for the reference panel: exact, prefix, then substring either way.
pub fn find_closest_reference(term: &str, table: &ReferencePriceTable) -> Option<(String, f64)> {
    if term.trim().chars().count() < MIN_LOOKUP_LEN {
        return None;
    }
    let term = normalize_item_name(term);
    if term.is_empty() {
        return None;
    }

    let found = table
        .get_entry(&term)
        .or_else(|| table.iter().find(|(k, _)| k.starts_with(term.as_str())))
        .or_else(|| {
            table
                .iter()
                .find(|(k, _)| k.contains(term.as_str()) || term.contains(k))
        });

    found.map(|(k, price)| (k.to_string(), price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(entries: &[(&str, f64)]) -> ReferencePriceTable {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_normalize_item_name() {
        assert_eq!(normalize_item_name("Rare  Iron Lump"), "iron lump");
        assert_eq!(normalize_item_name("rarely used pick"), "rarely used pick");
        assert_eq!(normalize_item_name("FANTASTIC"), "");
    }

    #[test]
    fn test_empty_table_is_unknown() {
        let empty = ReferencePriceTable::new();
        let e = evaluate("iron lump", 50.0, &empty);
        assert_eq!(e.rating, PriceRating::Unknown);
        assert_eq!(e.reference_price, 0.0);
        assert_eq!(e.delta_percent, 0.0);
    }

    #[test]
    fn test_rating_thresholds() {
        let t = table(&[("iron lump", 100.0)]);
        assert_eq!(evaluate("iron lump", 90.0, &t).rating, PriceRating::Good);
        assert_eq!(evaluate("iron lump", 89.0, &t).rating, PriceRating::Good);
        assert_eq!(evaluate("iron lump", 95.0, &t).rating, PriceRating::Fair);
        assert_eq!(evaluate("iron lump", 109.0, &t).rating, PriceRating::Fair);
        assert_eq!(evaluate("iron lump", 110.0, &t).rating, PriceRating::Bad);

        let e = evaluate("Supreme Iron Lump", 150.0, &t);
        assert_eq!(e.reference_price, 100.0);
        assert_eq!(e.delta_percent, 50.0);
    }

    #[test]
    fn test_plural_twin() {
        let t = table(&[("stone brick", 2.0), ("iron lumps", 4.0)]);
        assert_eq!(resolve_reference("stone bricks", &t), Some(("stone brick", 2.0)));
        assert_eq!(resolve_reference("iron lump", &t), Some(("iron lumps", 4.0)));
    }

    #[test]
    fn test_fuzzy_longest_key_wins() {
        let t = table(&[("brick", 1.0), ("stone brick", 2.0), ("brick mould", 30.0)]);
        assert_eq!(
            resolve_reference("large stone brick pile", &t),
            Some(("stone brick", 2.0))
        );
        assert_eq!(resolve_reference("bric", &t), Some(("brick mould", 30.0)));
    }

    #[test]
    fn test_zero_reference_is_unknown() {
        let t = table(&[("rope", 0.0)]);
        assert_eq!(evaluate("rope", 10.0, &t).rating, PriceRating::Unknown);
    }

    #[test]
    fn test_find_closest_reference() {
        let t = ReferencePriceTable::from_map(HashMap::from([
            ("Stone Brick".to_string(), 2.0),
            ("stone slab".to_string(), 40.0),
            ("mortar".to_string(), 5.0),
        ]));
        assert_eq!(find_closest_reference("mortar", &t), Some(("mortar".to_string(), 5.0)));
        assert_eq!(find_closest_reference("stone", &t), Some(("stone brick".to_string(), 2.0)));
        assert_eq!(find_closest_reference("slab", &t), Some(("stone slab".to_string(), 40.0)));
        assert_eq!(
            find_closest_reference("fresh mortar mix", &t),
            Some(("mortar".to_string(), 5.0))
        );
        assert_eq!(find_closest_reference("mo", &t), None);
        assert_eq!(find_closest_reference("anvil", &t), None);
    }

    #[test]
    fn test_find_closest_reference_ignores_rarity_words() {
        let t = table(&[("iron lump", 5.0)]);
        assert_eq!(find_closest_reference("rare iron", &t), Some(("iron lump".to_string(), 5.0)));
        assert_eq!(
            find_closest_reference("Supreme Iron Lump", &t),
            Some(("iron lump".to_string(), 5.0))
        );
        assert_eq!(find_closest_reference("rare", &t), None);
    }
}

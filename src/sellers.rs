use std::collections::BTreeMap;

use crate::model::{ConcentrationLevel, PriceStrategy, SellerInsight, TradeRecord, UNKNOWN};
use crate::stats;

// Sellers more than this fraction off the market mean are premium/discount.
const STRATEGY_BAND: f64 = 0.10;

fn item_offers<'a>(records: &'a [TradeRecord], item: &str) -> Vec<&'a TradeRecord> {
    let item = item.trim().to_lowercase();
    records
        .iter()
        .filter(|r| r.name.to_lowercase() == item)
        .collect()
}

fn group_by_seller<'a>(offers: &[&'a TradeRecord]) -> BTreeMap<&'a str, Vec<&'a TradeRecord>> {
    let mut by_seller: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for &r in offers {
        let seller = if r.seller.is_empty() { UNKNOWN } else { r.seller.as_str() };
        by_seller.entry(seller).or_default().push(r);
    }
    by_seller
}

pub fn price_strategy(seller_avg: f64, market_avg: f64) -> PriceStrategy {
    if seller_avg > market_avg * (1.0 + STRATEGY_BAND) {
        PriceStrategy::Premium
    } else if seller_avg < market_avg * (1.0 - STRATEGY_BAND) {
        PriceStrategy::Discount
    } else {
        PriceStrategy::Market
    }
}

/// Sellers of one item (exact name, case-insensitive) ranked by listing count.
pub fn top_sellers(records: &[TradeRecord], item: &str, limit: usize) -> Vec<SellerInsight> {
    let offers = item_offers(records, item);
    if offers.is_empty() {
        return Vec::new();
    }

    let all_prices: Vec<f64> = offers.iter().map(|r| r.unit_price).collect();
    let market_avg = stats::mean(&all_prices);
    let total = offers.len() as f64;

    let mut insights: Vec<SellerInsight> = group_by_seller(&offers)
        .into_iter()
        .map(|(seller, listings)| {
            let prices: Vec<f64> = listings.iter().map(|r| r.unit_price).collect();
            let avg_price = stats::mean(&prices);
            SellerInsight {
                seller: seller.to_string(),
                listings: listings.len(),
                avg_price,
                market_share: listings.len() as f64 / total * 100.0,
                strategy: price_strategy(avg_price, market_avg),
            }
        })
        .collect();

    // Stable: equal counts keep alphabetical seller order.
    insights.sort_by(|a, b| b.listings.cmp(&a.listings));
    insights.truncate(limit);
    insights
}

/// Herfindahl-Hirschman index over listing shares, 0-10000.
pub fn market_concentration(records: &[TradeRecord], item: &str) -> u32 {
    let offers = item_offers(records, item);
    if offers.is_empty() {
        return 0;
    }

    let total = offers.len() as f64;
    let hhi: f64 = group_by_seller(&offers)
        .values()
        .map(|listings| {
            let share = listings.len() as f64 / total * 100.0;
            share * share
        })
        .sum();

    hhi.round() as u32
}

pub fn concentration_level(hhi: u32) -> ConcentrationLevel {
    if hhi < 1500 {
        ConcentrationLevel::Competitive
    } else if hhi < 2500 {
        ConcentrationLevel::Moderate
    } else {
        ConcentrationLevel::Concentrated
    }
}

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::StatsConfig;
use crate::model::{
    BulkGroup, ForecastTrend, PriceAnomaly, PriceDirection, PriceForecast, PriceIntelligence,
    TradeRecord, VolatilityLevel, VolatilityMetrics,
};
use crate::quantity;
use crate::stats;

pub const DEFAULT_FORECAST_DAYS: u32 = 7;
pub const DEFAULT_FORECAST_WINDOW_DAYS: u32 = 30;
const MIN_FORECAST_POINTS: usize = 5;
// Offers in the window at which data volume stops adding confidence.
const FULL_VOLUME_POINTS: f64 = 30.0;
// Second half of the offers this far above/below the first is a direction.
const DIRECTION_BAND: f64 = 0.10;
// Supply/demand score when the timestamps say nothing.
const NEUTRAL_SCORE: f64 = 50.0;

/// Offers whose name contains `item` (a leading quantity in the search term
/// is ignored), optionally restricted to one material, with a positive price.
pub fn select_records<'a>(
    records: &'a [TradeRecord],
    item: &str,
    material: Option<&str>,
) -> Vec<&'a TradeRecord> {
    let term = quantity::extract(item).name.to_lowercase();
    let material = material
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty() && m != "any");

    records
        .iter()
        .filter(|r| r.unit_price > 0.0)
        .filter(|r| term.is_empty() || r.name.to_lowercase().contains(&term))
        .filter(|r| match &material {
            Some(m) => r.material.to_lowercase() == *m,
            None => true,
        })
        .collect()
}

pub fn predict(
    records: &[TradeRecord],
    item: &str,
    material: Option<&str>,
    config: &StatsConfig,
) -> Option<PriceIntelligence> {
    let selected = select_records(records, item, material);
    intelligence_for(item.trim(), material, &selected, config)
}

/// Price intelligence over an already-selected set of offers. None when the
/// set is smaller than `config.min_samples`.
pub fn intelligence_for(
    name: &str,
    material: Option<&str>,
    selected: &[&TradeRecord],
    config: &StatsConfig,
) -> Option<PriceIntelligence> {
    let prices: Vec<f64> = selected
        .iter()
        .map(|r| r.unit_price)
        .filter(|p| *p > 0.0)
        .collect();
    if prices.is_empty() || prices.len() < config.min_samples {
        return None;
    }

    let filtered = stats::filter_outliers(&prices, config.outlier_threshold);
    let outliers_removed = prices.len() - filtered.len();

    let mean = stats::mean(&filtered);
    let std_dev = stats::population_std_dev(&filtered);
    let cv = stats::coefficient_of_variation(&filtered);
    let volatility_pct = cv * 100.0;

    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // Oldest first; stable sort keeps ingestion order within a day.
    let mut chronological: Vec<&TradeRecord> = selected.to_vec();
    chronological.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let ordered: Vec<f64> = chronological.iter().map(|r| r.unit_price).collect();

    Some(PriceIntelligence {
        name: name.to_string(),
        material: material.map(str::to_string),
        sample_size: prices.len(),
        outliers_removed,
        mean,
        std_dev,
        volatility_pct,
        volatility: stats::volatility_level(volatility_pct),
        fair_value: stats::median(&filtered),
        buy_zone: stats::percentile(&filtered, 25.0),
        sell_zone: stats::percentile(&filtered, 75.0),
        min,
        max,
        confidence: stats::confidence(filtered.len(), cv),
        price_trend: stats::trend(&ordered),
        market_volatility: volatility_metrics(selected),
        bulk: bulk_analysis(selected),
    })
}

/// One group per distinct quantity, ascending. The cheapest mean unit price
/// is marked best value; on a tie the smaller lot wins.
pub fn bulk_analysis(records: &[&TradeRecord]) -> Vec<BulkGroup> {
    let mut by_quantity: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for r in records {
        by_quantity.entry(r.quantity).or_default().push(r.unit_price);
    }

    let single_mean = by_quantity
        .get(&1)
        .map(|prices| stats::mean(prices))
        .filter(|m| *m > 0.0);

    let mut groups: Vec<BulkGroup> = by_quantity
        .into_iter()
        .map(|(quantity, prices)| {
            let mean_unit_price = stats::mean(&prices);
            BulkGroup {
                quantity,
                count: prices.len(),
                mean_unit_price,
                multiplier: single_mean.map(|single| mean_unit_price / single),
                best_value: false,
            }
        })
        .collect();

    let best = groups
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, g)| match best {
            Some((_, price)) if price <= g.mean_unit_price => best,
            _ => Some((i, g.mean_unit_price)),
        });
    if let Some((i, _)) = best {
        groups[i].best_value = true;
    }

    groups
}

// RFC 3339, "YYYY-MM-DD HH:MM:SS", or a bare date taken as midnight.
fn offer_time(timestamp: &str) -> Option<NaiveDateTime> {
    let ts = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(ts.get(..10)?, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

/// Regression over daily mean prices inside the last `window_days` before
/// the newest offer, projected `forecast_days` past the newest day. None
/// with fewer than five dated offers in the window.
pub fn forecast(selected: &[&TradeRecord], forecast_days: u32, window_days: u32) -> Option<PriceForecast> {
    let dated: Vec<(NaiveDate, f64)> = selected
        .iter()
        .filter(|r| r.unit_price > 0.0)
        .filter_map(|r| offer_time(&r.timestamp).map(|t| (t.date(), r.unit_price)))
        .collect();
    let newest = dated.iter().map(|(day, _)| *day).max()?;
    let cutoff = newest - Duration::days(i64::from(window_days));

    let mut daily: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (day, price) in dated.into_iter().filter(|(day, _)| *day > cutoff) {
        daily.entry(day).or_default().push(price);
    }
    let data_points: usize = daily.values().map(Vec::len).sum();
    if data_points < MIN_FORECAST_POINTS {
        return None;
    }

    let averages: Vec<f64> = daily.values().map(|prices| stats::mean(prices)).collect();
    let line = stats::linear_regression(&averages);
    let current_price = *averages.last()?;
    let predicted_price = line.at((averages.len() - 1) as f64 + f64::from(forecast_days));
    let predicted_change = predicted_price - current_price;
    let predicted_change_percent = if current_price > 0.0 {
        predicted_change / current_price * 100.0
    } else {
        0.0
    };

    let volume_score = (data_points as f64 / FULL_VOLUME_POINTS * 100.0).min(100.0);
    let confidence = (line.r_squared * 70.0 + volume_score * 0.3).round().clamp(0.0, 100.0);

    let average = stats::mean(&averages);
    let trend_strength = if average > 0.0 {
        (line.slope.abs() / average * 1000.0).min(100.0).round()
    } else {
        0.0
    };

    Some(PriceForecast {
        current_price,
        predicted_price,
        predicted_change,
        predicted_change_percent,
        confidence,
        trend: ForecastTrend::from_change_percent(predicted_change_percent),
        trend_strength,
        forecast_days,
        data_points,
        days: averages.len(),
        r_squared: line.r_squared,
    })
}

/// Per-offer z-score of the unit price within `selected`.
pub fn anomalies(selected: &[&TradeRecord], threshold: f64) -> Vec<PriceAnomaly> {
    let prices: Vec<f64> = selected.iter().map(|r| r.unit_price).collect();
    selected
        .iter()
        .zip(stats::z_scores(&prices))
        .map(|(r, z_score)| PriceAnomaly {
            id: r.id.clone(),
            name: r.name.clone(),
            seller: r.seller.clone(),
            unit_price: r.unit_price,
            z_score,
            is_anomaly: z_score.abs() > threshold,
        })
        .collect()
}

pub fn volatility_metrics(selected: &[&TradeRecord]) -> VolatilityMetrics {
    if selected.is_empty() {
        return VolatilityMetrics {
            score: 0.0,
            level: VolatilityLevel::Stable,
            price_std_dev: 0.0,
            supply_consistency: 0.0,
            demand_stability: 0.0,
            direction: PriceDirection::Stable,
        };
    }

    let prices: Vec<f64> = selected.iter().map(|r| r.unit_price).collect();
    let price_volatility = (stats::coefficient_of_variation(&prices) * 100.0).min(100.0);

    let mut times: Vec<NaiveDateTime> = selected.iter().filter_map(|r| offer_time(&r.timestamp)).collect();
    times.sort();

    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for t in &times {
        *per_day.entry(t.date()).or_default() += 1.0;
    }
    let supply: Vec<f64> = per_day.into_values().collect();
    let supply_consistency = if supply.is_empty() {
        NEUTRAL_SCORE
    } else {
        (100.0 - stats::coefficient_of_variation(&supply) * 100.0).max(0.0)
    };

    let gaps: Vec<f64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64)
        .collect();
    let demand_stability = if gaps.is_empty() || stats::mean(&gaps) <= 0.0 {
        NEUTRAL_SCORE
    } else {
        (100.0 - stats::coefficient_of_variation(&gaps) * 50.0).max(0.0)
    };

    let score = (price_volatility * 0.5
        + (100.0 - supply_consistency) * 0.25
        + (100.0 - demand_stability) * 0.25)
        .round()
        .clamp(0.0, 100.0);

    VolatilityMetrics {
        score,
        level: stats::volatility_level(score),
        price_std_dev: stats::population_std_dev(&prices),
        supply_consistency: supply_consistency.round(),
        demand_stability: demand_stability.round(),
        direction: price_direction(selected),
    }
}

// Mean of the later half of the offers against the earlier half.
fn price_direction(selected: &[&TradeRecord]) -> PriceDirection {
    let mut chronological: Vec<&TradeRecord> = selected.to_vec();
    chronological.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let ordered: Vec<f64> = chronological.iter().map(|r| r.unit_price).collect();

    let mid = ordered.len() / 2;
    if mid == 0 {
        return PriceDirection::Stable;
    }
    let first = stats::mean(&ordered[..mid]);
    let second = stats::mean(&ordered[mid..]);

    if second > first * (1.0 + DIRECTION_BAND) {
        PriceDirection::Rising
    } else if second < first * (1.0 - DIRECTION_BAND) {
        PriceDirection::Falling
    } else {
        PriceDirection::Stable
    }
}

/// Sorted, de-duplicated names of offers with a positive price.
pub fn distinct_items(records: &[TradeRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.unit_price > 0.0)
        .map(|r| r.name.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Intelligence for every distinct item name, computed in parallel.
/// Largest samples first, then by name.
pub fn market_overview(records: &[TradeRecord], config: &StatsConfig) -> Vec<PriceIntelligence> {
    let mut groups: BTreeMap<String, Vec<&TradeRecord>> = BTreeMap::new();
    for r in records.iter().filter(|r| r.unit_price > 0.0) {
        groups.entry(r.name.to_lowercase()).or_default().push(r);
    }

    let mut overview: Vec<PriceIntelligence> = groups
        .par_iter()
        .filter_map(|(name, selected)| intelligence_for(name, None, selected, config))
        .collect();

    overview.sort_by(|a, b| {
        b.sample_size
            .cmp(&a.sample_size)
            .then_with(|| a.name.cmp(&b.name))
    });
    overview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderType, Rarity, RecordFields};

    fn offer(name: &str, material: &str, unit_price: f64, quantity: u32, day: u32) -> TradeRecord {
        TradeRecord::new(RecordFields {
            id: format!("{name}-{unit_price}-{quantity}-{day}"),
            name: name.to_string(),
            material: material.to_string(),
            quality: 50.0,
            rarity: Rarity::Common,
            unit_price,
            quantity,
            order_type: OrderType::Wts,
            seller: "Bob".to_string(),
            location: "Unknown".to_string(),
            timestamp: format!("2024-05-{day:02}"),
        })
    }

    fn market() -> Vec<TradeRecord> {
        vec![
            offer("iron lump", "Iron", 10.0, 1, 1),
            offer("iron lump", "Iron", 12.0, 1, 2),
            offer("iron lump", "Iron", 8.0, 10, 3),
            offer("iron lump", "Iron", 9.0, 10, 4),
            offer("iron lump", "Iron", 11.0, 1, 5),
            offer("iron lump", "Steel", 30.0, 1, 6),
            offer("stone brick", "Unknown", 2.0, 100, 1),
            offer("stone brick", "Unknown", 0.0, 1, 2),
        ]
    }

    #[test]
    fn test_select_records_filters_name_material_price() {
        let records = market();
        assert_eq!(select_records(&records, "iron", None).len(), 6);
        assert_eq!(select_records(&records, "IRON LUMP", Some("iron")).len(), 5);
        assert_eq!(select_records(&records, "100x stone brick", None).len(), 1);
        assert_eq!(select_records(&records, "lump", Some("Any")).len(), 6);
        assert!(select_records(&records, "anvil", None).is_empty());
    }

    #[test]
    fn test_predict_zones_and_fair_value() {
        let records = market();
        let intel = predict(&records, "iron lump", Some("Iron"), &StatsConfig::default()).unwrap();

        assert_eq!(intel.sample_size, 5);
        assert_eq!(intel.outliers_removed, 0);
        assert_eq!(intel.fair_value, 10.0);
        assert_eq!(intel.buy_zone, 9.0);
        assert_eq!(intel.sell_zone, 11.0);
        assert!(intel.buy_zone <= intel.fair_value && intel.fair_value <= intel.sell_zone);
        assert_eq!(intel.min, 8.0);
        assert_eq!(intel.max, 12.0);
        assert!(intel.confidence > 0.0 && intel.confidence <= 100.0);
        assert_eq!(intel.material.as_deref(), Some("Iron"));
    }

    #[test]
    fn test_predict_carries_market_volatility() {
        let records = market();
        let intel = predict(&records, "iron lump", Some("Iron"), &StatsConfig::default()).unwrap();
        // one offer a day, evenly spaced
        assert_eq!(intel.market_volatility.supply_consistency, 100.0);
        assert_eq!(intel.market_volatility.demand_stability, 100.0);
        assert_eq!(intel.market_volatility.level, VolatilityLevel::Stable);
    }

    #[test]
    fn test_predict_needs_min_samples() {
        let records = market();
        let config = StatsConfig {
            min_samples: 10,
            ..StatsConfig::default()
        };
        assert!(predict(&records, "iron lump", None, &config).is_none());
        assert!(predict(&records, "anvil", None, &StatsConfig::default()).is_none());
    }

    #[test]
    fn test_bulk_best_value_and_multiplier() {
        let records = market();
        let selected = select_records(&records, "iron lump", Some("iron"));
        let groups = bulk_analysis(&selected);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].quantity, 1);
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].multiplier, Some(1.0));
        assert!(!groups[0].best_value);

        assert_eq!(groups[1].quantity, 10);
        assert_eq!(groups[1].mean_unit_price, 8.5);
        assert!(groups[1].best_value);
        assert!((groups[1].multiplier.unwrap() - 8.5 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_bulk_without_singles_has_no_multiplier() {
        let records = vec![offer("rope", "Unknown", 5.0, 20, 1), offer("rope", "Unknown", 4.0, 50, 1)];
        let selected: Vec<&TradeRecord> = records.iter().collect();
        let groups = bulk_analysis(&selected);
        assert!(groups.iter().all(|g| g.multiplier.is_none()));
        assert!(groups[1].best_value);
    }

    #[test]
    fn test_distinct_items_and_overview() {
        let records = market();
        assert_eq!(distinct_items(&records), vec!["iron lump", "stone brick"]);

        let overview = market_overview(&records, &StatsConfig::default());
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].name, "iron lump");
        assert_eq!(overview[0].sample_size, 6);
        assert_eq!(overview[1].name, "stone brick");
        assert_eq!(overview[1].sample_size, 1);
    }

    fn series(prices: &[(f64, u32)]) -> Vec<TradeRecord> {
        prices
            .iter()
            .map(|&(price, day)| offer("iron lump", "Iron", price, 1, day))
            .collect()
    }

    #[test]
    fn test_forecast_rising_line() {
        let records = series(&[(10.0, 1), (12.0, 2), (14.0, 3), (16.0, 4), (18.0, 5)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        let f = forecast(&selected, 7, 30).unwrap();

        assert_eq!(f.current_price, 18.0);
        assert!((f.r_squared - 1.0).abs() < 1e-9);
        // day index 4 + 7 on the line 10 + 2x
        assert!((f.predicted_price - 32.0).abs() < 1e-9);
        assert!((f.predicted_change - 14.0).abs() < 1e-9);
        assert_eq!(f.trend, ForecastTrend::StrongUp);
        assert_eq!(f.data_points, 5);
        assert_eq!(f.days, 5);
        // 0.7 * 100 + 0.3 * (5 / 30 * 100)
        assert_eq!(f.confidence, 75.0);
        assert_eq!(f.trend_strength, 100.0);
    }

    #[test]
    fn test_forecast_averages_each_day() {
        let records = series(&[(8.0, 1), (12.0, 1), (10.0, 2), (9.0, 3), (11.0, 3)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        let f = forecast(&selected, 7, 30).unwrap();
        assert_eq!(f.days, 3);
        assert_eq!(f.data_points, 5);
        assert_eq!(f.current_price, 10.0);
        assert_eq!(f.trend, ForecastTrend::Stable);
    }

    #[test]
    fn test_forecast_window_and_minimum() {
        let records = series(&[(10.0, 1), (11.0, 2), (12.0, 3), (13.0, 4)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        assert!(forecast(&selected, 7, 30).is_none());

        // day 1 falls outside a 2-day window ending on day 5
        let records = series(&[(10.0, 1), (11.0, 4), (12.0, 4), (13.0, 5), (14.0, 5)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        assert!(forecast(&selected, 7, 2).is_none());
        assert!(forecast(&selected, 7, 30).is_some());
    }

    #[test]
    fn test_forecast_trend_bands() {
        assert_eq!(ForecastTrend::from_change_percent(10.5), ForecastTrend::StrongUp);
        assert_eq!(ForecastTrend::from_change_percent(6.0), ForecastTrend::ModerateUp);
        assert_eq!(ForecastTrend::from_change_percent(2.0), ForecastTrend::WeakUp);
        assert_eq!(ForecastTrend::from_change_percent(1.0), ForecastTrend::Stable);
        assert_eq!(ForecastTrend::from_change_percent(-1.0), ForecastTrend::Stable);
        assert_eq!(ForecastTrend::from_change_percent(-3.0), ForecastTrend::WeakDown);
        assert_eq!(ForecastTrend::from_change_percent(-7.0), ForecastTrend::ModerateDown);
        assert_eq!(ForecastTrend::from_change_percent(-20.0), ForecastTrend::StrongDown);
    }

    #[test]
    fn test_anomalies_flag_spike() {
        let mut prices: Vec<(f64, u32)> = (1..=10).map(|day| (10.0, day)).collect();
        prices.push((100.0, 11));
        let records = series(&prices);
        let selected: Vec<&TradeRecord> = records.iter().collect();

        let flagged = anomalies(&selected, 2.0);
        assert_eq!(flagged.len(), 11);
        assert!(flagged[10].is_anomaly);
        assert!(flagged[10].z_score > 3.0);
        assert!(flagged[..10].iter().all(|a| !a.is_anomaly && a.z_score < 0.0));

        let flat = series(&[(5.0, 1), (5.0, 2)]);
        let selected: Vec<&TradeRecord> = flat.iter().collect();
        assert!(anomalies(&selected, 2.0).iter().all(|a| a.z_score == 0.0 && !a.is_anomaly));
    }

    #[test]
    fn test_volatility_metrics_components() {
        let records = series(&[(10.0, 1), (10.0, 1), (10.0, 1), (20.0, 2)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        let v = volatility_metrics(&selected);

        // three offers on day 1, one on day 2
        assert_eq!(v.supply_consistency, 50.0);
        // gaps 0, 0, one day
        assert_eq!(v.demand_stability, 29.0);
        assert_eq!(v.direction, PriceDirection::Rising);
        assert!(v.score > 40.0 && v.score < 55.0);
        assert_eq!(v.level, VolatilityLevel::Moderate);
        assert!((v.price_std_dev - 75f64.sqrt() / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_metrics_edge_cases() {
        let v = volatility_metrics(&[]);
        assert_eq!(v.score, 0.0);
        assert_eq!(v.direction, PriceDirection::Stable);

        // all on one day: no spread in time to judge demand by
        let records = series(&[(10.0, 3), (10.0, 3)]);
        let selected: Vec<&TradeRecord> = records.iter().collect();
        let v = volatility_metrics(&selected);
        assert_eq!(v.supply_consistency, 100.0);
        assert_eq!(v.demand_stability, 50.0);
        assert_eq!(v.score, 13.0);

        let falling = series(&[(20.0, 1), (20.0, 2), (10.0, 3), (10.0, 4)]);
        let selected: Vec<&TradeRecord> = falling.iter().collect();
        assert_eq!(volatility_metrics(&selected).direction, PriceDirection::Falling);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::pricing::normalize_item_name;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Rare,
    Supreme,
    Fantastic,
}

impl Rarity {
    pub const KEYWORDS: [&'static str; 4] = ["common", "rare", "supreme", "fantastic"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Rare => "Rare",
            Rarity::Supreme => "Supreme",
            Rarity::Fantastic => "Fantastic",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "WTB")]
    Wtb,
    #[serde(rename = "WTS")]
    Wts,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Wtb => "WTB",
            OrderType::Wts => "WTS",
            OrderType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field values for a record before its search text is derived.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub id: String,
    pub name: String,
    pub material: String,
    pub quality: f64,
    pub rarity: Rarity,
    pub unit_price: f64,
    pub quantity: u32,
    pub order_type: OrderType,
    pub seller: String,
    pub location: String,
    pub timestamp: String,
}

/// One parsed trade offer. `unit_price` is per single unit in base units (copper).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: String,
    pub name: String,
    pub material: String,
    pub quality: f64,
    pub rarity: Rarity,
    pub unit_price: f64,
    pub quantity: u32,
    pub order_type: OrderType,
    pub seller: String,
    pub location: String,
    pub timestamp: String,
    searchable_text: String,
}

impl TradeRecord {
    pub fn new(fields: RecordFields) -> Self {
        let searchable_text = format!(
            "{} {} {} {}",
            fields.name, fields.seller, fields.material, fields.order_type
        )
        .to_lowercase();

        TradeRecord {
            id: fields.id,
            name: fields.name,
            material: fields.material,
            quality: fields.quality.clamp(0.0, 100.0),
            rarity: fields.rarity,
            unit_price: fields.unit_price.max(0.0),
            quantity: fields.quantity.max(1),
            order_type: fields.order_type,
            seller: fields.seller,
            location: fields.location,
            timestamp: fields.timestamp,
            searchable_text,
        }
    }

    pub fn searchable_text(&self) -> &str {
        &self.searchable_text
    }

    pub fn total_price(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }

    pub fn is_bulk(&self) -> bool {
        self.quantity > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceRating {
    Good,
    Bad,
    Fair,
    Unknown,
}

impl fmt::Display for PriceRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceRating::Good => "GOOD",
            PriceRating::Bad => "BAD",
            PriceRating::Fair => "FAIR",
            PriceRating::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEvaluation {
    pub rating: PriceRating,
    pub delta_percent: f64,
    pub reference_price: f64,
}

impl PriceEvaluation {
    pub fn unknown() -> Self {
        PriceEvaluation {
            rating: PriceRating::Unknown,
            delta_percent: 0.0,
            reference_price: 0.0,
        }
    }
}

/// Normalized item name -> unit price. Rebuilt wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferencePriceTable {
    prices: BTreeMap<String, f64>,
}

impl ReferencePriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts the `name -> price` shape handed over by editors. Keys are normalized.
    pub fn from_map(map: HashMap<String, f64>) -> Self {
        map.into_iter().collect()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.prices.get(key).copied()
    }

    pub fn get_entry(&self, key: &str) -> Option<(&str, f64)> {
        self.prices.get_key_value(key).map(|(k, v)| (k.as_str(), *v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub(crate) fn insert_normalized(&mut self, name: &str, price: f64) {
        let key = normalize_item_name(name);
        if !key.is_empty() {
            self.prices.insert(key, price);
        }
    }
}

impl FromIterator<(String, f64)> for ReferencePriceTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut table = ReferencePriceTable::new();
        for (name, price) in iter {
            table.insert_normalized(&name, price);
        }
        table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolatilityLevel {
    Stable,
    Moderate,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceDirection {
    Rising,
    Falling,
    Stable,
}

/// Composite 0-100 volatility: half price spread, a quarter each for uneven
/// daily supply and irregular gaps between offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityMetrics {
    pub score: f64,
    pub level: VolatilityLevel,
    pub price_std_dev: f64,
    pub supply_consistency: f64, // 0-100, higher = same listing count every day
    pub demand_stability: f64,   // 0-100, higher = evenly spaced offers
    pub direction: PriceDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForecastTrend {
    StrongUp,
    ModerateUp,
    WeakUp,
    Stable,
    WeakDown,
    ModerateDown,
    StrongDown,
}

impl ForecastTrend {
    /// Bands at 1, 5 and 10 percent of predicted change.
    pub fn from_change_percent(percent: f64) -> Self {
        if percent > 10.0 {
            ForecastTrend::StrongUp
        } else if percent > 5.0 {
            ForecastTrend::ModerateUp
        } else if percent > 1.0 {
            ForecastTrend::WeakUp
        } else if percent < -10.0 {
            ForecastTrend::StrongDown
        } else if percent < -5.0 {
            ForecastTrend::ModerateDown
        } else if percent < -1.0 {
            ForecastTrend::WeakDown
        } else {
            ForecastTrend::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceForecast {
    pub current_price: f64, // mean unit price on the newest day
    pub predicted_price: f64,
    pub predicted_change: f64,
    pub predicted_change_percent: f64,
    pub confidence: f64, // 0-100
    pub trend: ForecastTrend,
    pub trend_strength: f64, // 0-100
    pub forecast_days: u32,
    pub data_points: usize,
    pub days: usize,
    pub r_squared: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceAnomaly {
    pub id: String,
    pub name: String,
    pub seller: String,
    pub unit_price: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkGroup {
    pub quantity: u32,
    pub count: usize,
    pub mean_unit_price: f64,
    pub multiplier: Option<f64>, // vs single-unit mean, < 1.0 is a discount
    pub best_value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceIntelligence {
    pub name: String,
    pub material: Option<String>,

    pub sample_size: usize,
    pub outliers_removed: usize,

    pub mean: f64,
    pub std_dev: f64,
    pub volatility_pct: f64, // coefficient of variation * 100
    pub volatility: VolatilityLevel,

    pub fair_value: f64,
    pub buy_zone: f64,
    pub sell_zone: f64,
    pub min: f64,
    pub max: f64,

    pub confidence: f64, // 0-100
    pub price_trend: f64, // Positive = rising, negative = falling
    pub market_volatility: VolatilityMetrics,

    pub bulk: Vec<BulkGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceStrategy {
    Premium,
    Discount,
    Market,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellerInsight {
    pub seller: String,
    pub listings: usize,
    pub avg_price: f64,
    pub market_share: f64, // 0-100
    pub strategy: PriceStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConcentrationLevel {
    Competitive,
    Moderate,
    Concentrated,
}

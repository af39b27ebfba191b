//! Free text mixed with `field<op>value` clauses, e.g. `stone ql>90 price<50 seller=jota`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::model::TradeRecord;
use crate::search::SearchEngine;

static CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z]+)\s*(>=|<=|>|<|=)\s*([\w.]+)").expect("static regex")
});

const FLOAT_EQ_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Ge,
    Le,
}

impl Operator {
    fn from_symbol(symbol: &str) -> Option<Operator> {
        match symbol {
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            "=" => Some(Operator::Eq),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            _ => None,
        }
    }

    fn compare(self, actual: f64, target: f64) -> bool {
        match self {
            Operator::Gt => actual > target,
            Operator::Lt => actual < target,
            Operator::Eq => (actual - target).abs() < FLOAT_EQ_EPSILON,
            Operator::Ge => actual >= target,
            Operator::Le => actual <= target,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Quality,
    UnitPrice,
    TotalPrice,
    Quantity,
    Seller,
    Rarity,
    Material,
    OrderType,
}

impl Field {
    pub fn from_alias(alias: &str) -> Option<Field> {
        let field = match alias.to_lowercase().as_str() {
            "ql" | "quality" | "q" => Field::Quality,
            "price" | "p" => Field::UnitPrice,
            "total" => Field::TotalPrice,
            "qty" | "quantity" => Field::Quantity,
            "seller" | "s" => Field::Seller,
            "rarity" | "r" => Field::Rarity,
            "material" | "m" => Field::Material,
            "type" | "t" => Field::OrderType,
            _ => return None,
        };
        Some(field)
    }

    fn numeric_value(self, record: &TradeRecord) -> Option<f64> {
        match self {
            Field::Quality => Some(record.quality),
            Field::UnitPrice => Some(record.unit_price),
            Field::TotalPrice => Some(record.total_price()),
            Field::Quantity => Some(record.quantity as f64),
            _ => None,
        }
    }

    fn text_value(self, record: &TradeRecord) -> Option<String> {
        match self {
            Field::Seller => Some(record.seller.to_lowercase()),
            Field::Rarity => Some(record.rarity.as_str().to_lowercase()),
            Field::Material => Some(record.material.to_lowercase()),
            Field::OrderType => Some(record.order_type.as_str().to_lowercase()),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            Field::Quality | Field::UnitPrice | Field::TotalPrice | Field::Quantity
        )
    }
}

/// One `field<op>value` occurrence exactly as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.operator, self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub text_query: String,
    /// Matched clause substrings, space-joined.
    pub structured: String,
    pub clauses: Vec<Clause>,
}

pub fn parse(search_text: &str) -> ParsedQuery {
    let mut clauses = Vec::new();
    let mut matched = Vec::new();

    for caps in CLAUSE_RE.captures_iter(search_text) {
        let (Some(whole), Some(field), Some(op), Some(value)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let Some(operator) = Operator::from_symbol(op.as_str()) else {
            continue;
        };
        matched.push(whole.as_str().to_string());
        clauses.push(Clause {
            field: field.as_str().to_string(),
            operator,
            value: value.as_str().to_string(),
        });
    }

    let remainder = CLAUSE_RE.replace_all(search_text, " ");
    let text_query = remainder.split_whitespace().collect::<Vec<_>>().join(" ");

    ParsedQuery {
        text_query,
        structured: matched.join(" "),
        clauses,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Numeric {
        field: Field,
        operator: Operator,
        target: f64,
    },
    Contains {
        field: Field,
        needle: String,
    },
}

impl Predicate {
    fn holds(&self, record: &TradeRecord) -> bool {
        match self {
            Predicate::Numeric {
                field,
                operator,
                target,
            } => field
                .numeric_value(record)
                .map_or(true, |actual| operator.compare(actual, *target)),
            Predicate::Contains { field, needle } => field
                .text_value(record)
                .map_or(true, |actual| actual.contains(needle.as_str())),
        }
    }
}

/// AND over the compiled clauses. Clauses that cannot be interpreted are
/// left out, so they never reject a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn matches(&self, record: &TradeRecord) -> bool {
        self.predicates.iter().all(|p| p.holds(record))
    }

    pub fn apply<'a, I>(&self, records: I) -> Vec<&'a TradeRecord>
    where
        I: IntoIterator<Item = &'a TradeRecord>,
    {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

pub fn compile(clauses: &[Clause]) -> Filter {
    let predicates = clauses.iter().filter_map(compile_clause).collect();
    Filter { predicates }
}

fn compile_clause(clause: &Clause) -> Option<Predicate> {
    let field = Field::from_alias(&clause.field)?;

    if field.is_numeric() {
        let target = clause.value.parse::<f64>().ok().filter(|v| v.is_finite())?;
        return Some(Predicate::Numeric {
            field,
            operator: clause.operator,
            target,
        });
    }

    // Text fields only understand `=`, as a case-insensitive substring test.
    if clause.operator != Operator::Eq {
        return None;
    }
    Some(Predicate::Contains {
        field,
        needle: clause.value.to_lowercase(),
    })
}

/// Free text goes through the index, clauses filter what it returns.
pub fn run_query<'a>(engine: &'a SearchEngine, input: &str) -> Vec<&'a TradeRecord> {
    let parsed = parse(input);
    let filter = compile(&parsed.clauses);
    let hits = engine.search(&parsed.text_query);
    if filter.is_empty() {
        return hits;
    }
    filter.apply(hits)
}

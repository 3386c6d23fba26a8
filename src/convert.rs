//! Unit conversion strategies.
//!
//! A [`StrategyRegistry`] picks one strategy per detected amount and binds it
//! into a [`Converter`]. The converter keeps that choice for the node's whole
//! life, but renders against whatever [`UnitTable`] the current pass loaded.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The base currency unit. Always present in a [`UnitTable`] with rate 1.
pub const BASE_UNIT: &str = "dollars";

/// The unit used by the time-of-work fallback.
pub const HOURS_UNIT: &str = "hours";

/// Hours per base unit when none is configured (20 currency units per hour).
pub const DEFAULT_HOURS_RATE: f64 = 1.0 / 20.0;

/// Fractional remainders below this are displayed rounded.
pub const ROUNDING_TOLERANCE: f64 = 0.2;

/// How configured rates are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateConvention {
    /// Rate = target units per one base unit; `amount * target / base`
    #[default]
    UnitsPerBase,
    /// Rate = base units per one target unit; `amount * base / target`
    BasePerUnit,
}

impl RateConvention {
    pub fn apply(self, amount: f64, target_rate: f64, base_rate: f64) -> f64 {
        match self {
            RateConvention::UnitsPerBase => amount * target_rate / base_rate,
            RateConvention::BasePerUnit => amount * base_rate / target_rate,
        }
    }
}

/// Exchange rates for the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTable {
    rates: BTreeMap<String, f64>,
    convention: RateConvention,
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new(BTreeMap::new(), RateConvention::default())
    }
}

impl UnitTable {
    /// Build a table from configured rates. Non-positive or non-finite rates are
    /// dropped; the base unit is added when missing.
    pub fn new(rates: BTreeMap<String, f64>, convention: RateConvention) -> Self {
        let mut rates: BTreeMap<String, f64> = rates
            .into_iter()
            .filter(|(name, rate)| {
                let valid = rate.is_finite() && *rate > 0.0;
                if !valid {
                    tracing::warn!(unit = %name, rate, "ignoring invalid unit rate");
                }
                valid
            })
            .collect();
        rates.entry(BASE_UNIT.to_string()).or_insert(1.0);
        Self { rates, convention }
    }

    pub fn rate(&self, unit: &str) -> Option<f64> {
        self.rates.get(unit).copied()
    }

    pub fn rates(&self) -> &BTreeMap<String, f64> {
        &self.rates
    }

    pub fn convention(&self) -> RateConvention {
        self.convention
    }

    /// Units the unit-pick strategy may choose from, in name order.
    pub fn pickable(&self) -> Vec<&str> {
        self.rates
            .keys()
            .map(String::as_str)
            .filter(|name| *name != BASE_UNIT && *name != HOURS_UNIT)
            .collect()
    }

    /// Convert a base-currency amount into `unit`.
    pub fn convert(&self, amount: f64, unit: &str) -> Option<f64> {
        let base = self.rate(BASE_UNIT).unwrap_or(1.0);
        let target = self.rate(unit)?;
        Some(self.convention.apply(amount, target, base))
    }

    /// Convert a base-currency amount into hours of work.
    pub fn hours(&self, amount: f64) -> f64 {
        self.convert(amount, HOURS_UNIT).unwrap_or_else(|| {
            let base = self.rate(BASE_UNIT).unwrap_or(1.0);
            RateConvention::UnitsPerBase.apply(amount, DEFAULT_HOURS_RATE, base)
        })
    }
}

/// Source of random choices. Injected so callers can force a choice.
pub trait RandomSource {
    /// Return an index in `0..len`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Reproducible RNG.
#[derive(Debug, Clone)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn pick(&mut self, len: usize) -> usize {
        self.0.gen_range(0..len)
    }
}

type RenderFn = dyn Fn(f64, &UnitTable) -> String + Send + Sync;

/// A bound conversion: renders an amount as display text.
#[derive(Clone)]
pub struct Converter {
    label: String,
    render: Arc<RenderFn>,
}

impl Converter {
    pub fn new<F>(label: impl Into<String>, render: F) -> Self
    where
        F: Fn(f64, &UnitTable) -> String + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            render: Arc::new(render),
        }
    }

    /// What was bound, e.g. `unit-pick:coffees` or `time-of-work`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn render(&self, amount: f64, units: &UnitTable) -> String {
        (self.render)(amount, units)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter").field("label", &self.label).finish()
    }
}

/// A named way of rendering amounts.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn applicable(&self, amount: f64, units: &UnitTable) -> bool;

    /// Make the choices this strategy needs and bind them into a converter.
    fn resolve(&self, units: &UnitTable, rng: &mut dyn RandomSource) -> Converter;
}

/// Converts into one randomly chosen configured unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitPick;

impl Strategy for UnitPick {
    fn name(&self) -> &str {
        "unit-pick"
    }

    fn applicable(&self, _amount: f64, units: &UnitTable) -> bool {
        !units.pickable().is_empty()
    }

    fn resolve(&self, units: &UnitTable, rng: &mut dyn RandomSource) -> Converter {
        let choices = units.pickable();
        if choices.is_empty() {
            return TimeOfWork.resolve(units, rng);
        }
        let unit = choices[rng.pick(choices.len()) % choices.len()].to_string();

        Converter::new(format!("{}:{}", self.name(), unit), move |amount, units| {
            match units.convert(amount, &unit) {
                Some(value) => format_units(value, &unit),
                // Unit removed from the settings since it was bound
                None => format_hours(units.hours(amount)),
            }
        })
    }
}

/// Converts into hours of work. Only ever chosen as the fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeOfWork;

impl Strategy for TimeOfWork {
    fn name(&self) -> &str {
        "time-of-work"
    }

    fn applicable(&self, _amount: f64, _units: &UnitTable) -> bool {
        false
    }

    fn resolve(&self, _units: &UnitTable, _rng: &mut dyn RandomSource) -> Converter {
        Converter::new(self.name(), |amount, units| format_hours(units.hours(amount)))
    }
}

/// The set of strategies plus the fallback used when none applies.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
    fallback: Box<dyn Strategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::new(Box::new(TimeOfWork));
        registry.register(Box::new(UnitPick));
        registry
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl StrategyRegistry {
    /// Empty registry; everything goes to `fallback`.
    pub fn new(fallback: Box<dyn Strategy>) -> Self {
        Self {
            strategies: Vec::new(),
            fallback,
        }
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    /// Registered strategy names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Choose a strategy for `amount` and bind it.
    ///
    /// Picks uniformly among the applicable strategies, or the fallback when
    /// none applies.
    pub fn select(&self, amount: f64, units: &UnitTable, rng: &mut dyn RandomSource) -> Converter {
        let applicable: Vec<&dyn Strategy> = self
            .strategies
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| s.applicable(amount, units))
            .collect();

        if applicable.is_empty() {
            return self.fallback.resolve(units, rng);
        }
        let chosen = applicable[rng.pick(applicable.len()) % applicable.len()];
        chosen.resolve(units, rng)
    }
}

/// Render a converted value with its unit name.
pub fn format_units(value: f64, unit: &str) -> String {
    if (value % 1.0).abs() < ROUNDING_TOLERANCE {
        format!("{} {}", value.round(), unit)
    } else {
        format!("{} {}", value, unit)
    }
}

/// Render hours of work as `H` or `H:MM`.
pub fn format_hours(cost: f64) -> String {
    let hours = cost.floor();
    let remainder = cost - hours;
    if remainder.abs() < ROUNDING_TOLERANCE {
        return format!("{}", cost.round());
    }
    // Absorb float noise such as 2.15 * 60 = 128.99999...
    let minutes = (remainder * 60.0 + 1e-9).floor().min(59.0);
    format!("{}:{:02}", hours, minutes as u32)
}

/// Render an amount as plain currency, e.g. `$12.50`.
pub fn format_plain(amount: f64, symbol: &str) -> String {
    format!("{}{:.2}", symbol, amount.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always picks the same index
    struct Fixed(usize);

    impl RandomSource for Fixed {
        fn pick(&mut self, _len: usize) -> usize {
            self.0
        }
    }

    fn table(entries: &[(&str, f64)]) -> UnitTable {
        let rates = entries.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        UnitTable::new(rates, RateConvention::UnitsPerBase)
    }

    #[test]
    fn test_base_unit_always_present() {
        let units = UnitTable::default();
        assert_eq!(units.rate(BASE_UNIT), Some(1.0));
        assert!(units.pickable().is_empty());
    }

    #[test]
    fn test_invalid_rates_dropped() {
        let units = table(&[("coffees", -1.0), ("pizzas", f64::NAN), ("books", 0.1)]);
        assert_eq!(units.pickable(), vec!["books"]);
    }

    #[test]
    fn test_unit_conversion() {
        let units = table(&[("unit", 2.0)]);
        assert_eq!(units.convert(10.0, "unit"), Some(20.0));

        let inverse = UnitTable::new(units.rates().clone(), RateConvention::BasePerUnit);
        assert_eq!(inverse.convert(10.0, "unit"), Some(5.0));
    }

    #[test]
    fn test_format_units_rounding() {
        assert_eq!(format_units(20.0, "unit"), "20 unit");
        assert_eq!(format_units(20.1, "unit"), "20 unit");
        assert_eq!(format_units(20.5, "unit"), "20.5 unit");
        assert_eq!(format_units(19.9, "unit"), "19.9 unit");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_hours(43.0 * DEFAULT_HOURS_RATE), "2");
        assert_eq!(format_hours(2.5), "2:30");
        assert_eq!(format_hours(0.75), "0:45");
        assert_eq!(format_hours(3.25), "3:15");
    }

    #[test]
    fn test_minutes_pinned() {
        // 4.3 is stored just below 4.3; its minutes still come out as 18
        assert_eq!(format_hours(4.3), "4:18");
        assert_eq!(format_hours(47.0 * DEFAULT_HOURS_RATE), "2:21");
    }

    #[test]
    fn test_format_plain() {
        assert_eq!(format_plain(12.5, "$"), "$12.50");
        assert_eq!(format_plain(0.29, "$"), "$0.29");
        assert_eq!(format_plain(7.0, "€"), "€7.00");
        assert_eq!(format_plain(1299.0, "$"), "$1299.00");
    }

    #[test]
    fn test_format_plain_huge_amount() {
        // Twenty characters of "$9..." still fit the detection bound
        let amount = crate::detect::CurrencyDetector::new("$")
            .unwrap()
            .detect_text("$9999999999999999999")
            .unwrap()
            .amount;
        assert_eq!(format_plain(amount, "$"), "$10000000000000000000.00");
    }

    #[test]
    fn test_default_hours_rate() {
        let units = UnitTable::default();
        assert!((units.hours(43.0) - 2.15).abs() < 1e-9);

        let units = table(&[(HOURS_UNIT, 0.1)]);
        assert!((units.hours(43.0) - 4.3).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_when_nothing_applies() {
        let registry = StrategyRegistry::default();
        let units = table(&[(HOURS_UNIT, 0.05)]);
        let converter = registry.select(50.0, &units, &mut Fixed(0));
        assert_eq!(converter.label(), "time-of-work");
        assert_eq!(converter.render(50.0, &units), "2:30");
    }

    #[test]
    fn test_fallback_never_applicable() {
        assert!(!TimeOfWork.applicable(10.0, &table(&[("unit", 2.0)])));
    }

    #[test]
    fn test_unit_pick_binds_unit() {
        let registry = StrategyRegistry::default();
        let units = table(&[("books", 0.1), ("coffees", 0.25)]);

        let converter = registry.select(40.0, &units, &mut Fixed(1));
        assert_eq!(converter.label(), "unit-pick:coffees");
        assert_eq!(converter.render(40.0, &units), "10 coffees");

        // Rates refresh, the bound unit does not
        let cheaper = table(&[("books", 0.1), ("coffees", 0.5)]);
        assert_eq!(converter.render(40.0, &cheaper), "20 coffees");
    }

    #[test]
    fn test_unit_pick_after_unit_removed() {
        let registry = StrategyRegistry::default();
        let units = table(&[("coffees", 0.25)]);
        let converter = registry.select(50.0, &units, &mut Fixed(0));

        assert_eq!(converter.render(50.0, &UnitTable::default()), "2:30");
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let registry = StrategyRegistry::default();
        let units = table(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);

        let first: Vec<String> = {
            let mut rng = SeededRandom::new(7);
            (0..5).map(|_| registry.select(1.0, &units, &mut rng).label().to_string()).collect()
        };
        let second: Vec<String> = {
            let mut rng = SeededRandom::new(7);
            (0..5).map(|_| registry.select(1.0, &units, &mut rng).label().to_string()).collect()
        };
        assert_eq!(first, second);
    }

    struct Always(&'static str);

    impl Strategy for Always {
        fn name(&self) -> &str {
            self.0
        }

        fn applicable(&self, _amount: f64, _units: &UnitTable) -> bool {
            true
        }

        fn resolve(&self, _units: &UnitTable, _rng: &mut dyn RandomSource) -> Converter {
            let name = self.0;
            Converter::new(name, move |amount, _| format!("{} {}", amount, name))
        }
    }

    #[test]
    fn test_uniform_choice_among_applicable() {
        let mut registry = StrategyRegistry::new(Box::new(TimeOfWork));
        registry.register(Box::new(Always("first")));
        registry.register(Box::new(Always("second")));

        let units = UnitTable::default();
        assert_eq!(registry.select(1.0, &units, &mut Fixed(0)).label(), "first");
        assert_eq!(registry.select(1.0, &units, &mut Fixed(1)).label(), "second");
        assert_eq!(registry.names(), vec!["first", "second"]);
    }
}

//! Deterministic financial engine
//!
//! Unit economics and monthly projections. Pure functions only:
//! no I/O, no clock, no randomness. LLM is NOT allowed here.

use crate::error::{FieldError, GenerationError};
use crate::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod projection;
pub use projection::{project, project_month, MonthlyProjection, ProjectionSummary};

const MAX_HORIZON_MONTHS: u32 = 120;
/// Upper bound on customer counts; keeps every projected month within `u64`.
const MAX_CUSTOMERS: u64 = 1_000_000_000_000;

fn default_horizon() -> u32 {
    12
}

/// Validated numeric inputs. Rates are fractions (`0.05` is 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialInputs {
    /// Monthly average revenue per customer.
    #[serde(default)]
    pub arpu: Option<f64>,
    /// Annual contract value, used when `arpu` is absent.
    #[serde(default)]
    pub acv: Option<f64>,
    pub cogs_pct: f64,
    #[serde(default)]
    pub variable_cost_per_user: f64,
    pub churn_rate: f64,
    #[serde(default)]
    pub expansion_rate: f64,
    #[serde(default)]
    pub starting_customers: u64,
    pub new_customers_per_month: u64,
    /// Monthly acquisition spend.
    #[serde(default)]
    pub marketing_spend: f64,
    #[serde(default)]
    pub assumed_cac: Option<f64>,
    #[serde(default = "default_horizon")]
    pub horizon_months: u32,
}

impl FinancialInputs {
    /// Field-level validation. Returns every problem, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let mut non_negative = |field: &str, value: f64| {
            if !value.is_finite() {
                errors.push(FieldError::new(field, "must be a finite number"));
            } else if value < 0.0 {
                errors.push(FieldError::new(field, "must not be negative"));
            }
        };

        if let Some(arpu) = self.arpu {
            non_negative("arpu", arpu);
        }
        if let Some(acv) = self.acv {
            non_negative("acv", acv);
        }
        if let Some(cac) = self.assumed_cac {
            non_negative("assumed_cac", cac);
        }
        non_negative("variable_cost_per_user", self.variable_cost_per_user);
        non_negative("marketing_spend", self.marketing_spend);

        for (field, value) in [
            ("cogs_pct", self.cogs_pct),
            ("churn_rate", self.churn_rate),
            ("expansion_rate", self.expansion_rate),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                errors.push(FieldError::new(field, "must be between 0 and 1"));
            }
        }

        for (field, value) in [
            ("starting_customers", self.starting_customers),
            ("new_customers_per_month", self.new_customers_per_month),
        ] {
            if value > MAX_CUSTOMERS {
                errors.push(FieldError::new(field, format!("must not exceed {}", MAX_CUSTOMERS)));
            }
        }

        if self.horizon_months == 0 || self.horizon_months > MAX_HORIZON_MONTHS {
            errors.push(FieldError::new(
                "horizon_months",
                format!("must be between 1 and {}", MAX_HORIZON_MONTHS),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

//
// ================= Unbounded values =================
//

/// A ratio that may be mathematically infinite (zero churn, zero margin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unbounded {
    Finite(f64),
    Infinite,
}

impl Unbounded {
    pub fn finite(&self) -> Option<f64> {
        match self {
            Unbounded::Finite(v) => Some(*v),
            Unbounded::Infinite => None,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Unbounded::Infinite)
    }
}

impl Serialize for Unbounded {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Unbounded::Finite(v) => serializer.serialize_f64(*v),
            Unbounded::Infinite => serializer.serialize_str("infinite"),
        }
    }
}

impl<'de> Deserialize<'de> for Unbounded {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Unbounded::Finite(v)),
            Raw::Text(s) if s.eq_ignore_ascii_case("infinite") => Ok(Unbounded::Infinite),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"infinite\", got {:?}",
                s
            ))),
        }
    }
}

//
// ================= Model =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpuSource {
    Provided,
    DerivedFromAcv,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacMethod {
    Assumed,
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEconomics {
    pub arpu: Option<f64>,
    pub gross_margin_pct: Option<f64>,
    pub cac: f64,
    pub cac_method: CacMethod,
    pub ltv: Option<Unbounded>,
    pub months_of_life: Unbounded,
    pub payback_months: Option<Unbounded>,
    pub ltv_to_cac: Option<Unbounded>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumptions {
    pub arpu_source: ArpuSource,
    pub cac_method: CacMethod,
    pub cogs_pct: f64,
    pub churn_rate: f64,
    pub expansion_rate: f64,
    pub variable_cost_per_user: f64,
    pub starting_customers: u64,
    pub new_customers_per_month: u64,
    pub marketing_spend: f64,
    pub horizon_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialModel {
    pub unit_economics: UnitEconomics,
    pub projections: Vec<MonthlyProjection>,
    pub summary: ProjectionSummary,
    pub assumptions: Assumptions,
}

impl FinancialModel {
    /// Every finite number in the model, in serialization order.
    /// Numeric groundedness checks match text literals against this list.
    pub fn flatten_values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        if let Ok(value) = serde_json::to_value(self) {
            collect_numbers(&value, &mut out);
        }
        out
    }
}

fn collect_numbers(value: &serde_json::Value, out: &mut Vec<f64>) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                out.push(v);
            }
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_numbers(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_numbers(v, out)),
        _ => {}
    }
}

pub(crate) fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round_pct(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Monthly ARPU: provided value if positive, else ACV / 12, else undefined.
pub fn resolve_arpu(inputs: &FinancialInputs) -> (Option<f64>, ArpuSource) {
    match (inputs.arpu, inputs.acv) {
        (Some(arpu), _) if arpu > 0.0 => (Some(arpu), ArpuSource::Provided),
        (_, Some(acv)) if acv > 0.0 => (Some(acv / 12.0), ArpuSource::DerivedFromAcv),
        _ => (None, ArpuSource::Unavailable),
    }
}

pub fn gross_margin_pct(arpu: f64, cogs_pct: f64, variable_cost_per_user: f64) -> Option<f64> {
    if arpu <= 0.0 {
        return None;
    }
    let unit_cost = (arpu * cogs_pct).max(variable_cost_per_user);
    Some((arpu - unit_cost) / arpu)
}

pub fn customer_acquisition_cost(inputs: &FinancialInputs) -> (f64, CacMethod) {
    if let Some(cac) = inputs.assumed_cac {
        return (cac, CacMethod::Assumed);
    }
    if inputs.new_customers_per_month == 0 {
        return (0.0, CacMethod::Derived);
    }
    (
        inputs.marketing_spend / inputs.new_customers_per_month as f64,
        CacMethod::Derived,
    )
}

/// `ARPU * GM% / churn`; infinite when churn is exactly zero.
pub fn lifetime_value(arpu: f64, gross_margin_pct: f64, churn_rate: f64) -> Unbounded {
    if churn_rate == 0.0 {
        Unbounded::Infinite
    } else {
        Unbounded::Finite(arpu * gross_margin_pct / churn_rate)
    }
}

/// `CAC / (ARPU * GM%)`; infinite when the monthly contribution is not positive.
pub fn payback_months(cac: f64, arpu: f64, gross_margin_pct: f64) -> Unbounded {
    let contribution = arpu * gross_margin_pct;
    if contribution <= 0.0 {
        Unbounded::Infinite
    } else {
        Unbounded::Finite(cac / contribution)
    }
}

pub fn compute_unit_economics(inputs: &FinancialInputs) -> UnitEconomics {
    let (arpu, _) = resolve_arpu(inputs);
    let (cac, cac_method) = customer_acquisition_cost(inputs);
    let margin = arpu.and_then(|a| gross_margin_pct(a, inputs.cogs_pct, inputs.variable_cost_per_user));

    let months_of_life = if inputs.churn_rate == 0.0 {
        Unbounded::Infinite
    } else {
        Unbounded::Finite(round_currency(1.0 / inputs.churn_rate))
    };

    let (ltv, payback) = match (arpu, margin) {
        (Some(a), Some(m)) => (
            Some(lifetime_value(a, m, inputs.churn_rate)),
            Some(payback_months(cac, a, m)),
        ),
        _ => (None, None),
    };

    let ltv_to_cac = ltv.map(|l| match l {
        Unbounded::Infinite => Unbounded::Infinite,
        Unbounded::Finite(_) if cac == 0.0 => Unbounded::Infinite,
        Unbounded::Finite(v) => Unbounded::Finite(round_pct(v / cac)),
    });

    UnitEconomics {
        arpu: arpu.map(round_currency),
        gross_margin_pct: margin.map(round_pct),
        cac: round_currency(cac),
        cac_method,
        ltv: ltv.map(|l| match l {
            Unbounded::Finite(v) => Unbounded::Finite(round_currency(v)),
            other => other,
        }),
        months_of_life,
        payback_months: payback.map(|p| match p {
            Unbounded::Finite(v) => Unbounded::Finite(round_currency(v)),
            other => other,
        }),
        ltv_to_cac,
    }
}

/// Validate inputs and build the full model. No partial model on failure.
pub fn build_model(inputs: &FinancialInputs) -> Result<FinancialModel> {
    inputs
        .validate()
        .map_err(GenerationError::InvalidFinancialInputs)?;

    let (arpu, arpu_source) = resolve_arpu(inputs);
    let unit_economics = compute_unit_economics(inputs);
    let projections = project(inputs, arpu.unwrap_or(0.0));
    let summary = ProjectionSummary::from_rows(&projections);

    Ok(FinancialModel {
        unit_economics,
        projections,
        summary,
        assumptions: Assumptions {
            arpu_source,
            cac_method: customer_acquisition_cost(inputs).1,
            cogs_pct: round_pct(inputs.cogs_pct),
            churn_rate: round_pct(inputs.churn_rate),
            expansion_rate: round_pct(inputs.expansion_rate),
            variable_cost_per_user: round_currency(inputs.variable_cost_per_user),
            starting_customers: inputs.starting_customers,
            new_customers_per_month: inputs.new_customers_per_month,
            marketing_spend: round_currency(inputs.marketing_spend),
            horizon_months: inputs.horizon_months,
        },
    })
}

#[cfg(test)]
pub(crate) fn sample_inputs() -> FinancialInputs {
    FinancialInputs {
        arpu: Some(100.0),
        acv: None,
        cogs_pct: 0.3,
        variable_cost_per_user: 0.0,
        churn_rate: 0.05,
        expansion_rate: 0.0,
        starting_customers: 0,
        new_customers_per_month: 20,
        marketing_spend: 8000.0,
        assumed_cac: None,
        horizon_months: 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_unit_economics() {
        let inputs = sample_inputs();
        let ue = compute_unit_economics(&inputs);

        assert_eq!(ue.arpu, Some(100.0));
        assert_eq!(ue.gross_margin_pct, Some(0.7));
        assert_eq!(ue.cac_method, CacMethod::Derived);
        assert_eq!(ue.cac, 8000.0 / 20.0);
        assert_eq!(ue.ltv, Some(Unbounded::Finite(1400.0)));

        let payback = ue.payback_months.and_then(|p| p.finite()).unwrap();
        assert!((payback - 400.0 / 70.0).abs() < 0.01);
    }

    #[test]
    fn test_arpu_derived_from_acv() {
        let mut inputs = sample_inputs();
        inputs.arpu = None;
        inputs.acv = Some(1200.0);
        assert_eq!(resolve_arpu(&inputs), (Some(100.0), ArpuSource::DerivedFromAcv));

        inputs.acv = None;
        assert_eq!(resolve_arpu(&inputs), (None, ArpuSource::Unavailable));
        let ue = compute_unit_economics(&inputs);
        assert!(ue.ltv.is_none());
        assert!(ue.payback_months.is_none());
    }

    #[test]
    fn test_variable_cost_dominates_cogs() {
        // 100 * 0.3 = 30 < 45
        let margin = gross_margin_pct(100.0, 0.3, 45.0).unwrap();
        assert!((margin - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_assumed_cac_wins() {
        let mut inputs = sample_inputs();
        inputs.assumed_cac = Some(250.0);
        assert_eq!(customer_acquisition_cost(&inputs), (250.0, CacMethod::Assumed));
    }

    #[test]
    fn test_zero_new_customers_gives_zero_cac() {
        let mut inputs = sample_inputs();
        inputs.new_customers_per_month = 0;
        assert_eq!(customer_acquisition_cost(&inputs), (0.0, CacMethod::Derived));
    }

    #[test]
    fn test_zero_churn_is_infinite_not_overflow() {
        let mut inputs = sample_inputs();
        inputs.churn_rate = 0.0;
        let ue = compute_unit_economics(&inputs);
        assert_eq!(ue.ltv, Some(Unbounded::Infinite));
        assert!(ue.months_of_life.is_infinite());

        let json = serde_json::to_value(&ue).unwrap();
        assert_eq!(json["ltv"], "infinite");
    }

    #[test]
    fn test_zero_margin_payback_is_infinite() {
        assert!(payback_months(400.0, 100.0, 0.0).is_infinite());
    }

    #[test]
    fn test_validation_collects_every_field_error() {
        let mut inputs = sample_inputs();
        inputs.arpu = Some(-5.0);
        inputs.cogs_pct = 1.5;
        inputs.horizon_months = 0;

        match build_model(&inputs) {
            Err(GenerationError::InvalidFinancialInputs(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["arpu", "cogs_pct", "horizon_months"]);
            }
            other => panic!("expected field errors, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_customer_counts_are_rejected() {
        let mut inputs = sample_inputs();
        inputs.starting_customers = u64::MAX;
        inputs.new_customers_per_month = u64::MAX;
        inputs.churn_rate = 0.0;

        match build_model(&inputs) {
            Err(GenerationError::InvalidFinancialInputs(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["starting_customers", "new_customers_per_month"]);
            }
            other => panic!("expected field errors, got {:?}", other),
        }

        inputs.starting_customers = MAX_CUSTOMERS;
        inputs.new_customers_per_month = MAX_CUSTOMERS;
        inputs.horizon_months = MAX_HORIZON_MONTHS;
        assert!(build_model(&inputs).is_ok());
    }

    #[test]
    fn test_model_is_deterministic() {
        let inputs = sample_inputs();
        let a = build_model(&inputs).unwrap();
        let b = build_model(&inputs).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_flatten_values_contains_headline_metrics() {
        let model = build_model(&sample_inputs()).unwrap();
        let values = model.flatten_values();
        assert!(values.contains(&1400.0));
        assert!(values.contains(&400.0));
        assert!(values.contains(&0.7));
    }

    #[test]
    fn test_unbounded_round_trips() {
        let v: Unbounded = serde_json::from_str("\"infinite\"").unwrap();
        assert!(v.is_infinite());
        let v: Unbounded = serde_json::from_str("12.5").unwrap();
        assert_eq!(v, Unbounded::Finite(12.5));
        assert!(serde_json::from_str::<Unbounded>("\"lots\"").is_err());
    }
}

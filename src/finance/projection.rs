//! Monthly projection recurrence
//!
//! Each month is derived from the previous month's ending customer count
//! and nothing else. There is no closed-form shortcut from month 1.

use super::{round_currency, FinancialInputs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    pub month: u32,
    pub customers_start: u64,
    pub churned: u64,
    pub retained: u64,
    pub new_customers: u64,
    pub customers_end: u64,
    pub revenue: f64,
    pub cogs: f64,
    pub gross_margin: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSummary {
    pub total_revenue: f64,
    pub total_cogs: f64,
    pub total_gross_margin: f64,
    pub ending_customers: u64,
}

impl ProjectionSummary {
    pub fn from_rows(rows: &[MonthlyProjection]) -> Self {
        let total_revenue: f64 = rows.iter().map(|r| r.revenue).sum();
        let total_cogs: f64 = rows.iter().map(|r| r.cogs).sum();
        let total_gross_margin: f64 = rows.iter().map(|r| r.gross_margin).sum();

        Self {
            total_revenue: round_currency(total_revenue),
            total_cogs: round_currency(total_cogs),
            total_gross_margin: round_currency(total_gross_margin),
            ending_customers: rows.last().map(|r| r.customers_end).unwrap_or(0),
        }
    }
}

/// One step of the recurrence.
pub fn project_month(
    month: u32,
    previous_customers: u64,
    arpu: f64,
    inputs: &FinancialInputs,
) -> MonthlyProjection {
    let churned = (previous_customers as f64 * inputs.churn_rate).round() as u64;
    let retained = previous_customers.saturating_sub(churned);
    let customers_end = retained.saturating_add(inputs.new_customers_per_month);

    // Expansion uplift only applies to the retained base.
    let revenue = customers_end as f64 * arpu + retained as f64 * arpu * inputs.expansion_rate;
    let cogs = (revenue * inputs.cogs_pct).max(customers_end as f64 * inputs.variable_cost_per_user);
    let gross_margin = revenue - cogs;

    MonthlyProjection {
        month,
        customers_start: previous_customers,
        churned,
        retained,
        new_customers: inputs.new_customers_per_month,
        customers_end,
        revenue: round_currency(revenue),
        cogs: round_currency(cogs),
        gross_margin: round_currency(gross_margin),
    }
}

pub fn project(inputs: &FinancialInputs, arpu: f64) -> Vec<MonthlyProjection> {
    let mut rows = Vec::with_capacity(inputs.horizon_months as usize);
    let mut customers = inputs.starting_customers;

    for month in 1..=inputs.horizon_months {
        let row = project_month(month, customers, arpu, inputs);
        customers = row.customers_end;
        rows.push(row);
    }

    rows
}

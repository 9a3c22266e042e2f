use super::tables::{Bracket, JurisdictionTable, OasClawbackRule, TaxYearTables, tables_for_year};
use super::types::{
    CreditsToggles, IncomeSources, JurisdictionCredits, PersonTaxResult, TaxCredits, non_negative,
};

pub const SENIOR_CREDIT_AGE: u32 = 65;

pub fn progressive_tax(income: f64, brackets: &[Bracket]) -> f64 {
    let income = non_negative(income);
    let mut tax = 0.0;
    let mut lower = 0.0;

    for bracket in brackets {
        let upper = income.min(bracket.upper);
        if upper > lower {
            tax += (upper - lower) * bracket.rate;
        }
        if income <= bracket.upper {
            break;
        }
        lower = bracket.upper;
    }

    tax
}

/// RRSP withdrawals never qualify, even after 65.
pub fn eligible_pension_income(age: u32, incomes: &IncomeSources) -> f64 {
    let mut eligible = non_negative(incomes.db_pension);
    if age >= SENIOR_CREDIT_AGE {
        eligible += non_negative(incomes.rrif) + non_negative(incomes.lif);
    }
    eligible
}

fn jurisdiction_credits(
    table: &JurisdictionTable,
    age: u32,
    taxable_income: f64,
    eligible_pension: f64,
    toggles: CreditsToggles,
) -> JurisdictionCredits {
    let rate = table.lowest_rate;

    let bpa = if toggles.bpa { table.bpa * rate } else { 0.0 };

    let age_amount = if toggles.age_amount && age >= SENIOR_CREDIT_AGE {
        let excess = (taxable_income - table.age_amount_threshold).max(0.0);
        (table.age_amount_max - table.age_amount_phase_out_rate * excess).max(0.0) * rate
    } else {
        0.0
    };

    let pension_amount = if toggles.pension_amount {
        table.pension_credit_base.min(eligible_pension) * rate
    } else {
        0.0
    };

    JurisdictionCredits {
        bpa,
        age_amount,
        pension_amount,
    }
}

pub fn compute_credits(
    tables: &TaxYearTables,
    age: u32,
    taxable_income: f64,
    eligible_pension: f64,
    toggles: CreditsToggles,
) -> TaxCredits {
    let federal = jurisdiction_credits(
        &tables.federal,
        age,
        taxable_income,
        eligible_pension,
        toggles,
    );
    let regional = jurisdiction_credits(
        &tables.regional,
        age,
        taxable_income,
        eligible_pension,
        toggles,
    );
    TaxCredits {
        federal,
        regional,
        total: federal.total() + regional.total(),
    }
}

pub fn compute_oas_clawback(net_income: f64, oas_received: f64, rule: &OasClawbackRule) -> f64 {
    let received = non_negative(oas_received);
    let excess = (non_negative(net_income) - rule.threshold).max(0.0);
    non_negative(rule.rate * excess).min(received)
}

pub fn oas_clawback_for_year(net_income: f64, oas_received: f64, year: i32) -> f64 {
    compute_oas_clawback(net_income, oas_received, &tables_for_year(year).oas_clawback)
}

pub fn compute_person(
    tables: &TaxYearTables,
    age: u32,
    incomes: &IncomeSources,
    toggles: CreditsToggles,
) -> PersonTaxResult {
    let taxable_income = incomes.taxable_total();
    let eligible_pension_income = eligible_pension_income(age, incomes);

    let federal_bracket_tax = progressive_tax(taxable_income, tables.federal.brackets);
    let regional_bracket_tax = progressive_tax(taxable_income, tables.regional.brackets);
    let before_credit_tax = federal_bracket_tax + regional_bracket_tax;

    let credits = compute_credits(tables, age, taxable_income, eligible_pension_income, toggles);
    let tax_after_credits = (before_credit_tax - credits.total).max(0.0);

    // Net income for the clawback test is approximated by taxable income.
    let oas_clawback = compute_oas_clawback(taxable_income, incomes.oas, &tables.oas_clawback);
    let total_tax = tax_after_credits + oas_clawback;

    PersonTaxResult {
        taxable_income,
        eligible_pension_income,
        federal_bracket_tax,
        regional_bracket_tax,
        before_credit_tax,
        credits,
        tax_after_credits,
        oas_clawback,
        total_tax,
        after_tax_income: taxable_income - total_tax,
    }
}

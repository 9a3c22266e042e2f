use super::tables::{TaxYearTables, tables_for_year};
use super::tax::{SENIOR_CREDIT_AGE, compute_person, eligible_pension_income};
use super::types::{
    HouseholdTaxInputs, HouseholdTaxResult, IncomeSources, PensionSplitTrace, PersonInput,
    PersonOutcome, PersonTaxResult, Spouse,
};

/// Share of the donor's eligible pension income that may be reported by the other spouse.
pub const MAX_SPLIT_SHARE: f64 = 0.5;
/// Smallest split search granularity, in dollars.
pub const MIN_SPLIT_STEP: f64 = 1.0;
/// Upper bound on stepped candidates; larger pensions coarsen the step to stay under it.
pub const MAX_SPLIT_CANDIDATES: u32 = 10_000;
const SPLIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    amount: f64,
    incomes_a: IncomeSources,
    incomes_b: IncomeSources,
    tax_a: PersonTaxResult,
    tax_b: PersonTaxResult,
}

impl SplitCandidate {
    fn total_tax(&self) -> f64 {
        self.tax_a.total_tax + self.tax_b.total_tax
    }
}

pub fn compute_household(inputs: &HouseholdTaxInputs) -> HouseholdTaxResult {
    compute_household_with(tables_for_year(inputs.year), inputs)
}

pub fn compute_household_with(
    tables: &TaxYearTables,
    inputs: &HouseholdTaxInputs,
) -> HouseholdTaxResult {
    let a = &inputs.spouse_a;
    let b = &inputs.spouse_b;
    let splitting = inputs.splitting;

    let unsplit = evaluate_split(tables, inputs, Spouse::A, 0.0);
    let tax_without_split = unsplit.total_tax();

    let donor = if unsplit.tax_b.taxable_income > unsplit.tax_a.taxable_income {
        Spouse::B
    } else {
        Spouse::A
    };
    let donor_input = person(inputs, donor);
    let max_transferable =
        MAX_SPLIT_SHARE * eligible_pension_income(donor_input.age, &donor_input.incomes);

    let mut trace = PensionSplitTrace {
        enabled: splitting.enabled,
        optimized: splitting.enabled && splitting.optimize,
        donor: None,
        recipient: None,
        max_transferable,
        amount: 0.0,
        candidates_evaluated: 0,
        tax_without_split,
    };

    let chosen = if trace.optimized && max_transferable > 0.0 {
        let (best, evaluated) =
            search_split(tables, inputs, donor, max_transferable, splitting.step);
        trace.candidates_evaluated = evaluated;
        best
    } else {
        unsplit
    };

    if chosen.amount > 0.0 {
        trace.amount = chosen.amount;
        trace.donor = Some(donor);
        trace.recipient = Some(other(donor));
    }

    let total_tax = chosen.total_tax();
    let total_after_tax_income = chosen.tax_a.after_tax_income + chosen.tax_b.after_tax_income;

    HouseholdTaxResult {
        year: inputs.year,
        spouse_a: PersonOutcome {
            name: a.name.clone(),
            age: a.age,
            incomes: chosen.incomes_a,
            tax: chosen.tax_a,
        },
        spouse_b: PersonOutcome {
            name: b.name.clone(),
            age: b.age,
            incomes: chosen.incomes_b,
            tax: chosen.tax_b,
        },
        total_tax,
        total_after_tax_income,
        split: trace,
    }
}

fn search_split(
    tables: &TaxYearTables,
    inputs: &HouseholdTaxInputs,
    donor: Spouse,
    max_transferable: f64,
    step: f64,
) -> (SplitCandidate, u32) {
    let mut best = evaluate_split(tables, inputs, donor, 0.0);
    let mut evaluated = 1_u32;

    if !step.is_finite() || step <= 0.0 {
        let candidate = evaluate_split(tables, inputs, donor, max_transferable);
        evaluated += 1;
        if candidate.total_tax() < best.total_tax() {
            best = candidate;
        }
        return (best, evaluated);
    }

    let step = step
        .max(MIN_SPLIT_STEP)
        .max(max_transferable / f64::from(MAX_SPLIT_CANDIDATES));
    let steps = ((max_transferable + SPLIT_TOLERANCE) / step).floor() as u64;
    for k in 1..=steps {
        let amount = (k as f64 * step).min(max_transferable);
        let candidate = evaluate_split(tables, inputs, donor, amount);
        evaluated += 1;
        if candidate.total_tax() < best.total_tax() {
            best = candidate;
        }
    }

    (best, evaluated)
}

fn evaluate_split(
    tables: &TaxYearTables,
    inputs: &HouseholdTaxInputs,
    donor: Spouse,
    amount: f64,
) -> SplitCandidate {
    let mut incomes_a = inputs.spouse_a.incomes;
    let mut incomes_b = inputs.spouse_b.incomes;
    let donor_age = person(inputs, donor).age;

    let moved = match donor {
        Spouse::A => transfer_pension(&mut incomes_a, donor_age, &mut incomes_b, amount),
        Spouse::B => transfer_pension(&mut incomes_b, donor_age, &mut incomes_a, amount),
    };

    let tax_a = compute_person(tables, inputs.spouse_a.age, &incomes_a, inputs.credits);
    let tax_b = compute_person(tables, inputs.spouse_b.age, &incomes_b, inputs.credits);

    SplitCandidate {
        amount: moved,
        incomes_a,
        incomes_b,
        tax_a,
        tax_b,
    }
}

/// Moves up to `amount` of eligible pension out of the donor, drawing on the defined-benefit
/// pension first, then RRIF, then LIF. The recipient reports it as pension income.
fn transfer_pension(
    donor: &mut IncomeSources,
    donor_age: u32,
    recipient: &mut IncomeSources,
    amount: f64,
) -> f64 {
    let mut remaining = amount.max(0.0);
    let mut moved = 0.0;

    let mut buckets = vec![&mut donor.db_pension];
    if donor_age >= SENIOR_CREDIT_AGE {
        buckets.push(&mut donor.rrif);
        buckets.push(&mut donor.lif);
    }

    for bucket in buckets {
        if remaining <= 0.0 {
            break;
        }
        let take = (*bucket).max(0.0).min(remaining);
        *bucket -= take;
        remaining -= take;
        moved += take;
    }

    recipient.db_pension += moved;
    moved
}

fn person(inputs: &HouseholdTaxInputs, spouse: Spouse) -> &PersonInput {
    match spouse {
        Spouse::A => &inputs.spouse_a,
        Spouse::B => &inputs.spouse_b,
    }
}

fn other(spouse: Spouse) -> Spouse {
    match spouse {
        Spouse::A => Spouse::B,
        Spouse::B => Spouse::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CreditsToggles, PensionSplitting};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn couple(a: IncomeSources, b: IncomeSources) -> HouseholdTaxInputs {
        HouseholdTaxInputs {
            year: 2025,
            spouse_a: PersonInput {
                name: "Alex".to_string(),
                age: 70,
                incomes: a,
            },
            spouse_b: PersonInput {
                name: "Sam".to_string(),
                age: 68,
                incomes: b,
            },
            credits: CreditsToggles::default(),
            splitting: PensionSplitting::default(),
        }
    }

    fn pensioner() -> IncomeSources {
        IncomeSources {
            db_pension: 80_000.0,
            cpp: 12_000.0,
            oas: 8_500.0,
            ..IncomeSources::default()
        }
    }

    fn modest() -> IncomeSources {
        IncomeSources {
            cpp: 6_000.0,
            oas: 8_500.0,
            ..IncomeSources::default()
        }
    }

    #[test]
    fn household_total_is_sum_of_spouses() {
        let result = compute_household(&couple(pensioner(), modest()));
        assert_approx(
            result.total_tax,
            result.spouse_a.tax.total_tax + result.spouse_b.tax.total_tax,
        );
    }

    #[test]
    fn optimizer_moves_pension_from_higher_earner() {
        let inputs = couple(pensioner(), modest());
        let result = compute_household(&inputs);

        assert_eq!(result.split.donor, Some(Spouse::A));
        assert_eq!(result.split.recipient, Some(Spouse::B));
        assert!(result.split.amount > 0.0);
        assert!(result.split.amount <= 40_000.0 + EPS);
        assert!(result.total_tax < result.split.tax_without_split);
        assert_approx(
            result.spouse_a.incomes.db_pension,
            80_000.0 - result.split.amount,
        );
        assert_approx(result.spouse_b.incomes.db_pension, result.split.amount);
        assert_eq!(result.split.candidates_evaluated, 401);
    }

    #[test]
    fn donor_is_spouse_b_when_b_earns_more() {
        let result = compute_household(&couple(modest(), pensioner()));
        assert_eq!(result.split.donor, Some(Spouse::B));
        assert_eq!(result.split.recipient, Some(Spouse::A));
        assert!(result.spouse_a.incomes.db_pension > 0.0);
    }

    #[test]
    fn split_without_optimizer_is_reported_not_applied() {
        let mut inputs = couple(pensioner(), modest());
        inputs.splitting.optimize = false;
        let result = compute_household(&inputs);
        assert_eq!(result.split.donor, None);
        assert_approx(result.split.max_transferable, 40_000.0);
        assert_eq!(result.split.candidates_evaluated, 0);
        assert_approx(result.total_tax, result.split.tax_without_split);
    }

    #[test]
    fn equal_incomes_prefer_spouse_a_as_donor() {
        let a = IncomeSources {
            db_pension: 20_000.0,
            ..IncomeSources::default()
        };
        let b = IncomeSources {
            cpp: 20_000.0,
            ..IncomeSources::default()
        };
        let mut inputs = couple(a, b);
        inputs.splitting.optimize = false;
        let result = compute_household(&inputs);
        assert_approx(result.split.max_transferable, 10_000.0);
    }

    #[test]
    fn ties_keep_the_smallest_split() {
        let low = IncomeSources {
            db_pension: 10_000.0,
            ..IncomeSources::default()
        };
        let result = compute_household(&couple(low, IncomeSources::default()));
        assert_approx(result.total_tax, 0.0);
        assert_approx(result.split.amount, 0.0);
        assert_eq!(result.split.donor, None);
        assert_eq!(result.split.candidates_evaluated, 51);
    }

    #[test]
    fn disabled_splitting_reports_zero() {
        let mut inputs = couple(pensioner(), modest());
        inputs.splitting.enabled = false;
        let result = compute_household(&inputs);
        assert!(!result.split.enabled);
        assert_approx(result.split.amount, 0.0);
        assert_approx(result.total_tax, result.split.tax_without_split);
    }

    #[test]
    fn rrif_and_lif_are_drawn_after_db_pension() {
        let mut donor = IncomeSources {
            db_pension: 1_000.0,
            rrif: 2_000.0,
            lif: 3_000.0,
            ..IncomeSources::default()
        };
        let mut recipient = IncomeSources::default();
        let moved = transfer_pension(&mut donor, 70, &mut recipient, 2_500.0);
        assert_approx(moved, 2_500.0);
        assert_approx(donor.db_pension, 0.0);
        assert_approx(donor.rrif, 500.0);
        assert_approx(donor.lif, 3_000.0);
        assert_approx(recipient.db_pension, 2_500.0);
    }

    #[test]
    fn young_donor_only_splits_db_pension() {
        let mut donor = IncomeSources {
            db_pension: 1_000.0,
            rrif: 2_000.0,
            ..IncomeSources::default()
        };
        let mut recipient = IncomeSources::default();
        let moved = transfer_pension(&mut donor, 60, &mut recipient, 2_500.0);
        assert_approx(moved, 1_000.0);
        assert_approx(donor.rrif, 2_000.0);
    }

    #[test]
    fn non_positive_step_tries_only_the_maximum() {
        let mut inputs = couple(pensioner(), modest());
        inputs.splitting.step = 0.0;
        let result = compute_household(&inputs);
        assert_eq!(result.split.candidates_evaluated, 2);
        assert!(result.total_tax <= result.split.tax_without_split);
    }

    #[test]
    fn tiny_step_is_floored_to_one_dollar() {
        let low = IncomeSources {
            db_pension: 2_000.0,
            ..IncomeSources::default()
        };
        let mut inputs = couple(low, IncomeSources::default());
        inputs.splitting.step = 1e-9;
        let result = compute_household(&inputs);
        assert_eq!(result.split.candidates_evaluated, 1_001);
    }

    #[test]
    fn candidate_count_stays_bounded_for_large_pensions() {
        let mut inputs = couple(pensioner(), modest());
        inputs.splitting.step = 0.01;
        let result = compute_household(&inputs);
        assert!(result.split.candidates_evaluated <= MAX_SPLIT_CANDIDATES + 1);
        assert!(result.split.candidates_evaluated > 1);
        assert!(result.total_tax <= result.split.tax_without_split);
        assert!(result.split.amount <= 40_000.0 + EPS);
    }

    #[test]
    fn larger_rrif_withdrawal_means_more_household_tax() {
        let base = IncomeSources {
            db_pension: 25_000.0,
            cpp: 9_000.0,
            oas: 8_500.0,
            ..IncomeSources::default()
        };
        let with_rrif = IncomeSources {
            rrif: 20_000.0,
            ..base
        };
        let low = compute_household(&couple(base, modest()));
        let high = compute_household(&couple(with_rrif, modest()));
        assert!(high.total_tax > low.total_tax);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_split_never_costs_more_and_respects_limit(
            db_a in 0u32..120_000,
            rrif_a in 0u32..60_000,
            db_b in 0u32..60_000,
            cpp_b in 0u32..15_000,
            age_a in 60u32..90,
            age_b in 60u32..90
        ) {
            let mut inputs = couple(
                IncomeSources {
                    db_pension: db_a as f64,
                    rrif: rrif_a as f64,
                    ..IncomeSources::default()
                },
                IncomeSources {
                    db_pension: db_b as f64,
                    cpp: cpp_b as f64,
                    ..IncomeSources::default()
                },
            );
            inputs.spouse_a.age = age_a;
            inputs.spouse_b.age = age_b;
            inputs.splitting.step = 500.0;

            let on = compute_household(&inputs);
            inputs.splitting.enabled = false;
            let off = compute_household(&inputs);

            prop_assert!(on.total_tax <= off.total_tax + EPS);
            prop_assert!(on.split.amount <= on.split.max_transferable + EPS);

            let donor = match on.split.donor {
                Some(Spouse::B) => &inputs.spouse_b,
                _ => &inputs.spouse_a,
            };
            let limit = MAX_SPLIT_SHARE * eligible_pension_income(donor.age, &donor.incomes);
            prop_assert!(on.split.amount <= limit + EPS);
        }
    }
}

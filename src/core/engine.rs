use tracing::{debug, trace, warn};

use super::factors::{
    RRIF_CONVERSION_AGE, glide_path_draw, lif_mode_fraction, minimum_withdrawal_fraction,
};
use super::household::compute_household;
use super::tables::tables_for_year;
use super::types::{
    HouseholdTaxInputs, HouseholdTaxResult, IncomeSources, LifePhase, PersonInput, PlanInputs,
    RetirementBalances, SourceCaps, WithdrawalAmounts, WithdrawalScheduleRow, WithdrawalSource,
    YearDiagnostics, finite_or_zero, non_negative,
};

pub const SOLVER_MAX_ITERATIONS: u32 = 12;
pub const SHORTFALL_TOLERANCE: f64 = 1.0;
/// Distance kept below the clawback threshold when the guardrail is on.
pub const CLAWBACK_BUFFER: f64 = 1_000.0;
const MAX_GROSS_UP_RATE: f64 = 0.45;
const HEADROOM_EXHAUSTED: f64 = 1.0;
const FALLBACK_ORDER: [WithdrawalSource; 2] =
    [WithdrawalSource::Tfsa, WithdrawalSource::NonRegistered];

#[derive(Debug, Clone, Copy, PartialEq)]
struct CarryState {
    balances: RetirementBalances,
    tfsa_room: f64,
}

#[derive(Debug, Clone, Copy)]
struct YearContext {
    year: i32,
    age_a: u32,
    age_b: u32,
    phase: LifePhase,
    target: f64,
    db_a: f64,
    db_b: f64,
    cpp_a: f64,
    cpp_b: f64,
    oas_a: f64,
    oas_b: f64,
    share_a: f64,
    rrif_active: bool,
}

impl YearContext {
    fn new(inputs: &PlanInputs, year: i32, offset: u32) -> Self {
        let a = &inputs.spouse_a;
        let b = &inputs.spouse_b;
        let age_a = a.age_at_start + offset;
        let age_b = b.age_at_start + offset;
        let elapsed = year - inputs.baseline_year;
        let price_index = compound_index(inputs.inflation, elapsed);
        let pension_index = compound_index(inputs.pension_index_rate, elapsed);

        let phase = life_phase(inputs, age_a);
        let real_target = match phase {
            LifePhase::Active => inputs.spending_active,
            LifePhase::Middle => inputs.spending_middle,
            LifePhase::Late => inputs.spending_late,
        };

        let benefit = |amount: f64, age: u32, start_age: u32| {
            if age >= start_age {
                non_negative(amount * price_index)
            } else {
                0.0
            }
        };

        let share_a = if inputs.plan.primary_share.is_finite() {
            inputs.plan.primary_share.clamp(0.0, 1.0)
        } else {
            0.5
        };

        Self {
            year,
            age_a,
            age_b,
            phase,
            target: non_negative(real_target * price_index),
            db_a: non_negative(a.db_pension * pension_index),
            db_b: non_negative(b.db_pension * pension_index),
            cpp_a: benefit(a.cpp, age_a, a.cpp_start_age),
            cpp_b: benefit(b.cpp, age_b, b.cpp_start_age),
            oas_a: benefit(a.oas, age_a, a.oas_start_age),
            oas_b: benefit(b.oas, age_b, b.oas_start_age),
            share_a,
            rrif_active: age_a >= rrif_start_age(inputs),
        }
    }

    fn guaranteed_income(&self) -> f64 {
        self.db_a + self.db_b
    }

    fn benefit_income(&self) -> f64 {
        self.cpp_a + self.cpp_b + self.oas_a + self.oas_b
    }

    fn receives_oas(&self) -> bool {
        self.oas_a > 0.0 || self.oas_b > 0.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum CapRule {
    Unbounded,
    LockedInMaximum,
}

#[derive(Debug, Clone, Copy)]
struct SourceDescriptor {
    source: WithdrawalSource,
    taxable: bool,
    cap_rule: CapRule,
}

fn describe_source(source: WithdrawalSource) -> Option<SourceDescriptor> {
    let (taxable, cap_rule) = match source {
        WithdrawalSource::Pension => return None,
        WithdrawalSource::Fhsa | WithdrawalSource::Rrsp => (true, CapRule::Unbounded),
        WithdrawalSource::Lif => (true, CapRule::LockedInMaximum),
        WithdrawalSource::Tfsa | WithdrawalSource::NonRegistered => (false, CapRule::Unbounded),
    };
    Some(SourceDescriptor {
        source,
        taxable,
        cap_rule,
    })
}

fn balance_of(balances: &RetirementBalances, source: WithdrawalSource) -> f64 {
    match source {
        WithdrawalSource::Pension => 0.0,
        WithdrawalSource::Fhsa => balances.fhsa,
        WithdrawalSource::Rrsp => balances.rrsp,
        WithdrawalSource::Lif => balances.lira,
        WithdrawalSource::Tfsa => balances.tfsa,
        WithdrawalSource::NonRegistered => balances.non_registered,
    }
}

/// One year's allocation state shared by the priority pass and the forced fallback pass.
#[derive(Debug)]
struct Allocation<'a> {
    opening: RetirementBalances,
    drawn: &'a mut WithdrawalAmounts,
    caps: SourceCaps,
    tfsa_allowed: bool,
    non_taxable_only: bool,
    /// Remaining household taxable room under the guardrail ceiling; `None` when unbounded.
    headroom: Option<f64>,
    lif_limit: f64,
    gross_up: f64,
}

impl Allocation<'_> {
    fn remaining_balance(&self, source: WithdrawalSource) -> f64 {
        (balance_of(&self.opening, source) - self.drawn.get(source)).max(0.0)
    }

    fn effective_cap(&self, descriptor: SourceDescriptor) -> f64 {
        let source = descriptor.source;
        let mut cap = self.caps.limit(source) - self.drawn.get(source);
        if descriptor.taxable {
            if let Some(headroom) = self.headroom {
                cap = cap.min(headroom);
            }
        }
        if descriptor.cap_rule == CapRule::LockedInMaximum {
            cap = cap.min(self.lif_limit - self.drawn.lif);
        }
        cap.max(0.0)
    }

    /// Walks `order` drawing against an after-tax `need`; returns the need left uncovered.
    fn apply(&mut self, order: &[WithdrawalSource], need: f64) -> f64 {
        let mut remaining = need.max(0.0);

        for &source in order {
            if remaining <= 0.0 {
                break;
            }
            let Some(descriptor) = describe_source(source) else {
                continue;
            };
            if source == WithdrawalSource::Tfsa && !self.tfsa_allowed {
                continue;
            }
            if descriptor.taxable && self.non_taxable_only {
                continue;
            }

            let gross_factor = if descriptor.taxable {
                self.gross_up
            } else {
                1.0
            };
            let amount = (remaining * gross_factor)
                .min(self.remaining_balance(source))
                .min(self.effective_cap(descriptor));
            if amount <= 0.0 {
                continue;
            }

            self.drawn.add(source, amount);
            if descriptor.taxable {
                if let Some(headroom) = self.headroom.as_mut() {
                    *headroom = (*headroom - amount).max(0.0);
                }
            }
            remaining -= amount / gross_factor;
        }

        remaining.max(0.0)
    }
}

pub fn plan_years(inputs: &PlanInputs) -> u32 {
    if inputs.end_age < inputs.spouse_a.age_at_start {
        0
    } else {
        inputs.end_age - inputs.spouse_a.age_at_start + 1
    }
}

pub fn run_withdrawal_schedule(
    inputs: &PlanInputs,
    balances: RetirementBalances,
    start_year: i32,
) -> Vec<WithdrawalScheduleRow> {
    let years = plan_years(inputs);
    let mut rows = Vec::with_capacity(years as usize);
    let opening = CarryState {
        balances: balances.sanitized(),
        tfsa_room: non_negative(inputs.plan.tfsa_room_opening),
    };

    let closing = (0..years).fold(opening, |state, offset| {
        let (next, row) = plan_year(inputs, state, start_year + offset as i32, offset);
        rows.push(row);
        next
    });
    debug!(
        years,
        closing_total = closing.balances.total(),
        "withdrawal schedule complete"
    );

    rows
}

fn plan_year(
    inputs: &PlanInputs,
    state: CarryState,
    year: i32,
    offset: u32,
) -> (CarryState, WithdrawalScheduleRow) {
    let plan = &inputs.plan;
    let ctx = YearContext::new(inputs, year, offset);
    let opening = state.balances;
    let mut drawn = WithdrawalAmounts::default();
    let mut diagnostics = YearDiagnostics::default();

    let lif_minimum = minimum_withdrawal_fraction(ctx.age_a) * opening.lira;
    let lif_limit = lif_mode_fraction(ctx.age_a, plan.lif_mode) * opening.lira;
    diagnostics.lif_minimum = lif_minimum;
    diagnostics.lif_maximum = lif_limit;
    if plan.force_lif_minimum {
        drawn.lif = lif_minimum.min(lif_limit).min(opening.lira);
    }

    let ceiling = taxable_ceiling(inputs, &ctx);
    diagnostics.taxable_ceiling = ceiling;

    if ctx.rrif_active && opening.rrsp > 0.0 {
        let rrif = mandatory_rrif_draw(inputs, &ctx, &opening, &drawn, ceiling);
        drawn.rrsp = rrif.mandatory;
        diagnostics.rrif_minimum = rrif.statutory_minimum;
        diagnostics.rrif_glide_target = rrif.glide_target;
        diagnostics.rrif_mandatory = rrif.mandatory;
        diagnostics.ceiling_binding = rrif.ceiling_binding;
    }

    let mut tax = household_tax(inputs, &ctx, &drawn);
    let mut stale = false;
    let mut iterations = 0;

    for iteration in 1..=SOLVER_MAX_ITERATIONS {
        iterations = iteration;
        if stale {
            tax = household_tax(inputs, &ctx, &drawn);
            stale = false;
        }

        let available = after_tax_cash(&ctx, &drawn, &tax);
        let shortfall = (ctx.target - available).max(0.0);
        trace!(year, iteration, available, shortfall, "solver iteration");
        if shortfall <= SHORTFALL_TOLERANCE {
            break;
        }

        let headroom = ceiling.map(|c| taxable_headroom(&tax, c, ctx.share_a));
        let non_taxable_only = headroom.is_some_and(|h| h < HEADROOM_EXHAUSTED);
        let mut allocation = Allocation {
            opening,
            drawn: &mut drawn,
            caps: plan.caps,
            tfsa_allowed: plan.tfsa_allowed,
            non_taxable_only,
            headroom,
            lif_limit,
            gross_up: gross_up_multiplier(&tax),
        };

        let mut unmet = allocation.apply(&plan.order, shortfall);
        if unmet > SHORTFALL_TOLERANCE && !non_taxable_only {
            allocation.non_taxable_only = true;
            unmet = allocation.apply(&FALLBACK_ORDER, unmet);
        }
        stale = true;

        if unmet > SHORTFALL_TOLERANCE {
            debug!(year, unmet, "sources exhausted before target was met");
            break;
        }
    }

    if stale {
        tax = household_tax(inputs, &ctx, &drawn);
    }

    let available = after_tax_cash(&ctx, &drawn, &tax);
    let surplus = finite_or_zero(available - ctx.target).max(0.0);
    let shortfall = finite_or_zero(ctx.target - available).max(0.0);
    if shortfall > SHORTFALL_TOLERANCE {
        warn!(year, shortfall, "spending target not met");
    }

    let to_tfsa = surplus.min(state.tfsa_room);
    let to_non_registered = surplus - to_tfsa;

    let growth = (1.0 + finite_or_zero(inputs.annual_return)).max(0.0);
    let grow = |value: f64| non_negative(value * growth);
    let ending_balances = RetirementBalances {
        fhsa: grow(opening.fhsa - drawn.fhsa),
        rrsp: grow(opening.rrsp - drawn.rrsp),
        lira: grow(opening.lira - drawn.lif),
        tfsa: grow(opening.tfsa - drawn.tfsa + to_tfsa),
        non_registered: grow(opening.non_registered - drawn.non_registered + to_non_registered),
    };
    let tfsa_room_end =
        non_negative(state.tfsa_room - to_tfsa + non_negative(plan.tfsa_room_annual));

    diagnostics.taxable_income_a = tax.spouse_a.tax.taxable_income;
    diagnostics.taxable_income_b = tax.spouse_b.tax.taxable_income;
    diagnostics.total_tax = tax.total_tax;
    diagnostics.oas_clawback = tax.spouse_a.tax.oas_clawback + tax.spouse_b.tax.oas_clawback;
    diagnostics.pension_split = tax.split.amount;
    diagnostics.iterations = iterations;
    diagnostics.surplus_after_tax = surplus;
    diagnostics.shortfall_after_tax = shortfall;

    debug!(
        year,
        age = ctx.age_a,
        target = ctx.target,
        withdrawn = drawn.total(),
        tax = tax.total_tax,
        iterations,
        "planned year"
    );

    let row = WithdrawalScheduleRow {
        year,
        age_a: ctx.age_a,
        age_b: ctx.age_b,
        phase: ctx.phase,
        target_spending: ctx.target,
        guaranteed_income: ctx.guaranteed_income(),
        cpp_income: ctx.cpp_a + ctx.cpp_b,
        oas_income: ctx.oas_a + ctx.oas_b,
        benefit_income: ctx.benefit_income(),
        withdrawals: drawn,
        rrif_active: ctx.rrif_active,
        to_tfsa,
        to_non_registered,
        ending_balances,
        tfsa_room_end,
        diagnostics,
    };

    (
        CarryState {
            balances: ending_balances,
            tfsa_room: tfsa_room_end,
        },
        row,
    )
}

#[derive(Debug, Clone, Copy, Default)]
struct RrifDraw {
    statutory_minimum: f64,
    glide_target: f64,
    mandatory: f64,
    ceiling_binding: bool,
}

fn mandatory_rrif_draw(
    inputs: &PlanInputs,
    ctx: &YearContext,
    opening: &RetirementBalances,
    drawn: &WithdrawalAmounts,
    ceiling: Option<f64>,
) -> RrifDraw {
    let glide = &inputs.plan.rrif;
    let balance = opening.rrsp;
    let statutory_minimum = (minimum_withdrawal_fraction(ctx.age_a) * balance).min(balance);
    let multiplier = if glide.min_multiplier.is_finite() {
        glide.min_multiplier.max(1.0)
    } else {
        1.0
    };
    let glide_target = glide_path_draw(
        balance,
        ctx.age_a,
        glide.target_depletion_age,
        glide.front_load,
        inputs.annual_return,
    );

    let mut mandatory = (statutory_minimum * multiplier).max(glide_target).min(balance);
    let mut ceiling_binding = false;

    if let Some(ceiling) = ceiling {
        let estimate = household_tax(inputs, ctx, drawn);
        let headroom = taxable_headroom(&estimate, ceiling, ctx.share_a);
        if mandatory > headroom {
            mandatory = headroom.max(statutory_minimum).min(balance);
            ceiling_binding = true;
        }
    }

    RrifDraw {
        statutory_minimum,
        glide_target,
        mandatory,
        ceiling_binding,
    }
}

fn taxable_ceiling(inputs: &PlanInputs, ctx: &YearContext) -> Option<f64> {
    if inputs.plan.avoid_oas_clawback && ctx.receives_oas() {
        Some(tables_for_year(ctx.year).oas_clawback.threshold - CLAWBACK_BUFFER)
    } else {
        None
    }
}

/// Household taxable dollars that can still be drawn before either spouse crosses `ceiling`.
fn taxable_headroom(tax: &HouseholdTaxResult, ceiling: f64, share_a: f64) -> f64 {
    [
        (tax.spouse_a.tax.taxable_income, share_a),
        (tax.spouse_b.tax.taxable_income, 1.0 - share_a),
    ]
    .into_iter()
    .filter(|(_, share)| *share > 0.0)
    .map(|(income, share)| ((ceiling - income) / share).max(0.0))
    .fold(f64::INFINITY, f64::min)
}

fn gross_up_multiplier(tax: &HouseholdTaxResult) -> f64 {
    let taxable = tax.spouse_a.tax.taxable_income + tax.spouse_b.tax.taxable_income;
    let rate = if taxable > 0.0 {
        finite_or_zero(tax.total_tax / taxable).clamp(0.0, MAX_GROSS_UP_RATE)
    } else {
        0.0
    };
    1.0 / (1.0 - rate)
}

fn after_tax_cash(ctx: &YearContext, drawn: &WithdrawalAmounts, tax: &HouseholdTaxResult) -> f64 {
    finite_or_zero(ctx.guaranteed_income() + ctx.benefit_income() + drawn.total() - tax.total_tax)
}

fn household_tax(
    inputs: &PlanInputs,
    ctx: &YearContext,
    drawn: &WithdrawalAmounts,
) -> HouseholdTaxResult {
    let incomes = |share: f64, db: f64, cpp: f64, oas: f64| {
        let (rrsp, rrif) = if ctx.rrif_active {
            (drawn.fhsa * share, drawn.rrsp * share)
        } else {
            ((drawn.fhsa + drawn.rrsp) * share, 0.0)
        };
        IncomeSources {
            employment: 0.0,
            db_pension: db,
            rrsp,
            rrif,
            lif: drawn.lif * share,
            cpp,
            oas,
            tfsa: drawn.tfsa * share,
        }
    };

    compute_household(&HouseholdTaxInputs {
        year: ctx.year,
        spouse_a: PersonInput {
            name: inputs.spouse_a.name.clone(),
            age: ctx.age_a,
            incomes: incomes(ctx.share_a, ctx.db_a, ctx.cpp_a, ctx.oas_a),
        },
        spouse_b: PersonInput {
            name: inputs.spouse_b.name.clone(),
            age: ctx.age_b,
            incomes: incomes(1.0 - ctx.share_a, ctx.db_b, ctx.cpp_b, ctx.oas_b),
        },
        credits: inputs.credits,
        splitting: inputs.splitting,
    })
}

fn life_phase(inputs: &PlanInputs, age: u32) -> LifePhase {
    if age < inputs.middle_phase_age {
        LifePhase::Active
    } else if age < inputs.late_phase_age {
        LifePhase::Middle
    } else {
        LifePhase::Late
    }
}

fn rrif_start_age(inputs: &PlanInputs) -> u32 {
    inputs.plan.rrif_start_age.min(RRIF_CONVERSION_AGE)
}

fn compound_index(rate: f64, years: i32) -> f64 {
    let base = 1.0 + finite_or_zero(rate);
    if base <= 0.0 {
        return 0.0;
    }
    base.powi(years)
}

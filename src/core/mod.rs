mod engine;
mod factors;
mod household;
mod solver;
mod tables;
mod tax;
mod types;

pub use engine::{CLAWBACK_BUFFER, SOLVER_MAX_ITERATIONS, plan_years, run_withdrawal_schedule};
pub use factors::{
    RRIF_CONVERSION_AGE, glide_path_draw, lif_maximum_fraction, lif_mode_fraction,
    minimum_withdrawal_fraction,
};
pub use household::{
    MAX_SPLIT_CANDIDATES, MAX_SPLIT_SHARE, MIN_SPLIT_STEP, compute_household,
    compute_household_with,
};
pub use solver::{
    PhaseSpending, SUSTAINABLE_SHORTFALL, SolveError, SpendingSolveConfig, SpendingSolveIteration,
    SpendingSolveResult, solve_sustainable_spending,
};
pub use tables::{
    Bracket, JurisdictionTable, OasClawbackRule, TaxTableSet, TaxYearTables, tables_for_year,
};
pub use tax::{
    compute_credits, compute_oas_clawback, compute_person, eligible_pension_income,
    oas_clawback_for_year, progressive_tax,
};
pub use types::{
    CreditsToggles, HouseholdTaxInputs, HouseholdTaxResult, IncomeSources, JurisdictionCredits,
    LifMode, LifePhase, PensionSplitTrace, PensionSplitting, PersonInput, PersonOutcome,
    PersonTaxResult, PlanInputs, RetirementBalances, RrifGlidePath, SourceCaps, Spouse,
    SpouseProfile, TaxCredits, WithdrawalAmounts, WithdrawalPlan, WithdrawalScheduleRow,
    WithdrawalSource, YearDiagnostics,
};

use serde::{Deserialize, Serialize};

pub(crate) fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeSources {
    pub employment: f64,
    pub db_pension: f64,
    pub rrsp: f64,
    pub rrif: f64,
    pub lif: f64,
    pub cpp: f64,
    pub oas: f64,
    /// Not taxable; carried so a person's full cash picture travels with their incomes.
    pub tfsa: f64,
}

impl IncomeSources {
    pub fn taxable_total(&self) -> f64 {
        [
            self.employment,
            self.db_pension,
            self.rrsp,
            self.rrif,
            self.lif,
            self.cpp,
            self.oas,
        ]
        .into_iter()
        .map(non_negative)
        .sum()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreditsToggles {
    pub bpa: bool,
    pub age_amount: bool,
    pub pension_amount: bool,
}

impl Default for CreditsToggles {
    fn default() -> Self {
        Self {
            bpa: true,
            age_amount: true,
            pension_amount: true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PensionSplitting {
    pub enabled: bool,
    pub optimize: bool,
    pub step: f64,
}

impl Default for PensionSplitting {
    fn default() -> Self {
        Self {
            enabled: true,
            optimize: true,
            step: 100.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonInput {
    pub name: String,
    pub age: u32,
    pub incomes: IncomeSources,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdTaxInputs {
    pub year: i32,
    pub spouse_a: PersonInput,
    pub spouse_b: PersonInput,
    #[serde(default)]
    pub credits: CreditsToggles,
    #[serde(default)]
    pub splitting: PensionSplitting,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spouse {
    A,
    B,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionCredits {
    pub bpa: f64,
    pub age_amount: f64,
    pub pension_amount: f64,
}

impl JurisdictionCredits {
    pub fn total(&self) -> f64 {
        self.bpa + self.age_amount + self.pension_amount
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxCredits {
    pub federal: JurisdictionCredits,
    pub regional: JurisdictionCredits,
    pub total: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonTaxResult {
    pub taxable_income: f64,
    pub eligible_pension_income: f64,
    pub federal_bracket_tax: f64,
    pub regional_bracket_tax: f64,
    pub before_credit_tax: f64,
    pub credits: TaxCredits,
    pub tax_after_credits: f64,
    pub oas_clawback: f64,
    pub total_tax: f64,
    pub after_tax_income: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonOutcome {
    pub name: String,
    pub age: u32,
    /// Incomes after any pension split has been applied.
    pub incomes: IncomeSources,
    pub tax: PersonTaxResult,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionSplitTrace {
    pub enabled: bool,
    pub optimized: bool,
    pub donor: Option<Spouse>,
    pub recipient: Option<Spouse>,
    pub max_transferable: f64,
    pub amount: f64,
    pub candidates_evaluated: u32,
    pub tax_without_split: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdTaxResult {
    pub year: i32,
    pub spouse_a: PersonOutcome,
    pub spouse_b: PersonOutcome,
    pub total_tax: f64,
    pub total_after_tax_income: f64,
    pub split: PensionSplitTrace,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementBalances {
    pub fhsa: f64,
    pub rrsp: f64,
    pub lira: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl RetirementBalances {
    pub fn sanitized(self) -> Self {
        Self {
            fhsa: non_negative(self.fhsa),
            rrsp: non_negative(self.rrsp),
            lira: non_negative(self.lira),
            tfsa: non_negative(self.tfsa),
            non_registered: non_negative(self.non_registered),
        }
    }

    pub fn total(&self) -> f64 {
        self.fhsa + self.rrsp + self.lira + self.tfsa + self.non_registered
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalSource {
    /// Guaranteed pension income; listed in the order for display only.
    Pension,
    Fhsa,
    Rrsp,
    Lif,
    Tfsa,
    NonRegistered,
}

/// Per-source annual withdrawal caps. Zero means uncapped.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SourceCaps {
    pub fhsa: f64,
    pub rrsp: f64,
    pub lif: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl SourceCaps {
    pub fn limit(&self, source: WithdrawalSource) -> f64 {
        let raw = match source {
            WithdrawalSource::Pension => return 0.0,
            WithdrawalSource::Fhsa => self.fhsa,
            WithdrawalSource::Rrsp => self.rrsp,
            WithdrawalSource::Lif => self.lif,
            WithdrawalSource::Tfsa => self.tfsa,
            WithdrawalSource::NonRegistered => self.non_registered,
        };
        if raw.is_finite() && raw > 0.0 {
            raw
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifMode {
    Minimum,
    Maximum,
    Midpoint,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RrifGlidePath {
    pub target_depletion_age: u32,
    /// 0 gives level annuity-like draws, 1 the most front-loaded schedule.
    pub front_load: f64,
    pub min_multiplier: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawalPlan {
    pub order: Vec<WithdrawalSource>,
    pub caps: SourceCaps,
    pub tfsa_allowed: bool,
    pub avoid_oas_clawback: bool,
    pub force_lif_minimum: bool,
    pub lif_mode: LifMode,
    pub rrif: RrifGlidePath,
    /// Conversion age for the RRSP. Defaults to 71; a lower age opts into early conversion.
    pub rrif_start_age: u32,
    pub tfsa_room_opening: f64,
    pub tfsa_room_annual: f64,
    /// Share of registered and TFSA withdrawals reported on spouse A's return.
    pub primary_share: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpouseProfile {
    pub name: String,
    pub age_at_start: u32,
    pub db_pension: f64,
    pub cpp: f64,
    pub cpp_start_age: u32,
    pub oas: f64,
    pub oas_start_age: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanInputs {
    pub spouse_a: SpouseProfile,
    pub spouse_b: SpouseProfile,
    pub end_age: u32,
    pub baseline_year: i32,
    pub inflation: f64,
    pub pension_index_rate: f64,
    pub annual_return: f64,
    pub middle_phase_age: u32,
    pub late_phase_age: u32,
    pub spending_active: f64,
    pub spending_middle: f64,
    pub spending_late: f64,
    pub credits: CreditsToggles,
    pub splitting: PensionSplitting,
    pub plan: WithdrawalPlan,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifePhase {
    Active,
    Middle,
    Late,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAmounts {
    pub fhsa: f64,
    pub rrsp: f64,
    pub lif: f64,
    pub tfsa: f64,
    pub non_registered: f64,
}

impl WithdrawalAmounts {
    pub fn get(&self, source: WithdrawalSource) -> f64 {
        match source {
            WithdrawalSource::Pension => 0.0,
            WithdrawalSource::Fhsa => self.fhsa,
            WithdrawalSource::Rrsp => self.rrsp,
            WithdrawalSource::Lif => self.lif,
            WithdrawalSource::Tfsa => self.tfsa,
            WithdrawalSource::NonRegistered => self.non_registered,
        }
    }

    pub fn add(&mut self, source: WithdrawalSource, amount: f64) {
        match source {
            WithdrawalSource::Pension => {}
            WithdrawalSource::Fhsa => self.fhsa += amount,
            WithdrawalSource::Rrsp => self.rrsp += amount,
            WithdrawalSource::Lif => self.lif += amount,
            WithdrawalSource::Tfsa => self.tfsa += amount,
            WithdrawalSource::NonRegistered => self.non_registered += amount,
        }
    }

    pub fn total(&self) -> f64 {
        self.fhsa + self.rrsp + self.lif + self.tfsa + self.non_registered
    }

    pub fn taxable_total(&self) -> f64 {
        self.fhsa + self.rrsp + self.lif
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearDiagnostics {
    pub taxable_income_a: f64,
    pub taxable_income_b: f64,
    pub total_tax: f64,
    pub oas_clawback: f64,
    pub taxable_ceiling: Option<f64>,
    pub ceiling_binding: bool,
    pub rrif_minimum: f64,
    pub rrif_glide_target: f64,
    pub rrif_mandatory: f64,
    pub lif_minimum: f64,
    pub lif_maximum: f64,
    pub pension_split: f64,
    pub iterations: u32,
    pub surplus_after_tax: f64,
    pub shortfall_after_tax: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalScheduleRow {
    pub year: i32,
    pub age_a: u32,
    pub age_b: u32,
    pub phase: LifePhase,
    pub target_spending: f64,
    pub guaranteed_income: f64,
    pub cpp_income: f64,
    pub oas_income: f64,
    pub benefit_income: f64,
    pub withdrawals: WithdrawalAmounts,
    pub rrif_active: bool,
    pub to_tfsa: f64,
    pub to_non_registered: f64,
    pub ending_balances: RetirementBalances,
    pub tfsa_room_end: f64,
    pub diagnostics: YearDiagnostics,
}

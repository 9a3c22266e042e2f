//! Versioned bracket and credit parameters.
//!
//! Figures approximate the Canadian federal schedule and the Ontario schedule as the
//! regional tier. They are planning inputs, not filing values.

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bracket {
    /// Upper bound of the bracket; the last bracket uses `f64::INFINITY`.
    pub upper: f64,
    pub rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JurisdictionTable {
    pub brackets: &'static [Bracket],
    pub lowest_rate: f64,
    pub bpa: f64,
    pub age_amount_max: f64,
    pub age_amount_threshold: f64,
    pub age_amount_phase_out_rate: f64,
    pub pension_credit_base: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OasClawbackRule {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaxYearTables {
    pub year: i32,
    pub federal: JurisdictionTable,
    pub regional: JurisdictionTable,
    pub oas_clawback: OasClawbackRule,
}

const FEDERAL_2024: [Bracket; 5] = [
    Bracket { upper: 55_867.0, rate: 0.15 },
    Bracket { upper: 111_733.0, rate: 0.205 },
    Bracket { upper: 173_205.0, rate: 0.26 },
    Bracket { upper: 246_752.0, rate: 0.29 },
    Bracket { upper: f64::INFINITY, rate: 0.33 },
];

const ONTARIO_2024: [Bracket; 5] = [
    Bracket { upper: 51_446.0, rate: 0.0505 },
    Bracket { upper: 102_894.0, rate: 0.0915 },
    Bracket { upper: 150_000.0, rate: 0.1116 },
    Bracket { upper: 220_000.0, rate: 0.1216 },
    Bracket { upper: f64::INFINITY, rate: 0.1316 },
];

const FEDERAL_2025: [Bracket; 5] = [
    Bracket { upper: 57_375.0, rate: 0.15 },
    Bracket { upper: 114_750.0, rate: 0.205 },
    Bracket { upper: 177_882.0, rate: 0.26 },
    Bracket { upper: 253_414.0, rate: 0.29 },
    Bracket { upper: f64::INFINITY, rate: 0.33 },
];

const ONTARIO_2025: [Bracket; 5] = [
    Bracket { upper: 52_886.0, rate: 0.0505 },
    Bracket { upper: 105_775.0, rate: 0.0915 },
    Bracket { upper: 150_000.0, rate: 0.1116 },
    Bracket { upper: 220_000.0, rate: 0.1216 },
    Bracket { upper: f64::INFINITY, rate: 0.1316 },
];

static BUILTIN_TABLES: [TaxYearTables; 2] = [
    TaxYearTables {
        year: 2024,
        federal: JurisdictionTable {
            brackets: &FEDERAL_2024,
            lowest_rate: 0.15,
            bpa: 15_705.0,
            age_amount_max: 8_790.0,
            age_amount_threshold: 44_325.0,
            age_amount_phase_out_rate: 0.15,
            pension_credit_base: 2_000.0,
        },
        regional: JurisdictionTable {
            brackets: &ONTARIO_2024,
            lowest_rate: 0.0505,
            bpa: 12_399.0,
            age_amount_max: 6_223.0,
            age_amount_threshold: 46_330.0,
            age_amount_phase_out_rate: 0.15,
            pension_credit_base: 1_762.0,
        },
        oas_clawback: OasClawbackRule {
            threshold: 90_997.0,
            rate: 0.15,
        },
    },
    TaxYearTables {
        year: 2025,
        federal: JurisdictionTable {
            brackets: &FEDERAL_2025,
            lowest_rate: 0.15,
            bpa: 16_129.0,
            age_amount_max: 9_028.0,
            age_amount_threshold: 45_522.0,
            age_amount_phase_out_rate: 0.15,
            pension_credit_base: 2_000.0,
        },
        regional: JurisdictionTable {
            brackets: &ONTARIO_2025,
            lowest_rate: 0.0505,
            bpa: 12_747.0,
            age_amount_max: 6_342.0,
            age_amount_threshold: 47_210.0,
            age_amount_phase_out_rate: 0.15,
            pension_credit_base: 1_796.0,
        },
        oas_clawback: OasClawbackRule {
            threshold: 93_454.0,
            rate: 0.15,
        },
    },
];

#[derive(Copy, Clone, Debug)]
pub struct TaxTableSet<'a> {
    tables: &'a [TaxYearTables],
}

impl<'a> TaxTableSet<'a> {
    pub const fn new(tables: &'a [TaxYearTables]) -> Self {
        Self { tables }
    }

    pub fn builtin() -> TaxTableSet<'static> {
        TaxTableSet::new(&BUILTIN_TABLES)
    }

    /// Latest table whose year is not after `year`, falling back to the earliest table.
    pub fn select(&self, year: i32) -> Option<&'a TaxYearTables> {
        let tables: &'a [TaxYearTables] = self.tables;
        tables
            .iter()
            .filter(|t| t.year <= year)
            .max_by_key(|t| t.year)
            .or_else(|| tables.iter().min_by_key(|t| t.year))
    }
}

pub fn tables_for_year(year: i32) -> &'static TaxYearTables {
    TaxTableSet::builtin()
        .select(year)
        .unwrap_or(&BUILTIN_TABLES[0])
}

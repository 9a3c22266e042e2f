mod error;

pub use error::{InputError, InputResult};

use axum::{
    Router,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    CreditsToggles, HouseholdTaxInputs, LifMode, MIN_SPLIT_STEP, PensionSplitting, PlanInputs,
    RetirementBalances, RrifGlidePath, SourceCaps, SpendingSolveConfig, SpouseProfile, WithdrawalPlan,
    WithdrawalScheduleRow, WithdrawalSource, compute_household, run_withdrawal_schedule,
    solve_sustainable_spending,
};

const MAX_AGE: u32 = 120;
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2200;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliWithdrawalSource {
    Pension,
    Fhsa,
    Rrsp,
    Lif,
    Tfsa,
    NonRegistered,
}

impl From<CliWithdrawalSource> for WithdrawalSource {
    fn from(value: CliWithdrawalSource) -> Self {
        match value {
            CliWithdrawalSource::Pension => WithdrawalSource::Pension,
            CliWithdrawalSource::Fhsa => WithdrawalSource::Fhsa,
            CliWithdrawalSource::Rrsp => WithdrawalSource::Rrsp,
            CliWithdrawalSource::Lif => WithdrawalSource::Lif,
            CliWithdrawalSource::Tfsa => WithdrawalSource::Tfsa,
            CliWithdrawalSource::NonRegistered => WithdrawalSource::NonRegistered,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLifMode {
    Minimum,
    Maximum,
    Midpoint,
}

impl From<CliLifMode> for LifMode {
    fn from(value: CliLifMode) -> Self {
        match value {
            CliLifMode::Minimum => LifMode::Minimum,
            CliLifMode::Maximum => LifMode::Maximum,
            CliLifMode::Midpoint => LifMode::Midpoint,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalSource {
    #[serde(alias = "db", alias = "db-pension")]
    Pension,
    Fhsa,
    #[serde(alias = "rrif")]
    Rrsp,
    #[serde(alias = "lira")]
    Lif,
    Tfsa,
    #[serde(alias = "nonRegistered", alias = "non_registered", alias = "nonreg")]
    NonRegistered,
}

impl From<ApiWithdrawalSource> for CliWithdrawalSource {
    fn from(value: ApiWithdrawalSource) -> Self {
        match value {
            ApiWithdrawalSource::Pension => CliWithdrawalSource::Pension,
            ApiWithdrawalSource::Fhsa => CliWithdrawalSource::Fhsa,
            ApiWithdrawalSource::Rrsp => CliWithdrawalSource::Rrsp,
            ApiWithdrawalSource::Lif => CliWithdrawalSource::Lif,
            ApiWithdrawalSource::Tfsa => CliWithdrawalSource::Tfsa,
            ApiWithdrawalSource::NonRegistered => CliWithdrawalSource::NonRegistered,
        }
    }
}

/// Accepts either a JSON array or a comma-separated string, so the order also works in a
/// query string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ApiWithdrawalOrder {
    List(Vec<ApiWithdrawalSource>),
    Csv(String),
}

impl ApiWithdrawalOrder {
    fn into_cli(self) -> InputResult<Vec<CliWithdrawalSource>> {
        match self {
            ApiWithdrawalOrder::List(sources) => Ok(sources.into_iter().map(Into::into).collect()),
            ApiWithdrawalOrder::Csv(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    CliWithdrawalSource::from_str(s, true)
                        .map_err(|_| InputError::UnknownSource(s.to_string()))
                })
                .collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiLifMode {
    #[serde(alias = "min")]
    Minimum,
    #[serde(alias = "max")]
    Maximum,
    #[serde(alias = "mid")]
    Midpoint,
}

impl From<ApiLifMode> for CliLifMode {
    fn from(value: ApiLifMode) -> Self {
        match value {
            ApiLifMode::Minimum => CliLifMode::Minimum,
            ApiLifMode::Maximum => CliLifMode::Maximum,
            ApiLifMode::Midpoint => CliLifMode::Midpoint,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SchedulePayload {
    name_a: Option<String>,
    age_a: Option<u32>,
    name_b: Option<String>,
    age_b: Option<u32>,
    db_pension_a: Option<f64>,
    db_pension_b: Option<f64>,
    cpp_a: Option<f64>,
    cpp_b: Option<f64>,
    cpp_start_age_a: Option<u32>,
    cpp_start_age_b: Option<u32>,
    oas_a: Option<f64>,
    oas_b: Option<f64>,
    oas_start_age_a: Option<u32>,
    oas_start_age_b: Option<u32>,

    end_age: Option<u32>,
    start_year: Option<i32>,
    baseline_year: Option<i32>,
    inflation_rate: Option<f64>,
    pension_index_rate: Option<f64>,
    annual_return: Option<f64>,

    middle_phase_age: Option<u32>,
    late_phase_age: Option<u32>,
    spending_active: Option<f64>,
    spending_middle: Option<f64>,
    spending_late: Option<f64>,

    bpa_credit: Option<bool>,
    age_credit: Option<bool>,
    pension_credit: Option<bool>,
    pension_splitting: Option<bool>,
    optimize_split: Option<bool>,
    split_step: Option<f64>,

    fhsa_balance: Option<f64>,
    rrsp_balance: Option<f64>,
    lira_balance: Option<f64>,
    tfsa_balance: Option<f64>,
    non_registered_balance: Option<f64>,

    withdrawal_order: Option<ApiWithdrawalOrder>,
    cap_fhsa: Option<f64>,
    cap_rrsp: Option<f64>,
    cap_lif: Option<f64>,
    cap_tfsa: Option<f64>,
    cap_non_registered: Option<f64>,
    tfsa_allowed: Option<bool>,
    avoid_oas_clawback: Option<bool>,
    force_lif_minimum: Option<bool>,
    lif_mode: Option<ApiLifMode>,
    rrif_target_age: Option<u32>,
    rrif_front_load: Option<f64>,
    rrif_min_multiplier: Option<f64>,
    rrif_start_age: Option<u32>,
    tfsa_room: Option<f64>,
    tfsa_room_annual: Option<f64>,
    primary_share: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SustainablePayload {
    #[serde(flatten)]
    plan: SchedulePayload,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "drawdown",
    about = "Tax-aware retirement drawdown planner for a two-spouse household"
)]
struct Cli {
    #[arg(long, default_value = "Spouse A")]
    name_a: String,
    #[arg(long, default_value_t = 65, help = "Primary spouse's age in the start year")]
    age_a: u32,
    #[arg(long, default_value = "Spouse B")]
    name_b: String,
    #[arg(long, default_value_t = 63)]
    age_b: u32,
    #[arg(long, default_value_t = 0.0, help = "Annual DB pension in baseline-year dollars")]
    db_pension_a: f64,
    #[arg(long, default_value_t = 0.0)]
    db_pension_b: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual CPP benefit in baseline-year dollars")]
    cpp_a: f64,
    #[arg(long, default_value_t = 0.0)]
    cpp_b: f64,
    #[arg(long, default_value_t = 65)]
    cpp_start_age_a: u32,
    #[arg(long, default_value_t = 65)]
    cpp_start_age_b: u32,
    #[arg(long, default_value_t = 0.0, help = "Annual OAS benefit in baseline-year dollars")]
    oas_a: f64,
    #[arg(long, default_value_t = 0.0)]
    oas_b: f64,
    #[arg(long, default_value_t = 65)]
    oas_start_age_a: u32,
    #[arg(long, default_value_t = 65)]
    oas_start_age_b: u32,

    #[arg(long, default_value_t = 95, help = "Last planned age of the primary spouse")]
    end_age: u32,
    #[arg(long, default_value_t = 2025)]
    start_year: i32,
    #[arg(long, help = "Year nominal inputs are expressed in; defaults to start-year")]
    baseline_year: Option<i32>,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual DB pension indexation in percent"
    )]
    pension_index_rate: f64,
    #[arg(long, default_value_t = 5.0, help = "Nominal annual return in percent")]
    annual_return: f64,

    #[arg(long, default_value_t = 75)]
    middle_phase_age: u32,
    #[arg(long, default_value_t = 85)]
    late_phase_age: u32,
    #[arg(long, default_value_t = 80_000.0, help = "After-tax spending target in baseline-year dollars")]
    spending_active: f64,
    #[arg(long, default_value_t = 70_000.0)]
    spending_middle: f64,
    #[arg(long, default_value_t = 60_000.0)]
    spending_late: f64,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    bpa_credit: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    age_credit: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pension_credit: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pension_splitting: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    optimize_split: bool,
    #[arg(long, default_value_t = 100.0, help = "Split search granularity in dollars")]
    split_step: f64,

    #[arg(long, default_value_t = 0.0)]
    fhsa_balance: f64,
    #[arg(long, default_value_t = 0.0)]
    rrsp_balance: f64,
    #[arg(long, default_value_t = 0.0)]
    lira_balance: f64,
    #[arg(long, default_value_t = 0.0)]
    tfsa_balance: f64,
    #[arg(long, default_value_t = 0.0)]
    non_registered_balance: f64,

    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = default_withdrawal_order()
    )]
    withdrawal_order: Vec<CliWithdrawalSource>,
    #[arg(long, default_value_t = 0.0, help = "Annual FHSA cap; 0 means uncapped")]
    cap_fhsa: f64,
    #[arg(long, default_value_t = 0.0)]
    cap_rrsp: f64,
    #[arg(long, default_value_t = 0.0)]
    cap_lif: f64,
    #[arg(long, default_value_t = 0.0)]
    cap_tfsa: f64,
    #[arg(long, default_value_t = 0.0)]
    cap_non_registered: f64,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    tfsa_allowed: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    avoid_oas_clawback: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    force_lif_minimum: bool,
    #[arg(long, value_enum, default_value_t = CliLifMode::Maximum)]
    lif_mode: CliLifMode,
    #[arg(long, default_value_t = 95, help = "Age by which the RRIF glide path empties the account")]
    rrif_target_age: u32,
    #[arg(long, default_value_t = 0.0, help = "Glide path front-loading in percent")]
    rrif_front_load: f64,
    #[arg(long, default_value_t = 1.0)]
    rrif_min_multiplier: f64,
    #[arg(long, default_value_t = 71, help = "Age the RRSP converts to a RRIF; capped at 71")]
    rrif_start_age: u32,
    #[arg(long, default_value_t = 7_000.0, help = "Unused TFSA room at the start")]
    tfsa_room: f64,
    #[arg(long, default_value_t = 7_000.0)]
    tfsa_room_annual: f64,
    #[arg(
        long,
        default_value_t = 50.0,
        help = "Percent of registered and TFSA withdrawals reported by spouse A"
    )]
    primary_share: f64,
}

fn default_withdrawal_order() -> Vec<CliWithdrawalSource> {
    vec![
        CliWithdrawalSource::Pension,
        CliWithdrawalSource::Rrsp,
        CliWithdrawalSource::Lif,
        CliWithdrawalSource::NonRegistered,
        CliWithdrawalSource::Tfsa,
    ]
}

#[derive(Debug)]
struct ScheduleRequest {
    inputs: PlanInputs,
    balances: RetirementBalances,
    start_year: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    start_year: i32,
    end_year: Option<i32>,
    total_tax: f64,
    total_withdrawals: f64,
    shortfall_years: usize,
    ending_balances: RetirementBalances,
    rows: Vec<WithdrawalScheduleRow>,
}

fn build_request(cli: Cli) -> InputResult<ScheduleRequest> {
    if cli.age_a > MAX_AGE || cli.age_b > MAX_AGE {
        return Err(InputError::invalid("age-a", "and --age-b must be <= 120"));
    }
    if cli.end_age < cli.age_a {
        return Err(InputError::invalid("end-age", "must be >= --age-a"));
    }
    if cli.end_age > MAX_AGE {
        return Err(InputError::invalid("end-age", "must be <= 120"));
    }
    if cli.late_phase_age < cli.middle_phase_age {
        return Err(InputError::invalid(
            "late-phase-age",
            "must be >= --middle-phase-age",
        ));
    }
    if !YEAR_RANGE.contains(&cli.start_year) {
        return Err(InputError::invalid("start-year", "must be between 1900 and 2200"));
    }
    if cli.baseline_year.is_some_and(|y| !YEAR_RANGE.contains(&y)) {
        return Err(InputError::invalid(
            "baseline-year",
            "must be between 1900 and 2200",
        ));
    }

    for (flag, rate) in [
        ("inflation-rate", cli.inflation_rate),
        ("pension-index-rate", cli.pension_index_rate),
        ("annual-return", cli.annual_return),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(InputError::invalid(flag, "must be > -100"));
        }
    }

    for (flag, amount) in [
        ("db-pension-a", cli.db_pension_a),
        ("db-pension-b", cli.db_pension_b),
        ("cpp-a", cli.cpp_a),
        ("cpp-b", cli.cpp_b),
        ("oas-a", cli.oas_a),
        ("oas-b", cli.oas_b),
        ("spending-active", cli.spending_active),
        ("spending-middle", cli.spending_middle),
        ("spending-late", cli.spending_late),
        ("fhsa-balance", cli.fhsa_balance),
        ("rrsp-balance", cli.rrsp_balance),
        ("lira-balance", cli.lira_balance),
        ("tfsa-balance", cli.tfsa_balance),
        ("non-registered-balance", cli.non_registered_balance),
        ("cap-fhsa", cli.cap_fhsa),
        ("cap-rrsp", cli.cap_rrsp),
        ("cap-lif", cli.cap_lif),
        ("cap-tfsa", cli.cap_tfsa),
        ("cap-non-registered", cli.cap_non_registered),
        ("tfsa-room", cli.tfsa_room),
        ("tfsa-room-annual", cli.tfsa_room_annual),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(InputError::invalid(flag, "must be a finite amount >= 0"));
        }
    }

    if !valid_split_step(cli.split_step) {
        return Err(InputError::invalid("split-step", "must be >= 1"));
    }
    if !(0.0..=100.0).contains(&cli.primary_share) {
        return Err(InputError::invalid("primary-share", "must be between 0 and 100"));
    }
    if !(0.0..=100.0).contains(&cli.rrif_front_load) {
        return Err(InputError::invalid(
            "rrif-front-load",
            "must be between 0 and 100",
        ));
    }
    if !cli.rrif_min_multiplier.is_finite() || cli.rrif_min_multiplier < 1.0 {
        return Err(InputError::invalid("rrif-min-multiplier", "must be >= 1"));
    }

    let start_year = cli.start_year;
    let inputs = PlanInputs {
        spouse_a: SpouseProfile {
            name: cli.name_a,
            age_at_start: cli.age_a,
            db_pension: cli.db_pension_a,
            cpp: cli.cpp_a,
            cpp_start_age: cli.cpp_start_age_a,
            oas: cli.oas_a,
            oas_start_age: cli.oas_start_age_a,
        },
        spouse_b: SpouseProfile {
            name: cli.name_b,
            age_at_start: cli.age_b,
            db_pension: cli.db_pension_b,
            cpp: cli.cpp_b,
            cpp_start_age: cli.cpp_start_age_b,
            oas: cli.oas_b,
            oas_start_age: cli.oas_start_age_b,
        },
        end_age: cli.end_age,
        baseline_year: cli.baseline_year.unwrap_or(start_year),
        inflation: cli.inflation_rate / 100.0,
        pension_index_rate: cli.pension_index_rate / 100.0,
        annual_return: cli.annual_return / 100.0,
        middle_phase_age: cli.middle_phase_age,
        late_phase_age: cli.late_phase_age,
        spending_active: cli.spending_active,
        spending_middle: cli.spending_middle,
        spending_late: cli.spending_late,
        credits: CreditsToggles {
            bpa: cli.bpa_credit,
            age_amount: cli.age_credit,
            pension_amount: cli.pension_credit,
        },
        splitting: PensionSplitting {
            enabled: cli.pension_splitting,
            optimize: cli.optimize_split,
            step: cli.split_step,
        },
        plan: WithdrawalPlan {
            order: cli.withdrawal_order.into_iter().map(Into::into).collect(),
            caps: SourceCaps {
                fhsa: cli.cap_fhsa,
                rrsp: cli.cap_rrsp,
                lif: cli.cap_lif,
                tfsa: cli.cap_tfsa,
                non_registered: cli.cap_non_registered,
            },
            tfsa_allowed: cli.tfsa_allowed,
            avoid_oas_clawback: cli.avoid_oas_clawback,
            force_lif_minimum: cli.force_lif_minimum,
            lif_mode: cli.lif_mode.into(),
            rrif: RrifGlidePath {
                target_depletion_age: cli.rrif_target_age,
                front_load: cli.rrif_front_load / 100.0,
                min_multiplier: cli.rrif_min_multiplier,
            },
            rrif_start_age: cli.rrif_start_age,
            tfsa_room_opening: cli.tfsa_room,
            tfsa_room_annual: cli.tfsa_room_annual,
            primary_share: cli.primary_share / 100.0,
        },
    };

    Ok(ScheduleRequest {
        inputs,
        balances: RetirementBalances {
            fhsa: cli.fhsa_balance,
            rrsp: cli.rrsp_balance,
            lira: cli.lira_balance,
            tfsa: cli.tfsa_balance,
            non_registered: cli.non_registered_balance,
        },
        start_year,
    })
}

fn validate_household(inputs: &HouseholdTaxInputs) -> InputResult<()> {
    if !YEAR_RANGE.contains(&inputs.year) {
        return Err(InputError::invalid("year", "must be between 1900 and 2200"));
    }
    if inputs.spouse_a.age > MAX_AGE || inputs.spouse_b.age > MAX_AGE {
        return Err(InputError::invalid("age", "must be <= 120"));
    }
    let amounts = [&inputs.spouse_a.incomes, &inputs.spouse_b.incomes]
        .into_iter()
        .flat_map(|i| {
            [
                i.employment,
                i.db_pension,
                i.rrsp,
                i.rrif,
                i.lif,
                i.cpp,
                i.oas,
                i.tfsa,
            ]
        });
    for amount in amounts {
        if !amount.is_finite() || amount < 0.0 {
            return Err(InputError::invalid("incomes", "must be finite amounts >= 0"));
        }
    }
    if inputs.splitting.enabled
        && inputs.splitting.optimize
        && !valid_split_step(inputs.splitting.step)
    {
        return Err(InputError::invalid("splitting.step", "must be >= 1"));
    }
    Ok(())
}

fn valid_split_step(step: f64) -> bool {
    step.is_finite() && step >= MIN_SPLIT_STEP
}

/// Parses `schedule` flags and renders the resulting schedule as pretty JSON.
pub fn run_schedule_command<I, T>(args: I) -> InputResult<String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    let request = build_request(cli)?;
    let response = build_schedule_response(&request);
    Ok(serde_json::to_string_pretty(&response)?)
}

fn router() -> Router {
    Router::new()
        .route(
            "/api/schedule",
            get(schedule_get_handler).post(schedule_post_handler),
        )
        .route("/api/household-tax", post(household_tax_handler))
        .route(
            "/api/sustainable-spending",
            post(sustainable_spending_handler),
        )
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");
    info!("Local access: http://127.0.0.1:{port}/api/schedule");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn schedule_get_handler(
    payload: Result<Query<SchedulePayload>, QueryRejection>,
) -> InputResult<Response> {
    let Query(payload) = payload.map_err(|e| InputError::Payload(e.body_text()))?;
    schedule_handler_impl(payload)
}

async fn schedule_post_handler(
    payload: Result<Json<SchedulePayload>, JsonRejection>,
) -> InputResult<Response> {
    let Json(payload) = payload.map_err(|e| InputError::Payload(e.body_text()))?;
    schedule_handler_impl(payload)
}

fn schedule_handler_impl(payload: SchedulePayload) -> InputResult<Response> {
    let request = request_from_payload(payload)?;
    Ok(json_response(
        StatusCode::OK,
        build_schedule_response(&request),
    ))
}

async fn household_tax_handler(
    payload: Result<Json<HouseholdTaxInputs>, JsonRejection>,
) -> InputResult<Response> {
    let Json(inputs) = payload.map_err(|e| InputError::Payload(e.body_text()))?;
    validate_household(&inputs)?;
    Ok(json_response(StatusCode::OK, compute_household(&inputs)))
}

async fn sustainable_spending_handler(
    payload: Result<Json<SustainablePayload>, JsonRejection>,
) -> InputResult<Response> {
    let Json(payload) = payload.map_err(|e| InputError::Payload(e.body_text()))?;
    let defaults = SpendingSolveConfig::default();
    let config = SpendingSolveConfig {
        search_min: payload.search_min.unwrap_or(defaults.search_min),
        search_max: payload.search_max.unwrap_or(defaults.search_max),
        tolerance: payload.tolerance.unwrap_or(defaults.tolerance),
        max_iterations: payload.max_iterations.unwrap_or(defaults.max_iterations),
    };
    let request = request_from_payload(payload.plan)?;
    let result = solve_sustainable_spending(
        &request.inputs,
        request.balances,
        request.start_year,
        config,
    )?;
    Ok(json_response(StatusCode::OK, result))
}

pub(crate) fn set_no_store(response: &mut Response) {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    set_no_store(&mut response);
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(status, serde_json::json!({ "error": msg }))
}

#[cfg(test)]
fn request_from_json(json: &str) -> InputResult<ScheduleRequest> {
    let payload = serde_json::from_str::<SchedulePayload>(json)
        .map_err(|e| InputError::Payload(e.to_string()))?;
    request_from_payload(payload)
}

macro_rules! overlay {
    ($payload:ident => $cli:ident { $($field:ident),* $(,)? }) => {
        $(
            if let Some(v) = $payload.$field {
                $cli.$field = v;
            }
        )*
    };
}

fn request_from_payload(payload: SchedulePayload) -> InputResult<ScheduleRequest> {
    let mut cli = default_cli_for_api();

    overlay!(payload => cli {
        name_a, age_a, name_b, age_b,
        db_pension_a, db_pension_b, cpp_a, cpp_b, cpp_start_age_a, cpp_start_age_b,
        oas_a, oas_b, oas_start_age_a, oas_start_age_b,
    });
    overlay!(payload => cli {
        end_age, start_year, inflation_rate, pension_index_rate, annual_return,
        middle_phase_age, late_phase_age, spending_active, spending_middle, spending_late,
    });
    overlay!(payload => cli {
        bpa_credit, age_credit, pension_credit, pension_splitting, optimize_split, split_step,
    });
    overlay!(payload => cli {
        fhsa_balance, rrsp_balance, lira_balance, tfsa_balance, non_registered_balance,
    });
    overlay!(payload => cli {
        cap_fhsa, cap_rrsp, cap_lif, cap_tfsa, cap_non_registered,
        tfsa_allowed, avoid_oas_clawback, force_lif_minimum,
        rrif_target_age, rrif_front_load, rrif_min_multiplier, rrif_start_age,
        tfsa_room, tfsa_room_annual, primary_share,
    });

    if payload.baseline_year.is_some() {
        cli.baseline_year = payload.baseline_year;
    }
    if let Some(v) = payload.lif_mode {
        cli.lif_mode = v.into();
    }
    if let Some(order) = payload.withdrawal_order {
        cli.withdrawal_order = order.into_cli()?;
    }

    build_request(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        name_a: "Spouse A".to_string(),
        age_a: 65,
        name_b: "Spouse B".to_string(),
        age_b: 63,
        db_pension_a: 20_000.0,
        db_pension_b: 0.0,
        cpp_a: 12_000.0,
        cpp_b: 8_000.0,
        cpp_start_age_a: 65,
        cpp_start_age_b: 65,
        oas_a: 8_500.0,
        oas_b: 8_500.0,
        oas_start_age_a: 65,
        oas_start_age_b: 65,
        end_age: 95,
        start_year: 2025,
        baseline_year: None,
        inflation_rate: 2.0,
        pension_index_rate: 0.0,
        annual_return: 5.0,
        middle_phase_age: 75,
        late_phase_age: 85,
        spending_active: 80_000.0,
        spending_middle: 70_000.0,
        spending_late: 60_000.0,
        bpa_credit: true,
        age_credit: true,
        pension_credit: true,
        pension_splitting: true,
        optimize_split: true,
        split_step: 100.0,
        fhsa_balance: 0.0,
        rrsp_balance: 600_000.0,
        lira_balance: 150_000.0,
        tfsa_balance: 120_000.0,
        non_registered_balance: 80_000.0,
        withdrawal_order: default_withdrawal_order(),
        cap_fhsa: 0.0,
        cap_rrsp: 0.0,
        cap_lif: 0.0,
        cap_tfsa: 0.0,
        cap_non_registered: 0.0,
        tfsa_allowed: true,
        avoid_oas_clawback: false,
        force_lif_minimum: false,
        lif_mode: CliLifMode::Maximum,
        rrif_target_age: 95,
        rrif_front_load: 0.0,
        rrif_min_multiplier: 1.0,
        rrif_start_age: 71,
        tfsa_room: 7_000.0,
        tfsa_room_annual: 7_000.0,
        primary_share: 50.0,
    }
}

fn build_schedule_response(request: &ScheduleRequest) -> ScheduleResponse {
    let rows = run_withdrawal_schedule(&request.inputs, request.balances, request.start_year);
    ScheduleResponse {
        start_year: request.start_year,
        end_year: rows.last().map(|r| r.year),
        total_tax: rows.iter().map(|r| r.diagnostics.total_tax).sum(),
        total_withdrawals: rows.iter().map(|r| r.withdrawals.total()).sum(),
        shortfall_years: rows
            .iter()
            .filter(|r| r.diagnostics.shortfall_after_tax > 1.0)
            .count(),
        ending_balances: rows
            .last()
            .map(|r| r.ending_balances)
            .unwrap_or(request.balances),
        rows,
    }
}

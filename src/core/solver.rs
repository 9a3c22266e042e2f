use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use super::engine::{plan_years, run_withdrawal_schedule};
use super::types::{PlanInputs, RetirementBalances};

/// Largest per-year after-tax shortfall still treated as meeting the target.
pub const SUSTAINABLE_SHORTFALL: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendingSolveConfig {
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SpendingSolveConfig {
    fn default() -> Self {
        Self {
            search_min: 0.0,
            search_max: 3.0,
            tolerance: 0.001,
            max_iterations: 40,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("search bounds must be finite")]
    NonFiniteBounds,
    #[error("search_min must be >= 0")]
    NegativeLowerBound,
    #[error("search_max must be greater than search_min")]
    EmptyRange,
    #[error("tolerance must be > 0")]
    NonPositiveTolerance,
    #[error("max_iterations must be > 0")]
    NoIterations,
    #[error("end age {end_age} is before the starting age {start_age}")]
    EmptyHorizon { start_age: u32, end_age: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpending {
    pub active: f64,
    pub middle: f64,
    pub late: f64,
}

impl PhaseSpending {
    fn scaled(inputs: &PlanInputs, scale: f64) -> Self {
        Self {
            active: inputs.spending_active * scale,
            middle: inputs.spending_middle * scale,
            late: inputs.spending_late * scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_scale: f64,
    pub worst_shortfall: f64,
    pub sustainable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingSolveResult {
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_scale: Option<f64>,
    pub solved_spending: Option<PhaseSpending>,
    pub worst_shortfall: Option<f64>,
    pub iterations: Vec<SpendingSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    worst_shortfall: f64,
    sustainable: bool,
}

/// Bisects a common multiplier on the three phase targets for the largest scale whose
/// schedule never misses its target.
pub fn solve_sustainable_spending(
    inputs: &PlanInputs,
    balances: RetirementBalances,
    start_year: i32,
    config: SpendingSolveConfig,
) -> Result<SpendingSolveResult, SolveError> {
    validate_config(inputs, config)?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(inputs, balances, start_year, config.search_min);
    let high_eval = evaluate_candidate(inputs, balances, start_year, config.search_max);

    let mut solved_scale = None;
    let mut converged = false;
    let feasible;
    let message;

    if !low_eval.sustainable {
        feasible = false;
        message = "No sustainable spending level found within the search bounds.".to_string();
    } else if high_eval.sustainable {
        solved_scale = Some(config.search_max);
        converged = true;
        feasible = true;
        message = "Upper bound is still sustainable; increase search max for a higher target."
            .to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = evaluate_candidate(inputs, balances, start_year, mid);
            trace!(
                iteration = it,
                scale = mid,
                worst_shortfall = eval.worst_shortfall,
                "spending solver iteration"
            );
            iterations.push(SpendingSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_scale: mid,
                worst_shortfall: eval.worst_shortfall,
                sustainable: eval.sustainable,
            });

            if eval.sustainable {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_scale = Some(lo);
        feasible = true;
        message = if converged {
            "Solved sustainable spending.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate."
                .to_string()
        };
    }

    let worst_shortfall = solved_scale
        .map(|scale| evaluate_candidate(inputs, balances, start_year, scale).worst_shortfall);
    debug!(?solved_scale, feasible, converged, "spending solver finished");

    Ok(SpendingSolveResult {
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_scale,
        solved_spending: solved_scale.map(|scale| PhaseSpending::scaled(inputs, scale)),
        worst_shortfall,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_candidate(
    base_inputs: &PlanInputs,
    balances: RetirementBalances,
    start_year: i32,
    scale: f64,
) -> CandidateEval {
    let mut inputs = base_inputs.clone();
    let spending = PhaseSpending::scaled(base_inputs, scale.max(0.0));
    inputs.spending_active = spending.active;
    inputs.spending_middle = spending.middle;
    inputs.spending_late = spending.late;

    let worst_shortfall = run_withdrawal_schedule(&inputs, balances, start_year)
        .iter()
        .map(|row| row.diagnostics.shortfall_after_tax)
        .fold(0.0, f64::max);
    CandidateEval {
        worst_shortfall,
        sustainable: worst_shortfall <= SUSTAINABLE_SHORTFALL,
    }
}

fn validate_config(inputs: &PlanInputs, config: SpendingSolveConfig) -> Result<(), SolveError> {
    if plan_years(inputs) == 0 {
        return Err(SolveError::EmptyHorizon {
            start_age: inputs.spouse_a.age_at_start,
            end_age: inputs.end_age,
        });
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(SolveError::NonFiniteBounds);
    }
    if config.search_min < 0.0 {
        return Err(SolveError::NegativeLowerBound);
    }
    if config.search_max <= config.search_min {
        return Err(SolveError::EmptyRange);
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(SolveError::NonPositiveTolerance);
    }
    if config.max_iterations == 0 {
        return Err(SolveError::NoIterations);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        CreditsToggles, LifMode, PensionSplitting, RrifGlidePath, SourceCaps, SpouseProfile,
        WithdrawalPlan, WithdrawalSource,
    };

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn spouse(name: &str, age: u32) -> SpouseProfile {
        SpouseProfile {
            name: name.to_string(),
            age_at_start: age,
            db_pension: 0.0,
            cpp: 0.0,
            cpp_start_age: 65,
            oas: 0.0,
            oas_start_age: 65,
        }
    }

    // Ten years of flat spending funded only from a TFSA with no growth or tax.
    fn deterministic_inputs() -> PlanInputs {
        PlanInputs {
            spouse_a: spouse("Alex", 65),
            spouse_b: spouse("Sam", 65),
            end_age: 74,
            baseline_year: 2025,
            inflation: 0.0,
            pension_index_rate: 0.0,
            annual_return: 0.0,
            middle_phase_age: 75,
            late_phase_age: 85,
            spending_active: 10_000.0,
            spending_middle: 10_000.0,
            spending_late: 10_000.0,
            credits: CreditsToggles::default(),
            splitting: PensionSplitting::default(),
            plan: WithdrawalPlan {
                order: vec![WithdrawalSource::Tfsa],
                caps: SourceCaps::default(),
                tfsa_allowed: true,
                avoid_oas_clawback: false,
                force_lif_minimum: false,
                lif_mode: LifMode::Maximum,
                rrif: RrifGlidePath {
                    target_depletion_age: 95,
                    front_load: 0.0,
                    min_multiplier: 1.0,
                },
                rrif_start_age: 71,
                tfsa_room_opening: 0.0,
                tfsa_room_annual: 0.0,
                primary_share: 0.5,
            },
        }
    }

    fn tfsa_balance(amount: f64) -> RetirementBalances {
        RetirementBalances {
            tfsa: amount,
            ..RetirementBalances::default()
        }
    }

    #[test]
    fn sustainable_spending_solver_finds_deterministic_solution() {
        let inputs = deterministic_inputs();
        let config = SpendingSolveConfig {
            tolerance: 1e-4,
            ..SpendingSolveConfig::default()
        };

        let result = solve_sustainable_spending(&inputs, tfsa_balance(100_000.0), 2025, config)
            .expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        let scale = result.solved_scale.expect("scale expected");
        assert_close(scale, 1.0, 2e-4);
        let spending = result.solved_spending.expect("spending expected");
        assert_close(spending.active, 10_000.0 * scale, 1e-9);
        assert!(result.worst_shortfall.expect("shortfall expected") <= SUSTAINABLE_SHORTFALL);
        assert!(!result.iterations.is_empty());
        assert!(result.iterations.len() <= config.max_iterations as usize);
    }

    #[test]
    fn iteration_trace_keeps_bounds_bracketing_the_answer() {
        let inputs = deterministic_inputs();
        let result = solve_sustainable_spending(
            &inputs,
            tfsa_balance(100_000.0),
            2025,
            SpendingSolveConfig::default(),
        )
        .expect("must solve");
        for step in &result.iterations {
            assert!(step.lower_bound <= step.candidate_scale);
            assert!(step.candidate_scale <= step.upper_bound);
            assert_eq!(step.sustainable, step.candidate_scale <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn reports_infeasible_when_lower_bound_already_fails() {
        let inputs = deterministic_inputs();
        let config = SpendingSolveConfig {
            search_min: 0.5,
            ..SpendingSolveConfig::default()
        };
        let result = solve_sustainable_spending(&inputs, tfsa_balance(1_000.0), 2025, config)
            .expect("must return result");
        assert!(!result.feasible);
        assert!(result.solved_scale.is_none());
        assert!(result.solved_spending.is_none());
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn returns_upper_bound_when_it_is_still_sustainable() {
        let inputs = deterministic_inputs();
        let result = solve_sustainable_spending(
            &inputs,
            tfsa_balance(10_000_000.0),
            2025,
            SpendingSolveConfig::default(),
        )
        .expect("must return result");
        assert!(result.feasible);
        assert_eq!(result.solved_scale, Some(3.0));
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn unconverged_search_returns_best_sustainable_estimate() {
        let inputs = deterministic_inputs();
        let config = SpendingSolveConfig {
            tolerance: 1e-9,
            max_iterations: 3,
            ..SpendingSolveConfig::default()
        };
        let result = solve_sustainable_spending(&inputs, tfsa_balance(100_000.0), 2025, config)
            .expect("must return result");
        assert!(result.feasible);
        assert!(!result.converged);
        assert_eq!(result.iterations.len(), 3);
        assert!(result.solved_scale.expect("scale expected") <= 1.0);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let inputs = deterministic_inputs();
        let balances = tfsa_balance(1.0);
        let base = SpendingSolveConfig::default();
        let cases = [
            (
                SpendingSolveConfig {
                    search_max: f64::NAN,
                    ..base
                },
                SolveError::NonFiniteBounds,
            ),
            (
                SpendingSolveConfig {
                    search_min: -1.0,
                    ..base
                },
                SolveError::NegativeLowerBound,
            ),
            (
                SpendingSolveConfig {
                    search_max: 0.0,
                    ..base
                },
                SolveError::EmptyRange,
            ),
            (
                SpendingSolveConfig {
                    tolerance: 0.0,
                    ..base
                },
                SolveError::NonPositiveTolerance,
            ),
            (
                SpendingSolveConfig {
                    max_iterations: 0,
                    ..base
                },
                SolveError::NoIterations,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(
                solve_sustainable_spending(&inputs, balances, 2025, config),
                Err(expected)
            );
        }

        let mut short = deterministic_inputs();
        short.end_age = 60;
        assert_eq!(
            solve_sustainable_spending(&short, balances, 2025, base),
            Err(SolveError::EmptyHorizon {
                start_age: 65,
                end_age: 60,
            })
        );
        assert_eq!(
            SolveError::EmptyRange.to_string(),
            "search_max must be greater than search_min"
        );
    }
}

use chrono::Datelike;
use tracing::debug;

use super::engine::{run_simulation, run_simulation_as_survivor};
use super::types::{
    BreakEvenAnalysis, Cents, ClientProfile, DEFAULT_SPOUSE_DEATH_AGE, EngineError, Perturbation,
    SensitivityCase, SensitivityResult, SimulationResult, StrategyPolicy, WidowAnalysisResult,
    WidowYearDelta,
};

/// Compare a strategy run against the baseline run over the same horizon.
///
/// The break-even year is the start of the longest suffix over which the
/// strategy's heir-adjusted net worth stays at or above the baseline's. A
/// crossing that is later given back does not count.
pub fn analyze_break_even(
    baseline: &SimulationResult,
    strategy: &SimulationResult,
) -> Result<BreakEvenAnalysis, EngineError> {
    if baseline.years.len() != strategy.years.len() {
        return Err(EngineError::MismatchedHorizon(format!(
            "baseline spans {} years but strategy '{}' spans {}",
            baseline.years.len(),
            strategy.strategy,
            strategy.years.len()
        )));
    }
    let Some((last_baseline, last_strategy)) =
        baseline.years.last().zip(strategy.years.last())
    else {
        return Err(EngineError::MismatchedHorizon(
            "projection contains no years".to_string(),
        ));
    };
    for (b, s) in baseline.years.iter().zip(&strategy.years) {
        if b.year != s.year {
            return Err(EngineError::MismatchedHorizon(format!(
                "baseline year {} does not align with strategy year {}",
                b.year, s.year
            )));
        }
    }

    let mut crossover = None;
    for (b, s) in baseline.years.iter().zip(&strategy.years).rev() {
        if s.heir_adjusted_net_worth >= b.heir_adjusted_net_worth {
            crossover = Some((s.year, s.primary_age));
        } else {
            break;
        }
    }

    Ok(BreakEvenAnalysis {
        strategy: strategy.strategy.clone(),
        break_even_year: crossover.map(|(year, _)| year),
        break_even_age: crossover.map(|(_, age)| age),
        final_advantage: last_strategy.heir_adjusted_net_worth
            - last_baseline.heir_adjusted_net_worth,
        total_tax_savings: last_baseline.cumulative_taxes - last_strategy.cumulative_taxes,
    })
}

fn perturbation_label(perturbation: Perturbation) -> String {
    match perturbation {
        Perturbation::ReturnRate { delta_bps } => format!("returnRate{delta_bps:+}bps"),
        Perturbation::HeirTaxRate { delta_bps } => format!("heirTaxRate{delta_bps:+}bps"),
        Perturbation::DeductionInflation { delta_bps } => {
            format!("deductionInflation{delta_bps:+}bps")
        }
    }
}

fn perturbed_profile(profile: &ClientProfile, perturbation: Perturbation) -> ClientProfile {
    let mut perturbed = profile.clone();
    match perturbation {
        Perturbation::ReturnRate { delta_bps } => {
            perturbed.investment_return_bps =
                (profile.investment_return_bps + delta_bps).clamp(-10_000, 20_000);
            perturbed.taxable_return_bps = profile
                .taxable_return_bps
                .map(|bps| (bps + delta_bps).clamp(-10_000, 20_000));
        }
        Perturbation::HeirTaxRate { delta_bps } => {
            perturbed.heir_tax_rate_bps =
                (profile.heir_tax_rate_bps as i32 + delta_bps).clamp(0, 10_000) as u32;
        }
        Perturbation::DeductionInflation { delta_bps } => {
            perturbed.deduction_inflation_bps =
                (profile.deduction_inflation_bps as i32 + delta_bps).clamp(0, 2_000) as u32;
        }
    }
    perturbed
}

/// The fixed perturbation grid applied to every sensitivity run.
fn perturbations() -> [Perturbation; 8] {
    [
        Perturbation::ReturnRate { delta_bps: -200 },
        Perturbation::ReturnRate { delta_bps: -100 },
        Perturbation::ReturnRate { delta_bps: 100 },
        Perturbation::ReturnRate { delta_bps: 200 },
        Perturbation::HeirTaxRate { delta_bps: -500 },
        Perturbation::HeirTaxRate { delta_bps: 500 },
        Perturbation::DeductionInflation { delta_bps: -100 },
        Perturbation::DeductionInflation { delta_bps: 100 },
    ]
}

/// Re-run one strategy under each perturbation and report how its headline
/// numbers move relative to the unperturbed run.
pub fn run_sensitivity_analysis(
    profile: &ClientProfile,
    policy: &StrategyPolicy,
    start_year: i32,
    end_year: i32,
) -> Result<SensitivityResult, EngineError> {
    let baseline = run_simulation(profile, &StrategyPolicy::baseline(), start_year, end_year)?;
    let strategy = run_simulation(profile, policy, start_year, end_year)?;
    let base = analyze_break_even(&baseline, &strategy)?;

    let mut cases = Vec::with_capacity(8);
    for perturbation in perturbations() {
        let perturbed = perturbed_profile(profile, perturbation);
        let perturbed_baseline =
            run_simulation(&perturbed, &StrategyPolicy::baseline(), start_year, end_year)?;
        let perturbed_strategy = run_simulation(&perturbed, policy, start_year, end_year)?;
        let outcome = analyze_break_even(&perturbed_baseline, &perturbed_strategy)?;
        cases.push(SensitivityCase {
            label: perturbation_label(perturbation),
            perturbation,
            tax_savings: outcome.total_tax_savings,
            tax_savings_delta: outcome.total_tax_savings - base.total_tax_savings,
            final_advantage: outcome.final_advantage,
            final_advantage_delta: outcome.final_advantage - base.final_advantage,
            break_even_age: outcome.break_even_age,
        });
    }

    debug!(strategy = %policy.name, cases = cases.len(), "sensitivity analysis complete");

    Ok(SensitivityResult {
        strategy: policy.name.clone(),
        base_tax_savings: base.total_tax_savings,
        base_final_advantage: base.final_advantage,
        base_break_even_age: base.break_even_age,
        cases,
    })
}

/// Quantify the filing-status penalty a surviving spouse faces once the
/// household drops from joint to single brackets. Both legs run the
/// no-conversion baseline policy; the only difference is the filing switch
/// in the year after the modeled death.
pub fn analyze_widow_penalty(
    profile: &ClientProfile,
    start_year: i32,
    end_year: i32,
) -> Result<WidowAnalysisResult, EngineError> {
    if !profile.filing_status.is_joint() {
        return Err(EngineError::IneligibleAnalysis(
            "survivor analysis requires a married-filing-jointly household".to_string(),
        ));
    }
    let Some(spouse_dob) = profile.spouse_date_of_birth else {
        return Err(EngineError::IneligibleAnalysis(
            "survivor analysis requires the spouse's date of birth".to_string(),
        ));
    };

    let spouse_death_age = profile.spouse_death_age.unwrap_or(DEFAULT_SPOUSE_DEATH_AGE);
    let death_year = spouse_dob.year() + spouse_death_age as i32;
    let first_survivor_year = death_year + 1;
    if death_year < start_year || first_survivor_year > end_year {
        return Err(EngineError::IneligibleAnalysis(format!(
            "modeled death in {death_year} leaves no survivor years inside \
             {start_year}..={end_year}"
        )));
    }

    let policy = StrategyPolicy::baseline();
    let married = run_simulation(profile, &policy, start_year, end_year)?;
    let survivor =
        run_simulation_as_survivor(profile, &policy, start_year, end_year, first_survivor_year)?;

    let mut years = Vec::new();
    let mut total_penalty: Cents = 0;
    for (m, s) in married.years.iter().zip(&survivor.years) {
        if s.year < first_survivor_year {
            continue;
        }
        let penalty = s.tax - m.tax;
        total_penalty += penalty;
        years.push(WidowYearDelta {
            year: s.year,
            survivor_age: s.primary_age,
            married_tax: m.tax,
            survivor_tax: s.tax,
            penalty,
        });
    }

    let average_annual_penalty = if years.is_empty() {
        0
    } else {
        total_penalty / years.len() as Cents
    };

    Ok(WidowAnalysisResult {
        spouse_death_age,
        death_year,
        first_survivor_year,
        years,
        total_penalty,
        average_annual_penalty,
    })
}

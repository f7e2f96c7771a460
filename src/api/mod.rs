use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{
    BreakEvenAnalysis, Cents, ClientProfile, EngineError, MultiStrategyResult, SensitivityResult,
    WidowAnalysisResult, aca_subsidy_cutoff, analyze_break_even, analyze_widow_penalty, run_all,
    run_sensitivity_analysis,
};

fn default_start_year() -> i32 {
    2025
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRequest {
    pub profile: ClientProfile,
    #[serde(default = "default_start_year")]
    pub start_year: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResponse {
    pub start_year: i32,
    pub end_year: i32,
    /// 400% of the household's federal poverty level, the income above which
    /// ACA premium subsidies are lost. Reported for advisor reference.
    pub aca_subsidy_cutoff: Cents,
    pub results: MultiStrategyResult,
    pub break_even: Vec<BreakEvenAnalysis>,
    pub sensitivity: Option<Vec<SensitivityResult>>,
    pub widow_penalty: Option<WidowAnalysisResult>,
}

impl ProjectionRequest {
    /// The projection ends in the first year the primary reaches the
    /// configured end age.
    fn end_year(&self) -> i32 {
        self.start_year
            + (self.profile.horizon_end_age - self.profile.horizon_start_age) as i32
    }
}

/// Run the full decision-support pipeline for one request: every strategy
/// projection, break-even against baseline, and the optional derived
/// analyses.
pub fn handle_projection(request: &ProjectionRequest) -> Result<ProjectionResponse, EngineError> {
    let profile = &request.profile;
    profile.validate()?;

    let derived_age = profile.age_in_year(request.start_year);
    if derived_age != profile.horizon_start_age as i32 {
        return Err(EngineError::InvalidProfile(format!(
            "primary is {derived_age} in {}, but horizonStartAge is {}",
            request.start_year, profile.horizon_start_age
        )));
    }

    let start_year = request.start_year;
    let end_year = request.end_year();
    info!(
        start_year,
        end_year,
        strategies = profile.strategies.len(),
        "running projection"
    );

    let results = run_all(profile, start_year, end_year)?;

    let mut break_even = Vec::with_capacity(results.strategies.len());
    for strategy in &results.strategies {
        break_even.push(analyze_break_even(&results.baseline, strategy)?);
    }

    let surviving: Vec<&str> = results
        .strategies
        .iter()
        .map(|s| s.strategy.as_str())
        .collect();
    let sensitivity = if profile.enable_sensitivity {
        let mut per_strategy = Vec::new();
        for policy in &profile.strategies {
            if !surviving.contains(&policy.name.as_str()) {
                continue;
            }
            per_strategy.push(run_sensitivity_analysis(
                profile, policy, start_year, end_year,
            )?);
        }
        Some(per_strategy)
    } else {
        None
    };

    let widow_penalty = if profile.enable_widow_analysis {
        match analyze_widow_penalty(profile, start_year, end_year) {
            Ok(result) => Some(result),
            Err(EngineError::IneligibleAnalysis(reason)) => {
                debug!(%reason, "skipping survivor analysis");
                None
            }
            Err(err) => return Err(err),
        }
    } else {
        None
    };

    Ok(ProjectionResponse {
        start_year,
        end_year,
        aca_subsidy_cutoff: aca_subsidy_cutoff(profile.household_size, &profile.state),
        results,
        break_even,
        sensitivity,
        widow_penalty,
    })
}

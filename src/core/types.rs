use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::tax;

/// All monetary values in the engine are integer cents.
pub type Cents = i64;

pub const MAX_HORIZON_YEARS: u32 = 120;
pub const MAX_STRATEGIES: usize = 8;
pub const DEFAULT_SPOUSE_DEATH_AGE: u32 = 82;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl FilingStatus {
    pub fn is_joint(self) -> bool {
        self == FilingStatus::MarriedFilingJointly
    }

    pub fn is_married(self) -> bool {
        matches!(
            self,
            FilingStatus::MarriedFilingJointly | FilingStatus::MarriedFilingSeparately
        )
    }
}

/// How the strategy's base conversion amount is computed each active year.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionRule {
    #[default]
    None,
    AnnualAmount {
        amount: Cents,
    },
    PercentOfBalance {
        #[serde(rename = "rateBps")]
        rate_bps: u32,
    },
}

/// Ceiling applied to the conversion after the base amount is computed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionConstraint {
    #[default]
    Unconstrained,
    FixedCeiling {
        ceiling: Cents,
    },
    /// Fill ordinary income up to the top of the bracket with this rate.
    BracketCeiling {
        #[serde(rename = "rateBps")]
        rate_bps: u32,
    },
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxPaymentSource {
    Conversion,
    #[default]
    TaxableAccount,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WithdrawalRule {
    #[default]
    None,
    FixedAnnual {
        amount: Cents,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPolicy {
    pub name: String,
    #[serde(default)]
    pub conversion: ConversionRule,
    #[serde(default)]
    pub constraint: ConversionConstraint,
    #[serde(default)]
    pub tax_payment: TaxPaymentSource,
    #[serde(default)]
    pub withdrawal: WithdrawalRule,
    #[serde(default)]
    pub defer_years: u32,
    #[serde(default)]
    pub duration_years: Option<u32>,
}

impl StrategyPolicy {
    /// The no-op policy: convert nothing, withdraw nothing.
    pub fn baseline() -> Self {
        Self {
            name: "baseline".to_string(),
            conversion: ConversionRule::None,
            constraint: ConversionConstraint::Unconstrained,
            tax_payment: TaxPaymentSource::TaxableAccount,
            withdrawal: WithdrawalRule::None,
            defer_years: 0,
            duration_years: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidProfile(
                "strategy name must not be empty".to_string(),
            ));
        }
        match self.conversion {
            ConversionRule::None => {}
            ConversionRule::AnnualAmount { amount } => {
                if amount < 0 {
                    return Err(EngineError::InvalidProfile(format!(
                        "strategy '{}': conversion amount must be non-negative",
                        self.name
                    )));
                }
            }
            ConversionRule::PercentOfBalance { rate_bps } => {
                if rate_bps > 10_000 {
                    return Err(EngineError::InvalidProfile(format!(
                        "strategy '{}': conversion percent must be at most 10000 bps",
                        self.name
                    )));
                }
            }
        }
        match self.constraint {
            ConversionConstraint::Unconstrained => {}
            ConversionConstraint::FixedCeiling { ceiling } => {
                if ceiling < 0 {
                    return Err(EngineError::InvalidProfile(format!(
                        "strategy '{}': conversion ceiling must be non-negative",
                        self.name
                    )));
                }
            }
            ConversionConstraint::BracketCeiling { rate_bps } => {
                if !tax::is_bounded_bracket(rate_bps) {
                    return Err(EngineError::InvalidProfile(format!(
                        "strategy '{}': {rate_bps} bps is not a bounded bracket rate",
                        self.name
                    )));
                }
            }
        }
        if let WithdrawalRule::FixedAnnual { amount } = self.withdrawal {
            if amount < 0 {
                return Err(EngineError::InvalidProfile(format!(
                    "strategy '{}': withdrawal amount must be non-negative",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalances {
    #[serde(default)]
    pub traditional: Cents,
    #[serde(default)]
    pub roth: Cents,
    #[serde(default)]
    pub taxable: Cents,
    #[serde(default)]
    pub other_retirement: Cents,
}

impl AccountBalances {
    pub fn total(&self) -> Cents {
        self.traditional + self.roth + self.taxable + self.other_retirement
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub spouse_date_of_birth: Option<NaiveDate>,
    pub filing_status: FilingStatus,
    pub state: String,
    #[serde(default = "default_household_size")]
    pub household_size: u32,
    pub balances: AccountBalances,
    pub investment_return_bps: i32,
    /// Defaults to the investment return when absent.
    #[serde(default)]
    pub taxable_return_bps: Option<i32>,
    #[serde(default)]
    pub other_income: Cents,
    #[serde(default = "default_deduction_inflation_bps")]
    pub deduction_inflation_bps: u32,
    #[serde(default)]
    pub heir_tax_rate_bps: u32,
    #[serde(default)]
    pub strategies: Vec<StrategyPolicy>,
    pub horizon_start_age: u32,
    pub horizon_end_age: u32,
    #[serde(default)]
    pub spouse_death_age: Option<u32>,
    #[serde(default)]
    pub enable_sensitivity: bool,
    #[serde(default)]
    pub enable_widow_analysis: bool,
}

fn default_household_size() -> u32 {
    1
}

fn default_deduction_inflation_bps() -> u32 {
    tax::DEFAULT_DEDUCTION_INFLATION_BPS
}

impl ClientProfile {
    pub fn taxable_return_bps(&self) -> i32 {
        self.taxable_return_bps.unwrap_or(self.investment_return_bps)
    }

    /// Age attained during the given calendar year, derived from the date of
    /// birth only, never from wall-clock time.
    pub fn age_in_year(&self, year: i32) -> i32 {
        year - self.date_of_birth.year()
    }

    pub fn spouse_age_in_year(&self, year: i32) -> Option<i32> {
        self.spouse_date_of_birth.map(|dob| year - dob.year())
    }

    /// Profile-level validation. Strategy policies are validated separately
    /// so a bad variant fails alone instead of poisoning the baseline.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.state.len() != 2 || !self.state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EngineError::InvalidProfile(format!(
                "state must be a two-letter code, got '{}'",
                self.state
            )));
        }
        if self.household_size == 0 {
            return Err(EngineError::InvalidProfile(
                "household size must be at least 1".to_string(),
            ));
        }
        for (label, value) in [
            ("traditional", self.balances.traditional),
            ("roth", self.balances.roth),
            ("taxable", self.balances.taxable),
            ("otherRetirement", self.balances.other_retirement),
            ("otherIncome", self.other_income),
        ] {
            if value < 0 {
                return Err(EngineError::InvalidProfile(format!(
                    "{label} must be non-negative, got {value}"
                )));
            }
        }
        for (label, bps) in [
            ("investmentReturnBps", self.investment_return_bps),
            ("taxableReturnBps", self.taxable_return_bps()),
        ] {
            if !(-10_000..=20_000).contains(&bps) {
                return Err(EngineError::InvalidProfile(format!(
                    "{label} must be between -10000 and 20000, got {bps}"
                )));
            }
        }
        if self.heir_tax_rate_bps > 10_000 {
            return Err(EngineError::InvalidProfile(format!(
                "heirTaxRateBps must be at most 10000, got {}",
                self.heir_tax_rate_bps
            )));
        }
        if self.deduction_inflation_bps > 2_000 {
            return Err(EngineError::InvalidProfile(format!(
                "deductionInflationBps must be at most 2000, got {}",
                self.deduction_inflation_bps
            )));
        }
        if self.horizon_end_age < self.horizon_start_age {
            return Err(EngineError::InvalidProfile(format!(
                "horizonEndAge {} precedes horizonStartAge {}",
                self.horizon_end_age, self.horizon_start_age
            )));
        }
        if self.horizon_end_age > 130 {
            return Err(EngineError::InvalidProfile(format!(
                "horizonEndAge must be at most 130, got {}",
                self.horizon_end_age
            )));
        }
        if self.filing_status.is_married() && self.spouse_date_of_birth.is_none() {
            return Err(EngineError::InvalidProfile(
                "married filing status requires spouseDateOfBirth".to_string(),
            ));
        }
        if let Some(age) = self.spouse_death_age {
            if !(1..=120).contains(&age) {
                return Err(EngineError::InvalidProfile(format!(
                    "spouseDeathAge must be between 1 and 120, got {age}"
                )));
            }
        }
        if self.strategies.len() > MAX_STRATEGIES {
            return Err(EngineError::InvalidProfile(format!(
                "at most {MAX_STRATEGIES} strategies are supported, got {}",
                self.strategies.len()
            )));
        }
        for (idx, strategy) in self.strategies.iter().enumerate() {
            if self.strategies[..idx].iter().any(|s| s.name == strategy.name) {
                return Err(EngineError::InvalidProfile(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
        }
        Ok(())
    }
}

/// One projected year. Sequences are emitted in strictly increasing year
/// order and never reordered.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: i32,
    pub primary_age: u32,
    pub spouse_age: Option<u32>,
    pub traditional: Cents,
    pub roth: Cents,
    pub taxable: Cents,
    pub other_retirement: Cents,
    pub rmd: Cents,
    pub conversion: Cents,
    pub ordinary_income: Cents,
    pub taxable_income: Cents,
    pub tax: Cents,
    pub shortfall: Cents,
    pub cumulative_taxes: Cents,
    pub cumulative_conversions: Cents,
    pub net_worth: Cents,
    pub heir_adjusted_net_worth: Cents,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub final_balances: AccountBalances,
    pub total_taxes: Cents,
    pub total_conversions: Cents,
    pub final_net_worth: Cents,
    pub net_to_heirs: Cents,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub strategy: String,
    pub years: Vec<YearlyResult>,
    pub summary: SimulationSummary,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiStrategyResult {
    pub baseline: SimulationResult,
    pub strategies: Vec<SimulationResult>,
    pub failures: Vec<StrategyFailure>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakEvenAnalysis {
    pub strategy: String,
    pub break_even_year: Option<i32>,
    pub break_even_age: Option<u32>,
    pub final_advantage: Cents,
    pub total_tax_savings: Cents,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Perturbation {
    ReturnRate {
        #[serde(rename = "deltaBps")]
        delta_bps: i32,
    },
    HeirTaxRate {
        #[serde(rename = "deltaBps")]
        delta_bps: i32,
    },
    DeductionInflation {
        #[serde(rename = "deltaBps")]
        delta_bps: i32,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityCase {
    pub label: String,
    pub perturbation: Perturbation,
    pub tax_savings: Cents,
    pub tax_savings_delta: Cents,
    pub final_advantage: Cents,
    pub final_advantage_delta: Cents,
    pub break_even_age: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityResult {
    pub strategy: String,
    pub base_tax_savings: Cents,
    pub base_final_advantage: Cents,
    pub base_break_even_age: Option<u32>,
    pub cases: Vec<SensitivityCase>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidowYearDelta {
    pub year: i32,
    pub survivor_age: u32,
    pub married_tax: Cents,
    pub survivor_tax: Cents,
    pub penalty: Cents,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidowAnalysisResult {
    pub spouse_death_age: u32,
    pub death_year: i32,
    pub first_survivor_year: i32,
    pub years: Vec<WidowYearDelta>,
    pub total_penalty: Cents,
    pub average_annual_penalty: Cents,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    #[error("mismatched horizon: {0}")]
    MismatchedHorizon(String),
    #[error("analysis not eligible: {0}")]
    IneligibleAnalysis(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> ClientProfile {
        ClientProfile {
            date_of_birth: NaiveDate::from_ymd_opt(1965, 6, 15).expect("valid date"),
            spouse_date_of_birth: None,
            filing_status: FilingStatus::Single,
            state: "CO".to_string(),
            household_size: 1,
            balances: AccountBalances {
                traditional: 50_000_000,
                roth: 0,
                taxable: 0,
                other_retirement: 0,
            },
            investment_return_bps: 500,
            taxable_return_bps: None,
            other_income: 0,
            deduction_inflation_bps: 250,
            heir_tax_rate_bps: 2_400,
            strategies: Vec::new(),
            horizon_start_age: 60,
            horizon_end_age: 80,
            spouse_death_age: None,
            enable_sensitivity: false,
            enable_widow_analysis: false,
        }
    }

    #[test]
    fn valid_profile_passes_validation() {
        sample_profile().validate().expect("profile must validate");
    }

    #[test]
    fn negative_balance_is_rejected() {
        let mut profile = sample_profile();
        profile.balances.roth = -1;
        let err = profile.validate().expect_err("must reject negative balance");
        assert!(matches!(err, EngineError::InvalidProfile(_)));
    }

    #[test]
    fn married_status_requires_spouse_birth_date() {
        let mut profile = sample_profile();
        profile.filing_status = FilingStatus::MarriedFilingJointly;
        let err = profile.validate().expect_err("must require spouse dob");
        assert!(err.to_string().contains("spouseDateOfBirth"));
    }

    #[test]
    fn taxable_return_defaults_to_investment_return() {
        let mut profile = sample_profile();
        profile.taxable_return_bps = None;
        assert_eq!(profile.taxable_return_bps(), 500);
        profile.taxable_return_bps = Some(300);
        assert_eq!(profile.taxable_return_bps(), 300);
    }

    #[test]
    fn duplicate_strategy_names_are_rejected() {
        let mut profile = sample_profile();
        let mut a = StrategyPolicy::baseline();
        a.name = "fill-22".to_string();
        profile.strategies = vec![a.clone(), a];
        let err = profile.validate().expect_err("must reject duplicates");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn bracket_ceiling_must_target_bounded_bracket() {
        let mut strategy = StrategyPolicy::baseline();
        strategy.name = "fill-top".to_string();
        strategy.conversion = ConversionRule::AnnualAmount { amount: 1_000_000 };
        strategy.constraint = ConversionConstraint::BracketCeiling { rate_bps: 3_700 };
        let err = strategy.validate().expect_err("top bracket has no ceiling");
        assert!(matches!(err, EngineError::InvalidProfile(_)));
    }

    #[test]
    fn strategy_policy_parses_from_sparse_json() {
        let json = r#"{
            "name": "fill-22",
            "conversion": { "type": "annual_amount", "amount": 5000000 },
            "constraint": { "type": "bracket_ceiling", "rateBps": 2200 },
            "taxPayment": "conversion"
        }"#;
        let policy: StrategyPolicy = serde_json::from_str(json).expect("policy must parse");
        assert_eq!(
            policy.conversion,
            ConversionRule::AnnualAmount { amount: 5_000_000 }
        );
        assert_eq!(
            policy.constraint,
            ConversionConstraint::BracketCeiling { rate_bps: 2_200 }
        );
        assert_eq!(policy.tax_payment, TaxPaymentSource::Conversion);
        assert_eq!(policy.withdrawal, WithdrawalRule::None);
        assert_eq!(policy.defer_years, 0);
    }

    #[test]
    fn age_is_derived_from_calendar_year_only() {
        let profile = sample_profile();
        assert_eq!(profile.age_in_year(2025), 60);
        assert_eq!(profile.age_in_year(2045), 80);
    }
}

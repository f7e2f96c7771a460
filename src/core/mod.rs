mod analysis;
mod engine;
mod tax;
mod types;

pub use analysis::{analyze_break_even, analyze_widow_penalty, run_sensitivity_analysis};
pub use engine::{run_all, run_simulation};
pub use tax::{aca_subsidy_cutoff, federal_poverty_level, standard_deduction, tax_for_income};
pub use types::{
    AccountBalances, BreakEvenAnalysis, Cents, ClientProfile, ConversionConstraint,
    ConversionRule, EngineError, FilingStatus, MultiStrategyResult, Perturbation,
    SensitivityCase, SensitivityResult, SimulationResult, SimulationSummary, StrategyFailure,
    StrategyPolicy, TaxPaymentSource, WidowAnalysisResult, WidowYearDelta, WithdrawalRule,
    YearlyResult,
};

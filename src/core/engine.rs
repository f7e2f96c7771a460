use tracing::{debug, warn};

use super::tax;
use super::types::{
    AccountBalances, Cents, ClientProfile, ConversionConstraint, ConversionRule, EngineError,
    FilingStatus, MAX_HORIZON_YEARS, MultiStrategyResult, SimulationResult, SimulationSummary,
    StrategyFailure, StrategyPolicy, TaxPaymentSource, WithdrawalRule, YearlyResult,
};

/// Mutable per-run snapshot. Owned by one simulation run and discarded when
/// the run returns; every emitted `YearlyResult` is an independent copy.
#[derive(Debug, Clone)]
struct YearState {
    balances: AccountBalances,
    cumulative_taxes: Cents,
    cumulative_conversions: Cents,
}

fn grow(balance: Cents, rate_bps: i32) -> Cents {
    let grown = balance as i128 * (10_000 + rate_bps as i128) / 10_000;
    grown.max(0) as Cents
}

fn heir_adjusted_net_worth(balances: &AccountBalances, heir_tax_rate_bps: u32) -> Cents {
    let deferred = balances.traditional as i128 + balances.other_retirement as i128;
    let after_heir_tax = deferred * (10_000 - heir_tax_rate_bps as i128) / 10_000;
    (balances.roth as i128 + balances.taxable as i128 + after_heir_tax) as Cents
}

fn conversion_is_active(policy: &StrategyPolicy, year_index: u32) -> bool {
    if policy.conversion == ConversionRule::None || year_index < policy.defer_years {
        return false;
    }
    match policy.duration_years {
        Some(duration) => year_index < policy.defer_years + duration,
        None => true,
    }
}

fn requested_conversion(policy: &StrategyPolicy, traditional: Cents) -> Cents {
    match policy.conversion {
        ConversionRule::None => 0,
        ConversionRule::AnnualAmount { amount } => amount,
        ConversionRule::PercentOfBalance { rate_bps } => {
            (traditional as i128 * rate_bps as i128 / 10_000) as Cents
        }
    }
}

/// Ceiling on this year's conversion. Bracket-fill headroom is measured in
/// ordinary-income terms: bracket top plus the deduction, minus income
/// already booked before the conversion.
fn conversion_ceiling(
    policy: &StrategyPolicy,
    status: FilingStatus,
    deduction: Cents,
    ordinary_before_conversion: Cents,
) -> Option<Cents> {
    match policy.constraint {
        ConversionConstraint::Unconstrained => None,
        ConversionConstraint::FixedCeiling { ceiling } => Some(ceiling),
        ConversionConstraint::BracketCeiling { rate_bps } => {
            let top = tax::bracket_ceiling(status, rate_bps)?;
            Some((top + deduction - ordinary_before_conversion).max(0))
        }
    }
}

/// Advance one calendar year: growth, RMD, conversion, tax, payment,
/// withdrawal. Balances are clamped at zero; anything unpayable is recorded
/// as shortfall instead.
#[allow(clippy::too_many_arguments)]
fn step_year(
    profile: &ClientProfile,
    policy: &StrategyPolicy,
    state: &mut YearState,
    year: i32,
    year_index: u32,
    status: FilingStatus,
    primary_age: u32,
    spouse_age: Option<u32>,
) -> YearlyResult {
    let balances = &mut state.balances;

    balances.traditional = grow(balances.traditional, profile.investment_return_bps);
    balances.roth = grow(balances.roth, profile.investment_return_bps);
    balances.other_retirement = grow(balances.other_retirement, profile.investment_return_bps);
    balances.taxable = grow(balances.taxable, profile.taxable_return_bps());

    let rmd = tax::rmd_amount(primary_age, balances.traditional);
    balances.traditional -= rmd;
    balances.taxable += rmd;

    let deduction = tax::standard_deduction_with_inflation(
        status,
        primary_age,
        spouse_age,
        year,
        profile.deduction_inflation_bps,
    );
    let ordinary_before_conversion = rmd + profile.other_income;

    let conversion = if conversion_is_active(policy, year_index) {
        let mut amount = requested_conversion(policy, balances.traditional);
        if let Some(ceiling) =
            conversion_ceiling(policy, status, deduction, ordinary_before_conversion)
        {
            amount = amount.min(ceiling);
        }
        amount.clamp(0, balances.traditional)
    } else {
        0
    };
    balances.traditional -= conversion;

    let ordinary_income = ordinary_before_conversion + conversion;
    let taxable_income = (ordinary_income - deduction).max(0);
    let tax_due = tax::tax_for_income(status, taxable_income);

    // The portion of the conversion that survives withholding lands in Roth.
    let mut roth_credit = conversion;
    let mut unpaid = tax_due;
    match policy.tax_payment {
        TaxPaymentSource::Conversion => {
            let withheld = roth_credit.min(unpaid);
            roth_credit -= withheld;
            unpaid -= withheld;
            let from_taxable = balances.taxable.min(unpaid);
            balances.taxable -= from_taxable;
            unpaid -= from_taxable;
        }
        TaxPaymentSource::TaxableAccount => {
            let from_taxable = balances.taxable.min(unpaid);
            balances.taxable -= from_taxable;
            unpaid -= from_taxable;
            let withheld = roth_credit.min(unpaid);
            roth_credit -= withheld;
            unpaid -= withheld;
        }
    }
    balances.roth += roth_credit;
    let mut shortfall = unpaid;

    if let WithdrawalRule::FixedAnnual { amount } = policy.withdrawal {
        let withdrawn = balances.taxable.min(amount.max(0));
        balances.taxable -= withdrawn;
        shortfall += amount.max(0) - withdrawn;
    }

    state.cumulative_taxes += tax_due;
    state.cumulative_conversions += conversion;

    YearlyResult {
        year,
        primary_age,
        spouse_age,
        traditional: balances.traditional,
        roth: balances.roth,
        taxable: balances.taxable,
        other_retirement: balances.other_retirement,
        rmd,
        conversion,
        ordinary_income,
        taxable_income,
        tax: tax_due,
        shortfall,
        cumulative_taxes: state.cumulative_taxes,
        cumulative_conversions: state.cumulative_conversions,
        net_worth: balances.total(),
        heir_adjusted_net_worth: heir_adjusted_net_worth(balances, profile.heir_tax_rate_bps),
    }
}

fn validate_horizon(start_year: i32, end_year: i32) -> Result<(), EngineError> {
    if end_year < start_year {
        return Err(EngineError::InvalidHorizon(format!(
            "endYear {end_year} precedes startYear {start_year}"
        )));
    }
    let span = (end_year - start_year) as u32 + 1;
    if span > MAX_HORIZON_YEARS {
        return Err(EngineError::InvalidHorizon(format!(
            "horizon of {span} years exceeds the {MAX_HORIZON_YEARS}-year bound"
        )));
    }
    Ok(())
}

/// Run one strategy over the inclusive `[start_year, end_year]` horizon.
/// Pure: identical inputs always produce bit-identical output sequences.
pub fn run_simulation(
    profile: &ClientProfile,
    policy: &StrategyPolicy,
    start_year: i32,
    end_year: i32,
) -> Result<SimulationResult, EngineError> {
    run_simulation_inner(profile, policy, start_year, end_year, None)
}

/// Same projection, but the household files single from
/// `survivor_from_year` onward. Used by the widow-penalty analysis.
pub(crate) fn run_simulation_as_survivor(
    profile: &ClientProfile,
    policy: &StrategyPolicy,
    start_year: i32,
    end_year: i32,
    survivor_from_year: i32,
) -> Result<SimulationResult, EngineError> {
    run_simulation_inner(profile, policy, start_year, end_year, Some(survivor_from_year))
}

fn run_simulation_inner(
    profile: &ClientProfile,
    policy: &StrategyPolicy,
    start_year: i32,
    end_year: i32,
    survivor_from_year: Option<i32>,
) -> Result<SimulationResult, EngineError> {
    profile.validate()?;
    policy.validate()?;
    validate_horizon(start_year, end_year)?;

    if profile.age_in_year(start_year) < 0 {
        return Err(EngineError::InvalidProfile(format!(
            "primary is born after the projection start year {start_year}"
        )));
    }

    let mut state = YearState {
        balances: profile.balances,
        cumulative_taxes: 0,
        cumulative_conversions: 0,
    };

    let span = (end_year - start_year) as usize + 1;
    let mut years = Vec::with_capacity(span);
    for (year_index, year) in (start_year..=end_year).enumerate() {
        let survived = survivor_from_year.is_some_and(|from| year >= from);
        let status = if survived {
            FilingStatus::Single
        } else {
            profile.filing_status
        };
        let spouse_age = if survived {
            None
        } else {
            profile.spouse_age_in_year(year).map(|age| age.max(0) as u32)
        };
        years.push(step_year(
            profile,
            policy,
            &mut state,
            year,
            year_index as u32,
            status,
            profile.age_in_year(year) as u32,
            spouse_age,
        ));
    }

    let summary = SimulationSummary {
        final_balances: state.balances,
        total_taxes: state.cumulative_taxes,
        total_conversions: state.cumulative_conversions,
        final_net_worth: state.balances.total(),
        net_to_heirs: heir_adjusted_net_worth(&state.balances, profile.heir_tax_rate_bps),
    };

    debug!(
        strategy = %policy.name,
        years = years.len(),
        total_taxes = summary.total_taxes,
        "simulation complete"
    );

    Ok(SimulationResult {
        strategy: policy.name.clone(),
        years,
        summary,
    })
}

/// Run the baseline plus every configured strategy over identical inputs.
/// A failing variant is reported in `failures` and never aborts its siblings.
pub fn run_all(
    profile: &ClientProfile,
    start_year: i32,
    end_year: i32,
) -> Result<MultiStrategyResult, EngineError> {
    let baseline = run_simulation(profile, &StrategyPolicy::baseline(), start_year, end_year)?;

    let mut strategies = Vec::with_capacity(profile.strategies.len());
    let mut failures = Vec::new();
    for policy in &profile.strategies {
        match run_simulation(profile, policy, start_year, end_year) {
            Ok(result) => strategies.push(result),
            Err(err) => {
                warn!(strategy = %policy.name, error = %err, "strategy variant failed");
                failures.push(StrategyFailure {
                    strategy: policy.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(MultiStrategyResult {
        baseline,
        strategies,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn single_profile() -> ClientProfile {
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

    fn fixed_conversion(name: &str, amount: Cents) -> StrategyPolicy {
        StrategyPolicy {
            name: name.to_string(),
            conversion: ConversionRule::AnnualAmount { amount },
            constraint: ConversionConstraint::Unconstrained,
            tax_payment: TaxPaymentSource::Conversion,
            withdrawal: WithdrawalRule::None,
            defer_years: 0,
            duration_years: None,
        }
    }

    #[test]
    fn baseline_scenario_grows_until_rmd_age_then_distributes() {
        // Single filer, 60, $500k traditional, 5% growth, 2025-2045.
        let profile = single_profile();
        let result =
            run_simulation(&profile, &StrategyPolicy::baseline(), 2025, 2045).expect("must run");

        assert_eq!(result.years.len(), 21);
        let mut previous_traditional = profile.balances.traditional;
        for row in &result.years {
            if row.primary_age < tax::RMD_START_AGE {
                assert_eq!(row.rmd, 0, "no distribution before 73");
                assert_eq!(row.taxable_income, 0, "no taxable income before 73");
                assert_eq!(row.tax, 0);
                assert!(row.traditional > previous_traditional, "pure growth phase");
            } else {
                assert!(row.rmd > 0, "RMD must be forced at {}", row.primary_age);
                assert!(row.taxable_income > 0);
                assert!(row.tax > 0);
                // The distribution lands in the taxable account.
                assert!(row.taxable > 0);
            }
            previous_traditional = row.traditional;
        }
    }

    #[test]
    fn baseline_matches_hand_computed_growth_oracle() {
        let mut profile = single_profile();
        profile.horizon_end_age = 65;
        let result =
            run_simulation(&profile, &StrategyPolicy::baseline(), 2025, 2030).expect("must run");

        let mut expected = profile.balances.traditional;
        for row in &result.years {
            expected = (expected as i128 * 10_500 / 10_000) as Cents;
            assert_eq!(row.traditional, expected);
            assert_eq!(row.net_worth, expected);
        }
    }

    #[test]
    fn runs_are_bit_identical() {
        let mut profile = single_profile();
        profile.strategies = vec![fixed_conversion("convert-30k", 3_000_000)];
        let first = run_all(&profile, 2025, 2045).expect("must run");
        let second = run_all(&profile, 2025, 2045).expect("must run");
        assert_eq!(first, second);
    }

    #[test]
    fn horizon_errors_are_rejected_before_any_work() {
        let profile = single_profile();
        let policy = StrategyPolicy::baseline();
        let err = run_simulation(&profile, &policy, 2045, 2025).expect_err("reversed horizon");
        assert!(matches!(err, EngineError::InvalidHorizon(_)));
        let err = run_simulation(&profile, &policy, 2025, 2025 + 150).expect_err("too long");
        assert!(matches!(err, EngineError::InvalidHorizon(_)));
    }

    #[test]
    fn zero_length_horizon_emits_one_year() {
        let profile = single_profile();
        let result =
            run_simulation(&profile, &StrategyPolicy::baseline(), 2025, 2025).expect("must run");
        assert_eq!(result.years.len(), 1);
        assert_eq!(result.years[0].year, 2025);
    }

    #[test]
    fn conversion_below_deduction_moves_funds_tax_free() {
        let mut profile = single_profile();
        profile.investment_return_bps = 0;
        profile.horizon_end_age = 60;
        let policy = fixed_conversion("small", 1_000_000); // $10,000 < deduction

        let result = run_simulation(&profile, &policy, 2025, 2025).expect("must run");
        let row = &result.years[0];
        assert_eq!(row.conversion, 1_000_000);
        assert_eq!(row.taxable_income, 0);
        assert_eq!(row.tax, 0);
        assert_eq!(row.roth, 1_000_000);
        assert_eq!(row.traditional, 49_000_000);
        assert_eq!(row.shortfall, 0);
    }

    #[test]
    fn bracket_fill_conversion_stops_at_the_target_bracket_top() {
        let mut profile = single_profile();
        profile.investment_return_bps = 0;
        profile.horizon_end_age = 60;
        let policy = StrategyPolicy {
            name: "fill-10".to_string(),
            conversion: ConversionRule::AnnualAmount { amount: 40_000_000 },
            constraint: ConversionConstraint::BracketCeiling { rate_bps: 1_000 },
            tax_payment: TaxPaymentSource::Conversion,
            withdrawal: WithdrawalRule::None,
            defer_years: 0,
            duration_years: None,
        };

        let result = run_simulation(&profile, &policy, 2025, 2025).expect("must run");
        let row = &result.years[0];
        // Headroom = 11,925 bracket top + 15,000 deduction.
        assert_eq!(row.conversion, 2_692_500);
        assert_eq!(row.taxable_income, 1_192_500);
        assert_eq!(row.tax, 119_250);
        // Withholding: Roth receives the conversion net of tax.
        assert_eq!(row.roth, 2_692_500 - 119_250);
        assert_eq!(row.shortfall, 0);
    }

    #[test]
    fn conversion_is_clamped_to_the_traditional_balance() {
        let mut profile = single_profile();
        profile.balances.traditional = 500_000;
        profile.investment_return_bps = 0;
        profile.horizon_end_age = 60;
        let policy = fixed_conversion("too-big", 5_000_000);

        let result = run_simulation(&profile, &policy, 2025, 2025).expect("must run");
        let row = &result.years[0];
        assert_eq!(row.conversion, 500_000);
        assert_eq!(row.traditional, 0);
    }

    #[test]
    fn deferred_conversion_waits_and_duration_stops_it() {
        let mut profile = single_profile();
        profile.investment_return_bps = 0;
        let policy = StrategyPolicy {
            defer_years: 2,
            duration_years: Some(3),
            ..fixed_conversion("laddered", 100_000)
        };

        let result = run_simulation(&profile, &policy, 2025, 2032).expect("must run");
        let conversions: Vec<Cents> = result.years.iter().map(|r| r.conversion).collect();
        assert_eq!(conversions, vec![0, 0, 100_000, 100_000, 100_000, 0, 0, 0]);
        assert_eq!(result.summary.total_conversions, 300_000);
    }

    #[test]
    fn unpayable_tax_is_recorded_as_shortfall_not_negative_balance() {
        let mut profile = single_profile();
        profile.investment_return_bps = 0;
        profile.balances = AccountBalances {
            traditional: 0,
            roth: 0,
            taxable: 100,
            other_retirement: 0,
        };
        profile.other_income = 10_000_000; // $100,000 of outside income
        let result =
            run_simulation(&profile, &StrategyPolicy::baseline(), 2025, 2025).expect("must run");
        let row = &result.years[0];
        assert!(row.tax > 0);
        assert_eq!(row.taxable, 0);
        assert_eq!(row.shortfall, row.tax - 100);
    }

    #[test]
    fn withdrawal_need_is_clamped_to_the_taxable_balance() {
        let mut profile = single_profile();
        profile.investment_return_bps = 0;
        profile.balances.taxable = 50_000;
        let policy = StrategyPolicy {
            withdrawal: WithdrawalRule::FixedAnnual { amount: 80_000 },
            ..StrategyPolicy::baseline()
        };

        let result = run_simulation(&profile, &policy, 2025, 2025).expect("must run");
        let row = &result.years[0];
        assert_eq!(row.taxable, 0);
        assert_eq!(row.shortfall, 30_000);
    }

    #[test]
    fn multi_strategy_run_isolates_a_failing_variant() {
        let mut profile = single_profile();
        let good = fixed_conversion("good", 1_000_000);
        let bad = StrategyPolicy {
            constraint: ConversionConstraint::BracketCeiling { rate_bps: 9_999 },
            ..fixed_conversion("bad", 1_000_000)
        };
        profile.strategies = vec![good, bad];

        let result = run_all(&profile, 2025, 2045).expect("baseline must survive");
        assert_eq!(result.strategies.len(), 1);
        assert_eq!(result.strategies[0].strategy, "good");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].strategy, "bad");
    }

    #[test]
    fn identical_horizon_across_variants() {
        let mut profile = single_profile();
        profile.strategies = vec![
            fixed_conversion("a", 1_000_000),
            fixed_conversion("b", 2_000_000),
        ];
        let result = run_all(&profile, 2025, 2045).expect("must run");
        for strategy in result.strategies.iter().chain([&result.baseline]) {
            assert_eq!(strategy.years.len(), 21);
            assert_eq!(strategy.years.first().map(|r| r.year), Some(2025));
            assert_eq!(strategy.years.last().map(|r| r.year), Some(2045));
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_horizon_always_yields_k_plus_one_entries(k in 0i32..80) {
            let mut profile = single_profile();
            profile.horizon_end_age = 130;
            let result = run_simulation(&profile, &StrategyPolicy::baseline(), 2025, 2025 + k)
                .expect("must run");
            prop_assert_eq!(result.years.len(), k as usize + 1);
            for (offset, row) in result.years.iter().enumerate() {
                prop_assert_eq!(row.year, 2025 + offset as i32);
            }
        }

        #[test]
        fn prop_balances_never_go_negative(
            traditional in 0i64..100_000_000,
            roth in 0i64..50_000_000,
            taxable in 0i64..50_000_000,
            other in 0i64..50_000_000,
            return_bps in -2_000i32..2_000,
            other_income in 0i64..30_000_000,
            conversion in 0i64..40_000_000,
            withdrawal in 0i64..20_000_000,
            span in 0i32..40,
            pay_from_conversion in proptest::bool::ANY,
        ) {
            let mut profile = single_profile();
            profile.balances = AccountBalances {
                traditional,
                roth,
                taxable,
                other_retirement: other,
            };
            profile.investment_return_bps = return_bps;
            profile.other_income = other_income;
            profile.horizon_end_age = 130;
            let policy = StrategyPolicy {
                name: "fuzzed".to_string(),
                conversion: ConversionRule::AnnualAmount { amount: conversion },
                constraint: ConversionConstraint::Unconstrained,
                tax_payment: if pay_from_conversion {
                    TaxPaymentSource::Conversion
                } else {
                    TaxPaymentSource::TaxableAccount
                },
                withdrawal: WithdrawalRule::FixedAnnual { amount: withdrawal },
                defer_years: 0,
                duration_years: None,
            };

            let result = run_simulation(&profile, &policy, 2025, 2025 + span).expect("must run");
            for row in &result.years {
                prop_assert!(row.traditional >= 0);
                prop_assert!(row.roth >= 0);
                prop_assert!(row.taxable >= 0);
                prop_assert!(row.other_retirement >= 0);
                prop_assert!(row.rmd >= 0);
                prop_assert!(row.conversion >= 0);
                prop_assert!(row.shortfall >= 0);
                prop_assert!(row.tax >= 0);
            }
        }

        #[test]
        fn prop_percent_conversion_respects_balance(
            traditional in 1i64..100_000_000,
            rate_bps in 0u32..10_001,
        ) {
            let mut profile = single_profile();
            profile.balances.traditional = traditional;
            profile.investment_return_bps = 0;
            let policy = StrategyPolicy {
                conversion: ConversionRule::PercentOfBalance { rate_bps },
                ..fixed_conversion("pct", 0)
            };
            let result = run_simulation(&profile, &policy, 2025, 2025).expect("must run");
            let row = &result.years[0];
            prop_assert!(row.conversion <= traditional);
            prop_assert_eq!(row.conversion, traditional * rate_bps as i64 / 10_000);
        }
    }
}

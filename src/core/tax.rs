use super::types::{Cents, FilingStatus};

/// Tax-year the static tables below describe; deductions escalate from here.
pub const REFERENCE_YEAR: i32 = 2025;
pub const DEFAULT_DEDUCTION_INFLATION_BPS: u32 = 250;
pub const RMD_START_AGE: u32 = 73;

const SENIOR_AGE: u32 = 65;

const fn dollars(amount: i64) -> Cents {
    amount * 100
}

const BRACKET_RATES_BPS: [u32; 7] = [1_000, 1_200, 2_200, 2_400, 3_200, 3_500, 3_700];

/// Upper taxable-income bound of each bounded bracket, 2025 schedule.
fn bracket_tops(status: FilingStatus) -> [Cents; 6] {
    match status {
        FilingStatus::Single => [
            dollars(11_925),
            dollars(48_475),
            dollars(103_350),
            dollars(197_300),
            dollars(250_525),
            dollars(626_350),
        ],
        FilingStatus::MarriedFilingJointly => [
            dollars(23_850),
            dollars(96_950),
            dollars(206_700),
            dollars(394_600),
            dollars(501_050),
            dollars(751_600),
        ],
        FilingStatus::MarriedFilingSeparately => [
            dollars(11_925),
            dollars(48_475),
            dollars(103_350),
            dollars(197_300),
            dollars(250_525),
            dollars(375_800),
        ],
        FilingStatus::HeadOfHousehold => [
            dollars(17_000),
            dollars(64_850),
            dollars(103_350),
            dollars(197_300),
            dollars(250_500),
            dollars(626_350),
        ],
    }
}

fn base_deduction(status: FilingStatus) -> Cents {
    match status {
        FilingStatus::Single | FilingStatus::MarriedFilingSeparately => dollars(15_000),
        FilingStatus::MarriedFilingJointly => dollars(30_000),
        FilingStatus::HeadOfHousehold => dollars(22_500),
    }
}

fn senior_bonus(status: FilingStatus) -> Cents {
    if status.is_married() {
        dollars(1_600)
    } else {
        dollars(2_000)
    }
}

fn qualifying_seniors(status: FilingStatus, primary_age: u32, spouse_age: Option<u32>) -> i64 {
    let primary = i64::from(primary_age >= SENIOR_AGE);
    if status.is_married() {
        primary + spouse_age.map_or(0, |age| i64::from(age >= SENIOR_AGE))
    } else {
        primary
    }
}

/// Compound `amount` forward by `years` at `inflation_bps`, then floor to the
/// nearest 100 cents (the source tables publish whole-dollar figures).
fn escalate(amount: Cents, years: u32, inflation_bps: u32) -> Cents {
    let mut value = amount as i128;
    for _ in 0..years {
        value = value * (10_000 + inflation_bps as i128) / 10_000;
    }
    let value = value as Cents;
    value - value % 100
}

pub fn standard_deduction(
    status: FilingStatus,
    primary_age: u32,
    spouse_age: Option<u32>,
    year: i32,
) -> Cents {
    standard_deduction_with_inflation(
        status,
        primary_age,
        spouse_age,
        year,
        DEFAULT_DEDUCTION_INFLATION_BPS,
    )
}

pub fn standard_deduction_with_inflation(
    status: FilingStatus,
    primary_age: u32,
    spouse_age: Option<u32>,
    year: i32,
    inflation_bps: u32,
) -> Cents {
    let years = (year - REFERENCE_YEAR).max(0) as u32;
    let base = escalate(base_deduction(status), years, inflation_bps);
    let bonus = escalate(senior_bonus(status), years, inflation_bps);
    base + bonus * qualifying_seniors(status, primary_age, spouse_age)
}

/// Federal tax on taxable income under the progressive schedule. Each bracket
/// slice is floored at bps precision, so results are exact integers.
pub fn tax_for_income(status: FilingStatus, taxable_income: Cents) -> Cents {
    if taxable_income <= 0 {
        return 0;
    }
    let tops = bracket_tops(status);
    let mut tax: i128 = 0;
    let mut lower: Cents = 0;
    for (idx, &top) in tops.iter().enumerate() {
        if taxable_income <= lower {
            return tax as Cents;
        }
        let slice = taxable_income.min(top) - lower;
        tax += slice as i128 * BRACKET_RATES_BPS[idx] as i128 / 10_000;
        lower = top;
    }
    if taxable_income > lower {
        let top_rate = BRACKET_RATES_BPS[BRACKET_RATES_BPS.len() - 1];
        tax += (taxable_income - lower) as i128 * top_rate as i128 / 10_000;
    }
    tax as Cents
}

/// Taxable-income top of the bracket taxed at `rate_bps`, used by
/// bracket-fill conversion ceilings. The top marginal bracket is unbounded.
pub fn bracket_ceiling(status: FilingStatus, rate_bps: u32) -> Option<Cents> {
    let idx = BRACKET_RATES_BPS[..BRACKET_RATES_BPS.len() - 1]
        .iter()
        .position(|&r| r == rate_bps)?;
    Some(bracket_tops(status)[idx])
}

pub fn is_bounded_bracket(rate_bps: u32) -> bool {
    BRACKET_RATES_BPS[..BRACKET_RATES_BPS.len() - 1].contains(&rate_bps)
}

/// 2025 federal poverty guidelines: (base, per additional person).
fn fpl_table(state: &str) -> (Cents, Cents) {
    match state.to_ascii_uppercase().as_str() {
        "AK" => (dollars(19_550), dollars(6_880)),
        "HI" => (dollars(17_990), dollars(6_325)),
        _ => (dollars(15_650), dollars(5_500)),
    }
}

pub fn federal_poverty_level(household_size: u32, state: &str) -> Cents {
    let (base, per_person) = fpl_table(state);
    base + per_person * i64::from(household_size.saturating_sub(1))
}

/// The ACA subsidy cliff sits at 400% of the federal poverty level.
pub fn aca_subsidy_cutoff(household_size: u32, state: &str) -> Cents {
    4 * federal_poverty_level(household_size, state)
}

/// IRS uniform lifetime divisors in tenths, ages 73 through 120+.
const UNIFORM_LIFETIME_TENTHS: [i64; 48] = [
    265, 255, 246, 237, 229, 220, 211, 202, 194, 185, 177, 168, 160, 152, 144, 137, 129, 122, 115,
    108, 101, 95, 89, 84, 78, 73, 68, 64, 60, 56, 52, 49, 46, 43, 41, 39, 37, 35, 34, 33, 31, 30,
    29, 28, 27, 25, 23, 20,
];

/// Required minimum distribution for the year the owner attains `age`.
/// Zero before the trigger age; never exceeds the balance.
pub fn rmd_amount(age: u32, traditional_balance: Cents) -> Cents {
    if age < RMD_START_AGE || traditional_balance <= 0 {
        return 0;
    }
    let idx = ((age - RMD_START_AGE) as usize).min(UNIFORM_LIFETIME_TENTHS.len() - 1);
    let divisor_tenths = UNIFORM_LIFETIME_TENTHS[idx] as i128;
    let rmd = traditional_balance as i128 * 10 / divisor_tenths;
    rmd.min(traditional_balance as i128) as Cents
}

use super::types::{LifMode, non_negative};

pub const RRIF_CONVERSION_AGE: u32 = 71;
const MAX_WITHDRAWAL_FRACTION: f64 = 0.20;

// Prescribed minimum fractions for ages 71 through 94.
const RRIF_MINIMUM_FACTORS: [f64; 24] = [
    0.0528, 0.0540, 0.0553, 0.0567, 0.0582, 0.0598, 0.0617, 0.0636, 0.0658, 0.0682, 0.0708,
    0.0738, 0.0771, 0.0808, 0.0851, 0.0899, 0.0955, 0.1021, 0.1099, 0.1192, 0.1306, 0.1449,
    0.1634, 0.1879,
];

pub fn minimum_withdrawal_fraction(age: u32) -> f64 {
    if age < RRIF_CONVERSION_AGE {
        1.0 / (90.0 - age as f64)
    } else if age < 95 {
        RRIF_MINIMUM_FACTORS[(age - RRIF_CONVERSION_AGE) as usize]
    } else {
        MAX_WITHDRAWAL_FRACTION
    }
}

pub fn lif_maximum_fraction(age: u32) -> f64 {
    (2.0 * minimum_withdrawal_fraction(age)).min(MAX_WITHDRAWAL_FRACTION)
}

pub fn lif_mode_fraction(age: u32, mode: LifMode) -> f64 {
    let min = minimum_withdrawal_fraction(age);
    let max = lif_maximum_fraction(age).max(min);
    match mode {
        LifMode::Minimum => min,
        LifMode::Maximum => max,
        LifMode::Midpoint => 0.5 * (min + max),
    }
}

/// Draw that would empty `balance` by the end of `target_age`, weighting remaining years by
/// a blend of level payments and a linearly declining schedule.
pub fn glide_path_draw(
    balance: f64,
    age: u32,
    target_age: u32,
    front_load: f64,
    annual_return: f64,
) -> f64 {
    let balance = non_negative(balance);
    if balance <= 0.0 {
        return 0.0;
    }
    if target_age <= age {
        return balance;
    }

    let years = (target_age - age + 1) as usize;
    let front_load = if front_load.is_finite() {
        front_load.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let growth = if annual_return.is_finite() && annual_return > -0.99 {
        1.0 + annual_return
    } else {
        1.0
    };

    let weight = |k: usize| (1.0 - front_load) + front_load * (years - k) as f64 / years as f64;
    let mut discount = 1.0;
    let mut present_value = 0.0;
    for k in 0..years {
        present_value += weight(k) * discount;
        discount /= growth;
    }

    if present_value <= 0.0 {
        return balance;
    }
    (balance * weight(0) / present_value).min(balance)
}

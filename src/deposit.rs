use crate::models::{DepositType, ProfileRow};

pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Deposit owed for a service price under a professional's policy.
///
/// Percentage policies take `price * value / 100`; fixed policies take the
/// value, capped at the price. The result is rounded to 2 decimals.
pub fn deposit_amount(kind: DepositType, value: f64, price: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 || price <= 0.0 {
        return 0.0;
    }
    let amount = match kind {
        DepositType::None => 0.0,
        DepositType::Percentage => price * value.min(100.0) / 100.0,
        DepositType::Fixed => value.min(price),
    };
    round2(amount)
}

pub fn deposit_for_profile(profile: &ProfileRow, price: f64) -> f64 {
    deposit_amount(profile.deposit_type, profile.deposit_value, price)
}

/// Gateway amounts are integers in the currency's minor unit (kobo for NGN).
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn from_minor_units(amount: i64) -> f64 {
    amount as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_deposit_rounds_to_cents() {
        assert_eq!(deposit_amount(DepositType::Percentage, 30.0, 15000.0), 4500.0);
        assert_eq!(deposit_amount(DepositType::Percentage, 33.0, 99.99), 33.0);
        assert_eq!(deposit_amount(DepositType::Percentage, 12.5, 10.01), 1.25);
    }

    #[test]
    fn fixed_deposit_is_capped_at_price() {
        assert_eq!(deposit_amount(DepositType::Fixed, 5000.0, 20000.0), 5000.0);
        assert_eq!(deposit_amount(DepositType::Fixed, 5000.0, 3000.0), 3000.0);
    }

    #[test]
    fn no_policy_or_free_service_means_no_deposit() {
        assert_eq!(deposit_amount(DepositType::None, 50.0, 20000.0), 0.0);
        assert_eq!(deposit_amount(DepositType::Percentage, 0.0, 20000.0), 0.0);
        assert_eq!(deposit_amount(DepositType::Fixed, 1000.0, 0.0), 0.0);
    }

    #[test]
    fn minor_units_survive_float_noise() {
        assert_eq!(to_minor_units(4500.0), 450_000);
        assert_eq!(to_minor_units(0.29), 29);
        assert_eq!(from_minor_units(450_000), 4500.0);
    }
}

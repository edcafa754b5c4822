use rust_decimal::Decimal;

/// Thin alias so call sites read `Money` where the spec says "decimal".
pub type Money = Decimal;

/// `(input + output) / 2 * discount` used by `cheapestModelFor` / `cheapestFromAvailable`.
pub fn average_discounted_price(input: Money, output: Money, discount: Option<Money>) -> Money {
    let avg = (input + output) / Decimal::from(2);
    match discount {
        Some(d) if !d.is_zero() => avg * d,
        _ => avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn averages_without_discount() {
        let score = average_discounted_price(dec!(1.0), dec!(3.0), None);
        assert_eq!(score, dec!(2.0));
    }

    #[test]
    fn applies_discount() {
        let score = average_discounted_price(dec!(1.0), dec!(3.0), Some(dec!(0.5)));
        assert_eq!(score, dec!(1.0));
    }
}

use askama::Template;

pub fn render<T: Template>(template: &T) -> Option<String> {
    match template.render() {
        Ok(body) => Some(body),
        Err(err) => {
            log::error!("Template render error: {err}");
            None
        }
    }
}

/// Amounts as shown to people: thousands separators, two decimals.
pub fn money(amount: f64, currency: &str) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::new();
    for (index, ch) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{currency} {grouped}.{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_money() {
        assert_eq!(money(4500.0, "NGN"), "NGN 4,500.00");
        assert_eq!(money(1234567.891, "NGN"), "NGN 1,234,567.89");
        assert_eq!(money(0.5, "USD"), "USD 0.50");
        assert_eq!(money(-20.0, "NGN"), "-NGN 20.00");
    }
}

/// Render a distance in meters below 1000 m and kilometers from there on,
/// rounded to `fraction_digits` with en-US digit grouping.
pub fn distance_to_human(meters: Option<f64>, fraction_digits: usize) -> String {
    let meters = match meters {
        Some(value) if value.is_finite() && value != 0.0 => value,
        _ => return "0 m".to_string(),
    };

    if meters.abs() < 1000.0 {
        format!("{} m", group_digits(meters, fraction_digits))
    } else {
        format!("{} km", group_digits(meters / 1000.0, fraction_digits))
    }
}

fn group_digits(value: f64, fraction_digits: usize) -> String {
    let formatted = format!("{:.*}", fraction_digits, value.abs());
    let (whole, fraction) = match formatted.split_once('.') {
        Some((whole, fraction)) => (whole, fraction.trim_end_matches('0')),
        None => (formatted.as_str(), ""),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, digit) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let negative = value < 0.0 && formatted.chars().any(|c| matches!(c, '1'..='9'));
    let sign = if negative { "-" } else { "" };
    if fraction.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{fraction}")
    }
}

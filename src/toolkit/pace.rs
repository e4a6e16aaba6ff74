use crate::activity::Session;

/// Sports whose effort is commonly read as time per distance.
const PACE_SPORTS: [&str; 6] = ["Generic", "Hiking", "Walking", "Running", "Swimming", "Transition"];

/// Render seconds per unit as `M:SS`.
pub fn format_pace(seconds_per_unit: f64) -> String {
    if !seconds_per_unit.is_finite() || seconds_per_unit <= 0.0 {
        return "0:00".to_string();
    }

    let total = seconds_per_unit.round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn sport_has_pace(sport: &str) -> bool {
    PACE_SPORTS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(sport))
}

/// A session reports pace only for pace sports that carry at least one pace
/// sample.
pub fn session_has_pace(session: &Session) -> bool {
    sport_has_pace(&session.sport) && session.records.iter().any(|record| record.pace.is_some())
}

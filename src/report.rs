//! Plain-text renderings for chat notifications.

use crate::analysis::seasons::{SeasonCalendar, SeasonSummary};
use crate::model::Reading;

const SPARK_BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One bar per value, scaled between the smallest and largest value.
///
/// A flat series renders as the lowest bar. Empty input gives "".
pub fn sparkline(values: &[f64]) -> String {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let Some(min) = finite.iter().copied().reduce(f64::min) else {
        return String::new();
    };
    let max = finite.iter().copied().fold(min, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    let top = (SPARK_BARS.len() - 1) as f64;

    finite
        .iter()
        .map(|v| SPARK_BARS[(((v - min) / span) * top).round() as usize])
        .collect()
}

/// Fixed-width table of the last `days` readings with per-day cost, in a
/// code block.
///
/// Missing values print as "-" and cost nothing.
pub fn usage_table(readings: &[Reading], calendar: &SeasonCalendar, days: usize) -> String {
    let start = readings.len().saturating_sub(days);
    let recent = &readings[start..];

    let mut rows = vec![
        "```".to_string(),
        format!("📊 {}-Day Water Usage Summary:", days),
        "Date       |  Usage (CCF)  |   Cost".to_string(),
        "-----------|---------------|---------".to_string(),
    ];
    for r in recent {
        let date = r.timestamp.date();
        match r.value {
            Some(v) => {
                let cost = v * calendar.rate_for_date(date);
                rows.push(format!("{} |     {:6.2}     | ${:7.2}", date, v, cost));
            }
            None => rows.push(format!("{} |          -    |       -", date)),
        }
    }
    rows.push("```".to_string());
    rows.join("\n")
}

/// Season cost lines, or a one-liner when out of season.
pub fn season_summary_text(summary: Option<&SeasonSummary>) -> String {
    match summary {
        Some(s) => format!(
            "💰 *{} season*\nCost so far: ${:.2}\nProjected remaining cost: ${:.2}\n\
             Based on {:.2} CCF/day × {} days @ ${:.2}/CCF",
            s.label,
            s.cost_so_far,
            s.projected_remaining_cost,
            s.recent_daily_average,
            s.days_remaining,
            s.unit_rate
        ),
        None => "Pool is out of season; no cost projection.".to_string(),
    }
}

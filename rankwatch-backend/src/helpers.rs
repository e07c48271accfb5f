use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}

/// Human readable length of a span of seconds, e.g. "2h 5m".
pub fn format_duration(seconds: i64) -> String {
  let seconds = seconds.max(0);
  let days = seconds / 86_400;
  let hours = (seconds % 86_400) / 3_600;
  let minutes = (seconds % 3_600) / 60;

  if days > 0 {
    format!("{}d {}h", days, hours)
  } else if hours > 0 {
    format!("{}h {}m", hours, minutes)
  } else if minutes > 0 {
    format!("{}m", minutes)
  } else {
    format!("{}s", seconds)
  }
}

/// Display form of an optional rank.
pub fn format_rank(rank: Option<i64>) -> String {
  rank.map_or_else(|| "unranked".to_string(), |r| format!("#{}", r))
}

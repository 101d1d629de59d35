use chrono::{DateTime, Duration, Utc};

/// How often a recurring job is re-triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    Hourly,
    SixHours,
    #[default]
    Daily,
    Weekly,
}

/// One-time jobs are scheduled this far in the future when created.
pub const ONE_TIME_DELAY_SECS: i64 = 10;

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::SixHours => "6hours",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }

    /// Unknown values fall back to daily, matching what the dashboard stores
    /// for legacy rows.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "hourly" => Frequency::Hourly,
            "6hours" => Frequency::SixHours,
            "weekly" => Frequency::Weekly,
            _ => Frequency::Daily,
        }
    }

    pub fn interval(self) -> Duration {
        match self {
            Frequency::Hourly => Duration::hours(1),
            Frequency::SixHours => Duration::hours(6),
            Frequency::Daily => Duration::hours(24),
            Frequency::Weekly => Duration::days(7),
        }
    }

    pub fn next_run_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.interval()
    }
}

/// First scheduled run of a newly created job.
pub fn initial_run_at(frequency: Frequency, is_one_time: bool, now: DateTime<Utc>) -> DateTime<Utc> {
    if is_one_time {
        now + Duration::seconds(ONE_TIME_DELAY_SECS)
    } else {
        frequency.next_run_after(now)
    }
}

/// Slot to store after a run that did not succeed. A pending slot still in
/// the future is kept (`None`); one that has already passed moves to the
/// next cadence slot so the job waits a full interval before relaunching.
pub fn retry_run_at(
    frequency: Frequency,
    stored: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let pending = stored
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    match pending {
        Some(t) if t > now => None,
        _ => Some(frequency.next_run_after(now)),
    }
}

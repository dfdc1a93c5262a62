//! # Cooldown Policy
//!
//! Decides how long a recruiter must wait after pulling a batch. Young
//! recruiter accounts pay more per nation than established ones; the cost
//! falls linearly from `max_per_entry` at age zero to `min_per_entry` once the
//! account reaches `plateau_months`, and stays there.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RecruitError;

/// Average month length in days (365.25 / 12).
const DAYS_PER_MONTH: f64 = 30.4375;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownPolicy {
    pub max_per_entry: f64,
    pub min_per_entry: f64,
    pub plateau_months: f64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            max_per_entry: 14.0,
            min_per_entry: 5.0,
            plateau_months: 9.0,
        }
    }
}

impl CooldownPolicy {
    /// Seconds per dequeued entry for an account of `age_months`.
    pub fn per_entry_seconds(&self, age_months: f64) -> f64 {
        let age = if age_months.is_finite() && age_months > 0.0 {
            age_months
        } else {
            0.0
        };
        if age >= self.plateau_months {
            return self.min_per_entry;
        }
        let slope = (self.max_per_entry - self.min_per_entry) / self.plateau_months;
        self.max_per_entry - slope * age
    }

    /// Total cooldown for dequeuing `count` entries, truncated to whole seconds.
    pub fn cooldown_seconds(&self, age_months: f64, count: usize) -> u64 {
        (self.per_entry_seconds(age_months) * count as f64) as u64
    }

    pub fn cooldown(&self, age_months: f64, count: usize) -> Duration {
        Duration::from_secs(self.cooldown_seconds(age_months, count))
    }

    /// When the recruiter may dequeue again, given they just took `count` entries.
    pub fn next_eligible_at(
        &self,
        founded_at: DateTime<Utc>,
        count: usize,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, Duration) {
        let cooldown = self.cooldown(account_age_months(founded_at, now), count);
        let next = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (next, cooldown)
    }
}

/// Account age in (average-length) months. Negative if `founded_at` lies in the future.
pub fn account_age_months(founded_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - founded_at).num_seconds() as f64 / 86_400.0;
    days / DAYS_PER_MONTH
}

/// Fails with [`RecruitError::TooSoon`] while `now` is before `next_at`.
pub fn check_eligible(next_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), RecruitError> {
    if next_at > now {
        let retry_after = (next_at - now).to_std().unwrap_or_default();
        return Err(RecruitError::TooSoon { retry_after });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 1, 14)]
    #[case(0.0, 8, 112)]
    #[case(4.5, 2, 19)]
    #[case(9.0, 8, 40)]
    #[case(24.0, 8, 40)]
    #[case(-3.0, 1, 14)]
    #[case(f64::NAN, 1, 14)]
    #[case(f64::INFINITY, 1, 14)]
    fn cooldown_table(#[case] months: f64, #[case] count: usize, #[case] expected: u64) {
        assert_eq!(CooldownPolicy::default().cooldown_seconds(months, count), expected);
    }

    #[test]
    fn plateau_is_flat() {
        let p = CooldownPolicy::default();
        assert_eq!(p.cooldown_seconds(9.0, 8), p.cooldown_seconds(24.0, 8));
        assert_eq!(p.cooldown_seconds(-1.0, 8), p.cooldown_seconds(0.0, 8));
    }

    #[test]
    fn cost_never_increases_with_age() {
        let p = CooldownPolicy::default();
        let mut prev = f64::MAX;
        for tenth in 0..150 {
            let cost = p.per_entry_seconds(tenth as f64 / 10.0);
            assert!(cost <= prev);
            prev = cost;
        }
    }

    #[test]
    fn age_in_months() {
        let now = Utc::now();
        let year_ago = now - chrono::Duration::days(365);
        let months = account_age_months(year_ago, now);
        assert!((months - 11.99).abs() < 0.05, "{}", months);
        assert!(account_age_months(now + chrono::Duration::days(10), now) < 0.0);
    }

    #[test]
    fn eligibility_reports_wait() {
        let now = Utc::now();
        assert!(check_eligible(now, now).is_ok());
        assert!(check_eligible(now - chrono::Duration::seconds(1), now).is_ok());
        match check_eligible(now + chrono::Duration::seconds(30), now) {
            Err(RecruitError::TooSoon { retry_after }) => assert_eq!(retry_after, Duration::from_secs(30)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn next_eligible_adds_cooldown() {
        let now = Utc::now();
        let (next, cooldown) = CooldownPolicy::default().next_eligible_at(now - chrono::Duration::days(400), 8, now);
        assert_eq!(cooldown, Duration::from_secs(40));
        assert_eq!(next - now, chrono::Duration::seconds(40));
    }
}

//! Settlement date resolution from expiry notation.
//!
//! Notation is `D`, `W` or `M` with an optional `+N` cycle offset, or one of the
//! long forms `today`, `this week`, `this month`. Resolution always happens in
//! exchange-local time against the daily cutover.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use opt_algo_core::{ConfigError, ExchangeConfig};

use crate::error::ResolutionError;

/// Offsets beyond this are treated as typos rather than real intent.
const MAX_OFFSET: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryCycle {
    Daily,
    Weekly,
    Monthly,
}

impl ExpiryCycle {
    fn symbol(self) -> char {
        match self {
            Self::Daily => 'D',
            Self::Weekly => 'W',
            Self::Monthly => 'M',
        }
    }
}

/// A parsed expiry notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiryNotation {
    pub cycle: ExpiryCycle,
    /// Whole cycles after the nearest one.
    pub offset: u32,
}

impl ExpiryNotation {
    pub const fn new(cycle: ExpiryCycle, offset: u32) -> Self {
        Self { cycle, offset }
    }
}

impl fmt::Display for ExpiryNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cycle.symbol())?;
        if self.offset > 0 {
            write!(f, "+{}", self.offset)?;
        }
        Ok(())
    }
}

impl FromStr for ExpiryNotation {
    type Err = ResolutionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolutionError::InvalidNotation(raw.to_string());
        let words = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

        match words.as_str() {
            "today" => return Ok(Self::new(ExpiryCycle::Daily, 0)),
            "this week" => return Ok(Self::new(ExpiryCycle::Weekly, 0)),
            "this month" => return Ok(Self::new(ExpiryCycle::Monthly, 0)),
            _ => {}
        }

        let compact: String = words.chars().filter(|c| !c.is_whitespace()).collect();
        let mut chars = compact.chars();
        let cycle = match chars.next() {
            Some('d') => ExpiryCycle::Daily,
            Some('w') => ExpiryCycle::Weekly,
            Some('m') => ExpiryCycle::Monthly,
            _ => return Err(invalid()),
        };

        let rest = chars.as_str();
        let offset = if rest.is_empty() {
            0
        } else {
            let digits = rest.strip_prefix('+').ok_or_else(invalid)?;
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            digits.parse::<u32>().map_err(|_| invalid())?
        };
        if offset > MAX_OFFSET {
            return Err(invalid());
        }
        Ok(Self::new(cycle, offset))
    }
}

/// Exchange settlement calendar.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryCalendar {
    timezone: Tz,
    cutover: NaiveTime,
    weekly_weekday: Weekday,
    monthly_weekday: Weekday,
}

impl ExpiryCalendar {
    pub fn new(timezone: Tz, cutover: NaiveTime, weekly_weekday: Weekday, monthly_weekday: Weekday) -> Self {
        Self {
            timezone,
            cutover,
            weekly_weekday,
            monthly_weekday,
        }
    }

    /// # Errors
    ///
    /// Returns an error when the exchange section holds an unparseable field.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.timezone()?,
            config.cutover_time()?,
            config.weekly_weekday()?,
            config.monthly_weekday()?,
        ))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Converts any instant to exchange-local time.
    pub fn local<Z: TimeZone>(&self, at: &DateTime<Z>) -> DateTime<Tz> {
        at.with_timezone(&self.timezone)
    }

    /// Resolves a parsed notation to a settlement date.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidNotation`] if the offset leaves the supported date range.
    pub fn resolve<Z: TimeZone>(
        &self,
        notation: ExpiryNotation,
        now: &DateTime<Z>,
    ) -> Result<NaiveDate, ResolutionError> {
        let local = self.local(now);
        let today = local.date_naive();
        let past_cutover = local.time() >= self.cutover;

        let resolved = match notation.cycle {
            ExpiryCycle::Daily => {
                let first = if past_cutover { today.succ_opt() } else { Some(today) };
                first.and_then(|d| d.checked_add_days(Days::new(u64::from(notation.offset))))
            }
            ExpiryCycle::Weekly => {
                let ahead = days_until(today.weekday(), self.weekly_weekday);
                let ahead = if ahead == 0 && past_cutover { 7 } else { ahead };
                today.checked_add_days(Days::new(u64::from(ahead) + 7 * u64::from(notation.offset)))
            }
            ExpiryCycle::Monthly => {
                let this_month = last_weekday_of_month(today, self.monthly_weekday);
                let first = match this_month {
                    Some(d) if d > today || (d == today && !past_cutover) => Some(d),
                    Some(_) => today
                        .checked_add_months(Months::new(1))
                        .and_then(|next| last_weekday_of_month(next, self.monthly_weekday)),
                    None => None,
                };
                first.and_then(|d| {
                    d.checked_add_months(Months::new(notation.offset))
                        .and_then(|m| last_weekday_of_month(m, self.monthly_weekday))
                })
            }
        };
        resolved.ok_or_else(|| ResolutionError::InvalidNotation(notation.to_string()))
    }

    /// Parses and resolves raw notation.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidNotation`] for unrecognised notation.
    pub fn resolve_str<Z: TimeZone>(&self, raw: &str, now: &DateTime<Z>) -> Result<NaiveDate, ResolutionError> {
        self.resolve(raw.parse()?, now)
    }

    /// Labelled settlement dates for `D`, `D+1`, `W..W+(weeks-1)` and `M..M+(months-1)`.
    pub fn upcoming_expiries<Z: TimeZone>(
        &self,
        now: &DateTime<Z>,
        weeks: u32,
        months: u32,
    ) -> Vec<(ExpiryNotation, NaiveDate)> {
        let daily = (0..2).map(|o| ExpiryNotation::new(ExpiryCycle::Daily, o));
        let weekly = (0..weeks).map(|o| ExpiryNotation::new(ExpiryCycle::Weekly, o));
        let monthly = (0..months).map(|o| ExpiryNotation::new(ExpiryCycle::Monthly, o));

        daily
            .chain(weekly)
            .chain(monthly)
            .filter_map(|n| self.resolve(n, now).ok().map(|d| (n, d)))
            .collect()
    }
}

/// Whole calendar days from `today` to `expiry`; negative once it has passed.
pub fn days_to_expiry(today: NaiveDate, expiry: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

fn days_until(from: Weekday, to: Weekday) -> u32 {
    (to.num_days_from_monday() + 7 - from.num_days_from_monday()) % 7
}

/// Last `weekday` in the month containing `date`.
fn last_weekday_of_month(date: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let first = date.with_day(1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    let back = days_until(weekday, last.weekday());
    last.checked_sub_days(Days::new(u64::from(back)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    fn calendar() -> ExpiryCalendar {
        ExpiryCalendar::new(
            Kolkata,
            NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
            Weekday::Fri,
            Weekday::Fri,
        )
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Kolkata.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ==================== Notation Parsing ====================

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("W".parse::<ExpiryNotation>().unwrap(), ExpiryNotation::new(ExpiryCycle::Weekly, 0));
        assert_eq!("d+1".parse::<ExpiryNotation>().unwrap(), ExpiryNotation::new(ExpiryCycle::Daily, 1));
        assert_eq!("M + 2".parse::<ExpiryNotation>().unwrap(), ExpiryNotation::new(ExpiryCycle::Monthly, 2));
        assert_eq!("Today".parse::<ExpiryNotation>().unwrap(), ExpiryNotation::new(ExpiryCycle::Daily, 0));
        assert_eq!(
            "this  week".parse::<ExpiryNotation>().unwrap(),
            ExpiryNotation::new(ExpiryCycle::Weekly, 0)
        );
        assert_eq!(
            "THIS MONTH".parse::<ExpiryNotation>().unwrap(),
            ExpiryNotation::new(ExpiryCycle::Monthly, 0)
        );
    }

    #[test]
    fn rejects_unknown_notation() {
        for raw in ["Y", "", "W-1", "W+", "W+x", "next week", "D+9999"] {
            assert!(
                matches!(raw.parse::<ExpiryNotation>(), Err(ResolutionError::InvalidNotation(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(ExpiryNotation::new(ExpiryCycle::Weekly, 0).to_string(), "W");
        assert_eq!(ExpiryNotation::new(ExpiryCycle::Monthly, 3).to_string(), "M+3");
    }

    // ==================== Daily ====================

    #[test]
    fn daily_rolls_exactly_at_cutover() {
        let cal = calendar();
        let before = Kolkata.with_ymd_and_hms(2025, 1, 22, 17, 29, 59).unwrap();
        assert_eq!(cal.resolve_str("D", &before).unwrap(), date(2025, 1, 22));
        assert_eq!(cal.resolve_str("D", &at(2025, 1, 22, 17, 30)).unwrap(), date(2025, 1, 23));
        assert_eq!(cal.resolve_str("D+1", &at(2025, 1, 22, 9, 0)).unwrap(), date(2025, 1, 23));
        assert_eq!(cal.resolve_str("D+1", &at(2025, 1, 22, 18, 0)).unwrap(), date(2025, 1, 24));
    }

    #[test]
    fn utc_input_is_converted_to_exchange_time() {
        // 12:30 UTC is 18:00 in Kolkata, past cutover.
        let utc = chrono::Utc.with_ymd_and_hms(2025, 1, 22, 12, 30, 0).unwrap();
        assert_eq!(calendar().resolve_str("D", &utc).unwrap(), date(2025, 1, 23));
    }

    // ==================== Weekly ====================

    #[test]
    fn weekly_picks_next_settlement_weekday() {
        let cal = calendar();
        // Wednesday -> Friday of the same week.
        assert_eq!(cal.resolve_str("W", &at(2025, 1, 22, 9, 30)).unwrap(), date(2025, 1, 24));
        assert_eq!(cal.resolve_str("W+1", &at(2025, 1, 22, 9, 30)).unwrap(), date(2025, 1, 31));
        // Saturday -> next Friday.
        assert_eq!(cal.resolve_str("W", &at(2025, 1, 25, 9, 30)).unwrap(), date(2025, 1, 31));
    }

    #[test]
    fn weekly_on_settlement_day_honours_cutover() {
        let cal = calendar();
        assert_eq!(cal.resolve_str("W", &at(2025, 1, 24, 17, 0)).unwrap(), date(2025, 1, 24));
        assert_eq!(cal.resolve_str("W", &at(2025, 1, 24, 17, 30)).unwrap(), date(2025, 1, 31));
    }

    // ==================== Monthly ====================

    #[test]
    fn monthly_on_last_friday_before_and_after_cutover() {
        let cal = calendar();
        // 2025-01-31 is the last Friday of January.
        assert_eq!(cal.resolve_str("M", &at(2025, 1, 31, 10, 0)).unwrap(), date(2025, 1, 31));
        // After cutover: last Friday of February, not one week later.
        assert_eq!(cal.resolve_str("M", &at(2025, 1, 31, 18, 0)).unwrap(), date(2025, 2, 28));
    }

    #[test]
    fn monthly_offset_recomputes_last_weekday() {
        let cal = calendar();
        let now = at(2025, 1, 10, 9, 0);
        assert_eq!(cal.resolve_str("M", &now).unwrap(), date(2025, 1, 31));
        assert_eq!(cal.resolve_str("M+1", &now).unwrap(), date(2025, 2, 28));
        assert_eq!(cal.resolve_str("M+2", &now).unwrap(), date(2025, 3, 28));
        // Year rollover.
        assert_eq!(cal.resolve_str("M+12", &now).unwrap(), date(2026, 1, 30));
    }

    #[test]
    fn monthly_after_last_weekday_rolls_to_next_month() {
        let cal = calendar();
        // 2025-03-29 is the day after the last Friday of March.
        assert_eq!(cal.resolve_str("M", &at(2025, 3, 29, 9, 0)).unwrap(), date(2025, 4, 25));
    }

    #[test]
    fn last_weekday_helper() {
        assert_eq!(last_weekday_of_month(date(2024, 2, 3), Weekday::Thu), Some(date(2024, 2, 29)));
        assert_eq!(last_weekday_of_month(date(2024, 12, 31), Weekday::Fri), Some(date(2024, 12, 27)));
    }

    // ==================== Listing ====================

    #[test]
    fn upcoming_expiries_are_labelled() {
        let cal = calendar();
        let list = cal.upcoming_expiries(&at(2025, 1, 22, 9, 0), 2, 2);
        let labels: Vec<String> = list.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(labels, vec!["D", "D+1", "W", "W+1", "M", "M+1"]);
        assert_eq!(list[2].1, date(2025, 1, 24));
        assert_eq!(list[5].1, date(2025, 2, 28));
    }

    #[test]
    fn days_to_expiry_counts_calendar_days() {
        assert_eq!(days_to_expiry(date(2025, 1, 22), date(2025, 1, 24)), 2);
        assert_eq!(days_to_expiry(date(2025, 1, 25), date(2025, 1, 24)), -1);
    }
}

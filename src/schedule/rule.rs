// Repeat rules - which days of the week a task is allowed to fire

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bitmask over days of the week. Bit 0 is Sunday, bit 6 is Saturday,
/// matching the day indices stored in the `custom_days` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(0b0111_1111);
    pub const WEEKDAYS: WeekdaySet = WeekdaySet(0b0011_1110);
    pub const WEEKENDS: WeekdaySet = WeekdaySet(0b0100_0001);

    /// Add a day by index (0 = Sunday .. 6 = Saturday). Out-of-range is ignored.
    pub fn insert(&mut self, day: u8) {
        if day < 7 {
            self.0 |= 1 << day;
        }
    }

    pub fn contains_index(&self, day: u8) -> bool {
        day < 7 && self.0 & (1 << day) != 0
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.contains_index(day.num_days_from_sunday() as u8)
    }

    pub fn intersects(&self, other: WeekdaySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Day indices in ascending order.
    pub fn days(&self) -> Vec<u8> {
        (0..7).filter(|d| self.contains_index(*d)).collect()
    }
}

#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error("unknown repeat mode '{0}'")]
    UnknownTag(String),

    #[error("custom repeat mode without a day list")]
    MissingCustomDays,

    #[error("unreadable custom day list '{0}'")]
    BadCustomDays(String),
}

/// When a scheduled task repeats.
///
/// `Once` passes the day gate on any day; the scheduler disables the task
/// after its first successful firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatRule {
    Daily,
    Weekdays,
    Weekends,
    Custom(WeekdaySet),
    Once,
}

impl RepeatRule {
    pub fn matches_day(&self, day: Weekday) -> bool {
        match self {
            RepeatRule::Daily | RepeatRule::Once => true,
            RepeatRule::Weekdays => WeekdaySet::WEEKDAYS.contains(day),
            RepeatRule::Weekends => WeekdaySet::WEEKENDS.contains(day),
            RepeatRule::Custom(set) => set.contains(day),
        }
    }

    /// Projection onto concrete days, used for overlap checks.
    /// `Once` could land on any day, so it projects to the full week.
    pub fn day_set(&self) -> WeekdaySet {
        match self {
            RepeatRule::Daily | RepeatRule::Once => WeekdaySet::ALL,
            RepeatRule::Weekdays => WeekdaySet::WEEKDAYS,
            RepeatRule::Weekends => WeekdaySet::WEEKENDS,
            RepeatRule::Custom(set) => *set,
        }
    }

    /// Tag stored in the `repeat_mode` column.
    pub fn mode_tag(&self) -> &'static str {
        match self {
            RepeatRule::Daily => "daily",
            RepeatRule::Weekdays => "weekday",
            RepeatRule::Weekends => "weekend",
            RepeatRule::Custom(_) => "custom",
            RepeatRule::Once => "once",
        }
    }

    /// JSON day list for the `custom_days` column, `None` for fixed modes.
    pub fn custom_days_json(&self) -> Option<String> {
        match self {
            RepeatRule::Custom(set) => {
                let days: Vec<String> = set.days().iter().map(u8::to_string).collect();
                Some(format!("[{}]", days.join(",")))
            }
            _ => None,
        }
    }

    /// Rebuild a rule from its stored columns.
    pub fn from_parts(tag: &str, custom_days: Option<&str>) -> Result<Self, RuleParseError> {
        match tag {
            "daily" => Ok(RepeatRule::Daily),
            "weekday" => Ok(RepeatRule::Weekdays),
            "weekend" => Ok(RepeatRule::Weekends),
            "once" => Ok(RepeatRule::Once),
            "custom" => {
                let raw = custom_days.ok_or(RuleParseError::MissingCustomDays)?;
                let days: Vec<u8> = serde_json::from_str(raw)
                    .map_err(|_| RuleParseError::BadCustomDays(raw.to_string()))?;
                let mut set = WeekdaySet::EMPTY;
                for day in days {
                    if day > 6 {
                        return Err(RuleParseError::BadCustomDays(raw.to_string()));
                    }
                    set.insert(day);
                }
                Ok(RepeatRule::Custom(set))
            }
            other => Err(RuleParseError::UnknownTag(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_set_insert_and_contains() {
        let mut set = WeekdaySet::EMPTY;
        assert!(set.is_empty());

        set.insert(1);
        set.insert(5);
        set.insert(9); // ignored

        assert!(set.contains_index(1));
        assert!(set.contains_index(5));
        assert!(!set.contains_index(0));
        assert_eq!(set.days(), vec![1, 5]);
    }

    #[test]
    fn weekdays_cover_monday_through_friday() {
        assert!(RepeatRule::Weekdays.matches_day(Weekday::Mon));
        assert!(RepeatRule::Weekdays.matches_day(Weekday::Fri));
        assert!(!RepeatRule::Weekdays.matches_day(Weekday::Sat));
        assert!(!RepeatRule::Weekdays.matches_day(Weekday::Sun));
    }

    #[test]
    fn weekends_cover_saturday_and_sunday() {
        assert!(RepeatRule::Weekends.matches_day(Weekday::Sat));
        assert!(RepeatRule::Weekends.matches_day(Weekday::Sun));
        assert!(!RepeatRule::Weekends.matches_day(Weekday::Wed));
    }

    #[test]
    fn once_passes_the_day_gate_every_day() {
        assert!(RepeatRule::Once.matches_day(Weekday::Tue));
        assert!(RepeatRule::Once.matches_day(Weekday::Sun));
        assert_eq!(RepeatRule::Once.day_set(), WeekdaySet::ALL);
    }

    #[test]
    fn custom_set_matches_only_its_days() {
        let mut set = WeekdaySet::EMPTY;
        set.insert(0); // Sunday
        set.insert(3); // Wednesday
        let rule = RepeatRule::Custom(set);

        assert!(rule.matches_day(Weekday::Sun));
        assert!(rule.matches_day(Weekday::Wed));
        assert!(!rule.matches_day(Weekday::Mon));
    }

    #[test]
    fn day_set_projections_intersect_as_expected() {
        assert!(RepeatRule::Daily.day_set().intersects(RepeatRule::Weekends.day_set()));
        assert!(RepeatRule::Once.day_set().intersects(RepeatRule::Weekdays.day_set()));
        assert!(!RepeatRule::Weekdays.day_set().intersects(RepeatRule::Weekends.day_set()));
    }

    #[test]
    fn column_roundtrip_for_fixed_modes() {
        for rule in [RepeatRule::Daily, RepeatRule::Weekdays, RepeatRule::Weekends, RepeatRule::Once] {
            let back = RepeatRule::from_parts(rule.mode_tag(), None).unwrap();
            assert_eq!(back, rule);
            assert_eq!(rule.custom_days_json(), None);
        }
    }

    #[test]
    fn column_roundtrip_for_custom_days() {
        let mut set = WeekdaySet::EMPTY;
        set.insert(1);
        set.insert(3);
        set.insert(5);
        let rule = RepeatRule::Custom(set);

        let json = rule.custom_days_json().unwrap();
        assert_eq!(json, "[1,3,5]");

        let back = RepeatRule::from_parts("custom", Some(&json)).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn from_parts_rejects_garbage() {
        assert!(RepeatRule::from_parts("fortnightly", None).is_err());
        assert!(RepeatRule::from_parts("custom", None).is_err());
        assert!(RepeatRule::from_parts("custom", Some("[7]")).is_err());
        assert!(RepeatRule::from_parts("custom", Some("not json")).is_err());
    }
}

//! Recursive rule tree evaluation

use alertr_model::{RuleNode, Timezone};
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::trace;

use crate::context::RuleContext;
use crate::error::{Result, RuleError};

/// Evaluate a rule tree against a snapshot at time `now`
///
/// `And`/`Or` short-circuit. An error in any evaluated leaf propagates to the
/// caller, which treats the whole alert level as not triggered.
pub fn evaluate<C>(node: &RuleNode, ctx: &C, now: DateTime<Utc>) -> Result<bool>
where
    C: RuleContext + ?Sized,
{
    let result = match node {
        RuleNode::Sensor {
            sensor_id,
            expected_state,
            data_type,
        } => {
            let reading = ctx
                .sensor(*sensor_id)
                .ok_or(RuleError::UnknownSensor(*sensor_id))?;
            if let Some(expected) = data_type {
                if *expected != reading.data_type {
                    return Err(RuleError::DataTypeMismatch {
                        sensor_id: *sensor_id,
                        expected: *expected,
                        actual: reading.data_type,
                    });
                }
            }
            reading.state == *expected_state
        },
        RuleNode::And { children } => {
            for child in children {
                if !evaluate(child, ctx, now)? {
                    return Ok(false);
                }
            }
            true
        },
        RuleNode::Or { children } => {
            for child in children {
                if evaluate(child, ctx, now)? {
                    return Ok(true);
                }
            }
            false
        },
        RuleNode::Not { child } => !evaluate(child, ctx, now)?,
        RuleNode::Weekday { days, tz } => day_matches(days, *tz, now, |d| {
            d.weekday().num_days_from_monday()
        }),
        RuleNode::MonthDay { days, tz } => day_matches(days, *tz, now, |d| d.day()),
    };
    trace!("Rule {:?} -> {}", node, result);
    Ok(result)
}

fn day_matches<F>(days: &BTreeSet<u8>, tz: Timezone, now: DateTime<Utc>, extract: F) -> bool
where
    F: Fn(NaiveDate) -> u32,
{
    let date = match tz {
        Timezone::Utc => now.date_naive(),
        Timezone::Local => now.with_timezone(&Local).date_naive(),
    };
    u8::try_from(extract(date)).is_ok_and(|d| days.contains(&d))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::context::SensorReading;
    use alertr_model::SensorDataType;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn ctx() -> HashMap<u32, SensorReading> {
        let mut map = HashMap::new();
        map.insert(
            1,
            SensorReading {
                state: 1,
                data_type: SensorDataType::None,
            },
        );
        map.insert(
            2,
            SensorReading {
                state: 0,
                data_type: SensorDataType::Int,
            },
        );
        map
    }

    fn t() -> RuleNode {
        RuleNode::sensor(1, 1)
    }

    fn f() -> RuleNode {
        RuleNode::sensor(2, 1)
    }

    fn noon() -> DateTime<Utc> {
        // Wednesday
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rule_algebra() {
        let ctx = ctx();
        assert!(evaluate(&RuleNode::and(vec![t(), t()]), &ctx, noon()).unwrap());
        assert!(!evaluate(&RuleNode::and(vec![t(), f()]), &ctx, noon()).unwrap());
        assert!(!evaluate(&RuleNode::or(vec![f(), f()]), &ctx, noon()).unwrap());
        assert!(evaluate(&RuleNode::or(vec![f(), t()]), &ctx, noon()).unwrap());
        assert!(!evaluate(&RuleNode::not(t()), &ctx, noon()).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_unknown_sensor() {
        let ctx = ctx();
        let rule = RuleNode::and(vec![f(), RuleNode::sensor(99, 1)]);
        assert!(!evaluate(&rule, &ctx, noon()).unwrap());

        let rule = RuleNode::or(vec![t(), RuleNode::sensor(99, 1)]);
        assert!(evaluate(&rule, &ctx, noon()).unwrap());
    }

    #[test]
    fn test_unknown_sensor_propagates() {
        let ctx = ctx();
        let rule = RuleNode::not(RuleNode::and(vec![t(), RuleNode::sensor(99, 1)]));
        assert_eq!(
            evaluate(&rule, &ctx, noon()),
            Err(RuleError::UnknownSensor(99))
        );
    }

    #[test]
    fn test_data_type_mismatch() {
        let ctx = ctx();
        let rule = RuleNode::Sensor {
            sensor_id: 2,
            expected_state: 0,
            data_type: Some(SensorDataType::Float),
        };
        assert!(matches!(
            evaluate(&rule, &ctx, noon()),
            Err(RuleError::DataTypeMismatch { sensor_id: 2, .. })
        ));
    }

    #[test]
    fn test_weekday_saturday_outside_working_days() {
        let ctx = ctx();
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let working_days = RuleNode::Weekday {
            days: (0..=4).collect(),
            tz: Timezone::Utc,
        };
        assert!(!evaluate(&working_days, &ctx, saturday).unwrap());
        assert!(evaluate(&working_days, &ctx, noon()).unwrap());

        // Sensor state does not rescue it
        let rule = RuleNode::and(vec![t(), working_days]);
        assert!(!evaluate(&rule, &ctx, saturday).unwrap());
    }

    #[test]
    fn test_month_day() {
        let ctx = ctx();
        let first = RuleNode::MonthDay {
            days: [1, 15].into_iter().collect(),
            tz: Timezone::Utc,
        };
        let day_15 = Utc.with_ymd_and_hms(2026, 6, 15, 0, 30, 0).unwrap();
        assert!(evaluate(&first, &ctx, day_15).unwrap());
        assert!(!evaluate(&first, &ctx, noon()).unwrap());
    }
}

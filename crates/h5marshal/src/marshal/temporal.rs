//! Dates, times, datetimes, durations and fixed-offset time zones.
//!
//! Each is a group of named integer components. A time zone is stored as a
//! nested group with its offset duration and optional name.

use crate::error::{MarshalError, Result};
use crate::marshal::mapping::{fields_attributes, int_field, read_fields, write_fields};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{Date, DateTime, Temporal, Time, TimeDelta, TimeZone, Value};
use crate::session::Session;
use crate::storage::NodeId;

const DATE_TAG: &str = "datetime.date";
const TIME_TAG: &str = "datetime.time";
const DATETIME_TAG: &str = "datetime.datetime";
const TIMEDELTA_TAG: &str = "datetime.timedelta";
const TIMEZONE_TAG: &str = "datetime.timezone";

const DATE_FIELDS: &[&str] = &["year", "month", "day"];
const TIME_FIELDS: &[&str] = &["hour", "minute", "second", "microsecond", "tzinfo"];
const DATETIME_FIELDS: &[&str] = &[
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "microsecond",
    "tzinfo",
];
const TIMEDELTA_FIELDS: &[&str] = &["days", "seconds", "microseconds"];
const TIMEZONE_FIELDS: &[&str] = &["offset", "name"];

pub struct TemporalMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for TemporalMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporalMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type(DATE_TAG, DATE_TAG)
                .with_type(TIME_TAG, TIME_TAG)
                .with_type(DATETIME_TAG, DATETIME_TAG)
                .with_type(TIMEDELTA_TAG, TIMEDELTA_TAG)
                .with_type(TIMEZONE_TAG, TIMEZONE_TAG),
        }
    }
}

fn date_values(date: &Date) -> Vec<Value> {
    vec![
        Value::Int(i64::from(date.year)),
        Value::Int(i64::from(date.month)),
        Value::Int(i64::from(date.day)),
    ]
}

fn time_values(time: &Time) -> Vec<Value> {
    vec![
        Value::Int(i64::from(time.hour)),
        Value::Int(i64::from(time.minute)),
        Value::Int(i64::from(time.second)),
        Value::Int(i64::from(time.microsecond)),
        time.tz
            .clone()
            .map_or_else(Value::none, |tz| Value::Temporal(Temporal::TimeZone(tz))),
    ]
}

/// Component names and values of a calendar value, in storage order.
fn components(value: &Temporal) -> (&'static [&'static str], Vec<Value>) {
    match value {
        Temporal::Date(date) => (DATE_FIELDS, date_values(date)),
        Temporal::Time(time) => (TIME_FIELDS, time_values(time)),
        Temporal::DateTime(dt) => {
            let mut values = date_values(&dt.date);
            values.extend(time_values(&dt.time));
            (DATETIME_FIELDS, values)
        }
        Temporal::TimeDelta(delta) => (
            TIMEDELTA_FIELDS,
            vec![
                Value::Int(delta.days()),
                Value::Int(delta.seconds()),
                Value::Int(delta.microseconds()),
            ],
        ),
        Temporal::TimeZone(tz) => (
            TIMEZONE_FIELDS,
            vec![
                Value::Temporal(Temporal::TimeDelta(tz.offset)),
                tz.name.clone().map_or_else(Value::none, Value::Str),
            ],
        ),
    }
}

/// Checked conversion of stored components.
struct Components<'s, 'a> {
    session: &'s Session<'a>,
    group: NodeId,
}

impl Components<'_, '_> {
    fn int<T: TryFrom<i64>>(&self, name: &str, value: &Value) -> Result<T> {
        let raw = int_field(self.session, self.group, name, value)?;
        T::try_from(raw).map_err(|_| self.invalid(format!("{} {} is out of range", name, raw)))
    }

    fn invalid(&self, reason: impl Into<String>) -> MarshalError {
        MarshalError::corrupt(self.session.node_path(self.group), reason)
    }

    fn date(&self, values: &[Value]) -> Result<Date> {
        Date::new(
            self.int("year", &values[0])?,
            self.int("month", &values[1])?,
            self.int("day", &values[2])?,
        )
        .ok_or_else(|| self.invalid("invalid calendar date"))
    }

    fn time(&self, values: &[Value]) -> Result<Time> {
        let tz = match &values[4] {
            Value::Null(_) => None,
            Value::Temporal(Temporal::TimeZone(tz)) => Some(tz.clone()),
            other => {
                return Err(self.invalid(format!("tzinfo holds {}", other.type_path())));
            }
        };
        Time::new(
            self.int("hour", &values[0])?,
            self.int("minute", &values[1])?,
            self.int("second", &values[2])?,
            self.int("microsecond", &values[3])?,
            tz,
        )
        .ok_or_else(|| self.invalid("invalid time of day"))
    }
}

impl Marshaller for TemporalMarshaller {
    fn descriptor(&self) -> &MarshallerDescriptor {
        &self.descriptor
    }

    fn write(
        &self,
        session: &mut Session<'_>,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>> {
        let Value::Temporal(temporal) = value else {
            return Err(wrong_family("calendar", value));
        };
        let (names, values) = components(temporal);
        let fields: Vec<(&str, &Value)> = names.iter().copied().zip(&values).collect();
        let (group, _) = write_fields(session, parent, name, &fields)?;
        Ok(Some(group))
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let Value::Temporal(temporal) = value else {
            return Err(wrong_family("calendar", value));
        };
        let mut set = base_attributes(session, &self.descriptor, value)?;
        let (names, _) = components(temporal);
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        fields_attributes(session.options(), &names, &mut set);
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let tag = session.python_string(node, attrs::TYPE)?.unwrap_or_default();
        let names: &[&str] = match tag.as_str() {
            DATE_TAG => DATE_FIELDS,
            TIME_TAG => TIME_FIELDS,
            DATETIME_TAG => DATETIME_FIELDS,
            TIMEDELTA_TAG => TIMEDELTA_FIELDS,
            TIMEZONE_TAG => TIMEZONE_FIELDS,
            other => {
                return Err(MarshalError::corrupt(
                    session.node_path(node),
                    format!("unknown calendar tag {:?}", other),
                ));
            }
        };
        let values = read_fields(session, node, names)?;
        let parts = Components {
            session,
            group: node,
        };
        let temporal = match tag.as_str() {
            DATE_TAG => Temporal::Date(parts.date(&values)?),
            TIME_TAG => Temporal::Time(parts.time(&values)?),
            DATETIME_TAG => Temporal::DateTime(DateTime {
                date: parts.date(&values[..3])?,
                time: parts.time(&values[3..])?,
            }),
            TIMEDELTA_TAG => Temporal::TimeDelta(TimeDelta::new(
                parts.int("days", &values[0])?,
                parts.int("seconds", &values[1])?,
                parts.int("microseconds", &values[2])?,
            )),
            _ => {
                let Value::Temporal(Temporal::TimeDelta(offset)) = &values[0] else {
                    return Err(parts.invalid("time zone offset is not a duration"));
                };
                let name = match &values[1] {
                    Value::Null(_) => None,
                    Value::Str(s) => Some(s.clone()),
                    other => {
                        return Err(parts.invalid(format!("time zone name holds {}", other.type_path())));
                    }
                };
                Temporal::TimeZone(
                    TimeZone::new(*offset, name)
                        .ok_or_else(|| parts.invalid("time zone offset exceeds one day"))?,
                )
            }
        };
        Ok(Value::Temporal(temporal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::storage::{MemoryFile, Storage};

    fn roundtrip(options: &Options, value: &Value) -> Result<Value> {
        let mut file = MemoryFile::new();
        let root = file.root();
        let mut session = Session::new(&mut file, options);
        session.write_data(root, "t", value)?;
        session.read_data(root, "t")
    }

    #[test]
    fn test_calendar_values_roundtrip() {
        let tz = TimeZone::new(TimeDelta::from_seconds(-5 * 3600), Some("EST".into())).unwrap();
        let date = Date::new(2024, 2, 29).unwrap();
        let time = Time::new(13, 45, 7, 250, Some(tz.clone())).unwrap();
        let values = [
            Temporal::Date(date),
            Temporal::Time(time.clone()),
            Temporal::Time(Time::new(0, 0, 0, 0, None).unwrap()),
            Temporal::DateTime(DateTime { date, time }),
            Temporal::TimeDelta(TimeDelta::new(-3, 10, 5)),
            Temporal::TimeZone(tz),
            Temporal::TimeZone(TimeZone::utc()),
        ];
        for options in [Options::new(), Options::plain()] {
            for value in &values {
                let value = Value::Temporal(value.clone());
                assert_eq!(roundtrip(&options, &value).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_invalid_stored_date_is_corrupt() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        let date = Value::Temporal(Temporal::Date(Date::new(2023, 1, 31).unwrap()));
        let group = session.write_data(root, "d", &date).unwrap().unwrap();
        session.write_data(group, "month", &Value::Int(2)).unwrap();
        assert!(matches!(
            session.read_data(root, "d"),
            Err(MarshalError::CorruptMetadata { .. })
        ));
    }
}

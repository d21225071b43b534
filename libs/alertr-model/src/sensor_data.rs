//! Sensor data values
//!
//! Every sensor declares a [`SensorDataType`]; the value it carries must match it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared data type of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorDataType {
    #[default]
    None,
    Int,
    Float,
    Gps,
}

impl std::fmt::Display for SensorDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Int => "int",
            Self::Float => "float",
            Self::Gps => "gps",
        };
        f.write_str(name)
    }
}

/// GPS position reported by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsPosition {
    pub lat: f64,
    pub lon: f64,
    /// Unix timestamp of the fix
    pub utc_time: i64,
}

/// Value carried by a sensor
///
/// Serialized without a tag; the accompanying `dataType` field tells readers
/// how to interpret it. Use [`SensorData::from_value`] to read a value back
/// against its declared type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorData {
    #[default]
    None,
    Int(i64),
    Float(f64),
    Gps(GpsPosition),
}

impl SensorData {
    pub fn data_type(&self) -> SensorDataType {
        match self {
            Self::None => SensorDataType::None,
            Self::Int(_) => SensorDataType::Int,
            Self::Float(_) => SensorDataType::Float,
            Self::Gps(_) => SensorDataType::Gps,
        }
    }

    /// Interpret a JSON value as data of the given type
    ///
    /// Integers are accepted for float sensors. Returns `None` if the value
    /// does not fit the type.
    pub fn from_value(data_type: SensorDataType, value: &Value) -> Option<Self> {
        match data_type {
            SensorDataType::None => value.is_null().then_some(Self::None),
            SensorDataType::Int => value.as_i64().map(Self::Int),
            SensorDataType::Float => value.as_f64().map(Self::Float),
            SensorDataType::Gps => serde_json::from_value(value.clone()).ok().map(Self::Gps),
        }
    }

    /// Whether this value is a valid payload for `data_type`
    pub fn fits(&self, data_type: SensorDataType) -> bool {
        self.data_type() == data_type
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_int_for_float() {
        assert_eq!(
            SensorData::from_value(SensorDataType::Float, &json!(3)),
            Some(SensorData::Float(3.0))
        );
        assert_eq!(
            SensorData::from_value(SensorDataType::Int, &json!(2.5)),
            None
        );
    }

    #[test]
    fn test_none_requires_null() {
        assert_eq!(
            SensorData::from_value(SensorDataType::None, &Value::Null),
            Some(SensorData::None)
        );
        assert_eq!(SensorData::from_value(SensorDataType::None, &json!(1)), None);
    }

    #[test]
    fn test_gps_value() {
        let value = json!({"lat": 52.5, "lon": 13.4, "utcTime": 1700000000});
        let data = SensorData::from_value(SensorDataType::Gps, &value).unwrap();
        assert_eq!(data.data_type(), SensorDataType::Gps);
        assert_eq!(serde_json::to_value(&data).unwrap(), value);
    }
}

//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::reading::SensorReading;
use crate::registry::BeaconRegistry;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Escape commas, equals signs and spaces in a tag value.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<&'static str, String>,
    pub field_set: BTreeMap<&'static str, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        for (key, value) in &self.tag_set {
            write!(fmt, ",{}={}", key, escape_tag(value))?;
        }

        let mut separator = " ";
        for (key, value) in &self.field_set {
            write!(fmt, "{separator}{key}={value}")?;
            separator = ",";
        }

        if let Some(nanos) = self
            .timestamp
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        {
            write!(fmt, " {}", nanos.as_nanos())?;
        }
        Ok(())
    }
}

/// InfluxDB line protocol formatter.
///
/// Emits one point per reading, tagged with the beacon address and, when
/// advertised, its name.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn to_data_point(&self, reading: &SensorReading) -> DataPoint {
        let mut tag_set = BTreeMap::new();
        tag_set.insert("address", reading.address.to_string());
        if let Some(name) = reading.device_name.as_deref().filter(|n| !n.is_empty()) {
            tag_set.insert("name", name.to_string());
        }

        let mut field_set = BTreeMap::new();
        field_set.insert(
            "temperature",
            FieldValue::Float(reading.temperature_celsius),
        );
        field_set.insert(
            "light",
            FieldValue::Integer(reading.light_level_lux.into()),
        );
        field_set.insert(
            "rssi",
            FieldValue::Integer(reading.signal_strength_dbm.into()),
        );
        if let Some(humidity) = reading.humidity_raw {
            field_set.insert("humidity_raw", FieldValue::Integer(humidity.into()));
        }

        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set,
            field_set,
            timestamp: Some(reading.timestamp),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, reading: &SensorReading, _registry: &BeaconRegistry) -> String {
        self.to_data_point(reading).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, base_reading};
    use std::time::Duration;

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Float(21.5).to_string(), "21.5");
        assert_eq!(FieldValue::Integer(-67).to_string(), "-67i");
    }

    #[test]
    fn test_data_point_format() {
        let mut tag_set = BTreeMap::new();
        tag_set.insert("name", "Living Room,1".to_string());

        let mut field_set = BTreeMap::new();
        field_set.insert("temperature", FieldValue::Float(32.0));
        field_set.insert("light", FieldValue::Integer(7));

        let data_point = DataPoint {
            measurement: "test".to_string(),
            tag_set,
            field_set,
            timestamp: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000)),
        };

        assert_eq!(
            data_point.to_string(),
            "test,name=Living\\ Room\\,1 light=7i,temperature=32 1000000000000000000"
        );
    }

    #[test]
    fn test_data_point_without_timestamp() {
        let mut field_set = BTreeMap::new();
        field_set.insert("rssi", FieldValue::Integer(-40));

        let data_point = DataPoint {
            measurement: "test".to_string(),
            tag_set: BTreeMap::new(),
            field_set,
            timestamp: None,
        };
        assert_eq!(data_point.to_string(), "test rssi=-40i");
    }

    #[test]
    fn test_formatter_named_reading() {
        let mut reading = base_reading(TEST_ADDRESS);
        reading.device_name = Some("Climate_8B6".into());
        reading.humidity_raw = Some(0x6A10);

        let line = InfluxDbFormatter::new("climate_beacon".into())
            .format(&reading, &BeaconRegistry::new());

        assert_eq!(
            line,
            "climate_beacon,address=AA:BB:CC:DD:EE:FF,name=Climate_8B6 \
             humidity_raw=27152i,light=120i,rssi=-70i,temperature=21.5 \
             1000000000000000000"
        );
    }

    #[test]
    fn test_formatter_omits_missing_name_and_humidity() {
        let reading = base_reading(TEST_ADDRESS);
        let line = InfluxDbFormatter::new("climate_beacon".into())
            .format(&reading, &BeaconRegistry::new());

        assert!(line.starts_with("climate_beacon,address=AA:BB:CC:DD:EE:FF "));
        assert!(!line.contains("name="));
        assert!(!line.contains("humidity_raw="));
    }
}

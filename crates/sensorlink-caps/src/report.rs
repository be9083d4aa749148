//! Capability report fields carried by a `Features` response.
//!
//! A report describes one sensor:
//!
//! ```text
//! sensor ␝ name current type limiter count value… ␝ name current …
//! ```
//!
//! where `␝` is the [`LIST_DELIM`] field and `type`/`limiter` are their
//! integer codes.

use sensorlink_frame::{Protocol, Sensor, LIST_DELIM};

use crate::error::ReportError;
use crate::feature::{DataType, Feature, Limiter};
use crate::registry::Capabilities;

/// Fields before the value list in each feature entry.
const ENTRY_FIXED_FIELDS: usize = 5;

/// Encode one sensor's capabilities as frame argument fields.
pub fn encode_report(capabilities: &Capabilities) -> Vec<String> {
    let mut fields = vec![capabilities.sensor().alias().to_string()];
    for feature in capabilities.features() {
        fields.push(LIST_DELIM.to_string());
        fields.push(feature.name.clone());
        fields.push(feature.current.clone());
        fields.push(feature.data_type.code().to_string());
        fields.push(feature.limiter.code().to_string());
        fields.push(feature.allowed_values.len().to_string());
        fields.extend(feature.allowed_values.iter().cloned());
    }
    fields
}

/// Decode a report back into capabilities.
pub fn decode_report(fields: &[String], protocol: &Protocol) -> Result<Capabilities, ReportError> {
    let (sensor_name, rest) = fields.split_first().ok_or(ReportError::Empty)?;
    let sensor: Sensor = protocol
        .sensor(sensor_name)
        .ok_or_else(|| ReportError::UnknownSensor(sensor_name.clone()))?;

    let mut capabilities = Capabilities::new(sensor);
    if rest.is_empty() {
        return Ok(capabilities);
    }
    if rest[0] != LIST_DELIM {
        return Err(ReportError::BadField {
            field: "separator",
            value: rest[0].clone(),
        });
    }

    for entry in rest[1..].split(|field| field == LIST_DELIM) {
        capabilities.upsert(decode_entry(entry)?);
    }
    Ok(capabilities)
}

fn decode_entry(entry: &[String]) -> Result<Feature, ReportError> {
    if entry.len() < ENTRY_FIXED_FIELDS {
        return Err(ReportError::Truncated {
            expected: ENTRY_FIXED_FIELDS,
            found: entry.len(),
        });
    }

    let data_type = entry[2]
        .parse::<i32>()
        .ok()
        .and_then(DataType::from_code)
        .ok_or_else(|| bad("data_type", &entry[2]))?;
    let limiter = entry[3]
        .parse::<i32>()
        .ok()
        .and_then(Limiter::from_code)
        .ok_or_else(|| bad("limiter", &entry[3]))?;
    let count = entry[4]
        .parse::<usize>()
        .map_err(|_| bad("value_count", &entry[4]))?;

    let values = &entry[ENTRY_FIXED_FIELDS..];
    if values.len() != count {
        return Err(ReportError::Truncated {
            expected: ENTRY_FIXED_FIELDS + count,
            found: entry.len(),
        });
    }

    Ok(Feature::new(entry[0].clone(), data_type, limiter, values.to_vec())
        .with_current(entry[1].clone()))
}

fn bad(field: &'static str, value: &str) -> ReportError {
    ReportError::BadField {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_frame::{decode, encode, Decoded, Frame, ResponseKind};

    fn sample() -> Capabilities {
        let mut caps = Capabilities::new(Sensor::Camera);
        caps.upsert(
            Feature::new(
                "flash",
                DataType::String,
                Limiter::Set,
                vec!["Auto".into(), "On".into(), "Off".into()],
            )
            .with_current("Auto"),
        );
        caps.upsert(Feature::new("resolution", DataType::String, Limiter::Const, Vec::new()));
        caps
    }

    #[test]
    fn report_survives_the_wire() {
        let fields = encode_report(&sample());
        let frame = Frame::new(44, ResponseKind::Features.code()).with_args(fields);
        let decoded = decode(&encode(&frame).unwrap());
        let [Decoded::Frame(back)] = decoded.as_slice() else {
            panic!("expected one frame, got {decoded:?}");
        };

        let caps = decode_report(&back.args, &Protocol::standard()).unwrap();
        assert_eq!(caps, sample());
    }

    #[test]
    fn sensor_without_features() {
        let fields = encode_report(&Capabilities::new(Sensor::Location));
        assert_eq!(fields, ["location"]);
        let caps = decode_report(&fields, &Protocol::standard()).unwrap();
        assert!(caps.features().is_empty());
    }

    #[test]
    fn malformed_counts_are_rejected() {
        let mut fields = encode_report(&sample());
        // drop the last value of the flash entry's set
        let pos = fields.iter().position(|f| f == "Off").unwrap();
        fields.remove(pos);
        assert!(matches!(
            decode_report(&fields, &Protocol::standard()),
            Err(ReportError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let fields: Vec<String> = ["camera", LIST_DELIM, "iso", "100", "9", "0", "0"]
            .iter()
            .map(|f| f.to_string())
            .collect();
        assert!(matches!(
            decode_report(&fields, &Protocol::standard()),
            Err(ReportError::BadField {
                field: "data_type",
                ..
            })
        ));
        assert!(matches!(
            decode_report(&[], &Protocol::standard()),
            Err(ReportError::Empty)
        ));
    }
}

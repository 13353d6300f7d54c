use serde_json::{Map, Value};
use thiserror::Error;

use crate::tuya::structs::{DataType, DpValue};

/// Custom error types for value conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvError {
    #[error("Enum value {0} has no name mapping")]
    UnknownEnum(u32),
    #[error("Attribute value {0} has no wire representation")]
    UnknownAttr(String),
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

pub type DecodeFn = fn(&DpValue) -> Result<Value, ConvError>;
pub type EncodeFn = fn(&Value) -> Result<Vec<u8>, ConvError>;

#[derive(Clone, Copy)]
pub enum SubfieldKind {
    Unsigned,
    Lookup(&'static [(&'static str, u32)]),
}

/// One member of a composite datapoint, fixed offset and width in the buffer
#[derive(Clone, Copy)]
pub struct Subfield {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub divisor: f64,
    pub kind: SubfieldKind,
}

/// Conversion strategy between wire values and application values.
///
/// Converters are stateless and shared, all device state lives in the
/// reconstructor. `Custom` takes plain function pointers for the odd
/// device-specific encodings.
#[derive(Clone, Copy)]
pub enum ValueConverter {
    Raw,
    Scale { divisor: f64 },
    Lookup { table: &'static [(&'static str, u32)] },
    Composite { fields: &'static [Subfield] },
    Custom { decode: DecodeFn, encode: Option<EncodeFn> },
}

impl ValueConverter {
    pub fn from_wire(&self, value: &DpValue) -> Result<Value, ConvError> {
        match self {
            ValueConverter::Raw => {
                match value {
                    DpValue::Raw(data) => Ok(Value::String(hex::encode(data))),
                    DpValue::Bool(v) => Ok(Value::Bool(*v)),
                    DpValue::Value(v) => Ok(Value::from(*v)),
                    DpValue::String(s) => Ok(Value::String(s.clone())),
                    DpValue::Enum(v) => Ok(Value::from(*v)),
                    DpValue::Bitmap(v) => Ok(Value::from(*v)),
                }
            }
            ValueConverter::Scale { divisor } => {
                let raw = numeric(value)
                    .ok_or_else(|| ConvError::OutOfRange(format!("{value:?} is not numeric")))?;
                return Ok(Value::from(raw / divisor));
            }
            ValueConverter::Lookup { table } => {
                let raw = discriminant(value)
                    .ok_or_else(|| ConvError::OutOfRange(format!("{value:?} is not a discriminant")))?;
                for (name, disc) in table.iter() {
                    if *disc == raw {
                        return Ok(Value::String((*name).to_string()));
                    }
                }
                return Err(ConvError::UnknownEnum(raw));
            }
            ValueConverter::Composite { fields } => {
                let data = match value {
                    DpValue::Raw(d) => d,
                    _ => return Err(ConvError::OutOfRange(format!("composite needs raw bytes, got {value:?}"))),
                };

                let mut members = Map::new();
                for field in fields.iter() {
                    if data.len() < field.offset + field.width {
                        return Err(ConvError::OutOfRange(format!(
                            "composite buffer too short for {}, {} bytes", field.name, data.len())));
                    }

                    let mut raw: u32 = 0;
                    for byte in &data[field.offset..field.offset + field.width] {
                        raw = (raw << 8) | (*byte as u32);
                    }

                    let member = match field.kind {
                        SubfieldKind::Unsigned => {
                            if field.divisor == 1.0 {
                                Value::from(raw)
                            } else {
                                Value::from(raw as f64 / field.divisor)
                            }
                        }
                        SubfieldKind::Lookup(table) => {
                            match table.iter().find(|(_, disc)| *disc == raw) {
                                Some((name, _)) => Value::String((*name).to_string()),
                                None => return Err(ConvError::UnknownEnum(raw)),
                            }
                        }
                    };
                    members.insert(field.name.to_string(), member);
                }
                return Ok(Value::Object(members));
            }
            ValueConverter::Custom { decode, .. } => {
                return decode(value);
            }
        }
    }

    pub fn to_wire(&self, value: &Value, data_type: DataType) -> Result<Vec<u8>, ConvError> {
        match self {
            ValueConverter::Raw => {
                match data_type {
                    DataType::Bool => {
                        let v = value.as_bool()
                            .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                        return Ok(vec![v as u8]);
                    }
                    DataType::String => {
                        let v = value.as_str()
                            .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                        return Ok(v.as_bytes().to_vec());
                    }
                    DataType::Raw => {
                        let v = value.as_str()
                            .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                        return hex::decode(v)
                            .map_err(|_| ConvError::OutOfRange(format!("{v:?} is not a hex string")));
                    }
                    _ => {
                        let v = value.as_i64()
                            .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                        return integer_bytes(v, data_type);
                    }
                }
            }
            ValueConverter::Scale { divisor } => {
                let v = value.as_f64()
                    .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                let raw = (v * divisor).round();
                if !raw.is_finite() {
                    return Err(ConvError::OutOfRange(format!("{v} does not scale")));
                }
                return integer_bytes(raw as i64, data_type);
            }
            ValueConverter::Lookup { table } => {
                let name = value.as_str()
                    .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;
                for (candidate, disc) in table.iter() {
                    if *candidate == name {
                        return integer_bytes(*disc as i64, data_type);
                    }
                }
                return Err(ConvError::UnknownAttr(name.to_string()));
            }
            ValueConverter::Composite { fields } => {
                let members = value.as_object()
                    .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;

                let mut width = 0;
                for field in fields.iter() {
                    width = width.max(field.offset + field.width);
                }

                let mut data = vec![0u8; width];
                for field in fields.iter() {
                    let member = members.get(field.name)
                        .ok_or_else(|| ConvError::UnknownAttr(field.name.to_string()))?;

                    let raw: u32 = match field.kind {
                        SubfieldKind::Unsigned => {
                            let v = member.as_f64()
                                .ok_or_else(|| ConvError::UnknownAttr(field.name.to_string()))?;
                            let scaled = (v * field.divisor).round();
                            if scaled < 0.0 || scaled > subfield_max(field.width) {
                                return Err(ConvError::OutOfRange(format!("{} = {v} does not fit {} bytes", field.name, field.width)));
                            }
                            scaled as u32
                        }
                        SubfieldKind::Lookup(table) => {
                            let name = member.as_str()
                                .ok_or_else(|| ConvError::UnknownAttr(field.name.to_string()))?;
                            match table.iter().find(|(candidate, _)| *candidate == name) {
                                Some((_, disc)) => *disc,
                                None => return Err(ConvError::UnknownAttr(name.to_string())),
                            }
                        }
                    };

                    for i in 0..field.width {
                        data[field.offset + field.width - 1 - i] = ((raw >> (8 * i)) & 0xFF) as u8;
                    }
                }
                return Ok(data);
            }
            ValueConverter::Custom { encode, .. } => {
                match encode {
                    Some(encode) => encode(value),
                    None => Err(ConvError::UnknownAttr("attribute has no encoder".to_string())),
                }
            }
        }
    }
}

fn numeric(value: &DpValue) -> Option<f64> {
    match value {
        DpValue::Value(v) => Some(*v as f64),
        DpValue::Enum(v) => Some(*v as f64),
        DpValue::Bitmap(v) => Some(*v as f64),
        DpValue::Bool(v) => Some(*v as u8 as f64),
        _ => None,
    }
}

fn discriminant(value: &DpValue) -> Option<u32> {
    match value {
        DpValue::Enum(v) => Some(*v),
        DpValue::Bitmap(v) => Some(*v),
        DpValue::Bool(v) => Some(*v as u32),
        DpValue::Value(v) if *v >= 0 && *v <= u32::MAX as i64 => Some(*v as u32),
        _ => None,
    }
}

fn subfield_max(width: usize) -> f64 {
    return (u64::MAX >> (64 - 8 * width.min(4))) as f64;
}

fn integer_bytes(raw: i64, data_type: DataType) -> Result<Vec<u8>, ConvError> {
    match data_type {
        DataType::Value => {
            if raw < i32::MIN as i64 || raw > i32::MAX as i64 {
                return Err(ConvError::OutOfRange(format!("{raw} exceeds 32 bits")));
            }
            return Ok((raw as i32).to_be_bytes().to_vec());
        }
        DataType::Enum => {
            if !(0..=0xFF).contains(&raw) {
                return Err(ConvError::OutOfRange(format!("{raw} is no enum discriminant")));
            }
            return Ok(vec![raw as u8]);
        }
        DataType::Bool => {
            match raw {
                0 => Ok(vec![0x00]),
                1 => Ok(vec![0x01]),
                _ => Err(ConvError::OutOfRange(format!("{raw} is not a boolean"))),
            }
        }
        DataType::Bitmap => {
            if raw < 0 || raw > u32::MAX as i64 {
                return Err(ConvError::OutOfRange(format!("{raw} exceeds 32 bits")));
            }
            return Ok((raw as u32).to_be_bytes().to_vec());
        }
        _ => Err(ConvError::OutOfRange(format!("{data_type:?} is not an integer type"))),
    }
}

/* Thermostat weekly schedule: byte 0 selects the day, then four transitions
   of hour, minute and temperature times ten (u16 big endian). The text form
   is "HH:MM/temp" with the transitions joined by single spaces. */

pub fn schedule_from_wire(value: &DpValue) -> Result<Value, ConvError> {
    let data = match value {
        DpValue::Raw(d) => d,
        _ => return Err(ConvError::OutOfRange(format!("schedule needs raw bytes, got {value:?}"))),
    };
    if data.len() < 17 {
        return Err(ConvError::OutOfRange(format!("schedule payload has {} bytes, 17 needed", data.len())));
    }

    let mut transitions: Vec<String> = Vec::new();
    let mut pos = 1;
    for _ in 0..4 {
        let temperature = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as f64 / 10.0;
        transitions.push(format!("{:02}:{:02}/{}", data[pos], data[pos + 1], temperature));
        pos += 4;
    }
    return Ok(Value::String(transitions.join(" ")));
}

pub fn schedule_to_wire(value: &Value) -> Result<Vec<u8>, ConvError> {
    let text = value.as_str()
        .ok_or_else(|| ConvError::UnknownAttr(value.to_string()))?;

    let transitions: Vec<&str> = text.split_whitespace().collect();
    if transitions.len() != 4 {
        return Err(ConvError::OutOfRange(format!("schedule needs exactly 4 transitions, got {}", transitions.len())));
    }

    let mut data: Vec<u8> = vec![0x00];
    for transition in transitions {
        let (time, temperature) = transition.split_once('/')
            .ok_or_else(|| ConvError::OutOfRange(format!("transition {transition:?} misses the temperature")))?;
        let (hour, minute) = time.split_once(':')
            .ok_or_else(|| ConvError::OutOfRange(format!("transition {transition:?} misses the minute")))?;

        let hour: u8 = hour.parse()
            .map_err(|_| ConvError::OutOfRange(format!("bad hour in {transition:?}")))?;
        let minute: u8 = minute.parse()
            .map_err(|_| ConvError::OutOfRange(format!("bad minute in {transition:?}")))?;
        let temperature: f64 = temperature.parse()
            .map_err(|_| ConvError::OutOfRange(format!("bad temperature in {transition:?}")))?;
        let temperature = (temperature * 10.0).round() as i64;

        if minute > 59 {
            return Err(ConvError::OutOfRange(format!("minute {minute} out of range")));
        }
        /* 24:00 marks the end of the day, anything past it does not exist */
        if hour > 24 || (hour == 24 && minute != 0) {
            return Err(ConvError::OutOfRange(format!("time {hour}:{minute:02} out of range")));
        }
        if !(50..=300).contains(&temperature) {
            return Err(ConvError::OutOfRange(format!("temperature {} out of range", temperature as f64 / 10.0)));
        }

        data.push(hour);
        data.push(minute);
        data.extend_from_slice(&(temperature as u16).to_be_bytes());
    }
    return Ok(data);
}

#[cfg(test)]
mod converter_tests {
    use super::*;
    use serde_json::json;

    const BREAKER_STATE: &[(&str, u32)] = &[
        ("closed", 0),
        ("open", 1),
        ("leakage_trip", 2),
    ];

    const THRESHOLD_FIELDS: &[Subfield] = &[
        Subfield { name: "threshold_1_kind", offset: 0, width: 1, divisor: 1.0,
                   kind: SubfieldKind::Lookup(&[("not_set", 0), ("over_current", 1), ("over_voltage", 3)]) },
        Subfield { name: "threshold_1_protection", offset: 1, width: 1, divisor: 1.0,
                   kind: SubfieldKind::Lookup(&[("OFF", 0), ("ON", 1)]) },
        Subfield { name: "threshold_1_value", offset: 2, width: 2, divisor: 1.0,
                   kind: SubfieldKind::Unsigned },
        Subfield { name: "threshold_2_kind", offset: 4, width: 1, divisor: 1.0,
                   kind: SubfieldKind::Lookup(&[("not_set", 0), ("over_current", 1), ("over_voltage", 3)]) },
        Subfield { name: "threshold_2_protection", offset: 5, width: 1, divisor: 1.0,
                   kind: SubfieldKind::Lookup(&[("OFF", 0), ("ON", 1)]) },
        Subfield { name: "threshold_2_value", offset: 6, width: 2, divisor: 1.0,
                   kind: SubfieldKind::Unsigned },
    ];

    #[test]
    fn scale_divides_and_multiplies() {
        let conv = ValueConverter::Scale { divisor: 10.0 };
        assert_eq!(conv.from_wire(&DpValue::Value(500)).unwrap(), json!(50.0));
        assert_eq!(conv.to_wire(&json!(50.0), DataType::Value).unwrap(), vec![0x00, 0x00, 0x01, 0xF4]);

        let conv = ValueConverter::Scale { divisor: 1000.0 };
        assert_eq!(conv.from_wire(&DpValue::Value(1500)).unwrap(), json!(1.5));
        assert_eq!(conv.to_wire(&json!(1.5), DataType::Value).unwrap(), vec![0x00, 0x00, 0x05, 0xDC]);
    }

    #[test]
    fn scale_keeps_the_sign() {
        /* Temperature calibration goes down to -9.9 degrees */
        let conv = ValueConverter::Scale { divisor: 10.0 };
        assert_eq!(conv.from_wire(&DpValue::Value(-15)).unwrap(), json!(-1.5));
        assert_eq!(conv.to_wire(&json!(-1.5), DataType::Value).unwrap(), vec![0xFF, 0xFF, 0xFF, 0xF1]);
    }

    #[test]
    fn scale_rejects_oversized_values() {
        let conv = ValueConverter::Scale { divisor: 100.0 };
        assert!(matches!(conv.to_wire(&json!(1e9), DataType::Value), Err(ConvError::OutOfRange(_))));
        assert!(matches!(conv.to_wire(&json!(300), DataType::Enum), Err(ConvError::OutOfRange(_))));
    }

    #[test]
    fn lookup_is_bidirectional() {
        let conv = ValueConverter::Lookup { table: BREAKER_STATE };
        assert_eq!(conv.from_wire(&DpValue::Enum(2)).unwrap(), json!("leakage_trip"));
        assert_eq!(conv.to_wire(&json!("open"), DataType::Enum).unwrap(), vec![0x01]);
    }

    #[test]
    fn lookup_signals_unknown_values() {
        let conv = ValueConverter::Lookup { table: BREAKER_STATE };
        assert_eq!(conv.from_wire(&DpValue::Enum(7)), Err(ConvError::UnknownEnum(7)));
        assert_eq!(conv.to_wire(&json!("molten"), DataType::Enum), Err(ConvError::UnknownAttr("molten".to_string())));
    }

    #[test]
    fn raw_passes_values_through() {
        let conv = ValueConverter::Raw;
        assert_eq!(conv.from_wire(&DpValue::Value(95)).unwrap(), json!(95));
        assert_eq!(conv.from_wire(&DpValue::Bool(true)).unwrap(), json!(true));
        assert_eq!(conv.from_wire(&DpValue::Raw(vec![0xDE, 0xAD])).unwrap(), json!("dead"));

        assert_eq!(conv.to_wire(&json!(true), DataType::Bool).unwrap(), vec![0x01]);
        assert_eq!(conv.to_wire(&json!("dead"), DataType::Raw).unwrap(), vec![0xDE, 0xAD]);
    }

    #[test]
    fn composite_unpacks_the_threshold_buffer() {
        let conv = ValueConverter::Composite { fields: THRESHOLD_FIELDS };
        let wire = vec![
            0x01, /* kind, over_current   */
            0x01, /* protection, ON       */
            0x00, /* value MSB            */
            0x28, /* value LSB, 40        */
            0x03, /* kind, over_voltage   */
            0x00, /* protection, OFF      */
            0x01, /* value MSB            */
            0x0E, /* value LSB, 270       */
        ];

        let decoded = conv.from_wire(&DpValue::Raw(wire.clone())).unwrap();
        assert_eq!(decoded, json!({
            "threshold_1_kind": "over_current",
            "threshold_1_protection": "ON",
            "threshold_1_value": 40,
            "threshold_2_kind": "over_voltage",
            "threshold_2_protection": "OFF",
            "threshold_2_value": 270,
        }));

        /* Whatever from_wire produced has to pack back into the same bytes */
        assert_eq!(conv.to_wire(&decoded, DataType::Raw).unwrap(), wire);
    }

    #[test]
    fn composite_rejects_short_buffers() {
        let conv = ValueConverter::Composite { fields: THRESHOLD_FIELDS };
        let result = conv.from_wire(&DpValue::Raw(vec![0x01, 0x01, 0x00]));
        assert!(matches!(result, Err(ConvError::OutOfRange(_))));
    }

    #[test]
    fn schedule_round_trips() {
        let conv = ValueConverter::Custom { decode: schedule_from_wire, encode: Some(schedule_to_wire) };
        let wire = vec![
            0x00, /* day selector          */
            0x06, /* hour                  */
            0x00, /* minute                */
            0x00, /* temperature MSB       */
            0xC8, /* temperature LSB, 20.0 */
            0x0B, /* hour                  */
            0x1E, /* minute                */
            0x00, /* temperature MSB       */
            0xD7, /* temperature LSB, 21.5 */
            0x0D, /* hour                  */
            0x1E, /* minute                */
            0x00, /* temperature MSB       */
            0xB4, /* temperature LSB, 18.0 */
            0x11, /* hour                  */
            0x1E, /* minute                */
            0x00, /* temperature MSB       */
            0xDC, /* temperature LSB, 22.0 */
        ];

        let decoded = conv.from_wire(&DpValue::Raw(wire.clone())).unwrap();
        assert_eq!(decoded, json!("06:00/20 11:30/21.5 13:30/18 17:30/22"));
        assert_eq!(conv.to_wire(&decoded, DataType::Raw).unwrap(), wire);
    }

    #[test]
    fn schedule_rejects_bad_input() {
        let conv = ValueConverter::Custom { decode: schedule_from_wire, encode: Some(schedule_to_wire) };

        /* Three transitions instead of four */
        assert!(conv.to_wire(&json!("06:00/20 11:30/21.5 13:30/18"), DataType::Raw).is_err());
        /* Hour 25 does not exist */
        assert!(conv.to_wire(&json!("25:00/20 11:30/21.5 13:30/18 17:30/22"), DataType::Raw).is_err());
        /* 35 degrees exceeds the valve limit of 30 */
        assert!(conv.to_wire(&json!("06:00/35 11:30/21.5 13:30/18 17:30/22"), DataType::Raw).is_err());
    }

    #[test]
    fn schedule_enforces_the_time_boundaries() {
        let conv = ValueConverter::Custom { decode: schedule_from_wire, encode: Some(schedule_to_wire) };

        /* Minutes run 0 to 59 */
        assert!(conv.to_wire(&json!("06:60/20 11:30/21.5 13:30/18 17:30/22"), DataType::Raw).is_err());
        assert!(conv.to_wire(&json!("06:59/20 11:30/21.5 13:30/18 17:30/22"), DataType::Raw).is_ok());

        /* 24:00 is the last valid instant of the day */
        assert!(conv.to_wire(&json!("06:00/20 11:30/21.5 13:30/18 24:00/22"), DataType::Raw).is_ok());
        assert!(conv.to_wire(&json!("06:00/20 11:30/21.5 13:30/18 24:30/22"), DataType::Raw).is_err());
    }

    #[test]
    fn custom_without_encoder_fails() {
        let conv = ValueConverter::Custom { decode: schedule_from_wire, encode: None };
        assert!(matches!(conv.to_wire(&json!("x"), DataType::Raw), Err(ConvError::UnknownAttr(_))));
    }
}

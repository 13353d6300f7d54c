use serde::Deserialize;

use crate::tuya::codec::CodecError;

/* All Tuya datapoint traffic is tunneled through this one vendor cluster */
pub const TUYA_CLUSTER: &str = "manuSpecificTuya";

/* Downlink command names understood by the coordinator daemon */
pub const CMD_DATA_REQUEST: &str = "dataRequest";
pub const CMD_DATA_QUERY: &str = "dataQuery";
pub const CMD_MCU_VERSION_REQUEST: &str = "mcuVersionRequest";
pub const CMD_MCU_SYNC_TIME: &str = "mcuSyncTime";
pub const CMD_MCU_GATEWAY_STATUS: &str = "mcuGatewayConnectionStatus";

/// Wire type tag of a datapoint record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Raw = 0x00,
    Bool = 0x01,
    Value = 0x02,
    String = 0x03,
    Enum = 0x04,
    Bitmap = 0x05,
}

impl DataType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(DataType::Raw),
            0x01 => Some(DataType::Bool),
            0x02 => Some(DataType::Value),
            0x03 => Some(DataType::String),
            0x04 => Some(DataType::Enum),
            0x05 => Some(DataType::Bitmap),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        return *self as u8;
    }
}

/// One datapoint record as it appears on the wire, untyped payload
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub dp: u8,
    pub type_tag: u8,
    pub data: Vec<u8>,
}

impl Datapoint {
    pub fn new(dp: u8, data_type: DataType, data: Vec<u8>) -> Self {
        return Datapoint {
            dp: dp,
            type_tag: data_type.to_u8(),
            data: data,
        };
    }

    pub fn data_type(&self) -> Result<DataType, CodecError> {
        match DataType::from_u8(self.type_tag) {
            Some(t) => Ok(t),
            None => Err(CodecError::UnknownType(self.type_tag)),
        }
    }

    /// Typed view of the payload. Typing is done lazily so a record with an
    /// unknown tag only fails here, without dragging its siblings down.
    pub fn value(&self) -> Result<DpValue, CodecError> {
        let data_type = self.data_type()?;

        match data_type {
            DataType::Raw => {
                return Ok(DpValue::Raw(self.data.clone()));
            }
            DataType::Bool => {
                if self.data.is_empty() {
                    return Err(CodecError::Truncated { offset: 0, needed: 1 });
                }
                return Ok(DpValue::Bool(self.data[0] != 0));
            }
            DataType::Value => {
                /* The regular form is a 4 byte two's complement integer. A few
                   MCUs send shorter values, those never carry a sign. */
                if self.data.len() == 4 {
                    let raw = i32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
                    return Ok(DpValue::Value(raw as i64));
                }
                let mut value: i64 = 0;
                for byte in self.data.iter().take(7) {
                    value = (value << 8) | (*byte as i64);
                }
                return Ok(DpValue::Value(value));
            }
            DataType::String => {
                return Ok(DpValue::String(String::from_utf8_lossy(&self.data).to_string()));
            }
            DataType::Enum => {
                if self.data.is_empty() {
                    return Err(CodecError::Truncated { offset: 0, needed: 1 });
                }
                return Ok(DpValue::Enum(self.data[0] as u32));
            }
            DataType::Bitmap => {
                let mut value: u32 = 0;
                for byte in self.data.iter().take(4) {
                    value = (value << 8) | (*byte as u32);
                }
                return Ok(DpValue::Bitmap(value));
            }
        }
    }
}

/// Decoded datapoint payload
#[derive(Debug, Clone, PartialEq)]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i64),
    String(String),
    Enum(u32),
    Bitmap(u32),
}

/// Uplink command names the coordinator daemon forwards to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuyaCommand {
    DataReport,
    DataResponse,
    ActiveStatusReport,
    ActiveStatusReportAlt,
    McuSyncTime,
    McuVersionResponse,
    McuGatewayConnectionStatus,
    Unknown,
}

impl TuyaCommand {
    pub fn from_str(s: &str) -> Self {
        match s {
            "commandDataReport" => TuyaCommand::DataReport,
            "commandDataResponse" => TuyaCommand::DataResponse,
            "commandActiveStatusReport" => TuyaCommand::ActiveStatusReport,
            "commandActiveStatusReportAlt" => TuyaCommand::ActiveStatusReportAlt,
            "commandMcuSyncTime" => TuyaCommand::McuSyncTime,
            "commandMcuVersionResponse" => TuyaCommand::McuVersionResponse,
            "commandMcuGatewayConnectionStatus" => TuyaCommand::McuGatewayConnectionStatus,
            _ => TuyaCommand::Unknown,
        }
    }

    /// Whether the payload of this command starts with datapoint records
    /// preceded by the rolling u16 sequence counter
    pub fn carries_datapoints(&self) -> bool {
        match self {
            TuyaCommand::DataReport => true,
            TuyaCommand::DataResponse => true,
            TuyaCommand::ActiveStatusReport => true,
            TuyaCommand::ActiveStatusReportAlt => true,
            _ => false,
        }
    }
}

/// One uplink message as published by the coordinator daemon on zigbee_rx
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkMessage {
    pub device: String,
    #[serde(rename = "type")]
    pub command: String,
    pub payload: String,
}

/// One downlink command for the coordinator daemon to transmit
#[derive(Debug, Clone, PartialEq)]
pub struct WireCommand {
    pub cluster: &'static str,
    pub command: &'static str,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod datapoint_tests {
    use super::*;

    #[test]
    fn type_tags_round_trip() {
        for tag in 0x00..=0x05 {
            let data_type = DataType::from_u8(tag).unwrap();
            assert_eq!(data_type.to_u8(), tag);
        }
        assert_eq!(DataType::from_u8(0x06), None);
        assert_eq!(DataType::from_u8(0xff), None);
    }

    #[test]
    fn four_byte_values_are_signed() {
        let dp = Datapoint::new(27, DataType::Value, vec![0xFF, 0xFF, 0xFF, 0xF1]);
        assert_eq!(dp.value().unwrap(), DpValue::Value(-15));

        let dp = Datapoint::new(101, DataType::Value, vec![0x00, 0x00, 0x01, 0xF4]);
        assert_eq!(dp.value().unwrap(), DpValue::Value(500));
    }

    #[test]
    fn short_values_stay_unsigned() {
        let dp = Datapoint::new(110, DataType::Value, vec![0xFF]);
        assert_eq!(dp.value().unwrap(), DpValue::Value(255));

        let dp = Datapoint::new(110, DataType::Value, vec![0xFF, 0xFF]);
        assert_eq!(dp.value().unwrap(), DpValue::Value(65535));
    }

    #[test]
    fn unknown_tag_fails_on_typing_only() {
        let dp = Datapoint { dp: 1, type_tag: 0x07, data: vec![0x01] };
        assert_eq!(dp.value(), Err(CodecError::UnknownType(0x07)));
    }

    #[test]
    fn empty_bool_and_enum_are_rejected() {
        let dp = Datapoint::new(16, DataType::Bool, Vec::new());
        assert!(dp.value().is_err());

        let dp = Datapoint::new(102, DataType::Enum, Vec::new());
        assert!(dp.value().is_err());
    }

    #[test]
    fn command_names_map() {
        assert_eq!(TuyaCommand::from_str("commandDataReport"), TuyaCommand::DataReport);
        assert_eq!(TuyaCommand::from_str("commandMcuSyncTime"), TuyaCommand::McuSyncTime);
        assert_eq!(TuyaCommand::from_str("somethingElse"), TuyaCommand::Unknown);

        assert!(TuyaCommand::DataReport.carries_datapoints());
        assert!(TuyaCommand::ActiveStatusReportAlt.carries_datapoints());
        assert!(!TuyaCommand::McuSyncTime.carries_datapoints());
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tuya::bindings::{BindingTarget, Channel, MeterField, ModelDefinition};
use crate::tuya::codec::{self, CodecError};
use crate::tuya::converters::{ConvError, ValueConverter};
use crate::tuya::reconstructor::{DeviceProtocolState, MeterReading, SeqCheck};
use crate::tuya::structs::{Datapoint, TuyaCommand, WireCommand, CMD_DATA_REQUEST, TUYA_CLUSTER};

/// Custom error types for outbound dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No binding exposes attribute {0}")]
    NoBinding(String),
    #[error("Attribute {0} is read only")]
    ReadOnly(String),
    #[error(transparent)]
    Conv(#[from] ConvError),
}

/// Routes decoded datapoints between the codec, the converter library and the
/// per-device reconstructor state.
///
/// The registry hands out one lock per device, messages of one device are
/// applied strictly in arrival order while other devices stay independent.
pub struct Dispatcher {
    states: RwLock<HashMap<String, Arc<Mutex<DeviceProtocolState>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        return Dispatcher {
            states: RwLock::new(HashMap::new()),
        };
    }

    /* Lazily creates the state slot on the first frame of a device */
    fn state_for(&self, device: &str, definition: &ModelDefinition) -> Arc<Mutex<DeviceProtocolState>> {
        {
            let states = self.states.read().unwrap();
            if let Some(state) = states.get(device) {
                return state.clone();
            }
        }

        let mut states = self.states.write().unwrap();
        return states
            .entry(device.to_string())
            .or_insert_with(|| {
                debug!("Creating protocol state for {device}");
                Arc::new(Mutex::new(DeviceProtocolState::new(
                    definition.seq_increment,
                    [definition.meter_options(Channel::A), definition.meter_options(Channel::B)],
                )))
            })
            .clone();
    }

    /// Drops the protocol state of a removed device
    pub fn forget_device(&self, device: &str) {
        self.states.write().unwrap().remove(device);
    }

    /// Decodes one inbound cluster payload and returns the merged attribute
    /// map of all direct values and channel flushes it produced.
    ///
    /// A malformed envelope fails the whole message. Everything below that,
    /// an unknown type tag, a missing binding or a conversion error, only
    /// skips the affected record.
    pub fn handle_inbound(
        &self,
        device: &str,
        definition: &ModelDefinition,
        command: TuyaCommand,
        payload: &[u8],
    ) -> Result<Map<String, Value>, CodecError> {
        let (seq, datapoints) = codec::decode(payload, command.carries_datapoints())?;

        let state = self.state_for(device, definition);
        let mut state = state.lock().unwrap();

        let mut result = Map::new();

        if definition.has_meter_bindings() {
            if let Some(seq) = seq {
                match state.check_sequence(seq) {
                    SeqCheck::Accept => {}
                    /* A torn or replayed burst poisons the whole message,
                       the direct datapoints in it are stale too */
                    SeqCheck::Duplicate | SeqCheck::Loss => {
                        return Ok(result);
                    }
                }
            }
        }

        for datapoint in datapoints.iter() {
            let Some(binding) = definition.binding_for_dp(datapoint.dp) else {
                debug!("{device}: no binding for dp {}, skipping", datapoint.dp);
                continue;
            };

            /* Declared ignore row */
            if binding.attribute.is_none() && matches!(binding.converter, ValueConverter::Raw) {
                continue;
            }

            let value = match datapoint.value() {
                Ok(value) => value,
                Err(e) => {
                    warn!("{device}: dp {} not decodable: {e}", datapoint.dp);
                    continue;
                }
            };

            let converted = match binding.converter.from_wire(&value) {
                Ok(converted) => converted,
                Err(e) => {
                    warn!("{device}: dp {} not convertible: {e}", datapoint.dp);
                    continue;
                }
            };

            match binding.target {
                BindingTarget::Attribute => match binding.attribute {
                    Some(name) => {
                        result.insert(name.to_string(), converted);
                    }
                    None => {
                        /* Merge row, all object members land in the result */
                        if let Value::Object(members) = converted {
                            for (name, member) in members {
                                result.insert(name, member);
                            }
                        } else {
                            warn!("{device}: dp {} merge row produced no object", datapoint.dp);
                        }
                    }
                },
                BindingTarget::Meter { channel, field } => {
                    let Some(reading) = meter_reading(field, &converted) else {
                        warn!("{device}: dp {} is no usable {field:?} reading", datapoint.dp);
                        continue;
                    };
                    if let Some(mut flushed) = state.apply(channel, reading) {
                        result.append(&mut flushed);
                    }
                }
            }
        }

        return Ok(result);
    }

    /// Time sync requests advance the device's burst counter without carrying
    /// datapoints
    pub fn note_time_sync(&self, device: &str, definition: &ModelDefinition) {
        let state = self.state_for(device, definition);
        state.lock().unwrap().note_time_sync();
    }

    /// Encodes one attribute-set request into wire commands for the
    /// transport. Core state is never touched on the way out.
    pub fn handle_outbound(
        &self,
        definition: &ModelDefinition,
        attribute: &str,
        value: &Value,
    ) -> Result<Vec<WireCommand>, DispatchError> {
        let binding = definition
            .binding_for_attribute(attribute)
            .ok_or_else(|| DispatchError::NoBinding(attribute.to_string()))?;

        if !binding.options.settable {
            return Err(DispatchError::ReadOnly(attribute.to_string()));
        }

        let data = binding.converter.to_wire(value, binding.data_type)?;
        let datapoint = Datapoint::new(binding.dp, binding.data_type, data);

        /* Outgoing datapoint requests always go out with sequence 1 */
        return Ok(vec![WireCommand {
            cluster: TUYA_CLUSTER,
            command: CMD_DATA_REQUEST,
            payload: codec::encode_request(1, &[datapoint]),
        }]);
    }
}

fn meter_reading(field: MeterField, value: &Value) -> Option<MeterReading> {
    match field {
        MeterField::Power => value.as_f64().map(MeterReading::Power),
        MeterField::Current => value.as_f64().map(MeterReading::Current),
        MeterField::PowerFactor => value.as_f64().map(MeterReading::PowerFactor),
        MeterField::FlowDirection => match value.as_str() {
            Some("consuming") => Some(MeterReading::FlowDirection(1)),
            Some("producing") => Some(MeterReading::FlowDirection(-1)),
            _ => None,
        },
    }
}

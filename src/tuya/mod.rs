use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use hex;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc::Sender;

use crate::config::ConfigBases;
use crate::models::{DeviceProtocol, DeviceStatus};
use crate::mqtt::{publish_protocol_count, MeteringData, PublishData, SubscribeData, Transmission};
use crate::{get_config_or_panic, get_id, get_unix_ts, CONFIG};

pub mod bindings;
pub mod codec;
pub mod converters;
pub mod dispatcher;
pub mod model_definitions;
pub mod reconstructor;
pub mod structs;

use crate::tuya::bindings::ModelDefinition;
use crate::tuya::dispatcher::Dispatcher;
use crate::tuya::structs::{
    TuyaCommand, UplinkMessage, WireCommand, CMD_DATA_QUERY, CMD_MCU_SYNC_TIME,
    CMD_MCU_VERSION_REQUEST, CMD_MCU_GATEWAY_STATUS, TUYA_CLUSTER,
};

/// One configured bridge device
struct BridgeDevice {
    friendly_name: String,
    definition: Arc<ModelDefinition>,
    status: DeviceStatus,
}

/* The manager listens on several topics, everything funnels into one queue
   so frames of one device are applied strictly in arrival order */
enum TuyaInput {
    Uplink(String),
    Set(String, String),
    Get(String),
}

pub struct TuyaManager {
    sender: Sender<Transmission>,
    dispatcher: Dispatcher,
    tenant: String,
    /// Configured devices keyed by IEEE address
    devices: HashMap<String, BridgeDevice>,
}

impl TuyaManager {
    pub fn new(sender: Sender<Transmission>) -> Self {
        let general = get_config_or_panic!("general", ConfigBases::General);
        let config = get_config_or_panic!("tuya", ConfigBases::Tuya);

        let mut devices: HashMap<String, BridgeDevice> = HashMap::new();
        for device_config in config.devices {
            let Some(mut definition) = model_definitions::get_model_definition(&device_config.model) else {
                error!("Unknown Tuya model {} for {}, device skipped",
                       device_config.model, device_config.friendly_name);
                continue;
            };

            if let Some(increment) = device_config.seq_increment {
                definition.seq_increment = increment;
            }
            definition.apply_overrides(&device_config.options);

            devices.insert(device_config.ieee_address.clone(), BridgeDevice {
                friendly_name: device_config.friendly_name,
                definition: Arc::new(definition),
                status: DeviceStatus::Unknown,
            });
        }

        return TuyaManager {
            sender: sender,
            dispatcher: Dispatcher::new(),
            tenant: general.tenant,
            devices: devices,
        };
    }

    pub async fn start_thread(&mut self) {
        info!("Starting Tuya thread with {} devices", self.devices.len());
        publish_protocol_count(&self.sender, "tuya", self.devices.len() as u32).await;

        let (input_tx, mut input_rx) = tokio::sync::mpsc::channel::<TuyaInput>(32);

        /* Uplinks from the Zigbee coordinator daemon */
        let (sender, mut receiver) = tokio::sync::mpsc::channel(10);
        let register = Transmission::Subscribe(SubscribeData {
            topic: "zigbee_rx".to_string(),
            sender,
        });
        let _ = self.sender.send(register).await;

        let uplink_tx = input_tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let _ = uplink_tx.send(TuyaInput::Uplink(payload)).await;
            }
        });

        /* Per device attribute-set and poll topics */
        for (address, device) in self.devices.iter() {
            let (sender, mut receiver) = tokio::sync::mpsc::channel(10);
            let register = Transmission::Subscribe(SubscribeData {
                topic: format!("devs/{}/set", device.friendly_name),
                sender,
            });
            let _ = self.sender.send(register).await;

            let set_tx = input_tx.clone();
            let set_address = address.clone();
            tokio::spawn(async move {
                while let Some(payload) = receiver.recv().await {
                    let _ = set_tx.send(TuyaInput::Set(set_address.clone(), payload)).await;
                }
            });

            let (sender, mut receiver) = tokio::sync::mpsc::channel(10);
            let register = Transmission::Subscribe(SubscribeData {
                topic: format!("devs/{}/get", device.friendly_name),
                sender,
            });
            let _ = self.sender.send(register).await;

            let get_tx = input_tx.clone();
            let get_address = address.clone();
            tokio::spawn(async move {
                while let Some(_) = receiver.recv().await {
                    let _ = get_tx.send(TuyaInput::Get(get_address.clone())).await;
                }
            });
        }
        drop(input_tx);

        info!("Starting Tuya waiting for messages");
        while let Some(input) = input_rx.recv().await {
            match input {
                TuyaInput::Uplink(payload) => self.handle_uplink(&payload).await,
                TuyaInput::Set(address, payload) => self.handle_set(&address, &payload).await,
                TuyaInput::Get(address) => self.handle_get(&address).await,
            }
        }
    }

    async fn handle_uplink(&mut self, payload: &str) {
        let message: UplinkMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable uplink message: {e}");
                return;
            }
        };

        let Some(device) = self.devices.get_mut(&message.device) else {
            debug!("Uplink from unconfigured device {}", message.device);
            return;
        };

        let first_contact = device.status != DeviceStatus::Online;
        device.status = DeviceStatus::Online;
        let friendly_name = device.friendly_name.clone();
        let definition = device.definition.clone();

        if first_contact {
            let publish = PublishData {
                topic: format!("tuya2mqtt/devs/{friendly_name}/availability"),
                payload: device.status.to_string(),
                qos: 1,
                retain: true,
            };
            let _ = self.sender.send(Transmission::Publish(publish)).await;
        }

        let data = match hex::decode(&message.payload) {
            Ok(data) => data,
            Err(_) => {
                warn!("{friendly_name}: non hex uplink payload");
                return;
            }
        };

        let command = TuyaCommand::from_str(&message.command);

        if command.carries_datapoints() {
            match self.dispatcher.handle_inbound(&message.device, &definition, command, &data) {
                Ok(values) => {
                    if values.is_empty() {
                        return;
                    }

                    let mut metering = match MeteringData::new() {
                        Ok(metering) => metering,
                        Err(_) => { return; }
                    };
                    metering.id = get_id("tuya".to_string(), &friendly_name);
                    metering.device_name = friendly_name;
                    metering.tenant = self.tenant.clone();
                    metering.protocol = DeviceProtocol::TuyaZigbee;
                    metering.transmission_time = get_unix_ts();
                    metering.metered_time = get_unix_ts();
                    metering.metered_values = values;
                    let _ = self.sender.send(Transmission::Metering(metering)).await;
                }
                Err(e) => {
                    warn!("{friendly_name}: message dropped: {e}");
                }
            }
            return;
        }

        match command {
            TuyaCommand::McuSyncTime => {
                /* The device bumps its burst counter for the sync exchange */
                self.dispatcher.note_time_sync(&message.device, &definition);

                let utc_secs = Utc::now().timestamp() as u32;
                let offset_secs = Local::now().offset().local_minus_utc();
                let reply = WireCommand {
                    cluster: TUYA_CLUSTER,
                    command: CMD_MCU_SYNC_TIME,
                    payload: codec::encode_mcu_sync_time(utc_secs, offset_secs),
                };
                send_downlink(&self.sender, &message.device, &reply).await;
            }
            TuyaCommand::McuVersionResponse => {
                match codec::decode_version_response(&data) {
                    Ok((seq, version)) => {
                        info!("{friendly_name}: MCU version 0x{version:02x} (seq {seq})");
                    }
                    Err(e) => {
                        warn!("{friendly_name}: undecodable version response: {e}");
                    }
                }
                let reply = WireCommand {
                    cluster: TUYA_CLUSTER,
                    command: CMD_MCU_VERSION_REQUEST,
                    payload: codec::encode_mcu_version_request(2),
                };
                send_downlink(&self.sender, &message.device, &reply).await;
            }
            TuyaCommand::McuGatewayConnectionStatus => {
                let reply = WireCommand {
                    cluster: TUYA_CLUSTER,
                    command: CMD_MCU_GATEWAY_STATUS,
                    payload: codec::encode_gateway_status_ok(),
                };
                send_downlink(&self.sender, &message.device, &reply).await;
            }
            _ => {
                debug!("{friendly_name}: unhandled command {}", message.command);
            }
        }
    }

    async fn handle_set(&mut self, address: &str, payload: &str) {
        let Some(device) = self.devices.get(address) else {
            return;
        };
        let friendly_name = device.friendly_name.clone();
        let definition = device.definition.clone();

        let Ok(Value::Object(values)) = serde_json::from_str::<Value>(payload) else {
            warn!("{friendly_name}: set request is no JSON object");
            return;
        };

        for (attribute, value) in values.iter() {
            match self.dispatcher.handle_outbound(&definition, attribute, value) {
                Ok(commands) => {
                    for command in commands.iter() {
                        send_downlink(&self.sender, address, command).await;
                    }
                }
                Err(e) => {
                    warn!("{friendly_name}: set {attribute} rejected: {e}");
                }
            }
        }
    }

    /* Polls a device that supports the dataQuery command */
    async fn handle_get(&mut self, address: &str) {
        let Some(device) = self.devices.get(address) else {
            return;
        };
        debug!("{}: sending data query", device.friendly_name);

        let query = WireCommand {
            cluster: TUYA_CLUSTER,
            command: CMD_DATA_QUERY,
            payload: Vec::new(),
        };
        send_downlink(&self.sender, address, &query).await;
    }
}

/* Downlinks go back to the coordinator daemon, payload hex encoded */
async fn send_downlink(sender: &Sender<Transmission>, address: &str, command: &WireCommand) {
    let payload = json!({
        "cluster": command.cluster,
        "command": command.command,
        "payload": hex::encode(&command.payload),
    });

    let publish = PublishData {
        topic: format!("tuya2mqtt/bridge/tx/{address}"),
        payload: payload.to_string(),
        qos: 1,
        retain: false,
    };
    let _ = sender.send(Transmission::Publish(publish)).await;
}

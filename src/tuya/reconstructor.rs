use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::tuya::bindings::{Channel, MeterOptions};

/* Sequence sentinel, anything below zero means no burst seen yet */
const SEQ_NEVER: i64 = -65536;

const SEQ_MODULUS: i64 = 65536;

/// One decoded sub-reading on its way into a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterReading {
    Power(f64),
    Current(f64),
    PowerFactor(f64),
    /// +1 consuming, -1 producing
    FlowDirection(i8),
}

/// Verdict of the rolling counter check for one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    Accept,
    /// Retransmission of the last burst, drop the message but keep all state
    Duplicate,
    /// Lost or reordered burst, partial readings were discarded
    Loss,
}

/// Partial readings of one measurement channel.
///
/// The meter spreads one reading over several frames of a burst, fields fill
/// in as they arrive and leave together on flush.
#[derive(Debug, Clone, Default)]
struct ChannelState {
    sign: Option<i8>,
    power: Option<f64>,
    current: Option<f64>,
    power_factor: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl ChannelState {
    fn clear(&mut self) {
        *self = ChannelState::default();
    }

    /* No current detected: the device skips the flow direction datapoints in
       this state, so the missing fields are synthesized. Fields that did
       arrive stay untouched. */
    fn complete_zero_flow(&mut self) {
        self.sign.get_or_insert(1);
        self.power.get_or_insert(0.0);
        self.current.get_or_insert(0.0);
        self.power_factor.get_or_insert(100.0);
        self.timestamp.get_or_insert_with(Utc::now);
    }
}

/// Mutable protocol state of one device, owned by the dispatcher registry
pub struct DeviceProtocolState {
    channels: [ChannelState; 2],
    options: [MeterOptions; 2],
    last_seq: i64,
    seq_increment: u16,
    /// Last published signed power per channel, kept across flushes so the
    /// combined total is recomputed from scratch instead of accumulated
    pub_power: [Option<f64>; 2],
}

impl DeviceProtocolState {
    pub fn new(seq_increment: u16, options: [MeterOptions; 2]) -> Self {
        return DeviceProtocolState {
            channels: [ChannelState::default(), ChannelState::default()],
            options: options,
            last_seq: SEQ_NEVER,
            seq_increment: seq_increment,
            pub_power: [None, None],
        };
    }

    /// Checks the rolling counter of an inbound message against the expected
    /// continuation. A torn burst cannot be attributed to one reading, so a
    /// mismatch discards the partial state of both channels.
    pub fn check_sequence(&mut self, seq: u32) -> SeqCheck {
        let seq = seq as i64;

        if self.last_seq < 0 {
            self.last_seq = seq;
            return SeqCheck::Accept;
        }

        if seq == self.last_seq {
            debug!("Duplicate burst {seq}, ignoring");
            return SeqCheck::Duplicate;
        }

        let expected = (self.last_seq + self.seq_increment as i64) % SEQ_MODULUS;
        if seq == expected {
            self.last_seq = seq;
            return SeqCheck::Accept;
        }

        warn!("Burst counter {seq} does not continue {} (expected {expected}), dropping partial readings", self.last_seq);
        for channel in self.channels.iter_mut() {
            channel.clear();
        }
        self.last_seq = seq;
        return SeqCheck::Loss;
    }

    /// The device bumps its internal counter for time sync requests too, even
    /// though they carry no datapoints
    pub fn note_time_sync(&mut self) {
        if self.last_seq >= 0 {
            self.last_seq = (self.last_seq + self.seq_increment as i64) % SEQ_MODULUS;
        }
    }

    /// Feeds one sub-reading into a channel and returns the flushed attribute
    /// map once the channel is complete.
    ///
    /// Power factor arrival closes a burst normally. Devices that report the
    /// flow direction one burst late flush on flow direction arrival instead
    /// (`late_energy_flow`). A zero power or current observation completes
    /// the channel on the spot, ahead of either trigger.
    pub fn apply(&mut self, channel: Channel, reading: MeterReading) -> Option<Map<String, Value>> {
        let options = self.options[channel.index()];
        let state = &mut self.channels[channel.index()];

        let trigger = match reading {
            MeterReading::Power(power) => {
                state.power = Some(power);
                state.timestamp = Some(Utc::now());
                if power == 0.0 {
                    state.complete_zero_flow();
                }
                power == 0.0
            }
            MeterReading::Current(current) => {
                state.current = Some(current);
                if current == 0.0 {
                    state.complete_zero_flow();
                }
                current == 0.0
            }
            MeterReading::PowerFactor(power_factor) => {
                state.power_factor = Some(power_factor);
                !options.late_energy_flow
            }
            MeterReading::FlowDirection(sign) => {
                state.sign = Some(sign);
                options.late_energy_flow
            }
        };

        if !trigger {
            return None;
        }
        return self.flush(channel);
    }

    /// Emits the merged reading of a complete channel and resets it. An
    /// incomplete channel keeps waiting, nothing is emitted or cleared.
    fn flush(&mut self, channel: Channel) -> Option<Map<String, Value>> {
        let options = self.options[channel.index()];
        let state = &mut self.channels[channel.index()];

        let (Some(sign), Some(power), Some(current), Some(power_factor)) =
            (state.sign, state.power, state.current, state.power_factor)
        else {
            return None;
        };
        /* Captured at power arrival, the flush may run noticeably later */
        let timestamp = state.timestamp.unwrap_or_else(Utc::now);
        state.clear();

        let suffix = channel.suffix();
        let signed_power = sign as f64 * power;

        let mut result = Map::new();
        if options.signed_power {
            result.insert(format!("power_{suffix}"), Value::from(signed_power));
        } else {
            result.insert(format!("power_{suffix}"), Value::from(power));
            let flow = if sign < 0 { "producing" } else { "consuming" };
            result.insert(format!("energy_flow_{suffix}"), Value::from(flow));
        }
        result.insert(format!("current_{suffix}"), Value::from(current));
        result.insert(format!("power_factor_{suffix}"), Value::from(power_factor));
        result.insert(
            format!("timestamp_{suffix}"),
            Value::from(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        self.pub_power[channel.index()] = Some(signed_power);
        if let [Some(power_a), Some(power_b)] = self.pub_power {
            /* Cancel the x10 scale before rounding, repeated addition of
               already rounded numbers would drift */
            let combined = (10.0 * power_a + 10.0 * power_b).round() / 10.0;
            result.insert("power_ab".to_string(), Value::from(combined));
        }

        return Some(result);
    }
}

#[cfg(test)]
mod reconstructor_tests {
    use super::*;
    use serde_json::json;

    fn meter_state() -> DeviceProtocolState {
        return DeviceProtocolState::new(256, [MeterOptions::default(), MeterOptions::default()]);
    }

    fn fill_channel(state: &mut DeviceProtocolState, channel: Channel, power: f64, sign: i8) -> Option<Map<String, Value>> {
        assert!(state.apply(channel, MeterReading::FlowDirection(sign)).is_none());
        assert!(state.apply(channel, MeterReading::Current(1.5)).is_none());
        assert!(state.apply(channel, MeterReading::Power(power)).is_none());
        return state.apply(channel, MeterReading::PowerFactor(95.0));
    }

    #[test]
    fn power_factor_closes_a_complete_channel() {
        let mut state = meter_state();
        let result = fill_channel(&mut state, Channel::A, 50.0, -1).unwrap();

        assert_eq!(result.get("power_a"), Some(&json!(50.0)));
        assert_eq!(result.get("energy_flow_a"), Some(&json!("producing")));
        assert_eq!(result.get("current_a"), Some(&json!(1.5)));
        assert_eq!(result.get("power_factor_a"), Some(&json!(95.0)));
        assert!(result.contains_key("timestamp_a"));
        /* Channel B has not published, no combined total yet */
        assert!(!result.contains_key("power_ab"));
    }

    #[test]
    fn incomplete_channel_keeps_waiting() {
        let mut state = meter_state();
        /* Power factor triggers, but the sign never arrived */
        assert!(state.apply(Channel::A, MeterReading::Power(50.0)).is_none());
        assert!(state.apply(Channel::A, MeterReading::Current(1.5)).is_none());
        assert!(state.apply(Channel::A, MeterReading::PowerFactor(95.0)).is_none());

        /* Nothing was cleared, the late sign still completes the burst */
        assert!(state.apply(Channel::A, MeterReading::FlowDirection(1)).is_none());
        let result = state.apply(Channel::A, MeterReading::PowerFactor(95.0)).unwrap();
        assert_eq!(result.get("power_a"), Some(&json!(50.0)));
        assert_eq!(result.get("energy_flow_a"), Some(&json!("consuming")));
    }

    #[test]
    fn signed_power_folds_the_direction_in() {
        let mut state = DeviceProtocolState::new(256, [
            MeterOptions { signed_power: true, ..Default::default() },
            MeterOptions::default(),
        ]);

        let result = fill_channel(&mut state, Channel::A, 50.0, -1).unwrap();
        assert_eq!(result.get("power_a"), Some(&json!(-50.0)));
        assert!(!result.contains_key("energy_flow_a"));
    }

    #[test]
    fn zero_power_flushes_immediately() {
        let mut state = meter_state();
        let result = state.apply(Channel::A, MeterReading::Power(0.0)).unwrap();

        assert_eq!(result.get("power_a"), Some(&json!(0.0)));
        assert_eq!(result.get("current_a"), Some(&json!(0.0)));
        assert_eq!(result.get("power_factor_a"), Some(&json!(100.0)));
        assert_eq!(result.get("energy_flow_a"), Some(&json!("consuming")));
        assert!(result.contains_key("timestamp_a"));
    }

    #[test]
    fn zero_current_flushes_immediately() {
        let mut state = meter_state();
        let result = state.apply(Channel::B, MeterReading::Current(0.0)).unwrap();

        assert_eq!(result.get("power_b"), Some(&json!(0.0)));
        assert_eq!(result.get("power_factor_b"), Some(&json!(100.0)));
    }

    #[test]
    fn zero_path_outranks_late_energy_flow() {
        let mut state = DeviceProtocolState::new(256, [
            MeterOptions { late_energy_flow: true, ..Default::default() },
            MeterOptions::default(),
        ]);

        /* No current detected is a distinct device state, it flushes without
           waiting for the delayed flow direction */
        let result = state.apply(Channel::A, MeterReading::Power(0.0)).unwrap();
        assert_eq!(result.get("power_a"), Some(&json!(0.0)));
    }

    #[test]
    fn late_energy_flow_moves_the_trigger() {
        let mut state = DeviceProtocolState::new(256, [
            MeterOptions { late_energy_flow: true, ..Default::default() },
            MeterOptions::default(),
        ]);

        assert!(state.apply(Channel::A, MeterReading::Current(1.5)).is_none());
        assert!(state.apply(Channel::A, MeterReading::Power(50.0)).is_none());
        /* Power factor no longer closes the burst */
        assert!(state.apply(Channel::A, MeterReading::PowerFactor(95.0)).is_none());

        let result = state.apply(Channel::A, MeterReading::FlowDirection(-1)).unwrap();
        assert_eq!(result.get("power_a"), Some(&json!(50.0)));
        assert_eq!(result.get("energy_flow_a"), Some(&json!("producing")));
    }

    #[test]
    fn combined_total_is_recomputed_not_accumulated() {
        let mut state = DeviceProtocolState::new(256, [
            MeterOptions { signed_power: true, ..Default::default() },
            MeterOptions { signed_power: true, ..Default::default() },
        ]);

        let result = fill_channel(&mut state, Channel::A, 10.0, 1).unwrap();
        assert!(!result.contains_key("power_ab"));

        let result = fill_channel(&mut state, Channel::B, 5.0, -1).unwrap();
        assert_eq!(result.get("power_ab"), Some(&json!(5.0)));

        let result = fill_channel(&mut state, Channel::A, 10.1, 1).unwrap();
        assert_eq!(result.get("power_ab"), Some(&json!(5.1)));
    }

    #[test]
    fn counter_continuation_and_duplicates() {
        let mut state = meter_state();
        /* First burst is always accepted */
        assert_eq!(state.check_sequence(100), SeqCheck::Accept);
        assert_eq!(state.check_sequence(356), SeqCheck::Accept);
        /* Retransmission, tolerated without touching state */
        assert_eq!(state.check_sequence(356), SeqCheck::Duplicate);
        assert_eq!(state.check_sequence(612), SeqCheck::Accept);
    }

    #[test]
    fn counter_jump_discards_both_channels() {
        let mut state = meter_state();
        assert_eq!(state.check_sequence(100), SeqCheck::Accept);

        /* Three of four fields set on A, one on B */
        state.apply(Channel::A, MeterReading::FlowDirection(1));
        state.apply(Channel::A, MeterReading::Current(1.5));
        state.apply(Channel::A, MeterReading::Power(50.0));
        state.apply(Channel::B, MeterReading::Power(20.0));

        /* 700 is neither 356 nor 100 */
        assert_eq!(state.check_sequence(700), SeqCheck::Loss);

        /* The partials are gone, a lone trigger field emits nothing */
        assert!(state.apply(Channel::A, MeterReading::PowerFactor(95.0)).is_none());
        assert!(state.apply(Channel::B, MeterReading::PowerFactor(95.0)).is_none());

        /* And the counter resynchronized onto the observed value */
        assert_eq!(state.check_sequence(956), SeqCheck::Accept);
    }

    #[test]
    fn counter_wraps_at_16_bits() {
        let mut state = meter_state();
        assert_eq!(state.check_sequence(65436), SeqCheck::Accept);
        assert_eq!(state.check_sequence(156), SeqCheck::Accept);
    }

    #[test]
    fn time_sync_counts_as_a_burst() {
        let mut state = meter_state();
        assert_eq!(state.check_sequence(100), SeqCheck::Accept);
        /* The device increments its counter for the sync exchange */
        state.note_time_sync();
        assert_eq!(state.check_sequence(612), SeqCheck::Accept);
    }

    #[test]
    fn time_sync_before_any_burst_changes_nothing() {
        let mut state = meter_state();
        state.note_time_sync();
        assert_eq!(state.check_sequence(4711), SeqCheck::Accept);
    }
}

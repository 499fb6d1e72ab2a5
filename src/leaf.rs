//! The monitor and control protocol shared by every addressable quantity
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Note
//! Every quantity follows one of three shapes:
//! * Monitor-only: control requests and monitor requests on the control RCA are refused, a
//!   monitor request samples the hardware and degrades to the cached value on failure.
//! * Control and monitor: a control request is recorded as the last control message and then
//!   applied. A monitor request on the control RCA echoes the last control message, a plain
//!   monitor request reports the current value.
//! * Range-checked control: as above, with the payload validated before any hardware access.
use heapless::Vec;

use crate::{
    can::{Message, Reply, MAX_PAYLOAD},
    error::{erc, ErrorModule},
    serial::Bus,
    Error, Status,
};

/// A value carried in a bus payload, in big-endian byte order.
pub trait Payload: Copy {
    fn decode(bytes: &[u8]) -> Option<Self>;
    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>);
}

impl Payload for f32 {
    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(f32::from_be_bytes(bytes.get(..4)?.try_into().ok()?))
    }

    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>) {
        out.extend_from_slice(&self.to_be_bytes()).ok();
    }
}

impl Payload for u32 {
    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?))
    }

    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>) {
        out.extend_from_slice(&self.to_be_bytes()).ok();
    }
}

impl Payload for u16 {
    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?))
    }

    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>) {
        out.extend_from_slice(&self.to_be_bytes()).ok();
    }
}

impl Payload for u8 {
    fn decode(bytes: &[u8]) -> Option<Self> {
        bytes.first().copied()
    }

    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>) {
        out.push(self).ok();
    }
}

impl Payload for bool {
    fn decode(bytes: &[u8]) -> Option<Self> {
        bytes.first().map(|&byte| byte != 0)
    }

    fn encode(self, out: &mut Vec<u8, MAX_PAYLOAD>) {
        out.push(self as u8).ok();
    }
}

/// The most recently accepted control request of a quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastControl {
    data: Vec<u8, MAX_PAYLOAD>,
    pub status: Status,
}

impl LastControl {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            status: Status::NoError,
        }
    }

    /// Record an incoming control request with a clean status.
    pub fn record(&mut self, message: &Message) {
        self.data = message.data.clone();
        self.status = Status::NoError;
    }

    /// Record the outcome of applying the control request.
    pub fn complete(&mut self, result: Result<(), Error>) {
        if result.is_err() {
            self.status = Status::Error;
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the recorded payload.
    pub fn value<T: Payload>(&self) -> Option<T> {
        T::decode(&self.data)
    }

    /// Replace the recorded payload with a value applied on behalf of the requester.
    pub fn overwrite<T: Payload>(&mut self, value: T) {
        self.data.clear();
        value.encode(&mut self.data);
    }

    /// Answer a monitor request on the control RCA.
    pub fn echo(&self, reply: &mut Reply) {
        reply.data = self.data.clone();
        reply.status = self.status;
    }
}

/// The work left to a quantity handler after the protocol checks.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Access<T> {
    /// Apply a decoded control value.
    Control(T),
    /// Report the current value.
    Monitor,
}

/// Run the protocol checks of a controllable quantity.
///
/// # Args
/// * `bus` - The hardware access context.
/// * `message` - The inbound request.
/// * `reply` - The reply under construction.
/// * `module` - The module charged with protocol errors.
/// * `last` - The last control message of the quantity.
///
/// # Returns
/// The remaining access, or `None` if the request was fully handled.
pub fn access<T: Payload>(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    module: ErrorModule,
    last: &mut LastControl,
) -> Option<Access<T>> {
    if message.is_control() {
        last.record(message);
        return match message.decode() {
            Some(value) => Some(Access::Control(value)),
            None => {
                bus.store_error(module, erc::COMMAND_VAL);
                last.status = Status::OutOfRange;
                None
            }
        };
    }

    if message.on_control_rca() {
        last.echo(reply);
        return None;
    }

    Some(Access::Monitor)
}

/// Validate a control value against its permitted range.
///
/// # Returns
/// True if the value may be applied.
pub fn in_range<T: PartialOrd>(
    bus: &mut Bus,
    module: ErrorModule,
    last: &mut LastControl,
    value: T,
    range: core::ops::RangeInclusive<T>,
) -> bool {
    if range.contains(&value) {
        return true;
    }

    bus.store_error(module, erc::COMMAND_VAL);
    last.status = Status::OutOfRange;
    false
}

/// Run the protocol checks of a monitor-only quantity.
///
/// # Returns
/// True if the quantity should be sampled.
pub fn monitor_only(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    module: ErrorModule,
) -> bool {
    if message.is_control() {
        bus.store_error(module, erc::RCA_RANGE);
        return false;
    }

    if message.on_control_rca() {
        bus.store_error(module, erc::RCA_RANGE);
        reply.status = Status::MonitorCanRange;
        return false;
    }

    true
}

/// Report a sampled value, falling back to the cached one if sampling failed.
///
/// # Args
/// * `reply` - The reply under construction.
/// * `sample` - The outcome of sampling.
/// * `cache` - The last known value. Updated on success.
pub fn emit<T: Payload>(reply: &mut Reply, sample: Result<T, Error>, cache: &mut T) {
    match sample {
        Ok(value) => *cache = value,
        Err(error) => reply.status = error.into(),
    }

    reply.put(*cache);
}

/// Extract and validate an address field at one level of the dispatch tree.
///
/// # Args
/// * `bus` - The hardware access context.
/// * `message` - The inbound request.
/// * `reply` - The reply under construction.
/// * `mask` - The address field.
/// * `count` - The number of handlers at this level.
/// * `module` - The module charged with an out-of-range field.
///
/// # Returns
/// The field value, or `None` if it is out of range.
pub fn select(
    bus: &mut Bus,
    message: &Message,
    reply: &mut Reply,
    mask: u32,
    count: usize,
    module: ErrorModule,
) -> Option<usize> {
    let index = message.slice(mask);
    if index < count {
        return Some(index);
    }

    bus.store_error(module, erc::MODULE_RANGE);
    reply.status = Status::HardwareRange;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::Bench;

    #[test]
    fn control_echo_is_idempotent() {
        let mut bench = Bench::new();
        let mut last = LastControl::new();
        let mut bus = bench.bus();

        let control = Message::control(0x1_0008, &1.25f32.to_be_bytes());
        let mut reply = Reply::new();
        let result = access::<f32>(&mut bus, &control, &mut reply, ErrorModule::Sis, &mut last);
        assert_eq!(result, Some(Access::Control(1.25)));
        last.complete(Ok(()));

        for _ in 0..2 {
            let mut reply = Reply::new();
            let echo = Message::monitor(0x1_0008);
            assert_eq!(
                access::<f32>(&mut bus, &echo, &mut reply, ErrorModule::Sis, &mut last),
                None
            );
            assert_eq!(reply.status, Status::NoError);
            assert_eq!(reply.data.as_slice(), &1.25f32.to_be_bytes());
        }
    }

    #[test]
    fn failed_control_is_reported_on_echo() {
        let mut bench = Bench::new();
        let mut last = LastControl::new();
        let mut bus = bench.bus();

        let control = Message::control(0x1_0008, &[1]);
        let mut reply = Reply::new();
        assert_eq!(
            access::<bool>(&mut bus, &control, &mut reply, ErrorModule::Sis, &mut last),
            Some(Access::Control(true))
        );
        last.complete(Err(Error::Interface));

        let mut reply = Reply::new();
        access::<bool>(&mut bus, &Message::monitor(0x1_0008), &mut reply, ErrorModule::Sis, &mut last);
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.data.as_slice(), &[1]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let mut bench = Bench::new();
        let mut last = LastControl::new();
        {
            let mut bus = bench.bus();
            let control = Message::control(0x1_0008, &[0x3F, 0x80]);
            let mut reply = Reply::new();
            assert_eq!(
                access::<f32>(&mut bus, &control, &mut reply, ErrorModule::Lna, &mut last),
                None
            );
        }
        assert_eq!(last.status, Status::OutOfRange);
        assert_eq!(bench.history.next(), 0x14F3);
    }

    #[test]
    fn monitor_only_refuses_control() {
        let mut bench = Bench::new();
        let mut bus = bench.bus();

        let mut reply = Reply::new();
        assert!(!monitor_only(&mut bus, &Message::control(0x0_0010, &[0]), &mut reply, ErrorModule::Sis));
        assert_eq!(reply.status, Status::NoError);

        assert!(!monitor_only(&mut bus, &Message::monitor(0x1_0010), &mut reply, ErrorModule::Sis));
        assert_eq!(reply.status, Status::MonitorCanRange);

        let mut reply = Reply::new();
        assert!(monitor_only(&mut bus, &Message::monitor(0x0_0010), &mut reply, ErrorModule::Sis));
        assert_eq!(bus.history().len(), 2);
    }

    #[test]
    fn failed_sample_degrades_to_cache() {
        let mut cache = 4.5f32;
        let mut reply = Reply::new();
        emit(&mut reply, Err(Error::Timeout), &mut cache);
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.data.as_slice(), &4.5f32.to_be_bytes());

        let mut reply = Reply::new();
        emit(&mut reply, Ok(2.0f32), &mut cache);
        assert_eq!(reply.status, Status::NoError);
        assert_eq!(cache, 2.0);
    }

    #[test]
    fn out_of_range_select() {
        let mut bench = Bench::new();
        let mut bus = bench.bus();
        let mut reply = Reply::new();

        let message = Message::monitor(0x0_0070);
        assert_eq!(select(&mut bus, &message, &mut reply, 0x70, 6, ErrorModule::Lo), None);
        assert_eq!(reply.status, Status::HardwareRange);
        assert_eq!(bus.history().next(), 0x06F1);

        let mut reply = Reply::new();
        assert_eq!(select(&mut bus, &message, &mut reply, 0x70, 8, ErrorModule::Lo), Some(7));
    }
}

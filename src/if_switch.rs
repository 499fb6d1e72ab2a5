//! IF switch: band routing, channel attenuation and temperature servos
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use crate::{
    can::{Message, Reply},
    error::ErrorModule,
    hardware::{
        if_switch::{IfRegisters, TemperatureMonitor, CHANNELS},
        BANDS,
    },
    leaf::{self, Access, LastControl},
    scaling::{adc, thermistor_temperature},
    serial::Bus,
    Error,
};

const MODULE_MASK: u32 = 0x1C;
const BAND_SELECT: usize = CHANNELS;
const ALL_CHANNELS: usize = CHANNELS + 1;
const CHANNEL_QUANTITY_MASK: u32 = 0x03;

/// The highest channel attenuation in dB.
pub const MAX_ATTENUATION: u8 = 15;

const TEMPERATURE_VOLTAGE_SCALE: f32 = 5.0;

/// Bridge circuit of the first hardware revision.
const BRIDGE_RESISTOR: f32 = 4020.0;
const BRIDGE_REFERENCE: f32 = 0.5;

/// Divider circuit of later hardware revisions.
const DIVIDER_RESISTOR: f32 = 10000.0;
const DIVIDER_REFERENCE: f32 = 2.5;

#[derive(Default)]
struct IfChannel {
    attenuation: u8,
    last_attenuation: LastControl,
    servo: bool,
    last_servo: LastControl,
    temperature: f32,
}

/// The IF switch.
pub struct IfSwitch {
    registers: IfRegisters,
    /// The temperature sensors use the single-voltage divider circuit.
    divider: bool,
    band: u8,
    last_band: LastControl,
    attenuation: u8,
    last_attenuation: LastControl,
    channels: [IfChannel; CHANNELS],
}

impl IfSwitch {
    /// Construct the IF switch.
    ///
    /// # Args
    /// * `divider` - The temperature sensor circuit assumed until the revision is read.
    pub fn new(divider: bool) -> Self {
        Self {
            registers: IfRegisters::new(),
            divider,
            band: 0,
            last_band: LastControl::new(),
            attenuation: 0,
            last_attenuation: LastControl::new(),
            channels: Default::default(),
        }
    }

    pub fn registers(&self) -> &IfRegisters {
        &self.registers
    }

    /// The selected band, 0 for band 1.
    pub fn band(&self) -> u8 {
        self.band
    }

    pub fn temperature(&self, channel: usize) -> Option<f32> {
        self.channels.get(channel).map(|channel| channel.temperature)
    }

    /// Identify the hardware revision.
    ///
    /// # Note
    /// If the revision cannot be read, the configured temperature sensor circuit is kept.
    pub fn startup(&mut self, bus: &mut Bus) {
        match self.registers.revision(bus) {
            Ok(revision) => {
                self.divider = revision != 0;
                info!("IF switch hardware revision {}", revision);
            }
            Err(error) => warn!("IF switch revision unavailable: {:?}", error),
        }
    }

    /// Measure the assembly temperature of a channel in degrees Celsius.
    pub fn measure(&mut self, bus: &mut Bus, channel: usize) -> Result<f32, Error> {
        let resistance = if self.divider {
            let raw = self
                .registers
                .sample(bus, channel, TemperatureMonitor::Divider)?;
            DIVIDER_RESISTOR * adc(raw, TEMPERATURE_VOLTAGE_SCALE) / DIVIDER_REFERENCE
        } else {
            let v1 = adc(
                self.registers
                    .sample(bus, channel, TemperatureMonitor::BridgeV1)?,
                TEMPERATURE_VOLTAGE_SCALE,
            );
            let v2 = adc(
                self.registers
                    .sample(bus, channel, TemperatureMonitor::BridgeV2)?,
                TEMPERATURE_VOLTAGE_SCALE,
            );
            BRIDGE_RESISTOR * (v1 + v2 - 2.0 * BRIDGE_REFERENCE) / (BRIDGE_REFERENCE - v1)
        };

        let temperature = thermistor_temperature(resistance)?;
        let entry = self.channels.get_mut(channel).ok_or(Error::Bounds)?;
        entry.temperature = temperature;
        Ok(temperature)
    }

    pub fn handle(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let Some(module) = leaf::select(
            bus,
            message,
            reply,
            MODULE_MASK,
            CHANNELS + 2,
            ErrorModule::IfSwitch,
        ) else {
            return;
        };

        match module {
            BAND_SELECT => self.handle_band_select(bus, message, reply),
            ALL_CHANNELS => self.handle_all_channels(bus, message, reply),
            channel => self.handle_channel(bus, message, reply, channel),
        }
    }

    fn handle_band_select(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let last = &mut self.last_band;
        match leaf::access::<u8>(bus, message, reply, ErrorModule::IfSwitch, last) {
            Some(Access::Control(band)) => {
                if !leaf::in_range(bus, ErrorModule::IfSwitch, last, band, 0..=(BANDS - 1) as u8) {
                    return;
                }

                let result = self.registers.select_band(bus, band as usize);
                if result.is_ok() {
                    self.band = band;
                    info!("IF switch on band {}", band + 1);
                }
                last.complete(result);
            }
            Some(Access::Monitor) => reply.put(self.band),
            None => {}
        }
    }

    fn handle_all_channels(&mut self, bus: &mut Bus, message: &Message, reply: &mut Reply) {
        let last = &mut self.last_attenuation;
        match leaf::access::<u8>(bus, message, reply, ErrorModule::IfChannel, last) {
            Some(Access::Control(attenuation)) => {
                if !leaf::in_range(bus, ErrorModule::IfChannel, last, attenuation, 0..=MAX_ATTENUATION)
                {
                    return;
                }

                // Every channel is attempted; the first failure is reported.
                let mut result = Ok(());
                for (index, channel) in self.channels.iter_mut().enumerate() {
                    match self.registers.set_attenuation(bus, index, attenuation) {
                        Ok(()) => channel.attenuation = attenuation,
                        Err(error) => result = result.and(Err(error)),
                    }
                }

                if result.is_ok() {
                    self.attenuation = attenuation;
                }
                last.complete(result);
            }
            Some(Access::Monitor) => reply.put(self.attenuation),
            None => {}
        }
    }

    fn handle_channel(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        index: usize,
    ) {
        let Some(quantity) = leaf::select(
            bus,
            message,
            reply,
            CHANNEL_QUANTITY_MASK,
            3,
            ErrorModule::IfChannel,
        ) else {
            return;
        };

        match quantity {
            0 => {
                let channel = &mut self.channels[index];
                match leaf::access::<bool>(
                    bus,
                    message,
                    reply,
                    ErrorModule::IfChannel,
                    &mut channel.last_servo,
                ) {
                    Some(Access::Control(enable)) => {
                        let result = self.registers.set_servo_enable(bus, index, enable);
                        if result.is_ok() {
                            channel.servo = enable;
                        }
                        channel.last_servo.complete(result);
                    }
                    Some(Access::Monitor) => reply.put(channel.servo),
                    None => {}
                }
            }
            1 => {
                let channel = &mut self.channels[index];
                let last = &mut channel.last_attenuation;
                match leaf::access::<u8>(bus, message, reply, ErrorModule::IfChannel, last) {
                    Some(Access::Control(attenuation)) => {
                        if !leaf::in_range(
                            bus,
                            ErrorModule::IfChannel,
                            last,
                            attenuation,
                            0..=MAX_ATTENUATION,
                        ) {
                            return;
                        }

                        let result = self.registers.set_attenuation(bus, index, attenuation);
                        if result.is_ok() {
                            channel.attenuation = attenuation;
                        }
                        last.complete(result);
                    }
                    Some(Access::Monitor) => reply.put(channel.attenuation),
                    None => {}
                }
            }
            _ => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::IfChannel) {
                    return;
                }

                if let Err(error) = self.measure(bus, index) {
                    reply.status = error.into();
                }
                reply.put(self.channels[index].temperature);
            }
        }
    }
}

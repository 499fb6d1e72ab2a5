//! Cartridge temperature sensors
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use super::{bias::Bias, TEMPERATURE_SENSORS};
use crate::{
    can::{Message, Reply},
    error::ErrorModule,
    hardware::{bias::MonitorPoint, Polarization},
    leaf::{self, Access, LastControl},
    scaling::{bipolar_adc, cartridge_temperature},
    serial::Bus,
    Error,
};

const SENSOR_MASK: u32 = 0x70;
const QUANTITY_MASK: u32 = 0x08;

/// Full-scale voltage of the temperature sensor monitor.
const SENSOR_VOLTAGE_SCALE: f32 = 10.0;

/// The bias board input wired to a logical temperature sensor.
///
/// # Args
/// * `band` - The cartridge index (0 for band 1).
/// * `sensor` - The logical sensor: 4K stage, 110K stage, pol0 mixer, spare, 15K stage and
///   pol1 mixer.
pub fn wiring(band: usize, sensor: usize) -> (Polarization, u8) {
    // Band 3 has the 110K stage and spare sensors swapped.
    let sensor = match (band, sensor) {
        (2, 1) => 3,
        (2, 3) => 1,
        _ => sensor,
    };

    if sensor < 3 {
        (Polarization::Pol0, sensor as u8)
    } else {
        (Polarization::Pol1, (sensor - 3) as u8)
    }
}

struct Sensor {
    temperature: f32,
    offset: f32,
    last_offset: LastControl,
}

/// The temperature sensors of a cartridge.
pub struct Temperatures {
    band: usize,
    sensors: [Sensor; TEMPERATURE_SENSORS],
}

impl Temperatures {
    /// Construct the sensors of a cartridge.
    ///
    /// # Args
    /// * `band` - The cartridge index (0 for band 1).
    /// * `offsets` - The configured offset of each sensor in kelvin.
    pub fn new(band: usize, offsets: [f32; TEMPERATURE_SENSORS]) -> Self {
        Self {
            band,
            sensors: offsets.map(|offset| Sensor {
                temperature: 0.0,
                offset,
                last_offset: LastControl::new(),
            }),
        }
    }

    pub fn temperature(&self, sensor: usize) -> Option<f32> {
        self.sensors.get(sensor).map(|sensor| sensor.temperature)
    }

    pub fn offset(&self, sensor: usize) -> Option<f32> {
        self.sensors.get(sensor).map(|sensor| sensor.offset)
    }

    /// Measure a sensor and apply its offset.
    ///
    /// # Note
    /// A voltage outside the calibration curve leaves the cached temperature untouched.
    pub fn measure(
        &mut self,
        bus: &mut Bus,
        bias: &mut Bias,
        sensor: usize,
    ) -> Result<f32, Error> {
        let (polarization, input) = wiring(self.band, sensor);
        let raw = bias
            .registers_mut(polarization)
            .sample(bus, MonitorPoint::Temperature(input))?;

        let entry = self.sensors.get_mut(sensor).ok_or(Error::Bounds)?;
        entry.temperature =
            cartridge_temperature(bipolar_adc(raw, SENSOR_VOLTAGE_SCALE))? + entry.offset;
        Ok(entry.temperature)
    }

    pub fn handle(
        &mut self,
        bus: &mut Bus,
        message: &Message,
        reply: &mut Reply,
        bias: &mut Bias,
    ) {
        let Some(sensor) = leaf::select(
            bus,
            message,
            reply,
            SENSOR_MASK,
            TEMPERATURE_SENSORS,
            ErrorModule::CartridgeTemp,
        ) else {
            return;
        };

        match message.slice(QUANTITY_MASK) {
            0 => {
                if !leaf::monitor_only(bus, message, reply, ErrorModule::CartridgeTemp) {
                    return;
                }

                if let Err(error) = self.measure(bus, bias, sensor) {
                    if error == Error::Conversion {
                        warn!("Band {} sensor {} outside calibration", self.band + 1, sensor);
                    }
                    reply.status = error.into();
                }
                reply.put(self.sensors[sensor].temperature);
            }
            _ => {
                let entry = &mut self.sensors[sensor];
                match leaf::access::<f32>(
                    bus,
                    message,
                    reply,
                    ErrorModule::CartridgeTemp,
                    &mut entry.last_offset,
                ) {
                    Some(Access::Control(offset)) => entry.offset = offset,
                    Some(Access::Monitor) => reply.put(entry.offset),
                    None => {}
                }
            }
        }
    }
}

// dht22_exporter - Temperature and humidity metrics exporter for Prometheus
//
// Copyright 2021 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::{DataPin, DriverError, DriverErrorKind, RawSample};
use crate::sensor::source::Driver;
use rppal::gpio::Mode;
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

/// Upper bound on busy-wait iterations for a single level before giving up. Normal
/// pulses take somewhere between 50 and 200 iterations.
pub(crate) const MAX_WAIT_CYCLES: u32 = 32_000;
/// One response pulse from the sensor followed by 40 data bits.
pub(crate) const PULSE_PAIRS: usize = 41;
/// Two bytes of humidity, two bytes of temperature, one checksum byte.
pub(crate) const FRAME_SIZE: usize = 5;

/// Number of busy-wait cycles the data line spent low and then high, for each
/// pulse sent by the sensor.
#[derive(Debug)]
struct PulseTrain {
    low: [u32; PULSE_PAIRS],
    high: [u32; PULSE_PAIRS],
}

impl PulseTrain {
    /// Capture all pulses sent by the sensor after the start signal.
    ///
    /// The pin must already be in input mode and the sensor must have been sent the
    /// start signal. A timeout error is returned if the line stays at one level for
    /// too long, in which case the read has to be attempted again later.
    fn capture(pin: &dyn DataPin) -> Result<Self, DriverError> {
        let mut train = Self {
            low: [0; PULSE_PAIRS],
            high: [0; PULSE_PAIRS],
        };

        for i in 0..PULSE_PAIRS {
            train.low[i] = Self::count_while(|| pin.is_low(), "timeout waiting for low pulse capture")?;
            train.high[i] = Self::count_while(|| pin.is_high(), "timeout waiting for high pulse capture")?;
        }

        tracing::trace!(message = "captured low/high pulse counts", low = ?train.low, high = ?train.high);
        Ok(train)
    }

    fn count_while<F>(level: F, msg: &'static str) -> Result<u32, DriverError>
    where
        F: Fn() -> bool,
    {
        let mut cycles = 0;
        while level() {
            cycles += 1;
            if cycles >= MAX_WAIT_CYCLES {
                return Err(DriverError::KindMsg(DriverErrorKind::ReadTimeout, msg));
            }
        }

        Ok(cycles)
    }

    /// Low counts for the 40 data bits, skipping the response pulse.
    fn data_low(&self) -> &[u32] {
        &self.low[1..]
    }

    /// High counts for the 40 data bits, skipping the response pulse.
    fn data_high(&self) -> &[u32] {
        &self.high[1..]
    }
}

/// The five bytes sent by the sensor, with a verified checksum.
#[derive(Debug, PartialEq)]
struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Turn pulse lengths into bits. Every bit starts with a low pulse of fixed length
    /// followed by a short high pulse for a `0` or a long high pulse for a `1`, so the
    /// mean low length works as a threshold.
    fn decode(train: &PulseTrain) -> Result<Self, DriverError> {
        let lows = train.data_low();
        let threshold = lows.iter().sum::<u32>() / lows.len() as u32;
        let mut bytes = [0u8; FRAME_SIZE];

        for (i, &cycles) in train.data_high().iter().enumerate() {
            // Bits arrive MSB first.
            let byte = &mut bytes[i / 8];
            *byte <<= 1;
            if cycles >= threshold {
                *byte |= 1;
            }
        }

        let frame = Frame(bytes);
        frame.verify()?;
        Ok(frame)
    }

    /// The last byte must be the low eight bits of the sum of the first four.
    fn verify(&self) -> Result<(), DriverError> {
        let expected = self.0[4];
        let computed = self.0[..4].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed == expected {
            Ok(())
        } else {
            Err(DriverError::CheckSum(expected, computed))
        }
    }

    /// Relative humidity, sent as tenths of a percent.
    fn humidity(&self) -> f64 {
        u16::from_be_bytes([self.0[0], self.0[1]]) as f64 / 10.0
    }

    /// Temperature, sent as tenths of a degree with the top bit used as a sign flag.
    fn temperature(&self) -> f64 {
        let magnitude = u16::from_be_bytes([self.0[2] & 0x7F, self.0[3]]) as f64 / 10.0;
        if self.0[2] & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }
}

impl From<&Frame> for RawSample {
    fn from(frame: &Frame) -> Self {
        RawSample::new(frame.temperature(), frame.humidity())
    }
}

/// Driver for a DHT22 (AM2302) sensor connected to a single GPIO data pin.
///
/// See the [datasheet] for details of the protocol.
///
/// [datasheet]: https://cdn-shop.adafruit.com/datasheets/Digital+humidity+and+temperature+sensor+AM2302.pdf
pub struct DHT22Driver {
    pin: Box<dyn DataPin + Send + Sync + 'static>,
}

impl DHT22Driver {
    pub fn from_pin<T>(pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self { pin: Box::new(pin) }
    }

    /// Wake the sensor from low-power mode and ask it to transmit: high, then low for
    /// at least 1ms, then high for 20-40us before releasing the line to the sensor.
    fn start_signal(&mut self) {
        self.pin.set_mode(Mode::Output);
        self.pin.set_high();
        thread::sleep(Duration::from_millis(10));
        self.pin.set_low();
        thread::sleep(Duration::from_millis(20));
        self.pin.set_high();
        thread::sleep(Duration::from_micros(30));
        self.pin.set_mode(Mode::Input);
    }
}

impl Driver for DHT22Driver {
    fn sample(&mut self) -> Result<RawSample, DriverError> {
        self.start_signal();
        let train = PulseTrain::capture(self.pin.as_ref())?;
        let frame = Frame::decode(&train)?;
        let sample = RawSample::from(&frame);

        tracing::debug!(
            message = "decoded sensor frame",
            bytes = ?frame.0,
            temperature = ?sample.temperature,
            humidity = ?sample.humidity,
        );

        Ok(sample)
    }
}

impl Debug for DHT22Driver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DHT22Driver").field("pin", &self.pin.pin()).finish()
    }
}

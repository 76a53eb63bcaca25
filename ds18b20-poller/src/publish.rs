use std::io::Write;

use onewire_bus::RomId;

/// Destination for temperature readings.
pub trait Publish {
    /// The error type returned when a message cannot be delivered.
    type Error;

    /// Sends `payload` under `topic`.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), Self::Error>;
}

/// Writes every message as a `<topic> <payload>` line.
#[derive(Debug)]
pub struct LineSink<W> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Publish for LineSink<W> {
    type Error = std::io::Error;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), Self::Error> {
        log::trace!("{topic} <- {payload}");
        writeln!(self.out, "{topic} {payload}")?;
        self.out.flush()
    }
}

/// Topic for the sensor `rom` under `prefix`, e.g. `sensors/temperature/28ff4b61711604ad`.
pub fn topic(prefix: &str, rom: RomId) -> String {
    let mut topic = String::from(prefix.trim_end_matches('/'));
    topic.push('/');
    for b in rom.to_le_bytes() {
        topic.push_str(&format!("{b:02x}"));
    }
    topic
}

/// Temperature in °C with the full 1/16 °C precision.
pub fn payload(celsius: f32) -> String {
    format!("{celsius:.4}")
}

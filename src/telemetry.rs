//! Packet sinks
//!
//! Trait-based output for decoded realtime packets so the receive loop does
//! not care where records end up (stdout, a file, a message bus).

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::packet::{DecodedPacket, FieldValue};
use crate::session::SessionStats;

/// Current timestamp as f64 seconds since UNIX epoch, 6 decimal places
pub fn current_timestamp() -> f64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    (timestamp * 1_000_000.0).round() / 1_000_000.0
}

/// Payload of a packet event: the whole record or one field of it
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PacketData<'a> {
    Packet(&'a DecodedPacket),
    Field(&'a FieldValue),
}

/// One decoded packet, ready for output
#[derive(Debug, Clone, Serialize)]
pub struct PacketEvent<'a> {
    /// System timestamp when the packet was handed to the sink
    pub stime: f64,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    /// Position of the packet in the stream, starting at 1
    pub sequence: u64,
    pub layout: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'a str>,
    pub data: PacketData<'a>,
}

impl<'a> PacketEvent<'a> {
    pub fn packet(packet: &'a DecodedPacket, sequence: u64) -> Self {
        Self {
            stime: current_timestamp(),
            event_type: "realtime",
            sequence,
            layout: packet.family().name(),
            field: None,
            data: PacketData::Packet(packet),
        }
    }

    /// Event carrying a single field, `None` if the layout lacks it
    pub fn field(packet: &'a DecodedPacket, name: &'a str, sequence: u64) -> Option<Self> {
        let value = packet.get(name)?;
        Some(Self {
            stime: current_timestamp(),
            event_type: "realtime",
            sequence,
            layout: packet.family().name(),
            field: Some(name),
            data: PacketData::Field(value),
        })
    }
}

/// Destination for decoded packets
pub trait PacketSink: Send {
    fn publish(&mut self, event: &PacketEvent<'_>) -> anyhow::Result<()>;

    /// Periodic stream statistics. Ignored unless overridden.
    fn publish_stats(&mut self, stats: &SessionStats) -> anyhow::Result<()> {
        let _ = stats;
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Clone, Default)]
pub struct NoOpSink;

impl PacketSink for NoOpSink {
    fn publish(&mut self, _event: &PacketEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prints one JSON document per packet to stdout
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    pub pretty_print: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { pretty_print: false }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }

    fn render<T: Serialize>(&self, value: &T) -> serde_json::Result<String> {
        if self.pretty_print {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }
}

impl PacketSink for ConsoleSink {
    fn publish(&mut self, event: &PacketEvent<'_>) -> anyhow::Result<()> {
        println!("{}", self.render(event)?);
        Ok(())
    }

    fn publish_stats(&mut self, stats: &SessionStats) -> anyhow::Result<()> {
        println!("[STATS] {}", self.render(stats)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutRegistry;
    use crate::packet::decode;
    use crate::version::FirmwareVersion;

    fn zero_packet(major: i32, minor: i32) -> DecodedPacket {
        let registry = LayoutRegistry::new();
        let layout = registry.resolve(FirmwareVersion::new(major, minor));
        decode(&vec![0u8; layout.total_size()], layout).unwrap()
    }

    #[test]
    fn test_field_event_serialization() {
        let packet = zero_packet(1, 8);
        let event = PacketEvent::field(&packet, "tool_vector", 3).unwrap();

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "realtime");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["layout"], "cb2-1.8");
        assert_eq!(json["field"], "tool_vector");
        assert_eq!(json["data"], serde_json::json!([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_missing_field_has_no_event() {
        let packet = zero_packet(1, 8);
        assert!(PacketEvent::field(&packet, "safety_status", 1).is_none());
    }

    #[test]
    fn test_packet_event_embeds_all_fields() {
        let packet = zero_packet(3, 10);
        let event = PacketEvent::packet(&packet, 1);

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert!(json.get("field").is_none());
        let data = json["data"].as_object().unwrap();
        assert_eq!(data.len(), packet.len());
        assert_eq!(data["safety_status"], 0.0);
        assert!(json["stime"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_sinks_accept_events() {
        let packet = zero_packet(1, 7);
        let event = PacketEvent::packet(&packet, 1);

        let mut sinks: Vec<Box<dyn PacketSink>> =
            vec![Box::new(NoOpSink), Box::new(ConsoleSink::new())];
        for sink in sinks.iter_mut() {
            sink.publish(&event).unwrap();
            sink.publish_stats(&SessionStats::default()).unwrap();
        }
    }
}

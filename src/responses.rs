//! Structured response packets and the collector that flattens them to text.
//!
//! Interactive descriptions arrive as up to four fields — name, object
//! response, context response, hint — and the collector decides which of them
//! are spoken. Each field has an enable gate the application can toggle
//! (verbosity settings); a packet can opt out of gating entirely with
//! [`ResponsePacket::ignore_properties`].

use crate::observable::ObservableCell;

/// A structured response: the four optional fields combined at announce time.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponsePacket {
    /// The name of the object being described.
    pub name_response: Option<String>,

    /// What changed about the object.
    pub object_response: Option<String>,

    /// Surrounding context for the change.
    pub context_response: Option<String>,

    /// A hint about what the user can do next.
    pub hint_response: Option<String>,

    /// When set, every present field is included regardless of the
    /// collector's enable gates.
    #[serde(default)]
    pub ignore_properties: bool,
}

impl ResponsePacket {
    /// Packet with only an object response, the most common shape.
    #[must_use]
    pub fn object(response: impl Into<String>) -> Self {
        Self {
            object_response: Some(response.into()),
            ..Self::default()
        }
    }
}

/// Combines [`ResponsePacket`]s into final spoken strings, honouring four
/// application-controlled enable gates.
///
/// One collector instance is created by the application bootstrap and passed
/// by reference to every queue that needs it; there is no implicit global.
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    /// Gate for name responses.
    pub name_enabled: ObservableCell<bool>,

    /// Gate for object responses.
    pub object_enabled: ObservableCell<bool>,

    /// Gate for context responses.
    pub context_enabled: ObservableCell<bool>,

    /// Gate for hint responses.
    pub hint_enabled: ObservableCell<bool>,
}

impl ResponseCollector {
    /// Collector with every field enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name_enabled: ObservableCell::new(true),
            object_enabled: ObservableCell::new(true),
            context_enabled: ObservableCell::new(true),
            hint_enabled: ObservableCell::new(true),
        }
    }

    /// Flatten `packet` into a single string.
    ///
    /// When `respect_properties` is false (the aria-live default), or the
    /// packet sets `ignore_properties`, every present field is included.
    /// Fields are joined in name, object, context, hint order.
    #[must_use]
    pub fn collect_responses(&self, packet: &ResponsePacket, respect_properties: bool) -> String {
        let gated = respect_properties && !packet.ignore_properties;

        let fields = [
            (&packet.name_response, !gated || self.name_enabled.get()),
            (&packet.object_response, !gated || self.object_enabled.get()),
            (&packet.context_response, !gated || self.context_enabled.get()),
            (&packet.hint_response, !gated || self.hint_enabled.get()),
        ];

        let mut result = String::new();
        for (field, enabled) in fields {
            let Some(text) = field else { continue };
            if !enabled || text.is_empty() {
                continue;
            }
            if !result.is_empty() {
                result.push_str(", ");
            }
            result.push_str(text);
        }
        result
    }
}

impl Default for ResponseCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_packet() -> ResponsePacket {
        ResponsePacket {
            name_response: Some("Slider".to_string()),
            object_response: Some("value 5".to_string()),
            context_response: Some("in the control panel".to_string()),
            hint_response: Some("arrow keys adjust".to_string()),
            ignore_properties: false,
        }
    }

    #[test]
    fn joins_all_fields_in_order() {
        let collector = ResponseCollector::new();
        assert_eq!(
            collector.collect_responses(&full_packet(), true),
            "Slider, value 5, in the control panel, arrow keys adjust"
        );
    }

    #[test]
    fn disabled_gates_drop_fields_when_respected() {
        let collector = ResponseCollector::new();
        collector.name_enabled.set(false);
        collector.hint_enabled.set(false);

        assert_eq!(
            collector.collect_responses(&full_packet(), true),
            "value 5, in the control panel"
        );
    }

    #[test]
    fn gates_ignored_when_not_respected() {
        let collector = ResponseCollector::new();
        collector.object_enabled.set(false);

        assert_eq!(
            collector.collect_responses(&full_packet(), false),
            "Slider, value 5, in the control panel, arrow keys adjust"
        );
    }

    #[test]
    fn packet_override_beats_gates() {
        let collector = ResponseCollector::new();
        collector.object_enabled.set(false);

        let mut packet = full_packet();
        packet.ignore_properties = true;

        assert!(collector.collect_responses(&packet, true).contains("value 5"));
    }

    #[test]
    fn empty_packet_collects_to_empty_string() {
        let collector = ResponseCollector::new();
        assert_eq!(
            collector.collect_responses(&ResponsePacket::default(), true),
            ""
        );
    }
}

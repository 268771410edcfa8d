//! The alertable union and announce-time text resolution.
//!
//! Anything the queue knows how to turn into text is an [`Alertable`]: plain
//! text, a number, nothing at all, a function producing any of those, a
//! structured [`ResponsePacket`], or another [`Utterance`] whose alert is
//! used in its place. Resolution happens once, at announce time, so dynamic
//! alerts always speak current application state.

use std::sync::Arc;

use crate::responses::{ResponseCollector, ResponsePacket};
use crate::utterance::Utterance;

/// A producer function for dynamic alerts, evaluated at announce time.
pub type AlertProducer = dyn Fn() -> Alertable + Send + Sync;

/// Any value the queue knows how to turn into announced text.
#[derive(Clone)]
pub enum Alertable {
    /// Nothing to say; resolves to no announcement.
    Silent,

    /// Literal text.
    Text(String),

    /// A number, spoken via its display form.
    Number(f64),

    /// A function producing another alertable, called at announce time.
    Dynamic(Arc<AlertProducer>),

    /// A structured response packet, flattened by the response collector.
    Response(ResponsePacket),

    /// Another utterance; its alert is resolved in place of this one.
    Nested(Utterance),
}

impl Alertable {
    /// Wrap a producer function.
    pub fn dynamic(producer: impl Fn() -> Alertable + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(producer))
    }

    /// Resolve to the final spoken text.
    ///
    /// Returns `None` for [`Silent`](Self::Silent) (directly or through any
    /// number of dynamic/nested hops). `respect_properties` is threaded to
    /// the collector for [`Response`](Self::Response) packets.
    #[must_use]
    pub fn resolve(
        &self,
        collector: &ResponseCollector,
        respect_properties: bool,
    ) -> Option<String> {
        match self {
            Self::Silent => None,
            Self::Text(text) => Some(text.clone()),
            Self::Number(value) => Some(value.to_string()),
            Self::Dynamic(producer) => (**producer)().resolve(collector, respect_properties),
            Self::Response(packet) => {
                Some(collector.collect_responses(packet, respect_properties))
            }
            Self::Nested(utterance) => utterance.alert().resolve(collector, respect_properties),
        }
    }
}

impl std::fmt::Debug for Alertable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silent => write!(f, "Silent"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Number(value) => f.debug_tuple("Number").field(value).finish(),
            Self::Dynamic(_) => write!(f, "Dynamic(..)"),
            Self::Response(packet) => f.debug_tuple("Response").field(packet).finish(),
            Self::Nested(utterance) => f.debug_tuple("Nested").field(utterance).finish(),
        }
    }
}

impl From<&str> for Alertable {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Alertable {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<f64> for Alertable {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Alertable {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<ResponsePacket> for Alertable {
    fn from(packet: ResponsePacket) -> Self {
        Self::Response(packet)
    }
}

impl From<Utterance> for Alertable {
    fn from(utterance: Utterance) -> Self {
        Self::Nested(utterance)
    }
}

impl<T: Into<Alertable>> From<Option<T>> for Alertable {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Silent, Into::into)
    }
}

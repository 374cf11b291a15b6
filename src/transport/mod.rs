mod channel;
mod envelope;

pub use channel::{ChannelEvent, ChannelSender, TransportChannel};
pub use envelope::{parse_inbound, InboundEnvelope, OutboundEnvelope};

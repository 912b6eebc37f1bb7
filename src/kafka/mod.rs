pub mod message;
pub mod producer;

#[cfg(test)]
mod tests;

pub use message::{preview, DeliveryFailure, OutboundMessage};
pub use producer::{client_id, AsyncProducer, KafkaAsyncProducer, KafkaSyncProducer, SyncProducer};

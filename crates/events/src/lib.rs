//! Domain events: facts emitted by aggregates and the envelopes that record them.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;

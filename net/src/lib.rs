pub mod client;
pub mod connection;
pub mod server;
pub mod session;
pub mod wire;

pub use client::{AggregateFn, ClientActionBuffer, MustGoFlag, ReplaceWithNewest, should_send_observation};
pub use connection::{ConnectionError, RobotClientConnection};
pub use server::{L2Similarity, ObservationSimilarity, PolicyServer};
pub use session::StartBarrier;
pub use wire::{ClientMessage, RemotePolicyConfig, ServerMessage, TimedAction, TimedObservation, WireError};

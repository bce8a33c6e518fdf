pub mod channel;
pub mod client;
pub mod codec;
pub mod predict;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod fake;

pub use channel::{CancelToken, Channel, ChannelError, ChannelOptions};
pub use client::{ClientError, TreeClient};
pub use predict::{Operator, PredictError, Prediction, PredictionSession};
pub use protocol::{LearnOutcome, Listing, LoadOutcome, ResultSentinel, TaskCode, Unit};
pub use session::{Session, SessionError, TreeSource};

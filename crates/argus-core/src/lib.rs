pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod exploration;
pub mod router;
pub mod runtime;
pub mod timeline;
pub mod window;

pub use config::CoreConfig;
pub use error::CoreError;
pub use events::{EventEnvelope, Topic};
pub use router::{EventRouter, SubscriptionId};
pub use runtime::{Command, CoreHandle, SessionRuntime};
pub use timeline::{Message, MessageKind, Timeline, TimelineBuilder};
pub use window::TimelineWindow;

pub mod channel;
pub mod events;
pub mod relay;

pub use channel::{SignalingChannel, Subscription};
pub use events::{Incoming, Outgoing, RoomRequest};
pub use relay::{LocalRelay, RelayClient, Room};

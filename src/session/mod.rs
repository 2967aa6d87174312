pub mod handle;
pub mod machine;
pub mod registry;

pub use handle::{Completion, SessionContext, SessionHandle};
pub use machine::ConnectionSession;
pub use registry::SessionRegistry;

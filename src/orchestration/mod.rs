pub mod orchestrator;
pub mod session;
pub mod store;

pub use orchestrator::SessionOrchestrator;
pub use session::{ImageRecord, ImageState, ImageView, Message, MessageLevel, Session, SessionView, Stage};
pub use store::{SessionSlot, SessionStore};

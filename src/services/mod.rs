pub mod ai;
pub mod analytics;
pub mod charts;
pub mod context;
pub mod conversation;
pub mod dispatcher;
pub mod processor;
pub mod router;
pub mod session;

// Re-export the services
pub use ai::{ModelClient, OpenAiClient};
pub use charts::Visualizer;
pub use context::ContextBuilder;
pub use conversation::ConversationService;
pub use dispatcher::Dispatcher;
pub use processor::DatasetProcessor;
pub use router::CapabilityRouter;
pub use session::SessionStore;

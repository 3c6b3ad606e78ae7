pub mod audit;
pub mod belief;
pub mod context;
pub mod credit;
pub mod error;
pub mod events;
pub mod news;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod session;
pub mod tools;

pub mod test_support;

pub use audit::{AuditFilter, AuditVerdict};
pub use credit::{AllowAll, CreditGate, FixedBudget};
pub use error::AgentError;
pub use events::{ArchiveSink, BroadcastSink, EventLog, EventSink, FanoutSink};
pub use news::{HttpNewsSource, NewsDigest, NewsSource, StaticNewsSource};
pub use orchestrator::Orchestrator;
pub use provider::{build_providers, ChatRequest, ProviderClient};
pub use session::SessionManager;
pub use tools::{McpHttpTransport, ToolInvoker, ToolTransport};

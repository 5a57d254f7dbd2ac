//! Tool provider connections and the aggregated tool catalog.

pub mod catalog;
pub mod connection;
pub mod transport;

pub use catalog::{ToolBackend, ToolCatalog};
pub use connection::{
    ConnectionState, ConnectionTimeouts, ToolDescriptor, ToolInvocationResult,
    ToolProviderConnection,
};
pub use transport::{ProviderTransport, StdioTransport};

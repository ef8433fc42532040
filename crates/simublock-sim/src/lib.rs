//! Multi-node proof-of-work network simulation.
//!
//! Every node runs its own mining loop on its own task and owns its own
//! ledger. Blocks travel only through the [`network::Network`], which delays
//! each delivery independently. Nodes are honest (publish at once) or selfish
//! (withhold, then release in a burst). Ledgers accept strictly by parent
//! hash with no fork choice, so released blocks that no longer fit a peer's
//! tip are simply dropped there and the chains stay forked.

pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod events;
pub mod metrics;
pub mod network;
pub mod node;

pub use config::{NetworkConfig, Role, SimConfig};
pub use control::SimulationControl;
pub use driver::Simulation;
pub use error::SimError;
pub use events::SimEvent;
pub use metrics::{RunMetrics, SimulationReport};
pub use network::{Network, NodeId, PropagationLog};
pub use node::{Node, NodeReport, NodeSettings, NodeStats};

// ABOUTME: Role and Node - resolves a process's role once at startup.
// ABOUTME: Node::start builds either the coordinator or a worker over a LocalBus.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::error::{ConfigError, FleetError, TransportError};
use crate::transport::{LocalBus, Session};
use crate::worker::{ApiBackend, WorkerAgent};

/// What this process does in the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker(String),
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    /// Parses `coordinator` or `worker:<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("coordinator") {
            return Ok(Self::Coordinator);
        }
        match s.split_once(':') {
            Some((kind, id)) if kind.eq_ignore_ascii_case("worker") && !id.trim().is_empty() => {
                Ok(Self::Worker(id.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key: "role".to_string(),
                message: format!("unknown role '{s}'. Expected 'coordinator' or 'worker:<id>'"),
            }),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Worker(id) => write!(f, "worker:{id}"),
        }
    }
}

/// A started process, already specialised to its role.
pub enum Node {
    Coordinator(CoordinatorHandle),
    Worker {
        agent: Arc<WorkerAgent>,
        listener: JoinHandle<()>,
    },
}

impl Node {
    /// Start the component for `role`.
    ///
    /// The coordinator takes the bus inbox and waits for the bus to be ready.
    /// A worker also waits for readiness, then starts listening for
    /// broadcasts. The backend is only used by workers.
    pub async fn start(
        role: Role,
        config: RateLimitConfig,
        bus: &LocalBus,
        backend: Arc<dyn ApiBackend>,
    ) -> Result<Self, FleetError> {
        config.validate()?;
        tracing::info!(%role, "starting node");

        match role {
            Role::Coordinator => {
                let inbox = bus.take_inbox().ok_or_else(|| {
                    TransportError::NotReady("coordinator inbox already taken".to_string())
                })?;
                let handle = Coordinator::builder(config)
                    .session(Arc::new(bus.clone()))
                    .start(inbox, Arc::new(bus.broadcaster()))
                    .await?;
                Ok(Self::Coordinator(handle))
            }
            Role::Worker(id) => {
                bus.ready().await?;
                let agent = Arc::new(WorkerAgent::new(
                    id,
                    config,
                    Arc::new(bus.upstream()),
                    backend,
                ));
                let listener = agent.spawn_listener(bus.subscribe());
                Ok(Self::Worker { agent, listener })
            }
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Coordinator(_) => Role::Coordinator,
            Self::Worker { agent, .. } => Role::Worker(agent.id().to_string()),
        }
    }

    /// The worker agent, if this node is a worker.
    pub fn worker(&self) -> Option<&Arc<WorkerAgent>> {
        match self {
            Self::Worker { agent, .. } => Some(agent),
            Self::Coordinator(_) => None,
        }
    }

    /// Stop the node. A coordinator returns its final state; a worker stops
    /// its broadcast listener and releases the listener's hold on the agent.
    pub async fn shutdown(self) -> Result<Option<Coordinator>, FleetError> {
        match self {
            Self::Coordinator(handle) => handle
                .shutdown()
                .await
                .map(Some)
                .map_err(|e| FleetError::Backend(e.into())),
            Self::Worker { listener, .. } => {
                listener.abort();
                match listener.await {
                    Ok(()) => Ok(None),
                    Err(e) if e.is_cancelled() => Ok(None),
                    Err(e) => Err(FleetError::Backend(e.into())),
                }
            }
        }
    }
}

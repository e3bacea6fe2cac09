//! Cluster API access for the lifecycle agent.
//!
//! The agent never talks to `kube::Client` directly. Everything goes
//! through two narrow traits so the workflow logic can be exercised
//! against [`fake::InMemoryCluster`]:
//!
//! - [`ClusterReader`]: get and list, always served by the API server
//!   (no informer cache), so a read right after a write observes it.
//! - [`ClusterClient`]: adds create, status update, merge patch and
//!   delete.
//!
//! Objects are untyped [`DynamicObject`]s addressed by an [`ObjectRef`];
//! [`get_as`] and [`to_dynamic`] convert to and from typed structs.

mod client;
mod error;
pub mod fake;
mod kube_client;
mod object;

pub use client::{get_as, list_as, ClusterClient, ClusterReader, HubConnector, Propagation};
pub use error::{ApiError, ResultExt};
pub use kube::api::DynamicObject;
pub use kube::discovery::ApiResource;
pub use kube_client::{KubeCluster, KubeHubConnector};
pub use object::{from_dynamic, resource_for, resources, to_dynamic, ObjectRef};

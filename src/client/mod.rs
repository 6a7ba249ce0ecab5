//! Client capability traits the core is polymorphic over.
//!
//! The lifecycle manager never speaks a router protocol itself. It drives
//! clients through [`RouterClient`] and manufactures them through
//! [`ClientFactory`]; concrete REST, binary API, SSH and Telnet clients live
//! in their own crates.

use crate::error::Result;
use crate::types::{ConnectionConfig, Protocol};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A protocol-specific client for one router.
///
/// The core inspects only success or failure of each call, never the error
/// type. Implementations are shared across supervisor tasks behind an `Arc`,
/// so methods take `&self` and interior mutability is the implementation's
/// concern.
///
/// # Examples
///
/// ```rust
/// use routerlink::client::RouterClient;
/// use routerlink::types::Protocol;
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct NullClient;
///
/// #[async_trait]
/// impl RouterClient for NullClient {
///     async fn connect(&self) -> routerlink::Result<()> {
///         Ok(())
///     }
///
///     async fn disconnect(&self) -> routerlink::Result<()> {
///         Ok(())
///     }
///
///     fn is_connected(&self) -> bool {
///         true
///     }
///
///     async fn ping(&self) -> routerlink::Result<()> {
///         Ok(())
///     }
///
///     fn protocol(&self) -> Protocol {
///         Protocol::Api
///     }
///
///     fn version(&self) -> String {
///         "7.12".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait RouterClient: Send + Sync + Debug {
    /// Establish the transport to the router.
    async fn connect(&self) -> Result<()>;

    /// Tear the transport down.
    ///
    /// Must be safe to call on a client that never connected.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the transport is currently up.
    fn is_connected(&self) -> bool;

    /// Liveness check against the router.
    async fn ping(&self) -> Result<()>;

    /// Which protocol this client speaks.
    fn protocol(&self) -> Protocol;

    /// Router software version, possibly empty before connect.
    fn version(&self) -> String;
}

/// Manufactures [`RouterClient`] instances from a connection config.
///
/// Called on every connect attempt and every recovery probe, so
/// implementations must be idempotent and free of side effects beyond
/// allocating the client itself.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build a client for the given config without connecting it.
    async fn create_client(&self, config: &ConnectionConfig) -> Result<Arc<dyn RouterClient>>;
}

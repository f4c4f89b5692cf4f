//! Abstractions over the product surface each actor drives.
//!
//! The real product UI is an external collaborator. The harness only needs
//! to allocate isolated sessions, point them at a location, navigate to
//! opaque waypoints and ask whether an affordance is on screen.
//!
//! ```text
//! Orchestrator                 SessionLauncher               BrowserSession
//!   |                               |                               |
//!   |-- launch(identity) ---------->|-- [isolated storage] -------->|
//!   |                                                               |
//!   |-- set_geolocation(geo) ------------------------------------->|
//!   |-- navigate(waypoint) ---------------------------------------->|
//!   |-- is_visible(affordance) ------------------------------------>|-> bool
//! ```

use crate::error::EnvError;
use crate::types::{Affordance, GeoPoint, SessionIdentity, SessionId, Waypoint};
use async_trait::async_trait;
use std::sync::Arc;

/// Answers "is element X currently visible/focused" for one session.
#[async_trait]
pub trait AffordanceLocator: Send + Sync {
    /// True if the affordance is rendered and visible right now.
    ///
    /// Implementations must not block; callers apply their own bound.
    async fn is_visible(&self, affordance: Affordance) -> bool;

    /// True if tab order over the current view follows the visual order.
    async fn focus_order_correct(&self) -> bool;
}

/// External accessibility auditor: returns a violation count for a view.
#[async_trait]
pub trait AccessibilityAuditor: Send + Sync {
    async fn audit(&self, waypoint: &Waypoint) -> Result<u32, EnvError>;
}

/// One isolated browsing session (cookies/storage not shared with peers).
#[async_trait]
pub trait BrowserSession: AffordanceLocator + AccessibilityAuditor {
    /// The session this browser was launched for.
    fn session_id(&self) -> &SessionId;

    /// Installs a location override returned for every later location query.
    async fn set_geolocation(&self, geo: GeoPoint) -> Result<(), EnvError>;

    /// The location the product code would observe, if any.
    async fn geolocation(&self) -> Option<GeoPoint>;

    /// Navigates to a waypoint and waits for it to load.
    async fn navigate(&self, waypoint: &Waypoint) -> Result<(), EnvError>;

    /// The waypoint currently displayed.
    async fn current_waypoint(&self) -> Option<Waypoint>;

    /// Closes the session. Closing twice is an error.
    async fn close(&self) -> Result<(), EnvError>;

    /// True once `close` succeeded.
    fn is_closed(&self) -> bool;
}

/// Allocates isolated browsing sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync + 'static {
    async fn launch(&self, identity: &SessionIdentity) -> Result<Arc<dyn BrowserSession>, EnvError>;
}

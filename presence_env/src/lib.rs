//! Persona Presence Environment Abstraction Layer
//!
//! This crate lets the presence harness run against both a **real** product
//! surface and a **simulated** one by abstracting everything the harness
//! touches outside its own state:
//! - Time (`now()`, `sleep()`)
//! - Session allocation and the product surface (`SessionLauncher`,
//!   `BrowserSession`)
//! - Affordance lookup and accessibility audits
//!
//! # Example
//!
//! ```ignore
//! use presence_env::{HarnessContext, SessionLauncher};
//!
//! async fn boot<Ctx: HarnessContext>(ctx: &Ctx, launcher: &dyn SessionLauncher) {
//!     let session = launcher.launch(&identity).await?;
//!     session.navigate(&Waypoint::radar()).await?;
//!     ctx.sleep(Duration::from_millis(33)).await;
//! }
//! ```

mod browser;
mod context;
mod error;
mod types;

pub use browser::{AccessibilityAuditor, AffordanceLocator, BrowserSession, SessionLauncher};
pub use context::{Clock, HarnessContext};
pub use error::EnvError;
pub use types::{Affordance, GeoPoint, RunId, SessionId, SessionIdentity, Waypoint};

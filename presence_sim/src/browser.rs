//! Simulated product surface with fault injection.
//!
//! Each [`SimPage`] stands in for one isolated browsing session: it owns its
//! own storage, geolocation override and current view. The
//! [`SimBrowserController`] is shared by every page of a run and decides
//! which faults they exhibit.

use crate::context::SimContext;
use async_trait::async_trait;
use presence_env::{
    AccessibilityAuditor, Affordance, AffordanceLocator, BrowserSession, Clock, EnvError, GeoPoint,
    HarnessContext, SessionId, SessionIdentity, SessionLauncher, Waypoint,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Views on which an affordance is part of the layout.
pub fn hosts_affordance(waypoint: &Waypoint, affordance: Affordance) -> bool {
    match affordance {
        Affordance::PanicButton => matches!(
            waypoint.as_str(),
            Waypoint::RADAR | Waypoint::CHAT | Waypoint::PROFILE
        ),
        Affordance::VisibilityToggle => waypoint.as_str() == Waypoint::PROFILE,
    }
}

#[derive(Default)]
struct Faults {
    rejected_tokens: HashSet<SessionId>,
    launch_failures: HashSet<SessionId>,
    hidden: HashMap<SessionId, HashSet<Affordance>>,
    render_delay: HashMap<SessionId, Duration>,
    violations: HashMap<String, u32>,
    broken_focus: HashSet<SessionId>,
    /// Remaining failures per (session, waypoint).
    navigation_failures: HashMap<(SessionId, String), u32>,
}

/// Fault injection shared by all pages of one simulated run.
#[derive(Clone, Default)]
pub struct SimBrowserController {
    faults: Arc<Mutex<Faults>>,
}

impl SimBrowserController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's credential will be refused at launch.
    pub fn reject_token(&self, session: &SessionId) {
        lock(&self.faults).rejected_tokens.insert(session.clone());
    }

    /// Allocation itself fails for this session.
    pub fn fail_launch(&self, session: &SessionId) {
        lock(&self.faults).launch_failures.insert(session.clone());
    }

    pub fn hide_affordance(&self, session: &SessionId, affordance: Affordance) {
        lock(&self.faults)
            .hidden
            .entry(session.clone())
            .or_default()
            .insert(affordance);
    }

    /// Affordances appear this long (virtual time) after a view loads.
    pub fn set_render_delay(&self, session: &SessionId, delay: Duration) {
        lock(&self.faults).render_delay.insert(session.clone(), delay);
    }

    /// Violation count the auditor reports for a view.
    pub fn set_violations(&self, waypoint: &Waypoint, count: u32) {
        lock(&self.faults)
            .violations
            .insert(waypoint.as_str().to_string(), count);
    }

    pub fn break_focus_order(&self, session: &SessionId) {
        lock(&self.faults).broken_focus.insert(session.clone());
    }

    /// The next `times` navigations to `waypoint` fail for this session.
    pub fn fail_navigation(&self, session: &SessionId, waypoint: &Waypoint, times: u32) {
        lock(&self.faults)
            .navigation_failures
            .insert((session.clone(), waypoint.as_str().to_string()), times);
    }

    fn check_launch(&self, identity: &SessionIdentity) -> Result<(), EnvError> {
        let faults = lock(&self.faults);
        if faults.launch_failures.contains(&identity.session_id) {
            return Err(EnvError::launch(format!(
                "browser context allocation failed for {}",
                identity.session_id
            )));
        }
        if identity.token.is_empty() || faults.rejected_tokens.contains(&identity.session_id) {
            return Err(EnvError::launch(format!(
                "token rejected for {}",
                identity.session_id
            )));
        }
        Ok(())
    }

    fn is_hidden(&self, session: &SessionId, affordance: Affordance) -> bool {
        lock(&self.faults)
            .hidden
            .get(session)
            .map(|set| set.contains(&affordance))
            .unwrap_or(false)
    }

    fn render_delay(&self, session: &SessionId) -> Duration {
        lock(&self.faults)
            .render_delay
            .get(session)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    fn violations(&self, waypoint: &Waypoint) -> u32 {
        lock(&self.faults)
            .violations
            .get(waypoint.as_str())
            .copied()
            .unwrap_or(0)
    }

    fn focus_broken(&self, session: &SessionId) -> bool {
        lock(&self.faults).broken_focus.contains(session)
    }

    fn take_navigation_failure(&self, session: &SessionId, waypoint: &Waypoint) -> bool {
        let mut faults = lock(&self.faults);
        let key = (session.clone(), waypoint.as_str().to_string());
        match faults.navigation_failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// One simulated, isolated browsing session.
pub struct SimPage {
    session_id: SessionId,
    ctx: SimContext,
    controller: SimBrowserController,
    navigation_latency_ms: (u64, u64),
    storage: Mutex<HashMap<String, String>>,
    geo: Mutex<Option<GeoPoint>>,
    /// Current view and the virtual time it finished loading.
    view: Mutex<Option<(Waypoint, Duration)>>,
    closed: AtomicBool,
}

impl SimPage {
    /// Reads this session's local storage.
    pub fn storage_get(&self, key: &str) -> Option<String> {
        lock(&self.storage).get(key).cloned()
    }

    pub fn storage_set(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.storage).insert(key.into(), value.into());
    }

    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EnvError::closed(&self.session_id))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AffordanceLocator for SimPage {
    async fn is_visible(&self, affordance: Affordance) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.controller.is_hidden(&self.session_id, affordance) {
            return false;
        }
        let view = lock(&self.view).clone();
        match view {
            Some((waypoint, loaded_at)) => {
                let shown_for = self.ctx.now().saturating_sub(loaded_at);
                hosts_affordance(&waypoint, affordance)
                    && shown_for >= self.controller.render_delay(&self.session_id)
            }
            None => false,
        }
    }

    async fn focus_order_correct(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && lock(&self.view).is_some()
            && !self.controller.focus_broken(&self.session_id)
    }
}

#[async_trait]
impl AccessibilityAuditor for SimPage {
    async fn audit(&self, waypoint: &Waypoint) -> Result<u32, EnvError> {
        self.ensure_open()?;
        Ok(self.controller.violations(waypoint))
    }
}

#[async_trait]
impl BrowserSession for SimPage {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn set_geolocation(&self, geo: GeoPoint) -> Result<(), EnvError> {
        self.ensure_open()?;
        geo.validate().map_err(EnvError::Geolocation)?;
        *lock(&self.geo) = Some(geo);
        Ok(())
    }

    async fn geolocation(&self) -> Option<GeoPoint> {
        *lock(&self.geo)
    }

    async fn navigate(&self, waypoint: &Waypoint) -> Result<(), EnvError> {
        self.ensure_open()?;
        let (min, max) = self.navigation_latency_ms;
        self.ctx.sleep(self.ctx.latency(min, max)).await;

        if self.controller.take_navigation_failure(&self.session_id, waypoint) {
            return Err(EnvError::navigation(waypoint, "view failed to load"));
        }
        *lock(&self.view) = Some((waypoint.clone(), self.ctx.now()));
        debug!("{} -> {}", self.session_id, waypoint);
        Ok(())
    }

    async fn current_waypoint(&self) -> Option<Waypoint> {
        lock(&self.view).as_ref().map(|(w, _)| w.clone())
    }

    async fn close(&self) -> Result<(), EnvError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(EnvError::closed(&self.session_id));
        }
        lock(&self.storage).clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Launcher producing [`SimPage`]s.
#[derive(Clone)]
pub struct SimBrowser {
    ctx: SimContext,
    controller: SimBrowserController,
    navigation_latency_ms: (u64, u64),
    pages: Arc<Mutex<Vec<Arc<SimPage>>>>,
}

impl SimBrowser {
    pub fn new(ctx: SimContext, controller: SimBrowserController) -> Self {
        Self {
            ctx,
            controller,
            navigation_latency_ms: (80, 400),
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Virtual latency range for each navigation.
    pub fn with_navigation_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.navigation_latency_ms = (min_ms, max_ms);
        self
    }

    pub fn controller(&self) -> &SimBrowserController {
        &self.controller
    }

    /// Every page launched so far.
    pub fn pages(&self) -> Vec<Arc<SimPage>> {
        lock(&self.pages).clone()
    }

    /// Pages that have not been closed.
    pub fn open_sessions(&self) -> Vec<SessionId> {
        lock(&self.pages)
            .iter()
            .filter(|p| !p.is_closed())
            .map(|p| p.session_id.clone())
            .collect()
    }

    pub fn page(&self, session: &SessionId) -> Option<Arc<SimPage>> {
        lock(&self.pages)
            .iter()
            .rev()
            .find(|p| &p.session_id == session)
            .cloned()
    }
}

#[async_trait]
impl SessionLauncher for SimBrowser {
    async fn launch(&self, identity: &SessionIdentity) -> Result<Arc<dyn BrowserSession>, EnvError> {
        self.controller.check_launch(identity)?;

        let page = Arc::new(SimPage {
            session_id: identity.session_id.clone(),
            ctx: self.ctx.clone(),
            controller: self.controller.clone(),
            navigation_latency_ms: self.navigation_latency_ms,
            storage: Mutex::new(HashMap::new()),
            geo: Mutex::new(None),
            view: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        page.storage_set("session_token", identity.token.clone());
        page.storage_set("handle", identity.handle.clone());

        lock(&self.pages).push(page.clone());
        debug!("launched simulated session for {}", identity.session_id);
        Ok(page)
    }
}

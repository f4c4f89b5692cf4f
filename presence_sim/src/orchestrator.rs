//! Session orchestrator: fans a script out into isolated actor sessions.
//!
//! Every persona is brought up as its own task; a failure for one persona
//! is recorded against it and never stops its siblings. Teardown visits
//! every created actor even when some of them fail to close.

use presence_core::{
    ClientMessage, PersonaPresence, PersonaPresenceScript, PresenceServer, ProtocolConnection, Rejection,
    ServerEvent,
};
use presence_env::{
    Affordance, AffordanceLocator, BrowserSession, EnvError, SessionId, SessionIdentity, SessionLauncher,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Why one actor could not be created.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}: missing credential")]
    MissingCredential(SessionId),

    #[error("{session_id}: malformed geo: {reason}")]
    InvalidGeo { session_id: SessionId, reason: String },

    #[error("{session_id}: {source}")]
    Launch {
        session_id: SessionId,
        #[source]
        source: EnvError,
    },

    #[error("{session_id}: protocol connect rejected: {rejection}")]
    Connect { session_id: SessionId, rejection: Rejection },

    #[error("{session_id}: actor task failed: {reason}")]
    Task { session_id: SessionId, reason: String },
}

impl SessionError {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionError::MissingCredential(id) => id,
            SessionError::InvalidGeo { session_id, .. }
            | SessionError::Launch { session_id, .. }
            | SessionError::Connect { session_id, .. }
            | SessionError::Task { session_id, .. } => session_id,
        }
    }
}

/// One actor that did not close cleanly.
#[derive(Debug)]
pub struct TeardownFailure {
    pub session_id: SessionId,
    pub error: EnvError,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("teardown failed for {}: {}", .0.len(), .0.iter().map(|f| format!("{} ({})", f.session_id, f.error)).collect::<Vec<_>>().join(", "))]
    Teardown(Vec<TeardownFailure>),
}

/// Explicit bounds for every wait an actor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBounds {
    pub affordance_timeout: Duration,
    pub event_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitBounds {
    fn default() -> Self {
        Self {
            affordance_timeout: Duration::from_millis(2000),
            event_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// One persona's live session: browser plus protocol connection.
pub struct ActorSession {
    persona: PersonaPresence,
    browser: Arc<dyn BrowserSession>,
    connection: Option<ProtocolConnection>,
    server: PresenceServer,
    waits: WaitBounds,
}

impl ActorSession {
    pub fn session_id(&self) -> &SessionId {
        &self.persona.session_id
    }

    pub fn persona(&self) -> &PersonaPresence {
        &self.persona
    }

    pub fn browser(&self) -> &Arc<dyn BrowserSession> {
        &self.browser
    }

    pub fn connection(&self) -> Option<&ProtocolConnection> {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut ProtocolConnection> {
        self.connection.as_mut()
    }

    /// Sends a typed command, or reports that the actor is offline.
    pub fn send(&self, message: ClientMessage) -> Result<(), Rejection> {
        match &self.connection {
            Some(conn) => conn.send(message),
            None => Err(Rejection::NotConnected(self.session_id().clone())),
        }
    }

    pub fn request_chat(&self, target: &SessionId) -> Result<(), Rejection> {
        self.send(ClientMessage::ChatRequest {
            target_session_id: target.clone(),
        })
    }

    pub fn set_visibility(&self, visible: bool) -> Result<(), Rejection> {
        self.server.set_visibility(self.session_id(), visible)
    }

    /// Drops the protocol connection; the browser stays open.
    pub fn disconnect(&mut self) -> bool {
        self.connection.take().map(ProtocolConnection::close).unwrap_or(false)
    }

    /// Opens a fresh protocol connection with the persona's token.
    pub fn reconnect(&mut self) -> Result<(), Rejection> {
        if self.connection.as_ref().map(|c| c.is_live()).unwrap_or(false) {
            return Ok(());
        }
        let conn = self.server.connect(self.session_id(), &self.persona.token)?;
        self.connection = Some(conn);
        Ok(())
    }

    /// Polls for an affordance until it shows or the bound elapses.
    ///
    /// A timeout is "not observed", never an error.
    pub async fn observe_affordance(&self, affordance: Affordance) -> bool {
        let poll = self.waits.poll_interval;
        let browser = &self.browser;
        let watch = async {
            loop {
                if browser.is_visible(affordance).await {
                    return true;
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(self.waits.affordance_timeout, watch)
            .await
            .unwrap_or(false)
    }

    /// First event matching `predicate` within the event bound.
    pub async fn wait_for_event<F>(&mut self, predicate: F) -> Option<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        let timeout = self.waits.event_timeout;
        match self.connection.as_mut() {
            Some(conn) => conn.wait_for(timeout, predicate).await,
            None => None,
        }
    }

    /// Releases the protocol connection and closes the browser.
    pub async fn close(mut self) -> Result<(), EnvError> {
        self.disconnect();
        self.browser.close().await
    }
}

/// Outcome of bringing a script up.
pub struct ActorSet {
    actors: Vec<ActorSession>,
    failures: Vec<SessionError>,
    server: PresenceServer,
    torn_down: bool,
}

impl ActorSet {
    pub fn actors(&self) -> &[ActorSession] {
        &self.actors
    }

    pub fn failures(&self) -> &[SessionError] {
        &self.failures
    }

    pub fn failed_personas(&self) -> Vec<SessionId> {
        self.failures.iter().map(|f| f.session_id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn actor(&self, session_id: &SessionId) -> Option<&ActorSession> {
        self.actors.iter().find(|a| a.session_id() == session_id)
    }

    pub fn actor_mut(&mut self, session_id: &SessionId) -> Option<&mut ActorSession> {
        self.actors.iter_mut().find(|a| a.session_id() == session_id)
    }

    /// Two distinct actors by id, mutably.
    pub fn pair_mut(
        &mut self,
        a: &SessionId,
        b: &SessionId,
    ) -> Option<(&mut ActorSession, &mut ActorSession)> {
        let ia = self.actors.iter().position(|x| x.session_id() == a)?;
        let ib = self.actors.iter().position(|x| x.session_id() == b)?;
        if ia == ib {
            return None;
        }
        if ia < ib {
            let (left, right) = self.actors.split_at_mut(ib);
            Some((&mut left[ia], &mut right[0]))
        } else {
            let (left, right) = self.actors.split_at_mut(ia);
            Some((&mut right[0], &mut left[ib]))
        }
    }

    pub fn server(&self) -> &PresenceServer {
        &self.server
    }

    /// Closes every actor, then force-disconnects anything left on the
    /// mock. Failures are collected and reported together at the end.
    pub async fn teardown(mut self) -> Result<usize, OrchestratorError> {
        self.torn_down = true;
        let actors = std::mem::take(&mut self.actors);
        let mut closed = 0;
        let mut failures = Vec::new();

        for actor in actors {
            let session_id = actor.session_id().clone();
            match actor.close().await {
                Ok(()) => closed += 1,
                Err(error) => {
                    warn!("teardown: failed to close {}: {}", session_id, error);
                    failures.push(TeardownFailure { session_id, error });
                }
            }
        }
        self.server.reset();

        if failures.is_empty() {
            debug!("teardown: closed {} actors", closed);
            Ok(closed)
        } else {
            Err(OrchestratorError::Teardown(failures))
        }
    }
}

impl Drop for ActorSet {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        // Teardown was skipped (panic or cancellation): release the mock now
        // and close browsers in the background if a runtime is available.
        warn!("actor set dropped without teardown; forcing cleanup");
        let actors = std::mem::take(&mut self.actors);
        self.server.reset();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for actor in actors {
                    let _ = actor.close().await;
                }
            });
        }
    }
}

/// Creates and destroys actor sessions against one scenario's mock server.
pub struct Orchestrator {
    launcher: Arc<dyn SessionLauncher>,
    server: PresenceServer,
    waits: WaitBounds,
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn SessionLauncher>, server: PresenceServer) -> Self {
        Self {
            launcher,
            server,
            waits: WaitBounds::default(),
        }
    }

    pub fn with_waits(mut self, waits: WaitBounds) -> Self {
        self.waits = waits;
        self
    }

    pub fn server(&self) -> &PresenceServer {
        &self.server
    }

    /// Brings up one actor per persona.
    ///
    /// All actors are created before this returns, so peer visibility is
    /// meaningful from the first observation. Actors come back in script
    /// order; failed personas are listed in [`ActorSet::failures`].
    pub async fn create_actors(&self, script: &PersonaPresenceScript) -> ActorSet {
        let mut tasks = JoinSet::new();
        for (index, persona) in script.personas.iter().cloned().enumerate() {
            let launcher = self.launcher.clone();
            let server = self.server.clone();
            let waits = self.waits;
            tasks.spawn(async move {
                let session_id = persona.session_id.clone();
                (index, session_id, create_actor(launcher, server, persona, waits).await)
            });
        }

        let mut created = Vec::new();
        let mut failures = Vec::new();
        let mut pending: Vec<SessionId> = script.session_ids();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, session_id, Ok(actor))) => {
                    pending.retain(|id| id != &session_id);
                    created.push((index, actor));
                }
                Ok((index, session_id, Err(error))) => {
                    pending.retain(|id| id != &session_id);
                    warn!("actor creation failed: {}", error);
                    failures.push((index, error));
                }
                Err(join_error) => {
                    warn!("actor task did not complete: {}", join_error);
                }
            }
        }

        // Tasks that panicked never reported their persona.
        for session_id in pending {
            let index = script
                .personas
                .iter()
                .position(|p| p.session_id == session_id)
                .unwrap_or(usize::MAX);
            failures.push((
                index,
                SessionError::Task {
                    session_id,
                    reason: "task aborted".to_string(),
                },
            ));
        }

        created.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);

        let set = ActorSet {
            actors: created.into_iter().map(|(_, a)| a).collect(),
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            server: self.server.clone(),
            torn_down: false,
        };
        info!(
            "actors ready: {} created, {} failed",
            set.actors.len(),
            set.failures.len()
        );
        set
    }

    /// Same as [`ActorSet::teardown`].
    pub async fn cleanup(&self, actors: ActorSet) -> Result<usize, OrchestratorError> {
        actors.teardown().await
    }
}

async fn create_actor(
    launcher: Arc<dyn SessionLauncher>,
    server: PresenceServer,
    persona: PersonaPresence,
    waits: WaitBounds,
) -> Result<ActorSession, SessionError> {
    let session_id = persona.session_id.clone();

    if !persona.has_credential() {
        return Err(SessionError::MissingCredential(session_id));
    }
    if let Some(geo) = persona.geo {
        geo.validate().map_err(|reason| SessionError::InvalidGeo {
            session_id: session_id.clone(),
            reason,
        })?;
    }

    let identity = SessionIdentity {
        session_id: session_id.clone(),
        token: persona.token.clone(),
        handle: persona.handle.clone(),
    };
    let browser = launcher
        .launch(&identity)
        .await
        .map_err(|source| SessionError::Launch {
            session_id: session_id.clone(),
            source,
        })?;

    if let Some(geo) = persona.geo {
        if let Err(source) = browser.set_geolocation(geo).await {
            release(&browser).await;
            return Err(SessionError::Launch { session_id, source });
        }
    }

    let connection = match server.connect(&session_id, &persona.token) {
        Ok(conn) => conn,
        Err(rejection) => {
            release(&browser).await;
            return Err(SessionError::Connect { session_id, rejection });
        }
    };

    debug!("actor ready: {}", session_id);
    Ok(ActorSession {
        persona,
        browser,
        connection: Some(connection),
        server,
        waits,
    })
}

async fn release(browser: &Arc<dyn BrowserSession>) {
    if let Err(e) = browser.close().await {
        warn!("failed to release {}: {}", browser.session_id(), e);
    }
}

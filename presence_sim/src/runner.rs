//! Scenario runner - drives one presence scenario end to end.
//!
//! A run builds its own clock, browser, mock server and actors, so two runs
//! never share state. Every persona in the script gets a telemetry record,
//! including personas whose session failed to start.

use crate::browser::{SimBrowser, SimBrowserController};
use crate::config::HarnessConfig;
use crate::context::SimContext;
use crate::fixtures;
use crate::orchestrator::{ActorSession, ActorSet, Orchestrator};
use crate::scenarios::ScenarioId;

use presence_core::{
    ChatEndReason, ClientMessage, PersonaPresenceScript, PresenceServer, Rejection, ServerEvent,
    TelemetryCollector, TimedEvent,
};
use presence_env::{AccessibilityAuditor, Affordance, AffordanceLocator, Clock, RunId, SessionId, Waypoint};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Attempts per navigation before the step is abandoned.
const NAVIGATION_ATTEMPTS: u32 = 2;

/// Onboarding steps walked in the UX walkthrough.
const ONBOARDING_STEPS: u32 = 3;

type Check = Result<(), String>;
type Telemetry = BTreeMap<SessionId, TelemetryCollector>;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Venue of the script the scenario ran against
    pub venue: String,

    pub run_id: RunId,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Personas whose session could not be created
    pub failed_personas: Vec<SessionId>,

    /// Telemetry files written by this run
    pub telemetry_paths: Vec<PathBuf>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub actors_created: usize,
    pub actors_failed: usize,

    /// Protocol events queued on live channels
    pub events_delivered: u64,

    /// Protocol events whose receiver was gone
    pub events_dropped: u64,

    /// Commands refused by the mock
    pub rejections: u64,

    pub chats_started: u64,

    /// Virtual time spent in simulated navigation
    pub virtual_time_ms: u64,
}

/// Runs presence scenarios.
pub struct ScenarioRunner {
    config: HarnessConfig,

    /// Overrides each scenario's built-in venue
    script: Option<PersonaPresenceScript>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(config: HarnessConfig) -> Self {
        Self { config, script: None }
    }

    /// Runs every scenario against this script instead of its default venue.
    pub fn with_script(mut self, script: PersonaPresenceScript) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs every scenario in catalogue order.
    pub async fn run_all(&self) -> Vec<ScenarioResult> {
        let mut results = Vec::new();
        for scenario in ScenarioId::all() {
            results.push(self.run(scenario).await);
        }
        results
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let seed = self.config.seed;
        info!("Starting scenario: {} (seed={})", scenario.name(), seed);

        let ctx = SimContext::new(seed).with_epoch(SystemTime::now());
        let run_id = RunId::new();
        let mut result = ScenarioResult {
            scenario,
            seed,
            venue: String::new(),
            run_id,
            passed: false,
            failure_reason: None,
            failed_personas: Vec::new(),
            telemetry_paths: Vec::new(),
            metrics: ScenarioMetrics::default(),
        };

        let script = match &self.script {
            Some(script) => script.clone(),
            None => match fixtures::load_fixture(scenario.default_venue()) {
                Ok(script) => script,
                Err(e) => {
                    result.failure_reason = Some(e.to_string());
                    return result;
                }
            },
        };
        result.venue = script.venue.clone();

        if script.personas.len() < scenario.min_personas() {
            result.failure_reason = Some(format!(
                "{} needs at least {} personas, script '{}' has {}",
                scenario.name(),
                scenario.min_personas(),
                script.venue,
                script.personas.len()
            ));
            return result;
        }

        let controller = SimBrowserController::new();
        inject_faults(scenario, &script, &controller);
        let (min_ms, max_ms) = self.config.navigation_latency_ms;
        let browser = SimBrowser::new(ctx.clone(), controller).with_navigation_latency(min_ms, max_ms);
        let server = PresenceServer::new(&script);
        let orchestrator = Orchestrator::new(Arc::new(browser.clone()), server.clone())
            .with_waits(self.config.wait_bounds());

        let mut telemetry = self.collectors(scenario, &script, &ctx, run_id, seed);

        let mut actors = orchestrator.create_actors(&script).await;
        for failure in actors.failures() {
            if let Some(t) = telemetry.get_mut(failure.session_id()) {
                t.record_error(failure.to_string());
            }
        }
        result.failed_personas = actors.failed_personas();
        result.metrics.actors_created = actors.len();
        result.metrics.actors_failed = actors.failures().len();

        for actor in actors.actors() {
            if let Some(t) = telemetry.get_mut(actor.session_id()) {
                warm_up(actor, t).await;
            }
        }

        let outcome = match preconditions(scenario, &script, &actors) {
            Err(reason) => Err(reason),
            Ok(()) => self.run_checks(scenario, &mut actors, &mut telemetry).await,
        };

        for actor in actors.actors() {
            if let Some(t) = telemetry.get_mut(actor.session_id()) {
                audit(actor, t, scenario).await;
            }
        }

        let teardown = actors.teardown().await;
        let outcome = outcome.and_then(|()| match teardown {
            Ok(closed) => {
                debug!("closed {} actors", closed);
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        });
        let outcome = outcome.and_then(|()| verify_released(&browser, &server));

        if let Err(reason) = &outcome {
            for t in telemetry.values_mut() {
                t.add_metadata("scenario_failure", reason.clone());
            }
        }

        result.telemetry_paths = telemetry
            .into_values()
            .filter_map(TelemetryCollector::finish)
            .collect();

        let server_metrics = server.metrics();
        result.metrics.events_delivered = server_metrics.events_delivered;
        result.metrics.events_dropped = server_metrics.events_dropped;
        result.metrics.rejections = server_metrics.rejections;
        result.metrics.chats_started = server_metrics.chats_started;
        result.metrics.virtual_time_ms = ctx.now().as_millis() as u64;

        match outcome {
            Ok(()) => result.passed = true,
            Err(reason) => {
                warn!("{} failed: {}", scenario.name(), reason);
                result.failure_reason = Some(reason);
            }
        }
        result
    }

    fn collectors(
        &self,
        scenario: ScenarioId,
        script: &PersonaPresenceScript,
        ctx: &SimContext,
        run_id: RunId,
        seed: u64,
    ) -> Telemetry {
        let clock: Arc<dyn Clock> = Arc::new(ctx.clone());
        let store = self.config.telemetry_store();
        script
            .personas
            .iter()
            .map(|persona| {
                let mut collector =
                    TelemetryCollector::new(persona.session_id.as_str(), run_id, clock.clone(), store.clone())
                        .with_session(persona.session_id.clone())
                        .with_scenario(scenario.name());
                collector.add_metadata("venue", script.venue.clone());
                collector.add_metadata("handle", persona.handle.clone());
                collector.add_metadata("seed", seed);
                (persona.session_id.clone(), collector)
            })
            .collect()
    }

    async fn run_checks(&self, scenario: ScenarioId, actors: &mut ActorSet, telemetry: &mut Telemetry) -> Check {
        match scenario {
            ScenarioId::MutualVisibility => check_mutual_visibility(actors),
            ScenarioId::SharedTags => check_shared_tags(actors).await,
            ScenarioId::VisibilityToggle => check_visibility_toggle(actors).await,
            ScenarioId::ReconnectRestoresVisibility => check_reconnect_restores_visibility(actors).await,
            ScenarioId::OneChatAtATime => check_one_chat_at_a_time(actors).await,
            ScenarioId::ConcurrentChatRace => check_concurrent_chat_race(actors).await,
            ScenarioId::IsolatedFailure => check_isolated_failure(actors).await,
            ScenarioId::PanicExit => check_panic_exit(actors, telemetry).await,
            ScenarioId::UxWalkthrough => check_ux_walkthrough(actors, telemetry).await,
        }
    }
}

/// Product-side faults each scenario runs under.
fn inject_faults(scenario: ScenarioId, script: &PersonaPresenceScript, controller: &SimBrowserController) {
    let ids = script.session_ids();
    match scenario {
        ScenarioId::IsolatedFailure => {
            if let Some(victim) = ids.get(1) {
                controller.reject_token(victim);
            }
        }
        ScenarioId::UxWalkthrough => {
            if let Some(first) = ids.first() {
                controller.fail_navigation(first, &Waypoint::onboarding(), 1);
            }
            if ids.len() > 1 {
                if let Some(last) = ids.last() {
                    controller.hide_affordance(last, Affordance::VisibilityToggle);
                    controller.break_focus_order(last);
                }
            }
            controller.set_violations(&Waypoint::onboarding(), 2);
        }
        _ => {}
    }
}

fn preconditions(scenario: ScenarioId, script: &PersonaPresenceScript, actors: &ActorSet) -> Check {
    if scenario == ScenarioId::IsolatedFailure {
        // The injected failure is the point of the scenario.
        let expected = script.personas.len() - 1;
        if actors.len() != expected {
            return Err(format!("expected {} actors to start, got {}", expected, actors.len()));
        }
        return Ok(());
    }
    if !actors.failures().is_empty() {
        let reasons: Vec<String> = actors.failures().iter().map(|f| f.to_string()).collect();
        return Err(format!("actor creation failed: {}", reasons.join("; ")));
    }
    if actors.len() < scenario.min_personas() {
        return Err(format!("only {} actors started", actors.len()));
    }
    Ok(())
}

/// Browser and mock must both be empty once teardown returns.
fn verify_released(browser: &SimBrowser, server: &PresenceServer) -> Check {
    let open = browser.open_sessions();
    if !open.is_empty() {
        return Err(format!("browser sessions left open: {}", join(&open)));
    }
    let connected = server.connected_sessions();
    if !connected.is_empty() {
        return Err(format!("mock connections left open: {}", join(&connected)));
    }
    Ok(())
}

fn join(ids: &[SessionId]) -> String {
    ids.iter().map(SessionId::as_str).collect::<Vec<_>>().join(", ")
}

fn session_ids(actors: &ActorSet) -> Vec<SessionId> {
    actors.actors().iter().map(|a| a.session_id().clone()).collect()
}

fn actor<'a>(actors: &'a ActorSet, id: &SessionId) -> Result<&'a ActorSession, String> {
    actors.actor(id).ok_or_else(|| format!("{}: no such actor", id))
}

fn actor_mut<'a>(actors: &'a mut ActorSet, id: &SessionId) -> Result<&'a mut ActorSession, String> {
    actors.actor_mut(id).ok_or_else(|| format!("{}: no such actor", id))
}

fn drain(actor: &mut ActorSession) {
    if let Some(conn) = actor.connection_mut() {
        conn.drain();
    }
}

fn expect_rejection(what: &str, got: Result<(), Rejection>, expected: Rejection) -> Check {
    match got {
        Err(rejection) if rejection == expected => Ok(()),
        other => Err(format!("{}: expected {}, got {:?}", what, expected.code(), other)),
    }
}

/// Navigates with retries, recording banners and retries on the way.
async fn visit(actor: &ActorSession, telemetry: &mut TelemetryCollector, waypoint: &Waypoint) -> bool {
    for attempt in 1..=NAVIGATION_ATTEMPTS {
        match actor.browser().navigate(waypoint).await {
            Ok(()) => return true,
            Err(e) => {
                debug!("{}: navigation attempt {} failed: {}", actor.session_id(), attempt, e);
                telemetry.record_error_banner();
                telemetry.record_error(e.to_string());
                if attempt < NAVIGATION_ATTEMPTS {
                    telemetry.record_step_retry();
                }
            }
        }
    }
    false
}

/// Boot to the welcome view, then look for the core affordances.
async fn warm_up(actor: &ActorSession, telemetry: &mut TelemetryCollector) {
    telemetry.start_timing(TimedEvent::Boot);
    let booted = visit(actor, telemetry, &Waypoint::welcome()).await;
    telemetry.end_timing(TimedEvent::Boot);
    if !booted {
        return;
    }

    if visit(actor, telemetry, &Waypoint::profile()).await {
        let toggle = actor.observe_affordance(Affordance::VisibilityToggle).await;
        telemetry.record_affordance(Affordance::VisibilityToggle, toggle);
    }
    if visit(actor, telemetry, &Waypoint::radar()).await {
        let panic = actor.observe_affordance(Affordance::PanicButton).await;
        telemetry.record_affordance(Affordance::PanicButton, panic);
        telemetry.record_focus_order(actor.browser().focus_order_correct().await);
    }
}

/// One audit per run, summed over the views the scenario exercised.
async fn audit(actor: &ActorSession, telemetry: &mut TelemetryCollector, scenario: ScenarioId) {
    let mut views = vec![Waypoint::radar()];
    if scenario == ScenarioId::UxWalkthrough {
        views.insert(0, Waypoint::onboarding());
    }
    let mut total = 0;
    for view in &views {
        match actor.browser().audit(view).await {
            Ok(count) => total += count,
            Err(e) => {
                telemetry.record_error(format!("audit of {} failed: {}", view, e));
                return;
            }
        }
    }
    telemetry.record_a11y_violations(total);
}

fn check_mutual_visibility(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let visible: Vec<SessionId> = actors
        .actors()
        .iter()
        .filter(|a| a.persona().visibility_default)
        .map(|a| a.session_id().clone())
        .collect();
    if visible.len() < 2 {
        return Err("fewer than two visible personas".to_string());
    }

    for viewer in &visible {
        let expected: Vec<SessionId> = visible.iter().filter(|id| *id != viewer).cloned().collect();
        let peers = server.visible_peers(viewer);
        if peers != expected {
            return Err(format!("{} sees [{}], expected [{}]", viewer, join(&peers), join(&expected)));
        }

        let roster = actor_mut(actors, viewer)?
            .connection_mut()
            .and_then(|c| c.latest_roster());
        match roster {
            Some(roster) if roster == expected => {}
            Some(roster) => {
                return Err(format!(
                    "{} was last pushed [{}], expected [{}]",
                    viewer,
                    join(&roster),
                    join(&expected)
                ))
            }
            None => return Err(format!("{} never received a roster", viewer)),
        }
    }
    Ok(())
}

async fn check_shared_tags(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let mut shared_pairs = 0;

    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            let pa = actor(actors, a)?.persona();
            let pb = actor(actors, b)?.persona();
            let expected: Vec<&String> = pa.tags.intersection(&pb.tags).collect();

            let hint = server
                .compatibility(a, b)
                .ok_or_else(|| format!("no compatibility hint for {} and {}", a, b))?;
            if hint.shared_tags.iter().collect::<Vec<_>>() != expected {
                return Err(format!("{} / {}: wrong shared tags {:?}", a, b, hint.shared_tags));
            }
            if hint.shared_tags.is_empty() {
                continue;
            }
            shared_pairs += 1;

            // The hint must also reach the viewer through the roster.
            let b_visible = server.snapshot(b).map(|s| s.visible).unwrap_or(false);
            if !b_visible {
                continue;
            }
            let viewer = actor_mut(actors, a)?;
            drain(viewer);
            viewer.send(ClientMessage::RadarSubscribe).map_err(|r| r.to_string())?;
            let event = viewer
                .wait_for_event(|e| matches!(e, ServerEvent::PresenceUpdate { .. }))
                .await
                .ok_or_else(|| format!("{} got no roster after subscribing", a))?;
            let pushed = match event {
                ServerEvent::PresenceUpdate { people } => people
                    .into_iter()
                    .find(|p| &p.session_id == b)
                    .map(|p| p.compatibility.shared_tags),
                _ => None,
            };
            if pushed.as_ref() != Some(&hint.shared_tags) {
                return Err(format!("{}'s roster entry for {} lacks the shared tags", a, b));
            }
        }
    }

    if shared_pairs == 0 {
        return Err("no pair of personas shares a tag".to_string());
    }
    debug!("{} pairs share tags", shared_pairs);
    Ok(())
}

fn roster_has(event: &ServerEvent, id: &SessionId) -> Option<bool> {
    event.roster().map(|r| r.contains(id))
}

async fn check_visibility_toggle(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let subject = ids[0].clone();
    let observers: Vec<SessionId> = ids[1..]
        .iter()
        .filter(|id| server.snapshot(id).map(|s| s.visible).unwrap_or(false))
        .cloned()
        .collect();
    if observers.is_empty() {
        return Err("no visible observer".to_string());
    }

    for id in &observers {
        drain(actor_mut(actors, id)?);
    }
    actor(actors, &subject)?
        .set_visibility(false)
        .map_err(|r| r.to_string())?;
    for id in &observers {
        if server.visible_peers(id).contains(&subject) {
            return Err(format!("{} still sees hidden {}", id, subject));
        }
        actor_mut(actors, id)?
            .wait_for_event(|e| roster_has(e, &subject) == Some(false))
            .await
            .ok_or_else(|| format!("{} was not told {} went hidden", id, subject))?;
    }

    actor(actors, &subject)?
        .set_visibility(true)
        .map_err(|r| r.to_string())?;
    for id in &observers {
        if !server.visible_peers(id).contains(&subject) {
            return Err(format!("{} does not see {} after show", id, subject));
        }
        actor_mut(actors, id)?
            .wait_for_event(|e| roster_has(e, &subject) == Some(true))
            .await
            .ok_or_else(|| format!("{} was not told {} is back", id, subject))?;
    }
    Ok(())
}

async fn check_reconnect_restores_visibility(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let (subject, observer) = (ids[0].clone(), ids[1].clone());

    drain(actor_mut(actors, &observer)?);
    let a = actor_mut(actors, &subject)?;
    a.set_visibility(false).map_err(|r| r.to_string())?;
    if !a.disconnect() {
        return Err(format!("{} was not connected", subject));
    }
    if server.snapshot(&subject).map(|s| s.connected).unwrap_or(true) {
        return Err(format!("{} still connected after disconnect", subject));
    }
    a.reconnect().map_err(|r| format!("reconnect refused: {}", r))?;

    match server.snapshot(&subject) {
        Some(s) if s.connected && !s.visible => {}
        other => return Err(format!("{} after reconnect: {:?}", subject, other)),
    }
    if server.visible_peers(&observer).contains(&subject) {
        return Err(format!("{} reappeared to {} after reconnect", subject, observer));
    }
    let seen = actor_mut(actors, &observer)?
        .connection_mut()
        .and_then(|c| c.latest_roster());
    if seen.map(|r| r.contains(&subject)).unwrap_or(false) {
        return Err(format!("{} was pushed a roster containing hidden {}", observer, subject));
    }

    actor(actors, &subject)?
        .set_visibility(true)
        .map_err(|r| r.to_string())?;
    actor_mut(actors, &observer)?
        .wait_for_event(|e| roster_has(e, &subject) == Some(true))
        .await
        .ok_or_else(|| format!("{} never saw {} again", observer, subject))?;
    Ok(())
}

async fn check_one_chat_at_a_time(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let (a, b, c) = (ids[0].clone(), ids[1].clone(), ids[2].clone());

    actor(actors, &a)?
        .request_chat(&b)
        .map_err(|r| format!("first chat refused: {}", r))?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatStarted { partner_session_id, .. } if partner_session_id == &a))
        .await
        .ok_or_else(|| format!("{} never saw the chat start", b))?;

    expect_rejection(
        "second chat from requester",
        actor(actors, &a)?.request_chat(&c),
        Rejection::ChatAlreadyActive,
    )?;
    expect_rejection(
        "chat with busy target",
        actor(actors, &c)?.request_chat(&b),
        Rejection::TargetBusy,
    )?;
    if server.snapshot(&c).and_then(|s| s.active_chat_peer).is_some() {
        return Err(format!("{} ended up in a chat", c));
    }
    if server.snapshot(&a).and_then(|s| s.active_chat_peer) != Some(b.clone()) {
        return Err(format!("{} lost its chat with {}", a, b));
    }

    actor(actors, &a)?
        .send(ClientMessage::ChatMessage { text: "hi".to_string() })
        .map_err(|r| r.to_string())?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatMessage { from_session_id, .. } if from_session_id == &a))
        .await
        .ok_or_else(|| format!("{} never got the message", b))?;

    actor(actors, &a)?
        .send(ClientMessage::ChatEnd)
        .map_err(|r| r.to_string())?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatEnded { reason: ChatEndReason::UserExit }))
        .await
        .ok_or_else(|| format!("{} was not told the chat ended", b))?;

    // Freed slot is usable again.
    actor(actors, &c)?
        .request_chat(&b)
        .map_err(|r| format!("chat after end refused: {}", r))
}

async fn check_concurrent_chat_race(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let (a, target, c) = (ids[0].clone(), ids[1].clone(), ids[2].clone());

    let race = |from: SessionId| {
        let server = server.clone();
        let target = target.clone();
        tokio::spawn(async move {
            server.send(
                &from,
                ClientMessage::ChatRequest {
                    target_session_id: target,
                },
            )
        })
    };
    let first = race(a.clone());
    let second = race(c.clone());
    let ra = first.await.map_err(|e| e.to_string())?;
    let rc = second.await.map_err(|e| e.to_string())?;

    let (winner, loser) = match (&ra, &rc) {
        (Ok(()), Err(Rejection::TargetBusy)) => (a, c),
        (Err(Rejection::TargetBusy), Ok(())) => (c, a),
        _ => return Err(format!("expected exactly one winner, got {:?} and {:?}", ra, rc)),
    };
    debug!("race won by {}", winner);

    if server.snapshot(&target).and_then(|s| s.active_chat_peer) != Some(winner.clone()) {
        return Err(format!("{} is not chatting with winner {}", target, winner));
    }
    actor_mut(actors, &target)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatStarted { partner_session_id, .. } if partner_session_id == &winner))
        .await
        .ok_or_else(|| format!("{} never saw the chat with {}", target, winner))?;

    let busy = Rejection::TargetBusy.code();
    actor_mut(actors, &loser)?
        .wait_for_event(|e| matches!(e, ServerEvent::Error { code, .. } if code == busy))
        .await
        .ok_or_else(|| format!("{} was not told the target is busy", loser))?;
    Ok(())
}

async fn check_isolated_failure(actors: &mut ActorSet) -> Check {
    let server = actors.server().clone();
    let failed = actors.failed_personas();
    if failed.len() != 1 {
        return Err(format!("expected one failed persona, got [{}]", join(&failed)));
    }

    let survivors = session_ids(actors);
    if server.connected_sessions() != survivors {
        return Err(format!(
            "connected [{}] but created [{}]",
            join(&server.connected_sessions()),
            join(&survivors)
        ));
    }
    for id in &survivors {
        if server.visible_peers(id).contains(&failed[0]) {
            return Err(format!("{} sees failed persona {}", id, failed[0]));
        }
    }

    // Siblings are fully usable.
    let (a, b) = (survivors[0].clone(), survivors[survivors.len() - 1].clone());
    actor(actors, &a)?
        .request_chat(&b)
        .map_err(|r| format!("survivor chat refused: {}", r))?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatStarted { .. }))
        .await
        .ok_or_else(|| format!("{} never saw the survivor chat", b))?;
    Ok(())
}

async fn check_panic_exit(actors: &mut ActorSet, telemetry: &mut Telemetry) -> Check {
    let server = actors.server().clone();
    let ids = session_ids(actors);
    let (a, b) = (ids[0].clone(), ids[1].clone());

    actor(actors, &a)?
        .request_chat(&b)
        .map_err(|r| format!("chat refused: {}", r))?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatStarted { .. }))
        .await
        .ok_or_else(|| format!("{} never saw the chat start", b))?;

    let requester = actor(actors, &a)?;
    if let Some(t) = telemetry.get_mut(&a) {
        if visit(requester, t, &Waypoint::chat()).await {
            let found = requester.observe_affordance(Affordance::PanicButton).await;
            t.record_affordance(Affordance::PanicButton, found);
            if !found {
                return Err(format!("{} has no panic button in chat", a));
            }
        }
    }

    actor(actors, &a)?
        .send(ClientMessage::PanicTrigger)
        .map_err(|r| r.to_string())?;
    actor_mut(actors, &a)?
        .wait_for_event(|e| matches!(e, ServerEvent::PanicConfirmed))
        .await
        .ok_or_else(|| format!("{} got no panic confirmation", a))?;
    actor_mut(actors, &b)?
        .wait_for_event(|e| matches!(e, ServerEvent::ChatEnded { reason: ChatEndReason::Panic }))
        .await
        .ok_or_else(|| format!("{} was not told the chat ended by panic", b))?;

    match server.snapshot(&a) {
        Some(s) if !s.visible && s.active_chat_peer.is_none() => {}
        other => return Err(format!("{} after panic: {:?}", a, other)),
    }
    if server.snapshot(&b).and_then(|s| s.active_chat_peer).is_some() {
        return Err(format!("{} still in a chat after panic", b));
    }
    if server.visible_peers(&b).contains(&a) {
        return Err(format!("{} still sees {} after panic", b, a));
    }
    Ok(())
}

async fn check_ux_walkthrough(actors: &mut ActorSet, telemetry: &mut Telemetry) -> Check {
    for actor in actors.actors() {
        let Some(t) = telemetry.get_mut(actor.session_id()) else {
            continue;
        };
        t.start_timing(TimedEvent::Onboarding);
        for step in 1..=ONBOARDING_STEPS {
            t.start_timing(TimedEvent::Step(step));
            if !visit(actor, t, &Waypoint::onboarding()).await {
                warn!("{}: onboarding step {} abandoned", actor.session_id(), step);
            }
            t.end_timing(TimedEvent::Step(step));
        }
        t.end_timing(TimedEvent::Onboarding);

        if visit(actor, t, &Waypoint::profile()).await {
            let toggle = actor.observe_affordance(Affordance::VisibilityToggle).await;
            t.record_affordance(Affordance::VisibilityToggle, toggle);
        }
    }

    for actor in actors.actors() {
        let id = actor.session_id();
        let record = telemetry
            .get(id)
            .map(TelemetryCollector::record)
            .ok_or_else(|| format!("{} has no telemetry", id))?;
        if record.timings.boot_ms.is_none() || record.timings.onboarding_ms.is_none() {
            return Err(format!("{} is missing boot or onboarding timing", id));
        }
        if record.timings.step_times.len() != ONBOARDING_STEPS as usize {
            return Err(format!("{} recorded {} step timings", id, record.timings.step_times.len()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::WaitBounds;
    use presence_core::{summarize, FrictionPattern, PersonaPresence, TelemetryStore, Vibe};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default()
            .with_artifacts_dir(dir.path())
            .with_waits(WaitBounds {
                affordance_timeout: Duration::from_millis(50),
                event_timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(5),
            })
    }

    #[tokio::test]
    async fn test_every_scenario_passes_on_its_default_venue() {
        let dir = TempDir::new().unwrap();
        let runner = ScenarioRunner::new(config(&dir));

        for result in runner.run_all().await {
            assert!(
                result.passed,
                "{} failed: {:?}",
                result.scenario,
                result.failure_reason
            );
            assert_eq!(result.venue, result.scenario.default_venue());
        }
    }

    #[tokio::test]
    async fn test_one_telemetry_file_per_persona() {
        let dir = TempDir::new().unwrap();
        let runner = ScenarioRunner::new(config(&dir));

        let result = runner.run(ScenarioId::OneChatAtATime).await;
        assert!(result.passed);
        assert_eq!(result.telemetry_paths.len(), 3);
        assert_eq!(result.metrics.actors_created, 3);
        assert!(result.metrics.chats_started >= 2);
        assert!(result.metrics.rejections >= 2);

        let contents = TelemetryStore::new(dir.path()).read_all();
        assert_eq!(contents.records.len(), 3);
        for record in &contents.records {
            assert_eq!(record.run_id, result.run_id);
            assert_eq!(record.scenario.as_deref(), Some("one_chat_at_a_time"));
            assert!(record.timings.boot_ms.is_some());
            assert!(record.accessibility.a11y_violations.is_some());
        }
    }

    #[tokio::test]
    async fn test_isolated_failure_records_the_victim() {
        let dir = TempDir::new().unwrap();
        let result = ScenarioRunner::new(config(&dir))
            .run(ScenarioId::IsolatedFailure)
            .await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.failed_personas, vec![SessionId::new("target-session")]);
        assert_eq!(result.metrics.actors_created, 2);
        assert_eq!(result.telemetry_paths.len(), 3);

        let contents = TelemetryStore::new(dir.path()).read_all();
        let victim = contents
            .records
            .iter()
            .find(|r| r.persona == "target-session")
            .unwrap();
        assert_eq!(victim.errors.len(), 1);
        assert!(victim.timings.boot_ms.is_none());
    }

    #[tokio::test]
    async fn test_walkthrough_feeds_friction_summary() {
        let dir = TempDir::new().unwrap();
        let result = ScenarioRunner::new(config(&dir))
            .run(ScenarioId::UxWalkthrough)
            .await;
        assert!(result.passed, "{:?}", result.failure_reason);

        let contents = TelemetryStore::new(dir.path()).read_all();
        let maya = contents
            .records
            .iter()
            .find(|r| r.persona == "maya-session")
            .unwrap();
        assert_eq!(maya.interactions.steps_retried, 1);
        assert_eq!(maya.interactions.error_banners_encountered, 1);
        assert_eq!(maya.timings.step_times.len(), 3);
        assert_eq!(maya.accessibility.a11y_violations, Some(2));
        assert!(maya.accessibility.focus_order_correct);

        let zoe = contents
            .records
            .iter()
            .find(|r| r.persona == "zoe-session")
            .unwrap();
        assert!(!zoe.accessibility.focus_order_correct);
        assert!(!zoe.accessibility.visible_affordances.visibility_toggle);
        assert!(zoe.accessibility.visible_affordances.panic_button);

        let summary = summarize(&contents.records);
        let patterns: Vec<_> = summary.friction_patterns.iter().map(|f| f.pattern).collect();
        assert!(patterns.contains(&FrictionPattern::MissingVisibilityToggle));
        assert!(patterns.contains(&FrictionPattern::StepRetries));
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let dir = TempDir::new().unwrap();
        let runner = ScenarioRunner::new(config(&dir));

        let first = runner.run(ScenarioId::PanicExit).await;
        let second = runner.run(ScenarioId::PanicExit).await;
        assert!(first.passed && second.passed);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.metrics.chats_started, second.metrics.chats_started);

        let contents = TelemetryStore::new(dir.path()).read_all();
        assert_eq!(contents.records.len(), 4);
    }

    #[tokio::test]
    async fn test_small_script_fails_without_running() {
        let dir = TempDir::new().unwrap();
        let script = PersonaPresenceScript::new(
            "solo",
            vec![PersonaPresence::new("only", "Lonely", Vibe::Thinking)],
        )
        .unwrap();
        let result = ScenarioRunner::new(config(&dir))
            .with_script(script)
            .run(ScenarioId::ConcurrentChatRace)
            .await;

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("at least 3"));
        assert!(result.telemetry_paths.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_personas_fail_mutual_visibility() {
        let dir = TempDir::new().unwrap();
        let script = PersonaPresenceScript::new(
            "shy",
            vec![
                PersonaPresence::new("a", "Alpha", Vibe::Banter).hidden(),
                PersonaPresence::new("b", "Bravo", Vibe::Banter),
            ],
        )
        .unwrap();
        let result = ScenarioRunner::new(config(&dir))
            .with_script(script)
            .run(ScenarioId::MutualVisibility)
            .await;

        assert!(!result.passed);
        assert_eq!(result.failure_reason.as_deref(), Some("fewer than two visible personas"));
        // Failure still leaves telemetry and a clean mock behind.
        assert_eq!(result.telemetry_paths.len(), 2);
    }

    #[tokio::test]
    async fn test_custom_script_without_shared_tags() {
        let dir = TempDir::new().unwrap();
        let script = PersonaPresenceScript::new(
            "strangers",
            vec![
                PersonaPresence::new("a", "Alpha", Vibe::Banter).with_tags(["Chess"]),
                PersonaPresence::new("b", "Bravo", Vibe::Banter).with_tags(["Surfing"]),
            ],
        )
        .unwrap();
        let result = ScenarioRunner::new(config(&dir))
            .with_script(script)
            .run(ScenarioId::SharedTags)
            .await;
        assert_eq!(result.failure_reason.as_deref(), Some("no pair of personas shares a tag"));
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use crate::graph::audio_graph::{AudioGraphState, BranchGains};
use crate::models::audio_models::BranchKind;
use crate::models::config::ArbiterConfig;
use crate::models::error::CaptureError;
use crate::models::state::ArbiterPhase;
use crate::traits::capture_delegate::CaptureDelegate;

/// What one evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterEvent {
    /// The microphone gain was raised to the pre-warm floor.
    PreWarmed,
    /// A crossfade towards `to` was scheduled; `to` is now the active branch.
    SwitchStarted { to: BranchKind },
    /// The crossfade window closed.
    CrossfadeFinished,
}

/// Decision state. Wall-clock timestamps only; gain ramps live on the context clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterState {
    pub active_branch: BranchKind,
    pub silence_streak_start: Option<Instant>,
    pub is_crossfading: bool,
    pub crossfade_ends_at: Option<Instant>,
}

impl ArbiterState {
    pub fn phase(&self) -> ArbiterPhase {
        match self.active_branch {
            BranchKind::Loopback => ArbiterPhase::LoopbackActive,
            BranchKind::Microphone => ArbiterPhase::MicActive,
        }
    }

    /// Whether a crossfade is still in flight at `now`.
    pub fn crossfading_at(&self, now: Instant) -> bool {
        self.is_crossfading && self.crossfade_ends_at.map_or(false, |end| now < end)
    }

    /// This state as seen at `now`. A crossfade whose window has closed is over.
    pub fn as_of(&self, now: Instant) -> Self {
        let mut state = self.clone();
        if !state.crossfading_at(now) {
            state.is_crossfading = false;
            state.crossfade_ends_at = None;
        }
        state
    }
}

/// Chooses the authoritative branch from the loopback branch's loudness.
///
/// Leaving the loopback takes a held silence streak (pre-warm, then
/// confirm); returning to it happens on the first loud tick. At most one
/// crossfade is in flight, and switch requests made during one are dropped.
#[derive(Debug, Clone)]
pub struct SourceArbiter {
    config: ArbiterConfig,
    state: ArbiterState,
}

impl SourceArbiter {
    pub fn new(config: ArbiterConfig, initial: BranchKind) -> Self {
        Self {
            config,
            state: ArbiterState {
                active_branch: initial,
                silence_streak_start: None,
                is_crossfading: false,
                crossfade_ends_at: None,
            },
        }
    }

    pub fn state(&self) -> &ArbiterState {
        &self.state
    }

    pub fn phase(&self) -> ArbiterPhase {
        self.state.phase()
    }

    /// One polling tick.
    ///
    /// `now` is the wall clock, `loudness` the loopback analyser's average
    /// magnitude, and `context_time` the processing clock that ramps are
    /// scheduled on.
    pub fn evaluate(
        &mut self,
        now: Instant,
        loudness: f32,
        gains: &mut BranchGains,
        context_time: f64,
    ) -> Vec<ArbiterEvent> {
        let mut events = Vec::new();

        if self.state.is_crossfading && !self.state.crossfading_at(now) {
            self.state = self.state.as_of(now);
            events.push(ArbiterEvent::CrossfadeFinished);
        }

        if loudness < self.config.silence_threshold {
            if self.state.active_branch != BranchKind::Loopback {
                return events;
            }
            let streak_start = *self.state.silence_streak_start.get_or_insert(now);
            let streak = now.saturating_duration_since(streak_start);

            if streak >= self.config.prewarm_after && !self.state.is_crossfading && self.prewarm(gains, context_time) {
                events.push(ArbiterEvent::PreWarmed);
            }
            if streak >= self.config.switch_after
                && self.request_switch(BranchKind::Microphone, now, gains, context_time)
            {
                events.push(ArbiterEvent::SwitchStarted {
                    to: BranchKind::Microphone,
                });
            }
        } else {
            self.state.silence_streak_start = None;
            if self.state.active_branch == BranchKind::Microphone
                && gains.has(BranchKind::Loopback)
                && self.request_switch(BranchKind::Loopback, now, gains, context_time)
            {
                events.push(ArbiterEvent::SwitchStarted {
                    to: BranchKind::Loopback,
                });
            }
        }
        events
    }

    /// Raise the microphone to the pre-warm floor if it sits below it.
    fn prewarm(&self, gains: &mut BranchGains, context_time: f64) -> bool {
        let floor = self.config.prewarm_gain;
        match gains.get_mut(BranchKind::Microphone) {
            Some(mic) if mic.value_at(context_time) < floor => {
                mic.cancel_scheduled_values(context_time);
                mic.set_value(floor);
                log::debug!("Loopback quiet, microphone pre-warmed to {}", floor);
                true
            }
            _ => false,
        }
    }

    /// Start a crossfade to `to`. Dropped (returns false) while a crossfade
    /// is in flight, when `to` is already active, or when either branch is
    /// missing.
    pub fn request_switch(
        &mut self,
        to: BranchKind,
        now: Instant,
        gains: &mut BranchGains,
        context_time: f64,
    ) -> bool {
        if self.state.is_crossfading || self.state.active_branch == to {
            return false;
        }
        if !gains.has(to) || !gains.has(to.other()) {
            return false;
        }

        let end_time = context_time + self.config.crossfade.as_secs_f64();
        if let Some(rising) = gains.get_mut(to) {
            rising.linear_ramp_to_value_at_time(1.0, context_time, end_time);
        }
        if let Some(falling) = gains.get_mut(to.other()) {
            falling.linear_ramp_to_value_at_time(0.0, context_time, end_time);
        }

        self.state.active_branch = to;
        self.state.is_crossfading = true;
        self.state.crossfade_ends_at = Some(now + self.config.crossfade);
        log::info!("Switching active source to {:?}", to);
        true
    }
}

/// Runs a [`SourceArbiter`] on its own tick thread for the life of a session.
pub struct ArbiterHandle {
    arbiter: Arc<Mutex<SourceArbiter>>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ArbiterHandle {
    /// Start arbitration over `graph`.
    ///
    /// Returns `Ok(None)` when arbitration does not apply: a branch is missing
    /// or the loopback analyser could not be created. The session then stays
    /// on its sole active branch.
    pub fn start(
        graph: &AudioGraphState,
        config: ArbiterConfig,
        delegate: Option<Arc<dyn CaptureDelegate>>,
    ) -> Result<Option<Self>, CaptureError> {
        if !graph.has_branch(BranchKind::Loopback) || !graph.has_branch(BranchKind::Microphone) {
            log::debug!("Single-branch session, arbiter not started");
            return Ok(None);
        }
        let Some(analyser) = graph.loopback_analyser() else {
            log::warn!("No loopback analyser, automatic source switching disabled");
            return Ok(None);
        };

        let interval = config.tick_interval;
        let arbiter = Arc::new(Mutex::new(SourceArbiter::new(config, BranchKind::Loopback)));
        let running = Arc::new(AtomicBool::new(true));

        let tick_arbiter = Arc::clone(&arbiter);
        let tick_running = Arc::clone(&running);
        let gains = graph.gains();
        let clock = graph.clock();

        let handle = thread::Builder::new()
            .name("source-arbiter".into())
            .spawn(move || {
                while tick_running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    if !tick_running.load(Ordering::SeqCst) {
                        break;
                    }

                    let loudness = analyser.lock().average_magnitude();
                    let events = {
                        let mut arbiter = tick_arbiter.lock();
                        let mut gains = gains.lock();
                        arbiter.evaluate(Instant::now(), loudness, &mut gains, clock.current_time())
                    };

                    if let Some(ref d) = delegate {
                        for event in events {
                            if let ArbiterEvent::SwitchStarted { to } = event {
                                d.on_source_switched(to);
                            }
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn arbiter thread: {}", e)))?;

        Ok(Some(Self {
            arbiter,
            running,
            handle: Some(handle),
        }))
    }

    /// Current decision state, with crossfades that ended since the last tick closed.
    pub fn state(&self) -> ArbiterState {
        self.arbiter.lock().state().as_of(Instant::now())
    }

    /// Clear the tick timer. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Arbiter thread panicked");
            }
        }
    }
}

impl Drop for ArbiterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_session::{CaptureSession, StopOutcome};
    use crate::graph::audio_graph::AudioGraph;
    use crate::processing::analyser::noise;
    use crate::processing::gain::GainParam;
    use crate::test_support::{standard_devices, test_config, ScriptedHost, LOOPBACK_ID, MIC_ID};
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    const QUIET: f32 = 0.0;
    const LOUD: f32 = 120.0;

    fn both() -> BranchGains {
        BranchGains {
            loopback: Some(GainParam::new(1.0)),
            microphone: Some(GainParam::new(0.0)),
        }
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    fn arbiter() -> SourceArbiter {
        SourceArbiter::new(ArbiterConfig::default(), BranchKind::Loopback)
    }

    #[test]
    fn short_silence_leaves_gains_alone() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        assert!(arb.evaluate(t0, QUIET, &mut gains, 0.0).is_empty());
        assert!(arb.evaluate(ms(t0, 199), QUIET, &mut gains, 0.199).is_empty());

        assert_eq!(gains, both());
        assert_eq!(arb.state().silence_streak_start, Some(t0));
        assert_eq!(arb.phase(), ArbiterPhase::LoopbackActive);
    }

    #[test]
    fn mid_silence_only_prewarms_microphone() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        arb.evaluate(t0, QUIET, &mut gains, 0.0);
        let events = arb.evaluate(ms(t0, 200), QUIET, &mut gains, 0.2);
        assert_eq!(events, vec![ArbiterEvent::PreWarmed]);
        assert!(arb.evaluate(ms(t0, 399), QUIET, &mut gains, 0.399).is_empty());

        assert_abs_diff_eq!(gains.value_at(BranchKind::Microphone, 0.4), 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Loopback, 0.4), 1.0);
        assert_eq!(arb.phase(), ArbiterPhase::LoopbackActive);
        assert!(!arb.state().is_crossfading);
    }

    #[test]
    fn long_silence_switches_exactly_once_per_streak() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        let mut switches = 0;
        for step in 0..20u64 {
            let events = arb.evaluate(ms(t0, step * 200), QUIET, &mut gains, step as f64 * 0.2);
            switches += events
                .iter()
                .filter(|e| matches!(e, ArbiterEvent::SwitchStarted { .. }))
                .count();
        }

        assert_eq!(switches, 1);
        assert_eq!(arb.phase(), ArbiterPhase::MicActive);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Microphone, 10.0), 1.0);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Loopback, 10.0), 0.0);
    }

    #[test]
    fn switch_ramps_from_prewarm_floor_on_context_clock() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        arb.evaluate(t0, QUIET, &mut gains, 5.0);
        arb.evaluate(ms(t0, 200), QUIET, &mut gains, 5.2);
        let events = arb.evaluate(ms(t0, 400), QUIET, &mut gains, 5.4);
        assert_eq!(
            events,
            vec![ArbiterEvent::SwitchStarted {
                to: BranchKind::Microphone
            }]
        );

        // Active branch flips immediately; the audible ramp takes a second.
        assert_eq!(arb.state().active_branch, BranchKind::Microphone);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Microphone, 5.4), 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Microphone, 5.9), 0.65, epsilon = 1e-5);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Loopback, 5.9), 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(gains.value_at(BranchKind::Microphone, 6.4), 1.0);
    }

    #[test]
    fn sound_returns_to_loopback_immediately() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        for step in 0..3u64 {
            arb.evaluate(ms(t0, step * 200), QUIET, &mut gains, step as f64 * 0.2);
        }
        assert_eq!(arb.phase(), ArbiterPhase::MicActive);

        // Crossfade window over; one loud tick is enough.
        let events = arb.evaluate(ms(t0, 1400), LOUD, &mut gains, 1.4);
        assert_eq!(
            events,
            vec![
                ArbiterEvent::CrossfadeFinished,
                ArbiterEvent::SwitchStarted {
                    to: BranchKind::Loopback
                }
            ]
        );
        assert_eq!(arb.phase(), ArbiterPhase::LoopbackActive);
        assert_eq!(arb.state().silence_streak_start, None);
    }

    #[test]
    fn switch_during_crossfade_is_dropped() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        for step in 0..3u64 {
            arb.evaluate(ms(t0, step * 200), QUIET, &mut gains, step as f64 * 0.2);
        }
        assert!(arb.state().is_crossfading);

        // Loud while still crossfading: nothing happens.
        assert!(arb.evaluate(ms(t0, 600), LOUD, &mut gains, 0.6).is_empty());
        assert!(!arb.request_switch(BranchKind::Loopback, ms(t0, 700), &mut gains, 0.7));
        assert_eq!(arb.phase(), ArbiterPhase::MicActive);
        assert_eq!(arb.state().silence_streak_start, None);
    }

    #[test]
    fn crossfade_windows_never_overlap() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        // Alternate silence and sound aggressively.
        let mut windows: Vec<(u64, u64)> = Vec::new();
        for step in 0..60u64 {
            let now_ms = step * 200;
            let loudness = if (step / 3) % 2 == 0 { QUIET } else { LOUD };
            let events = arb.evaluate(ms(t0, now_ms), loudness, &mut gains, now_ms as f64 / 1000.0);
            if events.iter().any(|e| matches!(e, ArbiterEvent::SwitchStarted { .. })) {
                windows.push((now_ms, now_ms + 1000));
            }
        }

        assert!(windows.len() >= 2);
        for pair in windows.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "overlapping crossfades: {:?}", pair);
        }
    }

    #[test]
    fn state_as_of_closes_elapsed_crossfade() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();
        assert!(arb.request_switch(BranchKind::Microphone, t0, &mut gains, 0.0));

        let during = arb.state().as_of(ms(t0, 999));
        assert!(during.is_crossfading);
        assert_eq!(during.crossfade_ends_at, Some(ms(t0, 1000)));

        let after = arb.state().as_of(ms(t0, 1000));
        assert!(!after.is_crossfading);
        assert_eq!(after.crossfade_ends_at, None);
        assert_eq!(after.active_branch, BranchKind::Microphone);

        // The stored state is only settled by the next evaluation.
        assert!(arb.state().is_crossfading);
        let events = arb.evaluate(ms(t0, 1000), QUIET, &mut gains, 1.0);
        assert_eq!(events, vec![ArbiterEvent::CrossfadeFinished]);
        assert_eq!(arb.state(), &after);
    }

    #[test]
    fn silence_while_mic_active_is_ignored() {
        let mut arb = SourceArbiter::new(ArbiterConfig::default(), BranchKind::Microphone);
        let mut gains = both();
        let t0 = Instant::now();

        for step in 0..10u64 {
            assert!(arb
                .evaluate(ms(t0, step * 200), QUIET, &mut gains, step as f64 * 0.2)
                .is_empty());
        }
        assert_eq!(arb.state().silence_streak_start, None);
    }

    #[test]
    fn loudness_at_threshold_counts_as_sound() {
        let mut arb = arbiter();
        let mut gains = both();
        let t0 = Instant::now();

        arb.evaluate(t0, QUIET, &mut gains, 0.0);
        arb.evaluate(ms(t0, 200), 5.0, &mut gains, 0.2);
        assert_eq!(arb.state().silence_streak_start, None);
    }

    #[test]
    fn missing_loopback_blocks_switching() {
        let mut arb = SourceArbiter::new(ArbiterConfig::default(), BranchKind::Microphone);
        let mut gains = BranchGains {
            loopback: None,
            microphone: Some(GainParam::new(1.0)),
        };

        let events = arb.evaluate(Instant::now(), LOUD, &mut gains, 0.0);
        assert!(events.is_empty());
        assert_eq!(gains.value_at(BranchKind::Microphone, 0.0), 1.0);
    }

    #[test]
    fn handle_is_not_started_for_single_branch_graph() {
        let devices = standard_devices();
        let host = ScriptedHost::new(devices.clone());
        let mic = devices.iter().find(|d| d.id == MIC_ID).cloned();
        let graph = AudioGraph::build(&host, None, mic.as_ref(), &test_config()).unwrap();

        let handle = ArbiterHandle::start(&graph, ArbiterConfig::default(), None).unwrap();
        assert!(handle.is_none());
        assert_eq!(graph.gain(BranchKind::Microphone), Some(1.0));
    }

    #[test]
    fn handle_stop_is_idempotent() {
        let devices = standard_devices();
        let host = ScriptedHost::new(devices.clone());
        let find = |id: &str| devices.iter().find(|d| d.id == id).cloned();
        let graph = AudioGraph::build(
            &host,
            find(LOOPBACK_ID).as_ref(),
            find(MIC_ID).as_ref(),
            &test_config(),
        )
        .unwrap();

        let config = ArbiterConfig {
            tick_interval: Duration::from_millis(5),
            ..ArbiterConfig::default()
        };
        let mut handle = ArbiterHandle::start(&graph, config, None).unwrap().unwrap();
        handle.stop();
        handle.stop();
        assert_eq!(handle.state().active_branch, BranchKind::Loopback);
    }

    #[test]
    fn handle_state_reports_finished_crossfade_between_ticks() {
        let devices = standard_devices();
        let host = ScriptedHost::new(devices.clone());
        let find = |id: &str| devices.iter().find(|d| d.id == id).cloned();
        let graph = AudioGraph::build(
            &host,
            find(LOOPBACK_ID).as_ref(),
            find(MIC_ID).as_ref(),
            &test_config(),
        )
        .unwrap();

        // The first tick sees a silent loopback and switches at once.
        let config = ArbiterConfig {
            tick_interval: Duration::from_millis(300),
            prewarm_after: Duration::ZERO,
            switch_after: Duration::ZERO,
            crossfade: Duration::from_millis(50),
            ..ArbiterConfig::default()
        };
        let mut handle = ArbiterHandle::start(&graph, config, None).unwrap().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state().active_branch != BranchKind::Microphone && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.state().active_branch, BranchKind::Microphone);

        // Past the crossfade window, well before the next tick.
        thread::sleep(Duration::from_millis(100));
        let state = handle.state();
        assert!(!state.is_crossfading);
        assert_eq!(state.crossfade_ends_at, None);
        handle.stop();
    }

    /// 600 ms of loopback silence, then signal; stop at 6 s.
    #[test]
    fn end_to_end_switches_away_and_back() {
        let devices = standard_devices();
        let host = ScriptedHost::new(devices.clone());
        let config = test_config();
        let find = |id: &str| devices.iter().find(|d| d.id == id).cloned();
        let graph = AudioGraph::build(&host, find(LOOPBACK_ID).as_ref(), find(MIC_ID).as_ref(), &config).unwrap();

        let mut capture = CaptureSession::new(config.chunk_duration);
        capture.start(&graph.destination()).unwrap();

        let mut arb = SourceArbiter::new(config.arbiter.clone(), BranchKind::Loopback);
        let analyser = graph.loopback_analyser().unwrap();
        let gains = graph.gains();
        let step_frames = 1600; // 200 ms at 8 kHz
        let t0 = Instant::now();

        let mut switches = Vec::new();
        for step in 0..30u64 {
            let now_ms = step * 200;
            let loopback = if now_ms < 600 {
                vec![0.0; step_frames]
            } else {
                noise(step_frames, 0.3, step as u32 + 1)
            };
            host.feed(LOOPBACK_ID, &loopback, 8000.0, 1);
            host.feed(MIC_ID, &noise(step_frames, 0.1, step as u32 + 100), 8000.0, 1);
            graph.render_pending();

            let loudness = analyser.lock().average_magnitude();
            let events = arb.evaluate(ms(t0, now_ms), loudness, &mut gains.lock(), graph.context_time());
            for event in events {
                if let ArbiterEvent::SwitchStarted { to } = event {
                    switches.push((now_ms, to));
                }
            }
        }

        assert_eq!(
            switches,
            vec![(400, BranchKind::Microphone), (1400, BranchKind::Loopback)]
        );

        let audio = match capture.stop() {
            StopOutcome::Finalized(audio) => audio,
            StopOutcome::AlreadyStopped => panic!("capture was running"),
        };
        assert_abs_diff_eq!(audio.duration_secs(), 6.0, epsilon = 1e-9);
        assert_eq!(audio.chunk_count, 6);
    }
}

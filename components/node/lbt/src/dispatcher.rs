//  _____       ______   ____
// |_   _|     |  ____|/ ____|  Institute of Embedded Systems
//   | |  _ __ | |__  | (___    Zurich University of Applied Sciences
//   | | | '_ \|  __|  \___ \   8401 Winterthur, Switzerland
//  _| |_| | | | |____ ____) |
// |_____|_| |_|______|_____/
//
// Copyright 2025 Institute of Embedded Systems at Zurich University of Applied Sciences.
// All rights reserved.
// SPDX-License-Identifier: MIT

use crate::*;

/// State owned by the worker, never touched from interrupt context
#[derive(Debug)]
pub struct NodeState {
    pub payload: OutgoingPayload,
    pub radio_power: RadioPower,
    /// Completion time of the last transmission, successful or timed out
    pub last_transmit_ms: TimeMs,
    pub last_downlink: Option<Downlink>,
}

impl NodeState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            payload: OutgoingPayload::new(node_id),
            radio_power: RadioPower::Sleep,
            last_transmit_ms: 0,
            last_downlink: None,
        }
    }
}

/// What a single wake cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub reason: WakeReason,
    /// Outcome of the send attempt, if one was made
    pub send: Option<SendOutcome>,
}

/// Worker loop of the node
pub struct Dispatcher<'a, B: Board> {
    board: B,
    config: NodeConfig,
    wake: &'a WakeSignal,
    radio_events: &'a RadioEventRouter<'a>,
    motion: &'a MotionSource<'a>,
    state: NodeState,
    channel: ChannelAccessController,
    scheduler: DutyCycleScheduler,
}

impl<'a, B: Board> Dispatcher<'a, B> {
    pub fn new(
        board: B,
        config: NodeConfig,
        wake: &'a WakeSignal,
        radio_events: &'a RadioEventRouter<'a>,
        motion: &'a MotionSource<'a>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = config.duty_cycle_window()?;
        Ok(Self {
            state: NodeState::new(config.node_id),
            channel: ChannelAccessController::new(
                config.node_id,
                &config.modulation,
                config.timeout_policy,
            ),
            scheduler: DutyCycleScheduler::new(config.node_id, window, config.receive_mode),
            board,
            config,
            wake,
            radio_events,
            motion,
        })
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn channel(&self) -> &ChannelAccessController {
        &self.channel
    }

    fn now(&self) -> TimeMs {
        self.board.clock().now_ms()
    }

    /// Initialize the collaborators and arm the wake sources
    pub fn start(&mut self) -> Result<(), Fatal> {
        let now = self.now();
        let id = self.config.node_id;
        event_log_reset!(now, id, self.config.receive_mode.as_str());

        self.board
            .radio()
            .init(&self.config.modulation)
            .map_err(|e| Fatal::Halt(HaltCause::RadioInit(e)))?;
        match self.board.sensor().init() {
            Ok(()) => {}
            Err(SensorError::Warning(code)) => warn!("sensor init warning {}", code),
            Err(SensorError::Fatal(code)) => return Err(Fatal::Halt(HaltCause::SensorInit(code))),
        }
        if self.board.accelerometer().init().is_err() {
            warn!("accelerometer init failed, motion wakes unavailable");
        }

        self.radio_events.reset();
        self.radio_events.accept_from(self.config.predecessor());
        self.state.payload.motion_alarm = 0;
        self.board.accelerometer().clear_interrupt_latch();
        self.wake.clear();
        self.scheduler
            .resume(self.board.radio(), &mut self.state.radio_power, now)
            .map_err(|e| Fatal::Halt(HaltCause::RadioInit(e)))?;
        self.motion.rearm();
        info!(
            "node {} started, duty cycle {}us/{}us",
            id,
            self.scheduler.window().listen_us(),
            self.scheduler.window().sleep_us()
        );
        Ok(())
    }

    /// Wait for the next wake and handle its reason
    ///
    /// The motion lines stay disarmed until the cycle is finished.
    pub async fn step(&mut self) -> Result<Cycle, Fatal> {
        let tag = self.wake.wait().await;
        self.motion.disarm();
        self.board.system().indicate_awake(true);
        let now = self.now();
        let id = self.config.node_id;
        let reason = WakeReason::try_from(tag);
        event_log_wake!(now, id, reason.map_or("unknown", |r| r.as_str()));

        let send = match reason {
            Ok(WakeReason::DownlinkReceived) => {
                self.on_downlink(now);
                None
            }
            Ok(WakeReason::TimerExpired) => self.on_timer(now).await?,
            Ok(WakeReason::MotionDetected) => Some(self.on_motion(now).await?),
            Ok(WakeReason::None) | Err(_) => {
                let cause = RestartCause::UnknownWakeReason(tag);
                event_log_restart!(now, id, cause.as_str());
                return Err(Fatal::Restart(cause));
            }
        };

        self.finish(now);
        Ok(Cycle {
            reason: reason.unwrap_or(WakeReason::None),
            send,
        })
    }

    /// Start and handle wakes forever, fatal conditions end in a restart or halt
    pub async fn run(mut self) {
        if let Err(fatal) = self.start() {
            self.fail(fatal);
        }
        loop {
            if let Err(fatal) = self.step().await {
                self.fail(fatal);
            }
        }
    }

    fn fail(&mut self, fatal: Fatal) -> ! {
        error!("{}", fatal);
        match fatal {
            Fatal::Restart(_) => self.board.system().restart(),
            Fatal::Halt(_) => self.board.system().halt(),
        }
    }

    fn on_downlink(&mut self, now: TimeMs) {
        let id = self.config.node_id;
        match self.radio_events.take_downlink() {
            Some(downlink) => {
                event_log_downlink!(now, id, downlink.sender, true);
                debug!("rssi {} snr {}", downlink.rssi, downlink.snr);
                self.state.last_downlink = Some(downlink);
            }
            None => {
                let sender = self.radio_events.last_sender().map_or(-1, i16::from);
                event_log_downlink!(now, id, sender, false);
            }
        }
    }

    async fn on_timer(&mut self, now: TimeMs) -> Result<Option<SendOutcome>, Fatal> {
        if now > self.config.restart_interval_ms {
            let cause = RestartCause::UptimeExceeded { uptime_ms: now };
            event_log_restart!(now, self.config.node_id, cause.as_str());
            return Err(Fatal::Restart(cause));
        }
        self.state.payload.motion_alarm = 0;

        let elapsed = now.saturating_sub(self.state.last_transmit_ms);
        let due = elapsed > self.config.send_interval_ms;
        if due || self.config.sampling == SamplingPolicy::EveryWake {
            self.refresh_payload()?;
        }
        if !due {
            debug!("{}ms since last transmission", elapsed);
            return Ok(None);
        }
        Ok(Some(self.send(now).await))
    }

    async fn on_motion(&mut self, now: TimeMs) -> Result<SendOutcome, Fatal> {
        let source = self.board.accelerometer().clear_interrupt_latch();
        debug!("motion interrupt source {}", source);
        self.state.payload.motion_alarm = 1;
        self.refresh_payload()?;
        Ok(self.send(now).await)
    }

    async fn send(&mut self, now: TimeMs) -> SendOutcome {
        let outcome = self
            .channel
            .attempt_send(
                self.board.radio(),
                self.radio_events,
                &self.scheduler,
                &mut self.state,
                now,
            )
            .await;
        if outcome.transmitted() {
            self.state.last_transmit_ms = self.now();
        }
        outcome
    }

    fn refresh_payload(&mut self) -> Result<(), Fatal> {
        match self.board.sensor().sample() {
            Ok(Some(reading)) => self.state.payload.apply_environment(&reading),
            Ok(None) => debug!("no new sensor data"),
            Err(SensorError::Warning(code)) => warn!("sensor warning {}", code),
            Err(SensorError::Fatal(code)) => return Err(Fatal::Halt(HaltCause::Sensor(code))),
        }
        let payload = &mut self.state.payload;
        payload.id = self.config.node_id;
        payload.battery_percent = self.board.battery().battery_percent();
        payload.set_tilt(calculate_tilt(self.board.accelerometer().read_axes()));
        Ok(())
    }

    /// Put the radio back into its idle mode if needed and rearm the motion lines
    fn finish(&mut self, now: TimeMs) {
        let rearm = self.radio_events.take_rearm_request();
        if rearm || self.state.radio_power != self.scheduler.idle_power() {
            if let Err(e) = self
                .scheduler
                .resume(self.board.radio(), &mut self.state.radio_power, now)
            {
                warn!("could not resume receive: {}", e);
            }
        }
        self.motion.rearm();
        self.board.system().indicate_awake(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::*;
    use embassy_futures::block_on;

    const SEND_INTERVAL: TimeMs = 900_000;
    const RESTART_INTERVAL: TimeMs = 86_400_000;
    const DUTY_CYCLE: RadioOp = RadioOp::DutyCycledReceive(2048, 8448);

    fn started<'a>(
        wake: &'a WakeSignal,
        events: &'a RadioEventRouter<'a>,
        motion: &'a MotionSource<'a>,
        config: NodeConfig,
    ) -> Dispatcher<'a, MockBoard<'a>> {
        let mut node = Dispatcher::new(MockBoard::new(events), config, wake, events, motion).unwrap();
        node.start().unwrap();
        node.board_mut().radio.ops.clear();
        node
    }

    fn packet_from(sender: NodeId) -> [u8; PAYLOAD_SIZE] {
        OutgoingPayload::new(sender).encode().unwrap()
    }

    #[test]
    fn start_enters_duty_cycled_receive() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node =
            Dispatcher::new(MockBoard::new(&events), NodeConfig::default(), &wake, &events, &motion)
                .unwrap();
        node.start().unwrap();
        assert_eq!(node.board().radio.ops, [RadioOp::Init, DUTY_CYCLE]);
        assert_eq!(node.state().radio_power, RadioPower::DutyCycledReceive);
        assert_eq!(node.board().accelerometer.latch_clears, 1);
        assert!(motion.is_armed(MotionLine::Int1));
        assert!(motion.is_armed(MotionLine::Int2));
        assert!(!wake.is_raised());
    }

    #[test]
    fn radio_init_failure_halts() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut board = MockBoard::new(&events);
        board.radio.fail_next = Some(RadioError::NotReady);
        let mut node =
            Dispatcher::new(board, NodeConfig::default(), &wake, &events, &motion).unwrap();
        assert_eq!(
            node.start(),
            Err(Fatal::Halt(HaltCause::RadioInit(RadioError::NotReady)))
        );
    }

    #[test]
    fn sensor_init_failure_halts() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut board = MockBoard::new(&events);
        board.sensor.init_result = Err(SensorError::Fatal(-2));
        let mut node =
            Dispatcher::new(board, NodeConfig::default(), &wake, &events, &motion).unwrap();
        assert_eq!(node.start(), Err(Fatal::Halt(HaltCause::SensorInit(-2))));
    }

    #[test]
    fn invalid_config_rejected() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let config = NodeConfig {
            send_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            Dispatcher::new(MockBoard::new(&events), config, &wake, &events, &motion),
            Err(ConfigError::ZeroSendInterval)
        ));
    }

    #[test]
    fn timer_after_send_interval_sends_once() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board().clock.set(SEND_INTERVAL + 1);

        TimerSource::new(&wake).on_expired();
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(
            cycle,
            Cycle {
                reason: WakeReason::TimerExpired,
                send: Some(SendOutcome::Sent),
            }
        );
        let board = node.board();
        assert_eq!(board.sensor.sample_count, 1);
        assert_eq!(board.radio.cad_count(), 1);
        assert_eq!(board.radio.transmissions().len(), 1);
        assert_eq!(board.radio.ops.last(), Some(&DUTY_CYCLE));
        let sent = board.radio.last_transmitted_payload().unwrap();
        assert_eq!(sent.id, 102);
        assert_eq!(sent.battery_percent, 87);
        assert_eq!(sent.temperature_int, 20);
        assert_eq!(sent.sent_packets, 0);
        assert_eq!(node.state().payload.sent_packets, 1);
        assert_eq!(node.state().last_transmit_ms, SEND_INTERVAL + 1);
    }

    #[test]
    fn timer_before_send_interval_does_not_send() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board().clock.set(SEND_INTERVAL);

        TimerSource::new(&wake).on_expired();
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.send, None);
        assert_eq!(node.board().sensor.sample_count, 0);
        assert!(node.board().radio.ops.is_empty());
    }

    #[test]
    fn send_interval_measured_from_last_transmission() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        let timer = TimerSource::new(&wake);

        node.board().clock.set(SEND_INTERVAL + 1);
        timer.on_expired();
        assert_eq!(block_on(node.step()).unwrap().send, Some(SendOutcome::Sent));

        node.board().clock.set(2 * SEND_INTERVAL + 1);
        timer.on_expired();
        assert_eq!(block_on(node.step()).unwrap().send, None);

        node.board().clock.set(2 * SEND_INTERVAL + 2);
        timer.on_expired();
        assert_eq!(block_on(node.step()).unwrap().send, Some(SendOutcome::Sent));
        assert_eq!(node.board().radio.transmissions().len(), 2);
    }

    #[test]
    fn every_wake_sampling_without_sending() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let config = NodeConfig {
            sampling: SamplingPolicy::EveryWake,
            ..Default::default()
        };
        let mut node = started(&wake, &events, &motion, config);
        node.board().clock.set(3000);

        TimerSource::new(&wake).on_expired();
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.send, None);
        assert_eq!(node.board().sensor.sample_count, 1);
        assert_eq!(node.state().payload.temperature_int, 20);
        assert!(node.board().radio.transmissions().is_empty());
    }

    #[test]
    fn motion_bypasses_send_interval() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board().clock.set(10);
        node.board_mut().accelerometer.latched = 0x48;

        assert!(motion.on_interrupt(MotionLine::Int1));
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.reason, WakeReason::MotionDetected);
        assert_eq!(cycle.send, Some(SendOutcome::Sent));
        assert_eq!(node.board().accelerometer.latch_clears, 2);
        assert_eq!(node.board().accelerometer.latched, 0);
        let sent = node.board().radio.last_transmitted_payload().unwrap();
        assert_eq!(sent.motion_alarm, 1);
        assert_eq!(node.board().radio.cad_count(), 1);
    }

    #[test]
    fn timer_wake_clears_motion_alarm() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());

        motion.on_interrupt(MotionLine::Int1);
        block_on(node.step()).unwrap();
        assert_eq!(node.state().payload.motion_alarm, 1);

        node.board().clock.set(SEND_INTERVAL + 1);
        TimerSource::new(&wake).on_expired();
        block_on(node.step()).unwrap();
        let sent = node.board().radio.last_transmitted_payload().unwrap();
        assert_eq!(sent.motion_alarm, 0);
        assert_eq!(sent.sent_packets, 1);
    }

    #[test]
    fn uptime_over_restart_interval_restarts_before_sending() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board().clock.set(RESTART_INTERVAL + 1);

        TimerSource::new(&wake).on_expired();
        let result = block_on(node.step());

        assert_eq!(
            result,
            Err(Fatal::Restart(RestartCause::UptimeExceeded {
                uptime_ms: RESTART_INTERVAL + 1
            }))
        );
        assert_eq!(node.board().sensor.sample_count, 0);
        assert!(node.board().radio.ops.is_empty());
    }

    #[test]
    fn uptime_at_restart_interval_keeps_running() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board().clock.set(RESTART_INTERVAL);

        TimerSource::new(&wake).on_expired();
        assert!(block_on(node.step()).is_ok());
    }

    #[test]
    fn two_motion_signals_run_one_cycle() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());

        assert!(motion.on_interrupt(MotionLine::Int1));
        // line is disarmed until the cycle is finished
        assert!(!motion.on_interrupt(MotionLine::Int2));
        wake.raise(WakeReason::MotionDetected);
        block_on(node.step()).unwrap();

        assert!(!wake.is_raised());
        assert_eq!(node.board().radio.transmissions().len(), 1);
        assert_eq!(node.board().system.wake_cycles, 1);
    }

    #[test]
    fn unknown_reason_restarts() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());

        wake.raise_tag(9);
        assert_eq!(
            block_on(node.step()),
            Err(Fatal::Restart(RestartCause::UnknownWakeReason(9)))
        );
        wake.raise(WakeReason::None);
        assert_eq!(
            block_on(node.step()),
            Err(Fatal::Restart(RestartCause::UnknownWakeReason(0xFF)))
        );
        assert!(node.board().radio.ops.is_empty());
    }

    #[test]
    fn every_reason_rearms_motion_lines() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        let timer = TimerSource::new(&wake);

        events.dispatch(RadioEvent::RxDone {
            payload: &packet_from(101),
            rssi: -90,
            snr: 5,
        });
        block_on(node.step()).unwrap();
        assert!(motion.is_armed(MotionLine::Int1) && motion.is_armed(MotionLine::Int2));

        timer.on_expired();
        block_on(node.step()).unwrap();
        assert!(motion.is_armed(MotionLine::Int1) && motion.is_armed(MotionLine::Int2));

        motion.on_interrupt(MotionLine::Int2);
        block_on(node.step()).unwrap();
        assert!(motion.is_armed(MotionLine::Int1) && motion.is_armed(MotionLine::Int2));
        assert!(!node.board().system.awake);
    }

    #[test]
    fn busy_channel_retries_on_later_wakes() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        let timer = TimerSource::new(&wake);
        node.board_mut()
            .radio
            .cad_results
            .extend([CadScript::Busy, CadScript::Busy, CadScript::Busy]);

        for (i, now) in [1u32, 2, 3].into_iter().zip([3000, 6000, 9000]) {
            node.board().clock.set(SEND_INTERVAL + now);
            timer.on_expired();
            let cycle = block_on(node.step()).unwrap();
            assert_eq!(cycle.send, Some(SendOutcome::ChannelBusy { retries: i }));
            assert_eq!(node.state().radio_power, RadioPower::DutyCycledReceive);
        }
        assert!(node.board().radio.transmissions().is_empty());
        assert_eq!(node.channel().retries(), 3);
        assert_eq!(node.state().last_transmit_ms, 0);

        node.board().clock.set(SEND_INTERVAL + 12_000);
        timer.on_expired();
        let cycle = block_on(node.step()).unwrap();
        assert_eq!(cycle.send, Some(SendOutcome::Sent));
        assert_eq!(node.board().radio.transmissions().len(), 1);
        assert_eq!(node.board().radio.cad_count(), 4);
        assert_eq!(node.channel().retries(), 0);
    }

    #[test]
    fn transmit_timeout_resumes_without_counting() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board_mut().radio.tx_results.push_back(TxScript::Timeout);
        node.board().clock.set(SEND_INTERVAL + 1);

        TimerSource::new(&wake).on_expired();
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.send, Some(SendOutcome::TimedOut));
        assert_eq!(node.state().payload.sent_packets, 0);
        assert_eq!(node.state().last_transmit_ms, SEND_INTERVAL + 1);
        assert_eq!(node.board().radio.ops.last(), Some(&DUTY_CYCLE));
    }

    #[test]
    fn transmit_timeout_counted_by_policy() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let config = NodeConfig {
            timeout_policy: TimeoutPolicy {
                count_timeouts_as_sent: true,
            },
            ..Default::default()
        };
        let mut node = started(&wake, &events, &motion, config);
        node.board_mut().radio.tx_results.push_back(TxScript::Timeout);

        motion.on_interrupt(MotionLine::Int1);
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.send, Some(SendOutcome::TimedOut));
        assert_eq!(node.state().payload.sent_packets, 1);
    }

    #[test]
    fn wakes_during_assessment_are_serialized() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let timer = TimerSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        let (motion_ref, timer_ref) = (&motion, &timer);
        let mut fired = false;
        node.board_mut().radio.on_cad = Some(Box::new(move || {
            if !fired {
                fired = true;
                assert!(!motion_ref.on_interrupt(MotionLine::Int1));
                timer_ref.on_expired();
            }
        }));

        motion.on_interrupt(MotionLine::Int1);
        let first = block_on(node.step()).unwrap();
        assert_eq!(first.reason, WakeReason::MotionDetected);
        assert_eq!(first.send, Some(SendOutcome::Sent));

        // the timer raised during the first cycle is handled by the next one
        assert!(wake.is_raised());
        let second = block_on(node.step()).unwrap();
        assert_eq!(second.reason, WakeReason::TimerExpired);
        assert_eq!(second.send, None);
        assert_eq!(node.board().radio.cad_count(), 1);
    }

    #[test]
    fn each_motion_cycle_clears_latch_once() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        assert_eq!(node.board().accelerometer.latch_clears, 1);

        node.board_mut().accelerometer.latched = 0x60;
        motion.on_interrupt(MotionLine::Int1);
        let cycle = block_on(node.step()).unwrap();
        assert_eq!(cycle.reason, WakeReason::MotionDetected);
        assert_eq!(node.board().accelerometer.latched, 0);
        assert_eq!(node.board().accelerometer.latch_clears, 2);
        assert!(!wake.is_raised());

        node.board_mut().accelerometer.latched = 0x60;
        motion.on_interrupt(MotionLine::Int2);
        block_on(node.step()).unwrap();
        assert_eq!(node.board().accelerometer.latched, 0);
        assert_eq!(node.board().accelerometer.latch_clears, 3);
        assert!(!wake.is_raised());
        assert_eq!(node.board().radio.transmissions().len(), 2);
    }

    #[test]
    fn fatal_sensor_status_halts() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board_mut()
            .sensor
            .samples
            .push_back(Err(SensorError::Fatal(-3)));

        motion.on_interrupt(MotionLine::Int1);
        assert_eq!(
            block_on(node.step()),
            Err(Fatal::Halt(HaltCause::Sensor(-3)))
        );
        assert_eq!(node.board().radio.cad_count(), 0);
    }

    #[test]
    fn sensor_warning_keeps_previous_values() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board_mut().sensor.samples.extend([
            Ok(Some(reading(21.5))),
            Err(SensorError::Warning(2)),
            Ok(None),
        ]);

        for _ in 0..3 {
            motion.on_interrupt(MotionLine::Int1);
            assert_eq!(block_on(node.step()).unwrap().send, Some(SendOutcome::Sent));
            let sent = node.board().radio.last_transmitted_payload().unwrap();
            assert_eq!((sent.temperature_int, sent.temperature_dec), (21, 50));
        }
    }

    #[test]
    fn downlink_from_predecessor_is_kept() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());

        events.dispatch(RadioEvent::RxDone {
            payload: &packet_from(101),
            rssi: -90,
            snr: 5,
        });
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.reason, WakeReason::DownlinkReceived);
        assert_eq!(cycle.send, None);
        let downlink = node.state().last_downlink.as_ref().unwrap();
        assert_eq!(downlink.sender, 101);
        assert_eq!(downlink.rssi, -90);
        // receive mode is reapplied after a packet
        assert_eq!(node.board().radio.ops, [DUTY_CYCLE]);
    }

    #[test]
    fn downlink_from_other_node_is_ignored() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());

        events.dispatch(RadioEvent::RxDone {
            payload: &packet_from(100),
            rssi: -90,
            snr: 5,
        });
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.reason, WakeReason::DownlinkReceived);
        assert_eq!(node.state().last_downlink, None);
        assert_eq!(events.rejected(), 1);
        assert_eq!(node.state().payload, OutgoingPayload::new(102));
    }

    #[test]
    fn tx_only_sleeps_instead_of_receiving() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let config = NodeConfig {
            receive_mode: ReceiveMode::TxOnly,
            ..Default::default()
        };
        let mut node = started(&wake, &events, &motion, config);
        assert_eq!(node.state().radio_power, RadioPower::Sleep);

        motion.on_interrupt(MotionLine::Int1);
        block_on(node.step()).unwrap();
        let ops = &node.board().radio.ops;
        assert_eq!(ops.first(), Some(&RadioOp::Sleep));
        assert_eq!(ops.last(), Some(&RadioOp::Sleep));
        assert!(!ops.contains(&DUTY_CYCLE));

        events.dispatch(RadioEvent::RxDone {
            payload: &packet_from(101),
            rssi: -90,
            snr: 5,
        });
        block_on(node.step()).unwrap();
        assert_eq!(node.state().last_downlink, None);
    }

    #[test]
    fn radio_fault_recovers_receive_mode() {
        let wake = WakeSignal::new();
        let events = RadioEventRouter::new(&wake);
        let motion = MotionSource::new(&wake);
        let mut node = started(&wake, &events, &motion, NodeConfig::default());
        node.board_mut().radio.fail_next = Some(RadioError::Hardware);

        motion.on_interrupt(MotionLine::Int1);
        let cycle = block_on(node.step()).unwrap();

        assert_eq!(cycle.send, Some(SendOutcome::RadioFault(RadioError::Hardware)));
        assert_eq!(node.board().radio.ops, [DUTY_CYCLE]);
        assert_eq!(node.state().radio_power, RadioPower::DutyCycledReceive);
    }
}

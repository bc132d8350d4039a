use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::mock_asr::AsrStub;
use common::mock_audio::ScriptedInput;
use common::mock_tts::MockTts;
use common::{wait_until, Harness, RecordingSink, COMPLETION_DELAY};

use cabin_voice::commands::{CommandBinding, CommandTable};
use cabin_voice::config::Config;
use cabin_voice::core::clock::{RuntimeScheduler, SystemClock};
use cabin_voice::core::signals::EngineSignals;
use cabin_voice::engine::{Handled, HandlerSettings, ResultHandler};
use cabin_voice::feedback::{Announcer, FeedbackQueue};
use cabin_voice::supervisor::{Supervisor, SupervisorState};

const NAV_WAIT: Duration = Duration::from_secs(3);

fn strict_no_match(threshold: u32) -> HandlerSettings {
    HandlerSettings {
        no_match_threshold: threshold,
        ..HandlerSettings::default()
    }
}

// ── Result handling on manual time ───────────────────────────

#[test]
fn test_simple_command_dispatch() {
    let h = Harness::new();

    assert_eq!(
        h.handler.handle_text("打开空调"),
        Handled::Dispatched("ac_on".to_string())
    );
    assert_eq!(
        h.sink.calls(),
        vec![("ac_on".to_string(), "打开空调".to_string())]
    );
    assert!(h.signals.restart_raised());

    // Completion phrase only after the delay
    assert_eq!(h.spoken(), vec!["正在为您开启空调"]);
    h.advance(COMPLETION_DELAY);
    assert_eq!(h.spoken(), vec!["正在为您开启空调", "空调已开启"]);

    let snapshot = h.handler.snapshot().unwrap();
    assert_eq!(snapshot.commands_dispatched, 1);
    assert_eq!(snapshot.last_command.unwrap().0, "ac_on");
}

#[test]
fn test_punctuation_stripped_before_matching() {
    let h = Harness::new();
    assert_eq!(
        h.handler.handle_text("  请，打开车窗。"),
        Handled::Dispatched("window_open".to_string())
    );
    assert_eq!(h.sink.calls()[0].1, "请 打开车窗");
}

#[test]
fn test_empty_text_ignored() {
    let h = Harness::new();
    assert_eq!(h.handler.handle_text(""), Handled::Ignored);
    assert_eq!(h.handler.handle_text("  。，！ "), Handled::Ignored);
    assert!(h.sink.calls().is_empty());
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 0);
}

#[test]
fn test_navigation_across_two_utterances() {
    let h = Harness::new();

    assert_eq!(h.handler.handle_text("导航到"), Handled::NavigationStarted);
    assert!(h.signals.navigation_active());
    assert_eq!(h.handler.handle_text("天津站"), Handled::Collected);
    assert!(h.sink.calls().is_empty());

    h.advance(NAV_WAIT - Duration::from_millis(1));
    assert!(h.sink.calls().is_empty());

    h.advance(Duration::from_millis(1));
    assert_eq!(
        h.sink.calls(),
        vec![("navigation_complete".to_string(), "导航到天津站".to_string())]
    );
    assert!(!h.signals.navigation_active());
    assert!(h.signals.restart_due());

    h.advance(COMPLETION_DELAY);
    assert_eq!(
        h.spoken(),
        vec!["正在为您启动导航", "正在为您规划路线", "路线规划完成"]
    );
}

#[test]
fn test_navigation_destination_in_trigger_utterance() {
    let h = Harness::new();
    assert_eq!(h.handler.handle_text("我要去北京西站"), Handled::NavigationStarted);
    h.advance(NAV_WAIT);
    assert_eq!(h.sink.calls()[0].1, "导航到北京西站");
}

#[test]
fn test_navigation_without_destination() {
    let h = Harness::new();

    assert_eq!(h.handler.handle_text("导航"), Handled::NavigationStarted);
    h.advance(NAV_WAIT);

    assert!(h.sink.calls().is_empty());
    assert!(!h.signals.restart_raised());
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 1);
    assert!(h.spoken().contains(&"无法识别目的地，请重新说明".to_string()));
}

#[test]
fn test_navigation_window_bypasses_dedup() {
    let h = Harness::new();
    h.handler.handle_text("导航到");
    assert_eq!(h.handler.handle_text("导航到"), Handled::Collected);
    assert_eq!(h.handler.handle_text("打开空调"), Handled::Collected);
    assert_eq!(h.handler.snapshot().unwrap().navigation_fragments, 3);
}

#[test]
fn test_open_window_defers_restart() {
    let h = Harness::new();
    h.handler.handle_text("导航到");

    h.signals.raise_restart();
    assert!(h.signals.restart_raised());
    assert!(!h.signals.restart_due());
    assert!(!h.signals.should_wind_down());

    h.handler.handle_text("天津站");
    h.advance(NAV_WAIT);
    assert!(h.signals.restart_due());
}

#[test]
fn test_stop_cancels_navigation_timer() {
    let h = Harness::new();
    h.handler.handle_text("导航到");
    h.handler.handle_text("天津站");
    assert_eq!(h.scheduler.pending(), 1);

    h.signals.stop();
    h.handler.stop();
    assert_eq!(h.scheduler.pending(), 0);

    h.advance(NAV_WAIT * 2);
    assert!(h.sink.calls().is_empty());
    assert!(!h.signals.navigation_active());
}

#[test]
fn test_completion_phrase_skipped_after_stop() {
    let h = Harness::new();
    h.handler.handle_text("关闭空调");
    h.signals.stop();
    h.advance(COMPLETION_DELAY);
    assert_eq!(h.spoken(), vec!["正在为您关闭空调"]);
}

#[test]
fn test_duplicate_and_cooldown() {
    let h = Harness::new();

    h.handler.handle_text("打开空调");
    assert_eq!(h.handler.handle_text("打开空调"), Handled::Duplicate);

    h.advance(Duration::from_secs(1));
    assert_eq!(h.handler.handle_text("打开车窗"), Handled::Duplicate);

    h.advance(Duration::from_secs(3));
    assert_eq!(
        h.handler.handle_text("打开车窗"),
        Handled::Dispatched("window_open".to_string())
    );
    // Same text stays a duplicate however long ago it was accepted
    h.advance(Duration::from_secs(60));
    assert_eq!(h.handler.handle_text("打开车窗"), Handled::Duplicate);
    assert_eq!(h.sink.tags(), vec!["ac_on", "window_open"]);
}

#[test]
fn test_reset_cycle_forgets_last_text() {
    let h = Harness::new();
    h.handler.handle_text("打开空调");
    h.advance(Duration::from_secs(4));

    h.handler.reset_cycle(true);
    assert_eq!(
        h.handler.handle_text("打开空调"),
        Handled::Dispatched("ac_on".to_string())
    );
}

#[test]
fn test_reset_cycle_keeps_cooldown_running() {
    let h = Harness::new();
    h.handler.handle_text("打开空调");
    h.handler.reset_cycle(true);
    assert_eq!(h.handler.handle_text("打开空调"), Handled::Duplicate);
}

#[test]
fn test_no_match_threshold_forces_restart() {
    let h = Harness::with_settings(strict_no_match(3));

    assert_eq!(
        h.handler.handle_text("今天天气很好"),
        Handled::NoMatch { restart: false }
    );
    assert_eq!(
        h.handler.handle_text("随便聊聊"),
        Handled::NoMatch { restart: false }
    );
    assert!(!h.signals.restart_raised());
    assert_eq!(
        h.handler.handle_text("你好呀"),
        Handled::NoMatch { restart: true }
    );
    assert!(h.signals.restart_raised());
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 0);
}

#[test]
fn test_twenty_failures_raise_one_restart() {
    let h = Harness::new();
    let mut restarts = 0;
    for i in 0..20 {
        h.advance(Duration::from_secs(1));
        let text = format!("第{}句闲聊", i);
        if h.handler.handle_text(&text) == (Handled::NoMatch { restart: true }) {
            restarts += 1;
        }
    }
    assert_eq!(restarts, 1);
    assert!(h.signals.restart_raised());
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 0);
}

#[test]
fn test_no_match_window_expiry() {
    let h = Harness::with_settings(strict_no_match(3));
    h.handler.handle_text("今天天气很好");
    h.handler.handle_text("随便聊聊");

    h.advance(Duration::from_secs(31));
    assert_eq!(
        h.handler.handle_text("你好呀"),
        Handled::NoMatch { restart: false }
    );
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 1);
}

#[test]
fn test_success_resets_no_match() {
    let h = Harness::with_settings(strict_no_match(3));
    h.handler.handle_text("今天天气很好");
    h.handler.handle_text("随便聊聊");
    h.handler.handle_text("打开空调");
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 0);

    h.signals.clear_restart();
    h.handler.handle_text("你好呀");
    assert!(!h.signals.restart_raised());
}

#[test]
fn test_no_match_restart_disabled() {
    let h = Harness::with_settings(HandlerSettings {
        no_match_enabled: false,
        no_match_threshold: 1,
        ..HandlerSettings::default()
    });
    assert_eq!(
        h.handler.handle_text("今天天气很好"),
        Handled::NoMatch { restart: false }
    );
    assert!(!h.signals.restart_raised());
}

#[test]
fn test_callback_failure_spoken_without_restart() {
    let h = Harness::new();
    h.sink.fail.store(true, Ordering::SeqCst);

    assert_eq!(
        h.handler.handle_text("打开空调"),
        Handled::CallbackFailed("ac_on".to_string())
    );
    assert!(!h.signals.restart_raised());

    h.advance(COMPLETION_DELAY);
    assert_eq!(h.spoken(), vec!["正在为您开启空调", "指令执行出现错误"]);
    assert_eq!(h.handler.snapshot().unwrap().commands_dispatched, 0);

    // Dedup was committed before the callback ran
    h.sink.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.handler.handle_text("打开空调"), Handled::Duplicate);
}

#[test]
fn test_navigation_callback_failure_prompt() {
    let h = Harness::new();
    h.sink.fail.store(true, Ordering::SeqCst);
    h.handler.handle_text("导航到天津站");
    h.advance(NAV_WAIT);
    assert!(h.spoken().contains(&"导航指令执行出现错误".to_string()));
}

#[test]
fn test_panicking_callback_reported_like_failure() {
    let h = Harness::new();
    h.sink.panic.store(true, Ordering::SeqCst);

    assert_eq!(
        h.handler.handle_text("打开空调"),
        Handled::CallbackFailed("ac_on".to_string())
    );
    assert!(!h.signals.restart_raised());
    assert!(h.spoken().contains(&"指令执行出现错误".to_string()));

    h.sink.panic.store(false, Ordering::SeqCst);
    h.advance(Duration::from_secs(4));
    assert_eq!(
        h.handler.handle_text("关闭车窗"),
        Handled::Dispatched("window_close".to_string())
    );
}

#[test]
fn test_navigation_recovers_after_panicking_callback() {
    let h = Harness::new();
    h.sink.panic.store(true, Ordering::SeqCst);

    assert_eq!(h.handler.handle_text("导航到天津站"), Handled::NavigationStarted);
    h.advance(NAV_WAIT);
    assert!(!h.signals.navigation_active());
    assert!(!h.signals.restart_raised());
    assert!(h.spoken().contains(&"导航指令执行出现错误".to_string()));

    h.sink.panic.store(false, Ordering::SeqCst);
    h.advance(Duration::from_secs(4));
    assert_eq!(h.handler.handle_text("导航到北京站"), Handled::NavigationStarted);
    h.advance(NAV_WAIT);
    assert_eq!(h.sink.calls().last().unwrap().1, "导航到北京站");
    assert!(h.signals.restart_due());
}

#[test]
fn test_runtime_timers_survive_panicking_callback() {
    let scheduler = Arc::new(RuntimeScheduler::new().unwrap());
    let signals = EngineSignals::new();
    let tts = Arc::new(MockTts::new());
    let feedback = Arc::new(FeedbackQueue::new(tts.factory()));
    let announcer = Announcer::new(
        feedback.clone(),
        scheduler.clone(),
        signals.clone(),
        Duration::from_millis(20),
    );
    let sink = Arc::new(RecordingSink::default());
    sink.panic.store(true, Ordering::SeqCst);
    let handler = ResultHandler::new(
        HandlerSettings {
            navigation_wait: Duration::from_millis(50),
            cooldown: Duration::ZERO,
            ..HandlerSettings::default()
        },
        CommandTable::default(),
        announcer,
        sink.clone(),
        signals.clone(),
        Arc::new(SystemClock),
        scheduler.clone(),
    );

    assert_eq!(handler.handle_text("导航到天津站"), Handled::NavigationStarted);
    assert!(wait_until(Duration::from_secs(2), || !signals.navigation_active()));

    // The timer runtime is still alive for the next window
    sink.panic.store(false, Ordering::SeqCst);
    assert_eq!(handler.handle_text("导航到北京站"), Handled::NavigationStarted);
    assert!(wait_until(Duration::from_secs(2), || sink.calls().len() == 2));
    assert!(!signals.navigation_active());
    assert_eq!(sink.calls()[1].1, "导航到北京站");
    assert_eq!(
        handler.handle_text("打开空调"),
        Handled::Dispatched("ac_on".to_string())
    );

    signals.stop();
    handler.stop();
    feedback.stop_all();
}

#[test]
fn test_navigation_fragments_normalized_on_arrival() {
    let h = Harness::new();
    h.handler.handle_text("导航到");
    // A re-emitted prefix inside one fragment collapses before it is joined
    assert_eq!(
        h.handler.handle_text("北京，西站，北京，西站，北广场"),
        Handled::Collected
    );
    h.advance(NAV_WAIT);
    assert_eq!(
        h.sink.calls(),
        vec![(
            "navigation_complete".to_string(),
            "导航到北京 西站 北广场".to_string()
        )]
    );
}

#[test]
fn test_silent_commands_speak_nothing() {
    let h = Harness::new();
    assert_eq!(
        h.handler.handle_text("开灯"),
        Handled::Dispatched("light_on".to_string())
    );
    h.advance(COMPLETION_DELAY);
    assert!(h.spoken().is_empty());
    assert_eq!(h.sink.tags(), vec!["light_on"]);
}

#[test]
fn test_restart_after_command_disabled() {
    let h = Harness::with_settings(HandlerSettings {
        restart_after_command: false,
        ..HandlerSettings::default()
    });
    h.handler.handle_text("播放音乐");
    assert!(!h.signals.restart_raised());

    // Navigation always recycles the session
    h.advance(Duration::from_secs(4));
    h.handler.handle_text("导航到天津站");
    h.advance(NAV_WAIT);
    assert!(h.signals.restart_raised());
}

#[test]
fn test_custom_command_dispatch() {
    let mut table = CommandTable::default();
    table.extend(vec![CommandBinding::new(
        "seat_vent",
        &["座椅通风"],
        "正在为您开启座椅通风",
        "座椅通风已开启",
    )]);
    let h = Harness::with_table(HandlerSettings::default(), table);

    assert_eq!(
        h.handler.handle_text("打开座椅通风"),
        Handled::Dispatched("seat_vent".to_string())
    );
    assert_eq!(h.spoken(), vec!["正在为您开启座椅通风"]);
}

#[test]
fn test_long_text_truncated() {
    let h = Harness::with_settings(HandlerSettings {
        max_text_length: 10,
        ..HandlerSettings::default()
    });
    h.handler.handle_text("我觉得现在车里有点热所以请帮我打开空调");
    assert!(h.sink.calls().is_empty());
    assert_eq!(h.handler.snapshot().unwrap().no_match_count, 1);
}

// ── Supervisor against a local recognition service ───────────

fn fast_config(url: &str) -> Config {
    Config {
        asr_url: url.to_string(),
        app_key: "test-app".to_string(),
        access_key: "test-key".to_string(),
        chunk_size: 320,
        command_cooldown_secs: 0.0,
        navigation_wait_secs: 0.3,
        restart_delay_secs: 0.05,
        reconnect_delay_secs: 0.05,
        disconnect_retry_secs: 0.05,
        ack_timeout_secs: 2.0,
        bridge_timeout_secs: 5.0,
        completion_delay_ms: 10,
        send_pacing_ms: 1,
        queue_poll_ms: 20,
        supervisor_poll_ms: 20,
        feedback_drain_retries: 5,
        ..Config::default()
    }
}

#[test]
fn test_supervisor_dispatches_and_recycles_sessions() {
    let stub = AsrStub::start(
        vec![vec!["打开空调"], vec!["导航到", "天津站"]],
        Duration::from_millis(80),
    );
    let sink = Arc::new(RecordingSink::default());
    let tts = Arc::new(MockTts::new());
    let input = Arc::new(ScriptedInput::new());

    let mut supervisor = Supervisor::new(
        fast_config(&stub.url),
        sink.clone(),
        tts.factory(),
        input.clone(),
    )
    .unwrap();
    let handle = supervisor.handle();
    let runner = std::thread::spawn(move || supervisor.run());

    assert!(wait_until(Duration::from_secs(10), || sink.calls().len() >= 2));
    assert!(stub.wait_for_connections(3, Duration::from_secs(10)));
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == SupervisorState::Listening
    }));

    let status = handle.status();
    assert!(status.connected);
    assert!(status.recording);
    assert!(status.connect_id.is_some());
    assert_eq!(status.commands_dispatched, 2);
    assert_eq!(status.last_command.as_deref(), Some("navigation_complete"));

    handle.stop();
    runner.join().unwrap();
    assert_eq!(handle.state(), SupervisorState::Stopped);
    assert!(!handle.status().recording);

    assert_eq!(
        sink.calls(),
        vec![
            ("ac_on".to_string(), "打开空调".to_string()),
            ("navigation_complete".to_string(), "导航到天津站".to_string()),
        ]
    );
    assert!(tts.was_spoken("正在为您开启空调"));
    assert!(tts.was_spoken("正在为您规划路线"));

    // Every connection carries credentials and its own connect id
    let ids = stub.connect_ids();
    assert!(ids.len() >= 3);
    assert!(ids.iter().all(|id| !id.is_empty()));
    assert_ne!(ids[0], ids[1]);
    assert!(stub
        .record
        .app_keys
        .lock()
        .unwrap()
        .iter()
        .all(|k| k == "test-app"));

    let init = stub.record.init_requests.lock().unwrap()[0].clone();
    assert_eq!(init["audio"]["rate"], 16000);
    assert_eq!(init["user"]["uid"], "car_system_client");

    assert!(stub.audio_frames() > 0);
    assert!(input.opened() >= 3);
}

#[test]
fn test_supervisor_reconnects_after_device_loss() {
    let stub = AsrStub::start(vec![], Duration::from_millis(50));
    let input = Arc::new(ScriptedInput::failing_after(5));

    let mut supervisor = Supervisor::new(
        fast_config(&stub.url),
        Arc::new(RecordingSink::default()),
        Arc::new(MockTts::new()).factory(),
        input.clone(),
    )
    .unwrap();
    let handle = supervisor.handle();
    let runner = std::thread::spawn(move || supervisor.run());

    assert!(stub.wait_for_connections(2, Duration::from_secs(10)));
    assert!(wait_until(Duration::from_secs(5), || input.opened() >= 2));

    handle.stop();
    runner.join().unwrap();
    assert_eq!(handle.state(), SupervisorState::Stopped);
}

#[test]
fn test_status_serializes() {
    let stub = AsrStub::start(vec![], Duration::from_millis(50));
    let supervisor = Supervisor::new(
        fast_config(&stub.url),
        Arc::new(RecordingSink::default()),
        Arc::new(MockTts::new()).factory(),
        Arc::new(ScriptedInput::new()),
    )
    .unwrap();

    let json = serde_json::to_value(supervisor.handle().status()).unwrap();
    assert_eq!(json["state"], "Disconnected");
    assert_eq!(json["running"], true);
    assert_eq!(json["no_match_threshold"], 20);
}

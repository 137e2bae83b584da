use super::*;
use crate::config::AppConfig;
use crate::display::BUSY_BANNER;
use crate::testing::{
    EngineCall, FakeMidiBackend, Frame, RecordingDisplay, RecordingEngine, ScriptedAgent,
};
use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, Smf, Timing, TrackEvent, TrackEventKind};
use proptest::prelude::*;
use tempfile::TempDir;

use crate::keypad::ButtonEvent::{Activate, CursorDown, CursorUp, Reset};
use crate::midi::MidiMessage;

struct Rig {
    menu: Menu,
    backend: FakeMidiBackend,
    agent: Arc<ScriptedAgent>,
    engine: RecordingEngine,
    display: RecordingDisplay,
    home: TempDir,
}

fn rig(inputs: &[&str], outputs: &[&str], bluetooth: bool) -> Rig {
    let home = TempDir::new().unwrap();
    std::fs::create_dir(home.path().join("sf2")).unwrap();
    std::fs::create_dir(home.path().join("midifiles")).unwrap();

    let mut config = AppConfig::default();
    config.paths.home = Some(home.path().to_path_buf());
    config.paths.default_sound_bank = home.path().join("default.sf2");
    config.bluetooth.enabled = bluetooth;
    config.bluetooth.discovery_scan_secs = 1;
    config.bluetooth.scan_pulse_secs = 1;
    config.bluetooth.pair_retry_delay_secs = 0;
    config.bluetooth.command_timeout_secs = 1;
    config.midi.port_timeout_secs = 1;
    config.midi.port_poll_ms = 10;

    let paths = AppPaths::new(home.path().join("config.yaml"), &config.paths);
    let backend = FakeMidiBackend::with_ports(inputs, outputs);
    let agent = Arc::new(ScriptedAgent::default());
    let engine = RecordingEngine::default();
    let display = RecordingDisplay::default();

    let menu = Menu::new(
        config,
        paths,
        Collaborators {
            backend: Arc::new(backend.clone()),
            agent: agent.clone(),
            engine: Arc::new(engine.clone()),
            display: Box::new(display.clone()),
        },
    );

    Rig {
        menu,
        backend,
        agent,
        engine,
        display,
        home,
    }
}

async fn press(menu: &mut Menu, events: &[ButtonEvent]) {
    for event in events {
        menu.handle(*event).await;
    }
}

/// From the main screen, move to `screen` and enter it
async fn enter(menu: &mut Menu, screen: Screen) {
    assert_eq!(menu.session().screen(), Screen::Main);
    let position = Screen::MAIN_ENTRIES
        .iter()
        .position(|s| *s == screen)
        .unwrap();
    for _ in 0..position {
        menu.handle(CursorDown).await;
    }
    menu.handle(Activate).await;
}

fn labels(menu: &Menu) -> Vec<String> {
    menu.session().labels()
}

fn midi_file_bytes() -> Vec<u8> {
    let track = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: midly::MidiMessage::NoteOn { key: u7::new(60), vel: u7::new(100) },
            },
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ];
    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))),
        tracks: vec![track],
    };
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).unwrap();
    bytes
}

proptest! {
    #[test]
    fn test_cursor_stays_in_bounds(moves in proptest::collection::vec(-3isize..=3, 0..40)) {
        let mut session = MenuSession::new(false, PathBuf::from("/x.sf2"));
        let last = session.items().len() as isize - 1;
        let mut expected: isize = 0;

        for delta in moves {
            session.move_cursor(delta);
            expected = (expected + delta).clamp(0, last);
            prop_assert_eq!(session.index() as isize, expected);
        }
    }
}

#[tokio::test]
async fn test_main_screen_lists_every_entry() {
    let Rig { mut menu, display, .. } = rig(&[], &[], false);
    press(&mut menu, &[CursorUp]).await;

    assert_eq!(menu.session().index(), 0);
    assert_eq!(
        labels(&menu),
        vec!["MIDI INPUT", "MIDI OUTPUT", "SOUND FONT", "MIDI FILE", "BLUETOOTH"]
    );
    assert_eq!(
        display.frames().last(),
        Some(&Frame::Render {
            screen: Screen::Main,
            labels: labels(&menu),
            index: 0,
        })
    );
}

#[tokio::test]
async fn test_every_event_renders_once() {
    let Rig { mut menu, display, .. } = rig(&[], &[], false);
    press(&mut menu, &[CursorDown, CursorDown, CursorUp, Reset]).await;
    assert_eq!(display.renders(), 4);
}

#[tokio::test]
async fn test_bluetooth_toggle_seeds_and_commits() {
    let Rig { mut menu, .. } = rig(&[], &[], false);

    enter(&mut menu, Screen::BluetoothToggle).await;
    assert_eq!(menu.session().screen(), Screen::BluetoothToggle);
    assert_eq!(menu.session().stage(), Stage::ReadyToCommit);
    assert_eq!(labels(&menu), vec!["OFF", "ON"]);
    assert_eq!(menu.session().index(), 0);

    press(&mut menu, &[CursorDown, Activate]).await;
    assert!(menu.session().bluetooth_enabled());
    assert_eq!(menu.session().screen(), Screen::Main);

    // Selector starts on the current value; committing it again changes nothing
    enter(&mut menu, Screen::BluetoothToggle).await;
    assert_eq!(menu.session().index(), 1);
    press(&mut menu, &[Activate]).await;
    assert!(menu.session().bluetooth_enabled());
}

#[tokio::test]
async fn test_output_list_order_with_bluetooth() {
    let Rig {
        mut menu,
        agent,
        display,
        ..
    } = rig(&[], &["Midi Through", "USB Keys"], true);
    agent.respond("devices", "Device 11:22:33:44:55:66 Stale\n");
    agent.advertise(&["Device AA:BB:CC:DD:EE:FF MyKeyboard"]);

    enter(&mut menu, Screen::SelectOutput).await;

    assert_eq!(
        labels(&menu),
        vec!["FLUIDSYNTH", "Midi Through", "USB Keys", "MyKeyboard"]
    );
    assert!(agent.was_called("remove 11:22:33:44:55:66"));
    assert_eq!(agent.scan_count(), 1);

    let frames = display.frames();
    let busy = frames
        .iter()
        .position(|f| *f == Frame::Busy(BUSY_BANNER.to_string()))
        .unwrap();
    assert!(matches!(
        frames.last(),
        Some(Frame::Render { screen: Screen::SelectOutput, .. })
    ));
    assert!(busy < frames.len() - 1);
}

#[tokio::test]
async fn test_bluetooth_off_lists_local_ports_only() {
    let Rig { mut menu, agent, .. } = rig(&["Midi Through", "Keys"], &[], false);

    enter(&mut menu, Screen::SelectInput).await;

    assert_eq!(labels(&menu), vec!["Midi Through", "Keys"]);
    assert!(agent.calls().is_empty());
    assert_eq!(agent.scan_count(), 0);
}

#[tokio::test]
async fn test_output_commit_closes_previous_first() {
    let Rig { mut menu, backend, .. } = rig(&[], &["Synth A", "Synth B"], false);

    enter(&mut menu, Screen::SelectOutput).await;
    press(&mut menu, &[CursorDown, Activate]).await;
    assert_eq!(menu.session().output().port_name(), Some("Synth A"));
    assert_eq!(menu.session().screen(), Screen::SelectOutput);

    press(&mut menu, &[CursorDown, Activate]).await;
    assert_eq!(menu.session().output().port_name(), Some("Synth B"));

    // Same port again keeps the open handle
    press(&mut menu, &[Activate]).await;

    assert_eq!(backend.opened(PortRole::Output), vec!["Synth A", "Synth B"]);
    assert_eq!(backend.open_count(PortRole::Output), 1);
    assert_eq!(backend.peak_open(PortRole::Output), 1);
}

#[tokio::test]
async fn test_local_synth_commit_releases_port() {
    let Rig { mut menu, backend, .. } = rig(&[], &["Synth A"], false);

    enter(&mut menu, Screen::SelectOutput).await;
    press(&mut menu, &[CursorDown, Activate, CursorUp, Activate]).await;

    assert!(matches!(menu.session().output(), OutputBinding::LocalSynth));
    assert_eq!(backend.open_count(PortRole::Output), 0);
}

#[tokio::test]
async fn test_input_commit_reinitializes_engine() {
    let Rig {
        mut menu,
        backend,
        engine,
        ..
    } = rig(&["Keys"], &[], false);

    enter(&mut menu, Screen::SelectInput).await;
    press(&mut menu, &[Activate]).await;

    assert_eq!(menu.session().input_port(), Some("Keys"));
    assert!(matches!(engine.calls().last(), Some(EngineCall::Reverb(_))));

    backend.inject(&[0x90, 60, 90]);
    assert_eq!(
        engine.applied(),
        vec![MidiMessage::NoteOn { channel: 0, note: 60, velocity: 90 }]
    );

    // Rebinding the same input keeps the port but still reinitializes
    press(&mut menu, &[Activate]).await;
    assert_eq!(backend.opened(PortRole::Input).len(), 1);
    let default_bank = EngineCall::LoadSoundBank(menu.session().sound_bank().to_path_buf());
    assert_eq!(engine.count(&default_bank), 2);
}

#[tokio::test]
async fn test_unresolved_bluetooth_keeps_previous_input() {
    let Rig {
        mut menu,
        agent,
        backend,
        ..
    } = rig(&["Keys"], &[], true);
    agent.advertise(&["Device AA:BB:CC:DD:EE:FF Ghost"]);

    enter(&mut menu, Screen::SelectInput).await;
    assert_eq!(labels(&menu), vec!["Keys", "Ghost"]);
    press(&mut menu, &[Activate]).await;
    assert_eq!(menu.session().input_port(), Some("Keys"));

    press(&mut menu, &[CursorDown, Activate]).await;

    assert!(agent.was_called("pair AA:BB:CC:DD:EE:FF"));
    assert!(agent.was_called("connect AA:BB:CC:DD:EE:FF"));
    assert_eq!(menu.session().input_port(), Some("Keys"));
    assert_eq!(menu.session().screen(), Screen::SelectInput);
    assert_eq!(menu.session().index(), 1);
    assert_eq!(backend.open_count(PortRole::Input), 1);
}

#[tokio::test]
async fn test_unresolved_bluetooth_keeps_previous_output() {
    let Rig {
        mut menu,
        agent,
        backend,
        ..
    } = rig(&[], &["Synth A"], true);
    agent.advertise(&["Device AA:BB:CC:DD:EE:FF Ghost"]);
    agent.respond("connect AA:BB:CC:DD:EE:FF", "Connection successful\n");

    enter(&mut menu, Screen::SelectOutput).await;
    assert_eq!(labels(&menu), vec!["FLUIDSYNTH", "Synth A", "Ghost"]);
    press(&mut menu, &[CursorDown, Activate]).await;
    assert_eq!(menu.session().output().port_name(), Some("Synth A"));

    // Connected, but no port ever shows up
    press(&mut menu, &[CursorDown, Activate]).await;

    assert!(agent.was_called("connect AA:BB:CC:DD:EE:FF"));
    assert_eq!(menu.session().output().port_name(), Some("Synth A"));
    assert_eq!(menu.session().screen(), Screen::SelectOutput);
    assert_eq!(backend.opened(PortRole::Output), vec!["Synth A"]);
    assert_eq!(backend.open_count(PortRole::Output), 1);
}

#[tokio::test]
async fn test_port_commit_opens_exact_name() {
    let Rig { mut menu, backend, .. } = rig(&[], &["USB MIDI 2", "USB MIDI"], false);

    enter(&mut menu, Screen::SelectOutput).await;
    assert_eq!(labels(&menu), vec!["FLUIDSYNTH", "USB MIDI 2", "USB MIDI"]);
    press(&mut menu, &[CursorDown, CursorDown, Activate]).await;

    assert_eq!(menu.session().output().port_name(), Some("USB MIDI"));
    assert_eq!(backend.opened(PortRole::Output), vec!["USB MIDI"]);
}

#[tokio::test]
async fn test_bluetooth_input_is_bound_once_port_appears() {
    let Rig {
        mut menu,
        agent,
        backend,
        engine,
        ..
    } = rig(&[], &[], true);
    agent.advertise(&["Device AA:BB:CC:DD:EE:FF MyKeyboard"]);
    agent.respond("connect AA:BB:CC:DD:EE:FF", "Connection successful\n");
    // Listed once by the menu, then twice more while waiting
    backend.appear_after(PortRole::Input, "MyKeyboard Bluetooth 128:0", 3);

    enter(&mut menu, Screen::SelectInput).await;
    assert_eq!(labels(&menu), vec!["MyKeyboard"]);
    press(&mut menu, &[Activate]).await;

    assert_eq!(menu.session().input_port(), Some("MyKeyboard Bluetooth 128:0"));
    assert!(matches!(engine.calls().last(), Some(EngineCall::Reverb(_))));
}

#[tokio::test]
async fn test_sound_font_commit_rebuilds_engine() {
    let Rig {
        mut menu,
        engine,
        home,
        ..
    } = rig(&[], &[], false);
    let bank = home.path().join("sf2").join("Grand_Piano.sf2");
    std::fs::write(&bank, b"").unwrap();

    enter(&mut menu, Screen::SelectSoundFont).await;
    assert_eq!(labels(&menu), vec!["Grand Piano"]);
    press(&mut menu, &[Activate]).await;

    assert_eq!(menu.session().sound_bank(), bank.as_path());
    assert_eq!(menu.session().screen(), Screen::Main);
    assert_eq!(engine.calls().last(), Some(&EngineCall::LoadSoundBank(bank)));
}

#[tokio::test]
async fn test_midi_file_plays_on_local_synth() {
    let Rig {
        mut menu,
        engine,
        home,
        ..
    } = rig(&[], &[], false);
    let song = home.path().join("midifiles").join("fur_elise.mid");
    std::fs::write(&song, midi_file_bytes()).unwrap();

    enter(&mut menu, Screen::SelectMidiFile).await;
    assert_eq!(labels(&menu), vec!["fur elise"]);
    press(&mut menu, &[Activate]).await;

    assert_eq!(menu.session().screen(), Screen::Main);
    let calls = engine.calls();
    assert_eq!(calls.last(), Some(&EngineCall::PlayFile(song)));
    assert!(calls.contains(&EngineCall::StopPlayback));
}

#[tokio::test]
async fn test_midi_file_plays_on_external_port_and_restores_binding() {
    let Rig {
        mut menu,
        backend,
        engine,
        home,
        display,
        ..
    } = rig(&[], &["Synth 20:0"], false);
    std::fs::write(home.path().join("midifiles").join("song.mid"), midi_file_bytes()).unwrap();

    enter(&mut menu, Screen::SelectOutput).await;
    press(&mut menu, &[CursorDown, Activate, Reset]).await;
    enter(&mut menu, Screen::SelectMidiFile).await;
    press(&mut menu, &[Activate]).await;

    assert_eq!(backend.sent(), vec![vec![0x90, 60, 100]]);
    assert_eq!(backend.opened(PortRole::Output).len(), 3);
    assert_eq!(backend.peak_open(PortRole::Output), 1);
    assert_eq!(backend.open_count(PortRole::Output), 1);
    assert_eq!(menu.session().output().port_name(), Some("Synth 20:0"));
    assert!(!engine
        .calls()
        .iter()
        .any(|c| matches!(c, EngineCall::PlayFile(_))));
    assert!(display.busy_count() >= 1);
}

#[tokio::test]
async fn test_empty_file_list_commit_returns_to_main() {
    let Rig { mut menu, engine, .. } = rig(&[], &[], false);

    enter(&mut menu, Screen::SelectMidiFile).await;
    assert!(labels(&menu).is_empty());
    press(&mut menu, &[Activate]).await;

    assert_eq!(menu.session().screen(), Screen::Main);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_reset_returns_to_main_from_any_screen() {
    let Rig { mut menu, engine, .. } = rig(&["Keys"], &[], false);

    enter(&mut menu, Screen::SelectInput).await;
    press(&mut menu, &[Reset]).await;

    assert_eq!(menu.session().screen(), Screen::Main);
    assert_eq!(menu.session().index(), 0);
    assert_eq!(
        &engine.calls()[..2],
        &[EngineCall::StopPlayback, EngineCall::Reset]
    );
}

#[tokio::test]
async fn test_start_binds_last_input() {
    let Rig {
        mut menu,
        backend,
        display,
        ..
    } = rig(&["Midi Through", "Keys"], &[], false);

    menu.start().await;

    assert_eq!(menu.session().input_port(), Some("Keys"));
    assert_eq!(backend.open_count(PortRole::Input), 1);
    assert_eq!(display.renders(), 1);

    menu.shutdown();
    assert_eq!(backend.open_count(PortRole::Input), 0);
}

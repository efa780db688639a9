//! Engine-level playback scenarios over the offline soundcard.

use std::thread::sleep;
use std::time::Duration;

use ripieno_core::{
    AudioId, ChannelRef, Direction, Engine, EngineConfig, EngineEvent, Error, Note, PatternData,
    ScopeRef, SoundScope, StructuralError, TemplateKind, ThreadMode, Waveform,
};

fn machine(engine: &Engine, steps: &[usize], master: bool) -> AudioId {
    let audio = engine.create_audio();
    engine.resize_pads(audio, Direction::Input, 1, 0).unwrap();
    engine.resize_pads(audio, Direction::Output, 1, 0).unwrap();
    engine
        .add_recall(ScopeRef::Audio(audio), TemplateKind::Counter, vec![])
        .unwrap();
    if !steps.is_empty() {
        let note = Note::new(440.0, 1500).with_waveform(Waveform::Square);
        engine
            .add_recall(
                ScopeRef::Audio(audio),
                TemplateKind::Pattern(PatternData::new(16).with_row(0, steps, note)),
                vec![],
            )
            .unwrap();
    }
    let channels: Vec<ChannelRef> = engine
        .inspect(audio, |rt| {
            (0..rt.audio_channels)
                .filter_map(|c| rt.channel_at(Direction::Input, 0, c))
                .map(|channel| ChannelRef { audio, channel })
                .collect()
        })
        .unwrap();
    for channel in channels {
        engine
            .add_recall(ScopeRef::Recycling(channel), TemplateKind::Stream, vec![])
            .unwrap();
    }
    engine
        .add_recall(ScopeRef::Audio(audio), TemplateKind::Output { master }, vec![])
        .unwrap();
    audio
}

/// Wait for the pump to hand the runtimes back (offline budget drained).
fn wait_idle(engine: &Engine, audio: AudioId) {
    for _ in 0..2000 {
        if engine.inspect(audio, |_| ()).is_ok() {
            return;
        }
        sleep(Duration::from_millis(2));
    }
    panic!("playback never returned the runtimes");
}

#[test]
fn test_scenario_beat_counts_at_120_bpm() {
    // 120 bpm, 44100 Hz, 1024 frames: one beat per ~21.5 tics. Over 22
    // tics exactly one beat fires; over 44, exactly two.
    for (budget, expected) in [(22u64, 1usize), (44, 2)] {
        let (engine, _tap) = Engine::offline(EngineConfig::default(), Some(budget)).unwrap();
        let audio = machine(&engine, &[], true);
        engine.start_playback(audio, SoundScope::Sequencer).unwrap();
        wait_idle(&engine, audio);

        let (tics, beats) = engine
            .inspect(audio, |rt| (rt.stats.tics, rt.stats.beats.clone()))
            .unwrap();
        assert_eq!(tics, budget);
        assert_eq!(beats.len(), expected, "beats fired over {budget} tics");
    }
}

#[test]
fn test_beat_sequence_identical_across_thread_modes() {
    let run = |mode: ThreadMode| -> Vec<u64> {
        let config = EngineConfig::default().with_thread_mode(mode);
        let (engine, _tap) = Engine::offline(config, Some(200)).unwrap();
        let audio = machine(&engine, &[0, 4, 8, 12], true);
        engine.start_playback(audio, SoundScope::Sequencer).unwrap();
        wait_idle(&engine, audio);
        engine.inspect(audio, |rt| rt.stats.beats.clone()).unwrap()
    };

    let single = run(ThreadMode::Single);
    let super_threaded = run(ThreadMode::SuperThreaded);
    assert!(!single.is_empty());
    assert_eq!(single, super_threaded, "beat-tic sequence must not depend on scheduling mode");
}

#[test]
fn test_structural_mutation_while_playing_is_lock_contention() {
    let (engine, _tap) = Engine::offline(EngineConfig::default(), None).unwrap();
    let audio = machine(&engine, &[0], true);
    let other = machine(&engine, &[], false);
    let (out_ref, in_ref) = {
        let out = engine
            .inspect(audio, |rt| rt.channel_at(Direction::Output, 0, 0).unwrap())
            .unwrap();
        let inp = engine
            .inspect(other, |rt| rt.channel_at(Direction::Input, 0, 0).unwrap())
            .unwrap();
        (
            ChannelRef { audio, channel: out },
            ChannelRef { audio: other, channel: inp },
        )
    };

    engine.start_playback(audio, SoundScope::Sequencer).unwrap();

    assert!(matches!(
        engine.resize_pads(audio, Direction::Input, 2, 1),
        Err(Error::LockContention)
    ));
    assert!(matches!(
        engine.resize_audio_channels(audio, 4, 2),
        Err(Error::LockContention)
    ));
    assert!(matches!(
        engine.add_recall(ScopeRef::Audio(audio), TemplateKind::Counter, vec![]),
        Err(Error::LockContention)
    ));
    assert!(matches!(
        engine.link_channel(out_ref, in_ref),
        Err(Error::LockContention)
    ));
    assert!(matches!(engine.inspect(audio, |_| ()), Err(Error::LockContention)));

    engine.stop_playback(audio).unwrap();
    wait_idle(&engine, audio);
    engine.resize_pads(audio, Direction::Input, 2, 1).unwrap();
    engine.link_channel(out_ref, in_ref).unwrap();

    // Stopping an idle audio stays a no-op.
    engine.stop_playback(audio).unwrap();
}

#[test]
fn test_resize_notifications_and_round_trip() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let events = engine.events();
    let audio = engine.create_audio();

    engine.resize_pads(audio, Direction::Input, 3, 0).unwrap();
    engine.resize_pads(audio, Direction::Output, 1, 0).unwrap();
    let before = engine.inspect(audio, |rt| rt.topology()).unwrap();

    engine.resize_audio_channels(audio, 5, 2).unwrap();
    engine.resize_audio_channels(audio, 2, 5).unwrap();
    let after = engine.inspect(audio, |rt| rt.topology()).unwrap();
    assert_eq!(before, after, "N -> M -> N restores the topology exactly");

    let received: Vec<EngineEvent> = events.try_iter().collect();
    let pads = received
        .iter()
        .filter(|e| matches!(e, EngineEvent::PadsResized { .. }))
        .count();
    let channels = received
        .iter()
        .filter(|e| matches!(e, EngineEvent::AudioChannelsResized { .. }))
        .count();
    assert_eq!(pads, 2);
    assert_eq!(channels, 2);
}

#[test]
fn test_shrink_below_recall_scope_rejected() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let audio = machine(&engine, &[], false);

    let err = engine
        .resize_pads(audio, Direction::Input, 0, 1)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Structural(StructuralError::ShrinkBelowRecallScope { .. })
    ));
    let pads = engine
        .inspect(audio, |rt| rt.pads(Direction::Input))
        .unwrap();
    assert_eq!(pads, 1, "rejected shrink left the graph untouched");
}

#[test]
fn test_notes_fire_and_reach_the_sink() {
    let (engine, mut tap) = Engine::offline(EngineConfig::default(), Some(60)).unwrap();
    let events = engine.events();
    let audio = machine(&engine, &[0, 1, 2, 3], true);
    engine.start_playback(audio, SoundScope::Sequencer).unwrap();
    wait_idle(&engine, audio);

    let notes = events
        .try_iter()
        .filter(|e| matches!(e, EngineEvent::NoteFired { .. }))
        .count();
    assert!(notes >= 1, "sequencer fired at least one note");

    let rendered = tap.drain();
    assert!(
        rendered.iter().any(|s| s.abs() > 1e-6),
        "sink received non-silent frames"
    );
}

#[test]
fn test_playback_snapshot_progresses() {
    let (engine, _tap) = Engine::offline(EngineConfig::default(), None).unwrap();
    let audio = machine(&engine, &[], true);
    engine.start_playback(audio, SoundScope::Sequencer).unwrap();

    let mut observed = 0;
    for _ in 0..2000 {
        if let Some(snapshot) = engine.playback_snapshot(audio) {
            observed = snapshot.tic;
            if observed >= 3 {
                break;
            }
        }
        sleep(Duration::from_millis(2));
    }
    assert!(observed >= 3, "snapshot advanced with the tic clock");

    engine.stop_playback(audio).unwrap();
    wait_idle(&engine, audio);
}

#[test]
fn test_concurrent_passes_share_a_strand() {
    let (engine, _tap) = Engine::offline(EngineConfig::default(), None).unwrap();
    let audio = machine(&engine, &[0], true);
    engine.start_playback(audio, SoundScope::Sequencer).unwrap();
    // A second pass over the same strand joins instead of failing.
    engine.start_playback(audio, SoundScope::Notation).unwrap();

    let mut passes = 0;
    for _ in 0..2000 {
        if let Some(snapshot) = engine.playback_snapshot(audio) {
            passes = snapshot.passes;
            if passes == 2 {
                break;
            }
        }
        sleep(Duration::from_millis(2));
    }
    assert_eq!(passes, 2);

    engine.stop_playback(audio).unwrap();
    wait_idle(&engine, audio);
}

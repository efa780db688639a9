//! Engine facade consumed by the UI/session layer.
//!
//! Structural operations (create, resize, link, add-recall) mutate the
//! graph under the engine lock and fail with `LockContention` when the
//! target audio's subtree is checked out by an active playback pass.
//! Playback control hands strands of runtimes to the tic pump and takes
//! them back on stop.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF64;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::context::SoundScope;
use crate::error::{Error, Result, StructuralError};
use crate::graph::{
    AudioEntry, AudioId, AudioRuntime, ChannelRef, Direction, Graph, Strand,
};
use crate::notify::{EngineEvent, Notifier};
use crate::recall::template::{DependencyDescriptor, ScopeRef, TemplateId, TemplateKind};
use crate::scheduler::driver::{Driver, PlaybackSnapshot};
use crate::scheduler::threads::{PumpCommand, TicPump};
use crate::soundcard::{OfflineSoundcard, OfflineTap, Soundcard, SoundcardPreset};

pub struct Engine {
    config: EngineConfig,
    graph: Arc<Mutex<Graph>>,
    bpm: Arc<AtomicF64>,
    notifier: Notifier,
    events: Receiver<EngineEvent>,
    pump: TicPump,
    snapshots: Mutex<HashMap<AudioId, Arc<ArcSwap<PlaybackSnapshot>>>>,
}

impl Engine {
    /// Engine over a caller-provided soundcard backend.
    pub fn with_soundcard(config: EngineConfig, sink: Box<dyn Soundcard>) -> Result<Self> {
        config.validate()?;
        let graph = Arc::new(Mutex::new(Graph::new()));
        let (notifier, events) = Notifier::channel();
        let pump = TicPump::spawn(config.thread_mode, sink, Arc::clone(&graph));
        Ok(Self {
            bpm: Arc::new(AtomicF64::new(config.bpm)),
            config,
            graph,
            notifier,
            events,
            pump,
            snapshots: Mutex::new(HashMap::new()),
        })
    }

    /// Engine over the bundled offline soundcard; the tap receives the
    /// rendered master frames. A budget of `Some(n)` closes the stream
    /// after `n` tics.
    pub fn offline(config: EngineConfig, tic_budget: Option<u64>) -> Result<(Self, OfflineTap)> {
        let preset = SoundcardPreset {
            samplerate: config.samplerate,
            buffer_size: config.buffer_size,
            format: config.format,
            channels: config.audio_channels,
        };
        let (card, tap) = OfflineSoundcard::new(preset, tic_budget);
        Ok((Self::with_soundcard(config, Box::new(card))?, tap))
    }

    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::offline(config, None).map(|(engine, _tap)| engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Notification stream. One consumer is expected.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    pub fn bpm(&self) -> f64 {
        self.bpm.load(Ordering::Relaxed)
    }

    /// Takes effect on the clocks at their next tic.
    pub fn set_bpm(&self, bpm: f64) {
        self.bpm.store(bpm, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------
    // Structural operations
    // -----------------------------------------------------------------

    pub fn create_audio(&self) -> AudioId {
        let mut graph = self.graph.lock();
        let id = graph.audios.insert(AudioEntry { runtime: None });
        let runtime = AudioRuntime::new(id, &self.config);
        if let Some(entry) = graph.audios.get_mut(id) {
            entry.runtime = Some(runtime);
        }
        tracing::debug!(audio = ?id, "created audio");
        id
    }

    fn with_runtime<R>(
        &self,
        audio: AudioId,
        f: impl FnOnce(&mut AudioRuntime) -> Result<R>,
    ) -> Result<R> {
        let mut graph = self.graph.lock();
        let entry = graph
            .audios
            .get_mut(audio)
            .ok_or(StructuralError::StaleHandle("audio"))?;
        let runtime = entry.runtime.as_mut().ok_or(Error::LockContention)?;
        f(runtime)
    }

    pub fn resize_pads(
        &self,
        audio: AudioId,
        direction: Direction,
        new: usize,
        old: usize,
    ) -> Result<()> {
        self.with_runtime(audio, |runtime| {
            runtime
                .resize_pads(direction, new, old, &self.config)
                .map_err(Error::from)
        })?;
        self.notifier.send(EngineEvent::PadsResized {
            audio,
            direction,
            old,
            new,
        });
        Ok(())
    }

    pub fn resize_audio_channels(&self, audio: AudioId, new: usize, old: usize) -> Result<()> {
        self.with_runtime(audio, |runtime| {
            runtime
                .resize_audio_channels(new, old, &self.config)
                .map_err(Error::from)
        })?;
        self.notifier.send(EngineEvent::AudioChannelsResized { audio, old, new });
        Ok(())
    }

    /// Register a recall template on a scope object.
    pub fn add_recall(
        &self,
        scope: ScopeRef,
        kind: TemplateKind,
        extra_deps: Vec<DependencyDescriptor>,
    ) -> Result<TemplateId> {
        let audio = scope.audio();
        self.with_runtime(audio, |runtime| {
            if let Some(channel_ref) = scope.channel() {
                if channel_ref.audio != audio {
                    return Err(StructuralError::ForeignScope.into());
                }
                if runtime.channel(channel_ref.channel).is_none() {
                    return Err(StructuralError::StaleHandle("channel").into());
                }
            }
            runtime
                .templates
                .register(kind, scope, extra_deps)
                .map_err(Error::from)
        })
    }

    /// Link two channels of opposite direction, forming a shared
    /// recycling range across the audios.
    pub fn link_channel(&self, a: ChannelRef, b: ChannelRef) -> Result<()> {
        let mut graph = self.graph.lock();
        for audio in [a.audio, b.audio] {
            if !graph.audios.contains(audio) {
                return Err(StructuralError::StaleHandle("audio").into());
            }
            if graph.is_checked_out(audio) {
                return Err(Error::LockContention);
            }
        }

        let side = |graph: &Graph, c: ChannelRef| {
            graph
                .runtime(c.audio)
                .and_then(|rt| rt.channel(c.channel))
                .map(|ch| (ch.direction, ch.link))
        };
        let (dir_a, link_a) =
            side(&graph, a).ok_or(StructuralError::StaleHandle("channel"))?;
        let (dir_b, link_b) =
            side(&graph, b).ok_or(StructuralError::StaleHandle("channel"))?;
        if dir_a == dir_b {
            return Err(StructuralError::LinkDirection.into());
        }
        if link_a.is_some() || link_b.is_some() {
            return Err(StructuralError::AlreadyLinked.into());
        }

        if let Some(channel) = graph.runtime_mut(a.audio).and_then(|rt| rt.channel_mut(a.channel)) {
            channel.link = Some(b);
        }
        if let Some(channel) = graph.runtime_mut(b.audio).and_then(|rt| rt.channel_mut(b.channel)) {
            channel.link = Some(a);
        }
        tracing::debug!(?a, ?b, "linked channels");
        Ok(())
    }

    pub fn unlink_channel(&self, a: ChannelRef) -> Result<()> {
        let mut graph = self.graph.lock();
        if !graph.audios.contains(a.audio) {
            return Err(StructuralError::StaleHandle("audio").into());
        }
        if graph.is_checked_out(a.audio) {
            return Err(Error::LockContention);
        }
        let peer = graph
            .runtime(a.audio)
            .and_then(|rt| rt.channel(a.channel))
            .ok_or(StructuralError::StaleHandle("channel"))?
            .link
            .ok_or(StructuralError::NotLinked)?;
        if graph.is_checked_out(peer.audio) {
            return Err(Error::LockContention);
        }
        if let Some(channel) = graph.runtime_mut(a.audio).and_then(|rt| rt.channel_mut(a.channel)) {
            channel.link = None;
        }
        if let Some(channel) = graph
            .runtime_mut(peer.audio)
            .and_then(|rt| rt.channel_mut(peer.channel))
        {
            channel.link = None;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Playback control
    // -----------------------------------------------------------------

    /// Start a playback pass over the audio's strand (the audio plus
    /// every audio reachable through channel links). If the strand is
    /// already playing, an additional concurrent pass joins it.
    pub fn start_playback(&self, audio: AudioId, scope: SoundScope) -> Result<()> {
        let command = {
            let mut graph = self.graph.lock();
            if !graph.audios.contains(audio) {
                return Err(StructuralError::StaleHandle("audio").into());
            }
            if graph.is_checked_out(audio) {
                PumpCommand::AddPass { audio, scope }
            } else {
                let members = strand_members(&graph, audio);
                if members.iter().any(|m| graph.is_checked_out(*m)) {
                    return Err(Error::LockContention);
                }
                let ordered = topo_order(&graph, &members);
                let mut taken = Vec::with_capacity(ordered.len());
                for id in ordered {
                    if let Some(runtime) =
                        graph.audios.get_mut(id).and_then(|e| e.runtime.take())
                    {
                        taken.push((id, runtime));
                    }
                }
                let mut driver = Driver::new(
                    Strand::new(taken),
                    self.config.clone(),
                    self.notifier.clone(),
                    Arc::clone(&self.bpm),
                );
                driver.begin_pass(scope);

                let snapshot = driver.snapshot_handle();
                let mut snapshots = self.snapshots.lock();
                for member in &members {
                    snapshots.insert(*member, Arc::clone(&snapshot));
                }
                PumpCommand::AddStrand(Box::new(driver))
            }
        };

        if let Err(lost) = self.pump.send(command) {
            // The soundcard stream closed; put any runtimes we took back.
            if let PumpCommand::AddStrand(driver) = lost {
                let strand = driver.into_strand();
                let mut graph = self.graph.lock();
                for (id, runtime) in strand.into_inner() {
                    if let Some(entry) = graph.audios.get_mut(id) {
                        entry.runtime = Some(runtime);
                    }
                }
            }
            return Err(Error::SoundcardClosed);
        }
        Ok(())
    }

    /// Stop the strand the audio plays in. Idempotent: stopping an idle
    /// audio is a no-op.
    pub fn stop_playback(&self, audio: AudioId) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if self
            .pump
            .send(PumpCommand::Stop {
                audio,
                reply: reply_tx,
            })
            .is_err()
        {
            // Pump already wound down and reinstalled every runtime.
            return Ok(());
        }
        let _ = reply_rx.recv();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    /// Short-lived shared read of an idle audio's runtime. While the
    /// audio plays, use [`Engine::playback_snapshot`] instead.
    pub fn inspect<R>(&self, audio: AudioId, f: impl FnOnce(&AudioRuntime) -> R) -> Result<R> {
        let graph = self.graph.lock();
        if !graph.audios.contains(audio) {
            return Err(StructuralError::StaleHandle("audio").into());
        }
        match graph.runtime(audio) {
            Some(runtime) => Ok(f(runtime)),
            None => Err(Error::LockContention),
        }
    }

    /// Lock-free view of the audio's playback progress, refreshed once
    /// per tic.
    pub fn playback_snapshot(&self, audio: AudioId) -> Option<Arc<PlaybackSnapshot>> {
        self.snapshots.lock().get(&audio).map(|s| s.load_full())
    }
}

/// Every audio reachable from `audio` over channel links.
fn strand_members(graph: &Graph, audio: AudioId) -> Vec<AudioId> {
    let mut members = vec![audio];
    let mut queue = vec![audio];
    while let Some(current) = queue.pop() {
        let Some(runtime) = graph.runtime(current) else {
            continue;
        };
        for direction in [Direction::Input, Direction::Output] {
            for id in runtime.channel_ids(direction) {
                if let Some(peer) = runtime.channel(*id).and_then(|c| c.link) {
                    if !members.contains(&peer.audio) {
                        members.push(peer.audio);
                        queue.push(peer.audio);
                    }
                }
            }
        }
    }
    members
}

/// Upstream-first order: an audio whose output channels link into another
/// member comes before it. Feedback link cycles fall back to discovery
/// order.
fn topo_order(graph: &Graph, members: &[AudioId]) -> Vec<AudioId> {
    let mut edges: Vec<(AudioId, AudioId)> = Vec::new();
    for member in members {
        let Some(runtime) = graph.runtime(*member) else {
            continue;
        };
        for id in runtime.channel_ids(Direction::Output) {
            if let Some(peer) = runtime.channel(*id).and_then(|c| c.link) {
                if peer.audio != *member && members.contains(&peer.audio) {
                    edges.push((*member, peer.audio));
                }
            }
        }
    }

    let mut ordered = Vec::with_capacity(members.len());
    let mut remaining: Vec<AudioId> = members.to_vec();
    while !remaining.is_empty() {
        let position = remaining.iter().position(|candidate| {
            !edges
                .iter()
                .any(|(from, to)| to == candidate && remaining.contains(from))
        });
        match position {
            Some(position) => ordered.push(remaining.remove(position)),
            None => {
                tracing::warn!("feedback link cycle; falling back to discovery order");
                ordered.append(&mut remaining);
            }
        }
    }
    ordered
}

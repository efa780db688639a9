//! Bulk constructors for the persistence layer.
//!
//! The session layer serializes the graph shape into these specs; a load
//! rebuilds the whole graph through the engine facade, then a resolve
//! pass fixes forward references: links naming audios that appear later
//! in the file, and recalls depending on templates listed after them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{Error, Result, StructuralError};
use crate::graph::{AudioId, ChannelRef, Direction};
use crate::recall::template::{NotationData, PatternData, ScopeRef, TemplateKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    pub audios: Vec<AudioSpec>,
    /// Resolved after every audio exists, so either end may reference an
    /// audio declared later.
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSpec {
    pub name: String,
    pub input_pads: usize,
    pub output_pads: usize,
    #[serde(default)]
    pub recalls: Vec<RecallSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub audio: String,
    pub direction: Direction,
    pub pad: usize,
    pub audio_channel: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: PortSpec,
    pub to: PortSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecallKindSpec {
    Counter,
    Pattern(PatternData),
    Notation(NotationData),
    Stream,
    Output { master: bool },
}

impl RecallKindSpec {
    fn into_kind(self) -> TemplateKind {
        match self {
            RecallKindSpec::Counter => TemplateKind::Counter,
            RecallKindSpec::Pattern(data) => TemplateKind::Pattern(data),
            RecallKindSpec::Notation(data) => TemplateKind::Notation(data),
            RecallKindSpec::Stream => TemplateKind::Stream,
            RecallKindSpec::Output { master } => TemplateKind::Output { master },
        }
    }

    /// Registration order satisfying the default dependency edges no
    /// matter how the file orders its recalls.
    fn registration_rank(&self) -> u8 {
        match self {
            RecallKindSpec::Counter => 0,
            RecallKindSpec::Stream => 1,
            RecallKindSpec::Pattern(_) | RecallKindSpec::Notation(_) => 2,
            RecallKindSpec::Output { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScopeSpec {
    Audio,
    Channel {
        direction: Direction,
        pad: usize,
        audio_channel: usize,
    },
    Recycling {
        direction: Direction,
        pad: usize,
        audio_channel: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallSpec {
    pub scope: ScopeSpec,
    pub kind: RecallKindSpec,
}

/// Rebuild the whole graph from a spec. Returns the name -> audio map.
pub fn build(engine: &Engine, spec: &GraphSpec) -> Result<HashMap<String, AudioId>> {
    let mut ids: HashMap<String, AudioId> = HashMap::new();

    for audio_spec in &spec.audios {
        if ids.contains_key(&audio_spec.name) {
            return Err(Error::UnknownReference(format!(
                "duplicate audio name `{}`",
                audio_spec.name
            )));
        }
        let id = engine.create_audio();
        engine.resize_pads(id, Direction::Input, audio_spec.input_pads, 0)?;
        engine.resize_pads(id, Direction::Output, audio_spec.output_pads, 0)?;
        ids.insert(audio_spec.name.clone(), id);

        let mut recalls: Vec<&RecallSpec> = audio_spec.recalls.iter().collect();
        recalls.sort_by_key(|r| r.kind.registration_rank());
        for recall in recalls {
            let scope = resolve_scope(engine, id, &recall.scope)?;
            engine.add_recall(scope, recall.kind.clone().into_kind(), Vec::new())?;
        }
    }

    for link in &spec.links {
        let from = resolve_port(engine, &ids, &link.from)?;
        let to = resolve_port(engine, &ids, &link.to)?;
        engine.link_channel(from, to)?;
    }

    Ok(ids)
}

fn resolve_scope(engine: &Engine, audio: AudioId, scope: &ScopeSpec) -> Result<ScopeRef> {
    let channel_ref = |direction, pad, audio_channel| -> Result<ChannelRef> {
        let channel = engine
            .inspect(audio, |rt| rt.channel_at(direction, pad, audio_channel))?
            .ok_or(StructuralError::StaleHandle("channel"))?;
        Ok(ChannelRef { audio, channel })
    };
    Ok(match scope {
        ScopeSpec::Audio => ScopeRef::Audio(audio),
        ScopeSpec::Channel {
            direction,
            pad,
            audio_channel,
        } => ScopeRef::Channel(channel_ref(*direction, *pad, *audio_channel)?),
        ScopeSpec::Recycling {
            direction,
            pad,
            audio_channel,
        } => ScopeRef::Recycling(channel_ref(*direction, *pad, *audio_channel)?),
    })
}

fn resolve_port(
    engine: &Engine,
    ids: &HashMap<String, AudioId>,
    port: &PortSpec,
) -> Result<ChannelRef> {
    let audio = *ids
        .get(&port.audio)
        .ok_or_else(|| Error::UnknownReference(format!("unknown audio `{}`", port.audio)))?;
    let channel = engine
        .inspect(audio, |rt| {
            rt.channel_at(port.direction, port.pad, port.audio_channel)
        })?
        .ok_or(StructuralError::StaleHandle("channel"))?;
    Ok(ChannelRef { audio, channel })
}

/*!
The `song` module holds the canonical event stream that every input format is translated into.
Readers produce [`SongEvent`]s in file order; [`Song::sort`] imposes the chronological order the
engine depends on.
!*/

use crate::core::{Channel, NoteNumber, Program, Velocity};
use std::cmp::Ordering;

/// A single event in a song. `time` is measured in beats from the start of the song.
#[derive(Clone, Debug, PartialEq)]
pub struct SongEvent {
    /// The position of the event within the whole song. Reassigned by [`Song::sort`].
    pub index: usize,
    /// The zero-based track the event came from.
    pub track: u32,
    /// The time of the event from the start of the song, in beats.
    pub time: f64,
    /// The event channel. `None` for sysex and meta events.
    pub channel: Option<Channel>,
    pub kind: EventKind,
}

/// The payload of a [`SongEvent`].
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    NoteOff {
        note: NoteNumber,
        velocity: Velocity,
    },
    /// A velocity of zero means note-off.
    NoteOn {
        note: NoteNumber,
        velocity: Velocity,
    },
    PolyphonicKeyPressure {
        note: NoteNumber,
        pressure: u8,
    },
    ControllerChange {
        controller: u8,
        value: u8,
    },
    ProgramChange {
        program: Program,
    },
    ChannelKeyPressure {
        pressure: u8,
    },
    /// `amount` is normalized from the 14-bit wire value to -1.0..1.0 with 0 at the center.
    PitchBend {
        amount: f64,
    },
    SysexF0 {
        data: Vec<u8>,
    },
    SysexF7 {
        data: Vec<u8>,
    },
    Meta(MetaKind),
}

impl EventKind {
    /// The sort priority of the event type. At equal times, program changes must come first so
    /// that the notes which follow them use the right patch, then controller changes (volume),
    /// then pitch bends, then note-offs before note-ons.
    fn type_order(&self) -> u8 {
        match self {
            EventKind::ProgramChange { .. } => 1,
            EventKind::ControllerChange { .. } => 2,
            EventKind::NoteOff { .. } => 10,
            EventKind::PitchBend { .. } => 30,
            EventKind::PolyphonicKeyPressure { .. } => 40,
            EventKind::ChannelKeyPressure { .. } => 50,
            EventKind::NoteOn { .. } => 100,
            _ => 0,
        }
    }
}

/// The meta events found in MIDI files. Only `SetTempo` and `EndOfTrack` affect conversion; the
/// rest are carried for informational handlers.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaKind {
    SequenceNumber(u16),
    Text { kind: TextKind, text: String },
    ChannelPrefix(Channel),
    Port(u8),
    EndOfTrack,
    SetTempo { bpm: f64 },
    SmpteOffset { hours: u8, minutes: u8, seconds: u8, frames: u8, fractional_frames: u8 },
    TimeSignature { numerator: u8, denominator: u16, clocks_per_click: u8, notated_32nds_per_beat: u8 },
    KeySignature { sharps_flats: i8, minor: bool },
    SequencerSpecific(Vec<u8>),
}

/// The flavors of text meta event (meta types 0x01 through 0x09).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextKind {
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
    ProgramName,
    DeviceName,
}

/// Orders events by time, then type priority, then channel (non-channel events first), then
/// track, then original index. `time` values are always finite.
fn event_order(a: &SongEvent, b: &SongEvent) -> Ordering {
    a.time
        .partial_cmp(&b.time)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.kind.type_order().cmp(&b.kind.type_order()))
        .then_with(|| channel_rank(a).cmp(&channel_rank(b)))
        .then_with(|| a.track.cmp(&b.track))
        .then_with(|| a.index.cmp(&b.index))
}

fn channel_rank(event: &SongEvent) -> i16 {
    match event.channel {
        None => -1,
        Some(channel) => i16::from(channel.get()),
    }
}

/// An input song: the event stream plus the per-format facts the engine needs.
#[derive(Clone, Debug)]
pub struct Song {
    events: Vec<SongEvent>,
    percussion_channel: Channel,
    default_pitch_bend_sensitivity: f64,
}

impl Song {
    pub(crate) fn new(percussion_channel: Channel) -> Self {
        Self {
            events: Vec::new(),
            percussion_channel,
            default_pitch_bend_sensitivity: 2.0,
        }
    }

    /// Appends an event, assigning it the next index.
    pub(crate) fn push(&mut self, track: u32, time: f64, channel: Option<Channel>, kind: EventKind) {
        debug_assert!(time.is_finite() && time >= 0.0);
        let index = self.events.len();
        self.events.push(SongEvent {
            index,
            track,
            time,
            channel,
            kind,
        });
    }

    /// Sorts the song events into chronological order and reassigns event indices.
    pub fn sort(&mut self) {
        self.events.sort_by(event_order);
        for (index, event) in self.events.iter_mut().enumerate() {
            event.index = index;
        }
    }

    pub fn events(&self) -> &[SongEvent] {
        &self.events
    }

    /// The channel reserved for percussion in this song's source format (9 for MIDI, 15 for MUS).
    pub fn percussion_channel(&self) -> Channel {
        self.percussion_channel
    }

    /// The pitch-bend range, in semitones, that channels start out with.
    pub fn default_pitch_bend_sensitivity(&self) -> f64 {
        self.default_pitch_bend_sensitivity
    }

    /// The time of the last event, in beats.
    pub fn last_time(&self) -> f64 {
        self.events
            .iter()
            .fold(0.0, |acc, event| acc.max(event.time))
    }
}

/*!
The `convert` module turns the engine's derived events into a compact OPL register command
stream. It owns the nine-channel voice allocator, the block/F-number pitch math, the volume
curve, and the register shadow that keeps the output minimal.
!*/

use crate::adlib::{
    Instrument, BLOCK_FREQ_NOTE_MAP, BLOCK_REG, CARRIER_OFFSETS, DRUM_REG, FREQ_REG, KEY_ON_MASK,
    MODULATOR_OFFSETS, OPL_CHANNELS, VOLUME_REG,
};
use crate::engine::{
    ActiveNote, BendEvent, ControllerEvent, EventSink, MidiChannelState, MidiEngine, NoteEvent,
};
use crate::file::{AdlibSong, ImfCommand, ImfFileType};
use crate::instruments::{InstrumentCatalog, InstrumentId, InstrumentKind};
use log::{debug, warn};

use crate::core::controllers;

/// The Doom volume curve: MIDI volume 0..127 to a perceptual 0..127.
const VOLUME_TABLE: [u8; 128] = [
    0, 1, 3, 5, 6, 8, 10, 11,
    13, 14, 16, 17, 19, 20, 22, 23,
    25, 26, 27, 29, 30, 32, 33, 34,
    36, 37, 39, 41, 43, 45, 47, 49,
    50, 52, 54, 55, 57, 59, 60, 61,
    63, 64, 66, 67, 68, 69, 71, 72,
    73, 74, 75, 76, 77, 79, 80, 81,
    82, 83, 84, 84, 85, 86, 87, 88,
    89, 90, 91, 92, 92, 93, 94, 95,
    96, 96, 97, 98, 99, 99, 100, 101,
    101, 102, 103, 103, 104, 105, 105, 106,
    107, 107, 108, 109, 109, 110, 110, 111,
    112, 112, 113, 113, 114, 114, 115, 115,
    116, 117, 117, 118, 118, 119, 119, 120,
    120, 121, 121, 122, 122, 123, 123, 123,
    124, 124, 125, 125, 126, 126, 127, 127,
];

/// Only the primary voice is played; the pseudo-4op secondary voice is an extension point.
const VOICE: usize = 0;

/// One OPL channel's allocation state. Created once, never destroyed.
#[derive(Clone, Copy, Debug, Default)]
struct ImfChannelState {
    /// The instrument whose registers are currently programmed on this channel.
    instrument: Option<InstrumentId>,
    /// The adjusted note currently keyed on, if any.
    last_note: Option<u8>,
}

/// Accumulates OPL commands while a [`MidiEngine`] drives it, then finishes into an
/// [`AdlibSong`].
pub struct ImfSongBuilder<'a> {
    catalog: &'a InstrumentCatalog,
    filetype: ImfFileType,
    commands: Vec<ImfCommand>,
    /// The last value written to each register; writes that would repeat it are dropped.
    regs: [Option<u8>; 256],
    channels: [ImfChannelState; OPL_CHANNELS],
    // Tempo and delay accounting. Ticks are anchored at the last tempo change so that rounding
    // cannot drift across changes.
    ticks_per_beat: f64,
    tempo_start_time: f64,
    tempo_start_ticks: i64,
    last_command_ticks: i64,
}

impl<'a> ImfSongBuilder<'a> {
    pub fn new(catalog: &'a InstrumentCatalog, filetype: ImfFileType) -> Self {
        let mut builder = Self {
            catalog,
            filetype,
            // Every IMF stream starts with these three writes.
            commands: vec![(0, 0, 0), (DRUM_REG, 0, 0), (0x08, 0, 0)],
            regs: [None; 256],
            channels: [ImfChannelState::default(); OPL_CHANNELS],
            ticks_per_beat: 0.0,
            tempo_start_time: 0.0,
            tempo_start_ticks: 0,
            last_command_ticks: 0,
        };
        // An arbitrary default in case the song never sets one.
        builder.set_tempo(0.0, 120.0);
        builder
    }

    /// Checks for dangling notes and hands over the finished command stream.
    pub fn finish(self, engine: &MidiEngine) -> AdlibSong {
        for channel in engine.channels() {
            if !channel.active_notes().is_empty() {
                warn!(
                    "midi channel {} had open notes: {:?}",
                    channel.number(),
                    channel.active_notes()
                );
            }
        }
        for (number, channel) in self.channels.iter().enumerate() {
            if let Some(note) = channel.last_note {
                warn!("imf channel {} had an open note: {}", number, note);
            }
        }
        AdlibSong::new(self.filetype, self.commands)
    }

    fn set_tempo(&mut self, time: f64, bpm: f64) {
        let bpm = if bpm > 0.0 { bpm } else { 120.0 };
        self.tempo_start_ticks = self.current_ticks(time);
        self.ticks_per_beat = f64::from(self.filetype.ticks_per_second()) * (60.0 / bpm);
        self.tempo_start_time = time;
    }

    fn current_ticks(&self, time: f64) -> i64 {
        (self.ticks_per_beat * (time - self.tempo_start_time)).floor() as i64
            + self.tempo_start_ticks
    }

    /// Stores the time elapsed since the previous command group in the delay field of the
    /// command at `index`.
    fn add_delay(&mut self, time: f64, index: usize) {
        let ticks = self.current_ticks(time);
        let delta = ticks - self.last_command_ticks;
        let delay = if delta < 0 {
            0
        } else if delta > i64::from(u16::MAX) {
            warn!("delay of {} ticks exceeds the imf format maximum", delta);
            u16::MAX
        } else {
            delta as u16
        };
        self.commands[index].2 = delay;
        self.last_command_ticks = ticks;
    }

    /// Appends a register write unless the register already holds the value.
    fn add_command(&mut self, reg: u8, value: u8) {
        if self.regs[reg as usize] == Some(value) {
            return;
        }
        self.regs[reg as usize] = Some(value);
        self.commands.push((reg, value, 0));
    }

    /// Appends a group of register writes and charges the elapsed time to the command preceding
    /// the group.
    fn add_commands<I>(&mut self, time: f64, commands: I)
    where
        I: IntoIterator<Item = (u8, u8)>,
    {
        let old_len = self.commands.len();
        for (reg, value) in commands {
            self.add_command(reg, value);
        }
        if self.commands.len() != old_len {
            self.add_delay(time, old_len - 1);
        }
    }

    /// Finds an OPL channel for a new note: first a channel already programmed with this
    /// instrument and idle, then any idle channel. Returns `None` when all nine are sounding
    /// (the note is dropped; aggressive stealing is not implemented).
    fn find_channel(&self, instrument: InstrumentId) -> Option<usize> {
        self.channels
            .iter()
            .position(|ch| ch.instrument == Some(instrument) && ch.last_note.is_none())
            .or_else(|| self.channels.iter().position(|ch| ch.last_note.is_none()))
    }

    fn find_channel_for_note(&self, instrument: InstrumentId, note: u8) -> Option<usize> {
        self.channels.iter().position(|ch| {
            ch.instrument == Some(instrument) && ch.last_note == Some(note)
        })
    }

    /// Resolves the instrument a channel event addresses: the drum patch for the note on
    /// percussion channels, the channel's program otherwise.
    fn lookup_instrument(
        &self,
        channel: &mut MidiChannelState,
        percussion: bool,
        note: u8,
    ) -> Option<(InstrumentId, &'a Instrument)> {
        let catalog = self.catalog;
        if percussion {
            catalog.get(InstrumentKind::Percussion, channel.bank(), note)
        } else {
            let program = channel.program_or_default();
            catalog.get(InstrumentKind::Melodic, channel.bank(), program.get())
        }
    }

    /// The two `0x40`-class register writes that set a playing note's level. For additive
    /// (AM) voices both operators carry the volume; for FM voices only the carrier does, while
    /// the modulator is shaped by the brightness controller.
    fn volume_commands(
        opl_channel: usize,
        instrument: &Instrument,
        channel: &MidiChannelState,
        velocity: u8,
    ) -> [(u8, u8); 2] {
        let voice = &instrument.voices[VOICE];
        let midi_volume = (channel.volume() * channel.expression() * f64::from(velocity))
            .round()
            .max(0.0)
            .min(127.0) as usize;
        let volume = VOLUME_TABLE[midi_volume];

        let brightness_cc = channel.controller(controllers::BRIGHTNESS);
        let midi_brightness = if brightness_cc >= 64 {
            127
        } else {
            brightness_cc * 2
        };

        let operator_volume = |output_level: u8| -> u8 {
            let n = u32::from(0x3f - (output_level & 0x3f));
            let scaled = (n * u32::from(volume / 2)) >> 6;
            0x3f - scaled as u8
        };
        let operator_brightness = |output_level: u8| -> u8 {
            if midi_brightness == 127 {
                return output_level & 0x3f;
            }
            let n = u32::from(0x3f - (output_level & 0x3f));
            let brightness =
                ((127.0 * (f64::from(midi_brightness) / 127.0).sqrt()).round() as u32) / 2;
            let scaled = (n * brightness) >> 6;
            0x3f - scaled as u8
        };

        let modulator_level = if voice.is_additive() {
            operator_volume(voice.modulator.ksl_output)
        } else {
            operator_brightness(voice.modulator.ksl_output)
        };
        let carrier_level = operator_volume(voice.carrier.ksl_output);
        [
            (
                VOLUME_REG | MODULATOR_OFFSETS[opl_channel],
                modulator_level | (voice.modulator.key_scale_level() << 6),
            ),
            (
                VOLUME_REG | CARRIER_OFFSETS[opl_channel],
                carrier_level | (voice.carrier.key_scale_level() << 6),
            ),
        ]
    }

    /// Looks up the note's block and F-number, then adjusts the F-number for the current pitch
    /// bend (in semitones) by interpolating toward the bend target's table entry.
    ///
    /// The octave handling leans on the table layout: F# sits near the top of the 1023 limit
    /// while G is in the middle at 517, so a bend that crosses the F#/G line is computed in the
    /// range below G. Each block increment halves the F-number, losing a little precision.
    fn block_and_freq(note: u8, scaled_pitch_bend: f64) -> (u8, u16) {
        let mut index = usize::from(note);
        while index >= BLOCK_FREQ_NOTE_MAP.len() {
            index -= 12;
        }
        let (mut block, freq) = BLOCK_FREQ_NOTE_MAP[index];
        let mut freq = f64::from(freq);
        if scaled_pitch_bend != 0.0 {
            let semitones = if scaled_pitch_bend < 0.0 {
                scaled_pitch_bend.floor()
            } else {
                scaled_pitch_bend.ceil()
            };
            let bend_index = (index as i64 + semitones as i64)
                .max(0)
                .min(BLOCK_FREQ_NOTE_MAP.len() as i64 - 1) as usize;
            let (bend_block, bend_freq) = BLOCK_FREQ_NOTE_MAP[bend_index];
            let mut bend_freq = f64::from(bend_freq);
            if scaled_pitch_bend < 0.0 {
                // The bend target sits in a lower block: lift its f-num into this note's block.
                if bend_block < block {
                    bend_freq /= f64::from(1u32 << (block - bend_block));
                }
            } else if bend_block > block {
                // The bend target sits in a higher block: move this note up to it.
                freq /= f64::from(1u32 << (bend_block - block));
                block = bend_block;
            }
            freq = (freq + (bend_freq - freq) * scaled_pitch_bend / semitones).trunc();
        }
        debug_assert!(block <= 7);
        debug_assert!((0.0..=1023.0).contains(&freq));
        (block, freq.max(0.0).min(1023.0) as u16)
    }

    /// The two channel registers that start (or re-pitch) a note.
    fn freq_commands(opl_channel: usize, block: u8, freq: u16, key_on: bool) -> [(u8, u8); 2] {
        let key = if key_on { KEY_ON_MASK } else { 0 };
        [
            (FREQ_REG | opl_channel as u8, (freq & 0xff) as u8),
            (
                BLOCK_REG | opl_channel as u8,
                key | (block << 2) | (freq >> 8) as u8,
            ),
        ]
    }
}

impl<'a> EventSink for ImfSongBuilder<'a> {
    fn note_on(&mut self, event: &NoteEvent, channel: &mut MidiChannelState, percussion: bool) {
        let (id, instrument) = match self.lookup_instrument(channel, percussion, event.note) {
            Some(found) => found,
            None => return,
        };
        let adjusted_note = instrument.play_note(event.note, VOICE);
        if !percussion {
            channel.push_active_note(ActiveNote {
                given_note: event.note,
                velocity: event.velocity,
                adjusted_note,
            });
        }
        let opl_channel = match self.find_channel(id) {
            Some(opl_channel) => opl_channel,
            None => {
                debug!(
                    "no free OPL channel for channel {} note {}; dropping it",
                    event.channel, event.note
                );
                return;
            }
        };
        let mut commands: Vec<(u8, u8)> = Vec::new();
        if self.channels[opl_channel].instrument != Some(id) {
            // Program the new instrument, volume registers excluded; they follow from the
            // note's own level below.
            commands.extend_from_slice(&instrument.setup_commands(opl_channel, VOICE));
            self.channels[opl_channel].instrument = Some(id);
        }
        self.channels[opl_channel].last_note = Some(adjusted_note);
        let (block, freq) = Self::block_and_freq(adjusted_note, channel.scaled_pitch_bend());
        commands.extend_from_slice(&Self::volume_commands(
            opl_channel,
            instrument,
            channel,
            event.velocity,
        ));
        commands.extend_from_slice(&Self::freq_commands(opl_channel, block, freq, true));
        self.add_commands(event.time, commands);
    }

    fn note_off(&mut self, event: &NoteEvent, channel: &mut MidiChannelState, percussion: bool) {
        let (id, instrument) = match self.lookup_instrument(channel, percussion, event.note) {
            Some(found) => found,
            None => return,
        };
        let mut adjusted_note = instrument.play_note(event.note, VOICE);
        if !percussion {
            match channel.remove_active_note(event.note) {
                Some(active) => adjusted_note = active.adjusted_note,
                None => warn!(
                    "tried to release a note that is not playing: track {}, note {}",
                    event.track, event.note
                ),
            }
        }
        if let Some(opl_channel) = self.find_channel_for_note(id, adjusted_note) {
            self.channels[opl_channel].last_note = None;
            let reg = BLOCK_REG | opl_channel as u8;
            let value = self.regs[reg as usize].unwrap_or(0) & !KEY_ON_MASK;
            self.add_commands(event.time, vec![(reg, value)]);
        }
    }

    fn controller_change(
        &mut self,
        event: &ControllerEvent,
        channel: &mut MidiChannelState,
        percussion: bool,
    ) {
        if !matches!(
            event.controller,
            controllers::VOLUME_MSB | controllers::EXPRESSION_MSB | controllers::BRIGHTNESS
        ) {
            return;
        }
        // Sounding percussion cannot be re-leveled.
        if percussion || channel.active_notes().is_empty() {
            return;
        }
        let (id, instrument) = match self.lookup_instrument(channel, percussion, 0) {
            Some(found) => found,
            None => return,
        };
        let mut commands: Vec<(u8, u8)> = Vec::new();
        for active in channel.active_notes() {
            if let Some(opl_channel) = self.find_channel_for_note(id, active.adjusted_note) {
                commands.extend_from_slice(&Self::volume_commands(
                    opl_channel,
                    instrument,
                    channel,
                    active.velocity,
                ));
            }
        }
        self.add_commands(event.time, commands);
    }

    fn pitch_bend(&mut self, event: &BendEvent, channel: &mut MidiChannelState, percussion: bool) {
        // Percussion cannot bend.
        if percussion {
            return;
        }
        let (id, _) = match self.lookup_instrument(channel, percussion, 0) {
            Some(found) => found,
            None => return,
        };
        let bend = channel.scaled_pitch_bend();
        let notes: Vec<ActiveNote> = channel.active_notes().to_vec();
        for active in notes {
            match self.find_channel_for_note(id, active.adjusted_note) {
                Some(opl_channel) => {
                    let (block, freq) = Self::block_and_freq(active.adjusted_note, bend);
                    self.add_commands(
                        event.time,
                        Self::freq_commands(opl_channel, block, freq, true).to_vec(),
                    );
                }
                None => warn!(
                    "could not find an OPL channel for channel {} note {}",
                    event.channel, active.adjusted_note
                ),
            }
        }
    }

    fn tempo_change(&mut self, time: f64, bpm: f64) {
        self.set_tempo(time, bpm);
    }

    fn end_of_song(&mut self, time: f64) {
        let index = self.commands.len() - 1;
        self.add_delay(time, index);
    }
}

//! Reader for DMX MUS files (DOOM and other id Tech 1 games). MUS events are translated into the
//! same canonical stream the SMF reader produces: an initial 60 BPM tempo is inserted and event
//! times are scaled from the 140 Hz tick clock into beats, which makes one beat equal one second.

use crate::byte_iter::ByteIter;
use crate::core::{controllers, Channel, NoteNumber, Program, Velocity};
use crate::error::LibResult;
use crate::song::{EventKind, MetaKind, Song, TextKind};
use log::{trace, warn};
use snafu::ResultExt;
use std::io::Read;

const FORMAT: &str = "mus";

/// MUS reserves channel 15 for percussion.
const PERCUSSION_CHANNEL: u8 = 15;

/// MUS delta ticks run at 140 Hz.
const PLAYBACK_RATE: f64 = 140.0;

// Event types, packed into bits 4-6 of the event byte.
const EVENT_RELEASE_NOTE: u8 = 0;
const EVENT_PLAY_NOTE: u8 = 1;
const EVENT_PITCH_BEND: u8 = 2;
const EVENT_SYSTEM: u8 = 3;
const EVENT_CONTROLLER: u8 = 4;
const EVENT_END_OF_MEASURE: u8 = 5;
const EVENT_FINISH: u8 = 6;
const EVENT_UNUSED: u8 = 7;

/// Reads a MUS file after its `MUS\x1a` signature has been consumed by the signature dispatch.
pub(crate) fn read<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Song> {
    let song_length = iter.read_u16_le().context(io!())?;
    let song_offset = iter.read_u16_le().context(io!())?;
    // The rest of the header (channel counts, the instrument list) is not needed; skip straight
    // to the song data. Eight bytes have been consumed so far.
    if song_offset < 8 {
        invalid_format!(FORMAT, "song offset {} overlaps the header", song_offset);
    }
    iter.skip(u64::from(song_offset) - 8).context(io!())?;

    let mut song = Song::new(Channel::new(PERCUSSION_CHANNEL));
    song.push(
        0,
        0.0,
        None,
        EventKind::Meta(MetaKind::SetTempo { bpm: 60.0 }),
    );

    // PlayNote events without a volume byte reuse the channel's last volume.
    let mut channel_volume = [127u8; 16];
    let mut ticks: u64 = 0;
    let song_end = u64::from(song_offset) + u64::from(song_length);

    while iter.position() < song_end && !iter.is_end() {
        let event_byte = iter.read_or_die().context(io!())?;
        let has_delay = event_byte & 0x80 != 0;
        let event_type = (event_byte & 0x70) >> 4;
        let channel_number = event_byte & 0x0f;
        let channel = Channel::new(channel_number);
        let time = ticks as f64 / PLAYBACK_RATE;
        trace!("mus event type {} channel {} at {}", event_type, channel_number, time);
        match event_type {
            EVENT_RELEASE_NOTE => {
                let note = iter.read_or_die().context(io!())? & 0x7f;
                song.push(
                    0,
                    time,
                    Some(channel),
                    EventKind::NoteOff {
                        note: NoteNumber::new(note),
                        velocity: Velocity::new(127),
                    },
                );
            }
            EVENT_PLAY_NOTE => {
                let note_byte = iter.read_or_die().context(io!())?;
                let note = note_byte & 0x7f;
                if note_byte & 0x80 != 0 {
                    channel_volume[channel_number as usize] =
                        iter.read_or_die().context(io!())? & 0x7f;
                }
                song.push(
                    0,
                    time,
                    Some(channel),
                    EventKind::NoteOn {
                        note: NoteNumber::new(note),
                        velocity: Velocity::new(channel_volume[channel_number as usize]),
                    },
                );
            }
            EVENT_PITCH_BEND => {
                // 0x80 is centered and one whole step each way. The negative half divides by
                // 128 and the positive half by 127; DMX is asymmetric here and the one-step
                // discontinuity at zero is preserved as-is.
                let amount = i32::from(iter.read_or_die().context(io!())?) - 0x80;
                let amount = f64::from(amount) / if amount < 0 { 128.0 } else { 127.0 };
                song.push(0, time, Some(channel), EventKind::PitchBend { amount });
            }
            EVENT_SYSTEM => {
                let system = iter.read_or_die().context(io!())?;
                let controller = match system {
                    10 => Some(controllers::ALL_SOUND_OFF),
                    11 => Some(controllers::ALL_NOTES_OFF),
                    12 => Some(controllers::MONOPHONIC_MODE),
                    13 => Some(controllers::POLYPHONIC_MODE),
                    14 => Some(controllers::RESET_ALL_CONTROLLERS),
                    other => {
                        warn!("unrecognized mus system event {}", other);
                        None
                    }
                };
                if let Some(controller) = controller {
                    song.push(
                        0,
                        time,
                        Some(channel),
                        EventKind::ControllerChange {
                            controller,
                            value: 0,
                        },
                    );
                }
            }
            EVENT_CONTROLLER => {
                let controller = iter.read_or_die().context(io!())?;
                let value = iter.read_or_die().context(io!())? & 0x7f;
                if let Some(kind) = translate_controller(controller, value, channel) {
                    song.push(0, time, Some(channel), kind);
                }
            }
            EVENT_END_OF_MEASURE => {
                song.push(
                    0,
                    time,
                    None,
                    EventKind::Meta(MetaKind::Text {
                        kind: TextKind::Marker,
                        text: String::new(),
                    }),
                );
            }
            EVENT_FINISH => {
                song.push(0, time, None, EventKind::Meta(MetaKind::EndOfTrack));
                break;
            }
            EVENT_UNUSED => {
                let _ = iter.read_or_die().context(io!())?;
            }
            _ => unreachable!("event type is three bits"),
        }
        if has_delay {
            ticks += u64::from(iter.read_vlq_u32().context(io!())?);
        }
    }
    Ok(song)
}

/// Maps a MUS controller number onto its MIDI equivalent. Program changes on the percussion
/// channel are dropped, as DMX does.
fn translate_controller(controller: u8, value: u8, channel: Channel) -> Option<EventKind> {
    match controller {
        0 => {
            if channel.get() == PERCUSSION_CHANNEL {
                None
            } else {
                Some(EventKind::ProgramChange {
                    program: Program::new(value),
                })
            }
        }
        1 => Some(controller_change(controllers::BANK_SELECT_MSB, value)),
        2 => Some(controller_change(controllers::MODULATION_WHEEL_MSB, value)),
        3 => Some(controller_change(controllers::VOLUME_MSB, value)),
        4 => Some(controller_change(controllers::PAN_MSB, value)),
        5 => Some(controller_change(controllers::EXPRESSION_MSB, value)),
        6 => Some(controller_change(controllers::REVERB_DEPTH, value)),
        7 => Some(controller_change(controllers::CHORUS_DEPTH, value)),
        8 => Some(controller_change(controllers::SUSTAIN_PEDAL_SWITCH, value)),
        9 => Some(controller_change(controllers::SOFT_PEDAL_SWITCH, value)),
        other => {
            warn!("unrecognized mus controller {}", other);
            None
        }
    }
}

fn controller_change(controller: u8, value: u8) -> EventKind {
    EventKind::ControllerChange { controller, value }
}

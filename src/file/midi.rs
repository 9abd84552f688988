//! Reader for Standard MIDI Files, formats 0 and 1. Produces the canonical
//! [`SongEvent`](crate::song::SongEvent) stream with times converted from ticks to beats.

use crate::byte_iter::ByteIter;
use crate::core::{balance_14bit, calc_msb_lsb, Channel, NoteNumber, Program, Velocity};
use crate::error::LibResult;
use crate::song::{EventKind, MetaKind, Song, TextKind};
use log::{debug, info, trace};
use snafu::ResultExt;
use std::io::Read;

const FORMAT: &str = "smf";
const HEADER_CHUNK_LENGTH: u32 = 6;

/// MIDI channel 9 (displayed as 10) is the General MIDI percussion channel.
const PERCUSSION_CHANNEL: u8 = 9;

const DIVISION_TYPE_BIT: u16 = 0b1000_0000_0000_0000;

// Status high nibbles.
const STATUS_NOTE_OFF: u8 = 0x8;
const STATUS_NOTE_ON: u8 = 0x9;
const STATUS_POLY_PRESSURE: u8 = 0xa;
const STATUS_CONTROL: u8 = 0xb;
const STATUS_PROGRAM: u8 = 0xc;
const STATUS_CHANNEL_PRESSURE: u8 = 0xd;
const STATUS_PITCH_BEND: u8 = 0xe;

const SYSEX_F0: u8 = 0xf0;
const SYSEX_F7: u8 = 0xf7;
const META_EVENT: u8 = 0xff;

/// Reads an SMF after its `MThd` tag has been consumed by the signature dispatch.
pub(crate) fn read<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Song> {
    trace!("parsing header chunk");
    let chunk_length = iter.read_u32_be().context(io!())?;
    // header chunk length is always 6
    if chunk_length != HEADER_CHUNK_LENGTH {
        invalid_format!(FORMAT, "unexpected header chunk length {}", chunk_length);
    }
    let format = iter.read_u16_be().context(io!())?;
    if format > 1 {
        invalid_format!(FORMAT, "unsupported file format {}", format);
    }
    let track_count = iter.read_u16_be().context(io!())?;
    let division = iter.read_u16_be().context(io!())?;
    if division & DIVISION_TYPE_BIT != 0 {
        // SMPTE-based delta times are not supported.
        invalid_format!(FORMAT, "SMPTE division values are not supported");
    }
    if division == 0 {
        invalid_format!(FORMAT, "division must be greater than zero");
    }

    let mut song = Song::new(Channel::new(PERCUSSION_CHANNEL));
    for track in 0..track_count {
        trace!("parsing track chunk {} (zero-based) of {}", track, track_count);
        let chunk_length = expect_track_chunk(iter, track, track_count)?;
        iter.set_size_limit(u64::from(chunk_length));
        read_track(iter, &mut song, u32::from(track), division)?;
        iter.clear_size_limit();
    }
    Ok(song)
}

/// Advances past any unrecognized chunks to the next `MTrk` and returns its length.
fn expect_track_chunk<R: Read>(
    iter: &mut ByteIter<R>,
    track: u16,
    track_count: u16,
) -> LibResult<u32> {
    loop {
        if iter.is_end() {
            invalid_format!(
                FORMAT,
                "expected {} track chunks but the file ended after {}",
                track_count,
                track
            );
        }
        let tag = iter.read4().context(io!())?;
        let chunk_length = iter.read_u32_be().context(io!())?;
        if &tag == b"MTrk" {
            return Ok(chunk_length);
        }
        info!(
            "skipping unrecognized chunk '{}'",
            String::from_utf8_lossy(&tag)
        );
        iter.skip(u64::from(chunk_length)).context(io!())?;
    }
}

fn read_track<R: Read>(
    iter: &mut ByteIter<R>,
    song: &mut Song,
    track: u32,
    division: u16,
) -> LibResult<()> {
    let mut running_status: Option<u8> = None;
    let mut ticks: u64 = 0;
    while !iter.is_end() {
        let delta = iter.read_vlq_u32().context(io!())?;
        ticks += u64::from(delta);
        let time = ticks as f64 / f64::from(division);
        let status = match iter.peek() {
            None => break,
            Some(byte) if byte & 0x80 != 0 => {
                iter.read_or_die().context(io!())?;
                // Sysex and meta events cancel running status; channel events reassign it below.
                running_status = None;
                byte
            }
            Some(_) => match running_status {
                Some(status) => {
                    trace!("running status byte {:#x}", status);
                    status
                }
                None => invalid_format!(
                    FORMAT,
                    "data byte with no running status at position {}",
                    iter.position()
                ),
            },
        };
        match status {
            SYSEX_F0 | SYSEX_F7 => {
                let length = iter.read_vlq_u32().context(io!())?;
                let data = iter.read_n(length as usize).context(io!())?;
                let kind = if status == SYSEX_F0 {
                    EventKind::SysexF0 { data }
                } else {
                    EventKind::SysexF7 { data }
                };
                song.push(track, time, None, kind);
            }
            META_EVENT => {
                if let Some(meta) = read_meta(iter)? {
                    song.push(track, time, None, EventKind::Meta(meta));
                }
            }
            _ => {
                running_status = Some(status);
                let channel = Channel::new(status & 0x0f);
                let kind = read_channel_event(iter, status >> 4)?;
                song.push(track, time, Some(channel), kind);
            }
        }
    }
    Ok(())
}

fn read_channel_event<R: Read>(iter: &mut ByteIter<R>, status_type: u8) -> LibResult<EventKind> {
    match status_type {
        STATUS_NOTE_OFF => Ok(EventKind::NoteOff {
            note: NoteNumber::new(iter.read_or_die().context(io!())?),
            velocity: Velocity::new(iter.read_or_die().context(io!())?),
        }),
        STATUS_NOTE_ON => Ok(EventKind::NoteOn {
            note: NoteNumber::new(iter.read_or_die().context(io!())?),
            velocity: Velocity::new(iter.read_or_die().context(io!())?),
        }),
        STATUS_POLY_PRESSURE => Ok(EventKind::PolyphonicKeyPressure {
            note: NoteNumber::new(iter.read_or_die().context(io!())?),
            pressure: iter.read_or_die().context(io!())? & 0x7f,
        }),
        STATUS_CONTROL => Ok(EventKind::ControllerChange {
            controller: iter.read_or_die().context(io!())? & 0x7f,
            value: iter.read_or_die().context(io!())? & 0x7f,
        }),
        STATUS_PROGRAM => Ok(EventKind::ProgramChange {
            program: Program::new(iter.read_or_die().context(io!())?),
        }),
        STATUS_CHANNEL_PRESSURE => Ok(EventKind::ChannelKeyPressure {
            pressure: iter.read_or_die().context(io!())? & 0x7f,
        }),
        STATUS_PITCH_BEND => {
            let lsb = iter.read_or_die().context(io!())? & 0x7f;
            let msb = iter.read_or_die().context(io!())? & 0x7f;
            Ok(EventKind::PitchBend {
                amount: balance_14bit(calc_msb_lsb(msb, lsb)),
            })
        }
        other => invalid_format_r!(FORMAT, "unsupported MIDI status type {:#x}", other),
    }
}

/// Parses one meta event, the leading `0xff` already consumed. Returns `None` for meta types
/// this crate does not model; their payload is consumed and discarded.
fn read_meta<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Option<MetaKind>> {
    let meta_type = iter.read_or_die().context(io!())?;
    let length = iter.read_vlq_u32().context(io!())?;
    let meta = match meta_type {
        0x00 => {
            expect_length(meta_type, length, 2)?;
            MetaKind::SequenceNumber(iter.read_u16_be().context(io!())?)
        }
        0x01..=0x09 => {
            let bytes = iter.read_n(length as usize).context(io!())?;
            // The spec does not strictly specify an encoding for strings.
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let kind = match meta_type {
                0x01 => TextKind::Text,
                0x02 => TextKind::Copyright,
                0x03 => TextKind::TrackName,
                0x04 => TextKind::InstrumentName,
                0x05 => TextKind::Lyric,
                0x06 => TextKind::Marker,
                0x07 => TextKind::CuePoint,
                0x08 => TextKind::ProgramName,
                _ => TextKind::DeviceName,
            };
            MetaKind::Text { kind, text }
        }
        0x20 => {
            expect_length(meta_type, length, 1)?;
            MetaKind::ChannelPrefix(Channel::new(iter.read_or_die().context(io!())?))
        }
        0x21 => {
            expect_length(meta_type, length, 1)?;
            MetaKind::Port(iter.read_or_die().context(io!())?)
        }
        0x2f => {
            expect_length(meta_type, length, 0)?;
            MetaKind::EndOfTrack
        }
        0x51 => {
            expect_length(meta_type, length, 3)?;
            let bytes = iter.read_n(3).context(io!())?;
            let microseconds_per_quarter =
                (u32::from(bytes[0]) << 16) + (u32::from(bytes[1]) << 8) + u32::from(bytes[2]);
            if microseconds_per_quarter == 0 {
                invalid_format!(FORMAT, "tempo of zero microseconds per quarter note");
            }
            MetaKind::SetTempo {
                bpm: 60_000_000.0 / f64::from(microseconds_per_quarter),
            }
        }
        0x54 => {
            expect_length(meta_type, length, 5)?;
            MetaKind::SmpteOffset {
                hours: iter.read_or_die().context(io!())?,
                minutes: iter.read_or_die().context(io!())?,
                seconds: iter.read_or_die().context(io!())?,
                frames: iter.read_or_die().context(io!())?,
                fractional_frames: iter.read_or_die().context(io!())?,
            }
        }
        0x58 => {
            expect_length(meta_type, length, 4)?;
            MetaKind::TimeSignature {
                numerator: iter.read_or_die().context(io!())?,
                // The file stores the denominator as a power of two.
                denominator: 1u16 << iter.read_or_die().context(io!())?.min(15),
                clocks_per_click: iter.read_or_die().context(io!())?,
                notated_32nds_per_beat: iter.read_or_die().context(io!())?,
            }
        }
        0x59 => {
            expect_length(meta_type, length, 2)?;
            MetaKind::KeySignature {
                sharps_flats: iter.read_or_die().context(io!())? as i8,
                minor: iter.read_or_die().context(io!())? == 1,
            }
        }
        0x7f => MetaKind::SequencerSpecific(iter.read_n(length as usize).context(io!())?),
        other => {
            debug!("skipping unknown meta event type {:#x}", other);
            iter.skip(u64::from(length)).context(io!())?;
            return Ok(None);
        }
    };
    Ok(Some(meta))
}

fn expect_length(meta_type: u8, found: u32, expected: u32) -> LibResult<()> {
    if found != expected {
        invalid_format!(
            FORMAT,
            "meta event {:#x} should have a data length of {}, found {}",
            meta_type,
            expected,
            found
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::read_song;
    use std::io::Cursor;

    fn vlq(mut value: u32) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7f) as u8];
        value >>= 7;
        while value > 0 {
            bytes.push((value & 0x7f) as u8 | 0x80);
            value >>= 7;
        }
        bytes.reverse();
        bytes
    }

    fn smf(division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&division.to_be_bytes());
        for track in tracks {
            bytes.extend_from_slice(b"MTrk");
            bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
            bytes.extend_from_slice(track);
        }
        bytes
    }

    fn end_of_track() -> Vec<u8> {
        vec![0x00, 0xff, 0x2f, 0x00]
    }

    #[test]
    fn single_note_with_running_status() {
        let mut track = Vec::new();
        track.extend_from_slice(&[0x00, 0x90, 60, 100]); // note on
        track.extend_from_slice(&vlq(480)); // one beat later, running status
        track.extend_from_slice(&[60, 0]); // note on, velocity 0
        track.extend_from_slice(&end_of_track());
        let bytes = smf(480, &[track]);
        let song = read_song(Cursor::new(bytes)).unwrap();
        let events = song.events();
        assert_eq!(3, events.len());
        assert_eq!(
            EventKind::NoteOn {
                note: NoteNumber::new(60),
                velocity: Velocity::new(100)
            },
            events[0].kind
        );
        assert_eq!(Some(Channel::new(0)), events[0].channel);
        assert_eq!(0.0, events[0].time);
        // At time 1.0 the end-of-track meta sorts ahead of the zero-velocity note-on.
        assert_eq!(EventKind::Meta(MetaKind::EndOfTrack), events[1].kind);
        assert_eq!(
            EventKind::NoteOn {
                note: NoteNumber::new(60),
                velocity: Velocity::new(0)
            },
            events[2].kind
        );
        assert_eq!(1.0, events[2].time);
    }

    #[test]
    fn tempo_and_pitch_bend_decode() {
        let mut track = Vec::new();
        track.extend_from_slice(&[0x00, 0xff, 0x51, 0x03, 0x07, 0xa1, 0x20]); // 500000 usec
        track.extend_from_slice(&[0x00, 0xe3, 0x7f, 0x7f]); // bend max on channel 3
        track.extend_from_slice(&[0x00, 0xe3, 0x00, 0x40]); // bend center
        track.extend_from_slice(&end_of_track());
        let bytes = smf(96, &[track]);
        let song = read_song(Cursor::new(bytes)).unwrap();
        let events = song.events();
        assert_eq!(
            EventKind::Meta(MetaKind::SetTempo { bpm: 120.0 }),
            events[0].kind
        );
        match &events[1].kind {
            EventKind::PitchBend { amount } => assert!((amount - 1.0).abs() < 1e-9),
            other => panic!("wrong variant, got {:?}", other),
        }
        assert_eq!(Some(Channel::new(3)), events[1].channel);
        match &events[2].kind {
            EventKind::PitchBend { amount } => assert_eq!(0.0, *amount),
            other => panic!("wrong variant, got {:?}", other),
        }
    }

    #[test]
    fn text_and_unknown_meta() {
        let mut track = Vec::new();
        track.extend_from_slice(&[0x00, 0xff, 0x03, 0x05]);
        track.extend_from_slice(b"drums");
        track.extend_from_slice(&[0x00, 0xff, 0x60, 0x02, 0xaa, 0xbb]); // unknown meta, skipped
        track.extend_from_slice(&end_of_track());
        let bytes = smf(96, &[track]);
        let song = read_song(Cursor::new(bytes)).unwrap();
        let events = song.events();
        assert_eq!(2, events.len());
        assert_eq!(
            EventKind::Meta(MetaKind::Text {
                kind: TextKind::TrackName,
                text: "drums".to_owned()
            }),
            events[0].kind
        );
    }

    #[test]
    fn skips_unknown_chunks() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&96u16.to_be_bytes());
        bytes.extend_from_slice(b"XFIH");
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&end_of_track());
        let song = read_song(Cursor::new(bytes)).unwrap();
        assert_eq!(1, song.events().len());
    }

    #[test]
    fn rejects_smpte_division() {
        let bytes = smf(0x8000 | 0xe250, &[]);
        assert!(read_song(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_format_two() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&96u16.to_be_bytes());
        assert!(read_song(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_data_byte_without_running_status() {
        let track = vec![0x00, 60, 100];
        let bytes = smf(96, &[track]);
        assert!(read_song(Cursor::new(bytes)).is_err());
    }
}

//! Reader for DMX Sound Library (`.op2`) instrument banks: the fixed 11908-byte `GENMIDI` layout
//! of 175 36-byte entries followed by 175 32-byte names. Entries 0-127 are melodic programs at
//! bank 0; entries 128-174 are percussion notes 35-81.

use crate::adlib::{Instrument, Operator, Voice};
use crate::byte_iter::ByteIter;
use crate::error::LibResult;
use crate::instruments::{InstrumentId, InstrumentKind};
use log::trace;
use snafu::ResultExt;
use std::io::Read;

pub(crate) const SIGNATURE: &[u8] = b"#OPL_II#";

const ENTRY_COUNT: usize = 175;
const FIRST_PERCUSSION_ENTRY: usize = 128;
const FIRST_PERCUSSION_PROGRAM: u8 = 35;
const NAME_SIZE: usize = 32;

const FLAG_USE_GIVEN_NOTE: u16 = 1;
const FLAG_USE_SECONDARY_VOICE: u16 = 4;

struct RawEntry {
    flags: u16,
    fine_tuning: u8,
    given_note: u8,
    voices: [Voice; 2],
}

/// Reads a whole OP2 bank. The iter must be positioned at the start of the file.
pub(crate) fn read<R: Read>(
    iter: &mut ByteIter<R>,
) -> LibResult<Vec<(InstrumentId, Instrument)>> {
    iter.expect_bytes(SIGNATURE, "#OPL_II#").context(io!())?;
    // The names trail all of the entries, so collect entries first and marry them up after.
    let mut entries = Vec::with_capacity(ENTRY_COUNT);
    for index in 0..ENTRY_COUNT {
        trace!("parsing op2 entry {}", index);
        entries.push(read_entry(iter)?);
    }
    let mut instruments = Vec::with_capacity(ENTRY_COUNT);
    for (index, entry) in entries.into_iter().enumerate() {
        let name_bytes = iter.read_n(NAME_SIZE).context(io!())?;
        let name = trimmed_name(&name_bytes);
        let id = if index < FIRST_PERCUSSION_ENTRY {
            InstrumentId::new(InstrumentKind::Melodic, 0, index as u8)
        } else {
            InstrumentId::new(
                InstrumentKind::Percussion,
                0,
                (index - FIRST_PERCUSSION_ENTRY) as u8 + FIRST_PERCUSSION_PROGRAM,
            )
        };
        instruments.push((
            id,
            Instrument {
                name,
                use_given_note: entry.flags & FLAG_USE_GIVEN_NOTE != 0,
                use_secondary_voice: entry.flags & FLAG_USE_SECONDARY_VOICE != 0,
                fine_tuning: entry.fine_tuning,
                given_note: entry.given_note,
                voices: entry.voices.to_vec(),
            },
        ));
    }
    Ok(instruments)
}

fn read_entry<R: Read>(iter: &mut ByteIter<R>) -> LibResult<RawEntry> {
    let flags = iter.read_u16_le().context(io!())?;
    let fine_tuning = iter.read_or_die().context(io!())?;
    let given_note = iter.read_or_die().context(io!())?;
    let voices = [read_voice(iter)?, read_voice(iter)?];
    Ok(RawEntry {
        flags,
        fine_tuning,
        given_note,
        voices,
    })
}

/// One 16-byte voice record: modulator operator, feedback, carrier operator, an unused byte, and
/// the note offset.
fn read_voice<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Voice> {
    let modulator = read_operator(iter)?;
    let feedback = iter.read_or_die().context(io!())?;
    let carrier = read_operator(iter)?;
    let _unused = iter.read_or_die().context(io!())?;
    let note_offset = iter.read_i16_le().context(io!())?;
    Ok(Voice {
        modulator,
        carrier,
        feedback,
        note_offset,
    })
}

/// Six bytes per operator; the KSL byte and the output-level byte are combined into the one
/// `0x40`-class register value.
fn read_operator<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Operator> {
    let tvskm = iter.read_or_die().context(io!())?;
    let attack_decay = iter.read_or_die().context(io!())?;
    let sustain_release = iter.read_or_die().context(io!())?;
    let waveform_select = iter.read_or_die().context(io!())?;
    let ksl = iter.read_or_die().context(io!())?;
    let output_level = iter.read_or_die().context(io!())?;
    Ok(Operator::new(
        tvskm,
        ksl | output_level,
        attack_decay,
        sustain_release,
        waveform_select,
    ))
}

fn trimmed_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

//! Reader for Wohlstand's OPL3 bank files (`.wopl`), versions 1 through 3. Instruments are
//! grouped into banks of 128; versions 2 and up carry a bank metadata table holding each bank's
//! MSB/LSB pair. Blank entries, rhythm-mode entries, and true 4-operator entries are skipped.

use crate::adlib::{Instrument, Operator, Voice};
use crate::byte_iter::ByteIter;
use crate::error::LibResult;
use crate::instruments::{InstrumentId, InstrumentKind};
use log::{trace, warn};
use snafu::ResultExt;
use std::io::Read;

pub(crate) const SIGNATURE: &[u8] = b"WOPL3-BANK\0";

const FORMAT: &str = "wopl";
const BANK_SIZE: usize = 128;

const FLAG_4OP_MODE: u8 = 0x01;
const FLAG_PSEUDO_4OP: u8 = 0x02;
const FLAG_IS_BLANK: u8 = 0x04;
const FLAG_RHYTHM_MASK: u8 = 0x38;

/// Reads a whole WOPL bank. The iter must be positioned at the start of the file.
pub(crate) fn read<R: Read>(
    iter: &mut ByteIter<R>,
) -> LibResult<Vec<(InstrumentId, Instrument)>> {
    iter.expect_bytes(SIGNATURE, "WOPL3-BANK").context(io!())?;
    let version = iter.read_u16_le().context(io!())?;
    if !(1..=3).contains(&version) {
        invalid_format!(FORMAT, "version {} is not supported", version);
    }
    let melodic_bank_count = iter.read_u16_be().context(io!())? as usize;
    let percussive_bank_count = iter.read_u16_be().context(io!())? as usize;
    let _global_flags = iter.read_or_die().context(io!())?;
    let _volume_model = iter.read_or_die().context(io!())?;

    // Versions 2 and up interpose a bank metadata table between the header and the instrument
    // entries; version 1 has a single implicit bank 0 per kind.
    let bank_count = melodic_bank_count + percussive_bank_count;
    let banks = if version >= 2 {
        let mut banks = Vec::with_capacity(bank_count);
        for _ in 0..bank_count {
            let name = iter.read_n(32).context(io!())?;
            let lsb = iter.read_or_die().context(io!())?;
            let msb = iter.read_or_die().context(io!())?;
            trace!(
                "wopl bank '{}' msb {} lsb {}",
                String::from_utf8_lossy(&name),
                msb,
                lsb
            );
            banks.push(u16::from(msb) * 128 + u16::from(lsb));
        }
        banks
    } else {
        vec![0; bank_count]
    };

    let mut instruments = Vec::new();
    let entry_count = bank_count * BANK_SIZE;
    for index in 0..entry_count {
        let kind = if index < melodic_bank_count * BANK_SIZE {
            InstrumentKind::Melodic
        } else {
            InstrumentKind::Percussion
        };
        let bank = banks[index / BANK_SIZE];
        let program = (index % BANK_SIZE) as u8;
        if let Some(instrument) = read_entry(iter, version, kind)? {
            instruments.push((InstrumentId::new(kind, bank, program), instrument));
        }
    }
    Ok(instruments)
}

/// Reads one 62-byte (66 for version 3) instrument entry. Returns `None` for entries this
/// converter cannot use.
fn read_entry<R: Read>(
    iter: &mut ByteIter<R>,
    version: u16,
    kind: InstrumentKind,
) -> LibResult<Option<Instrument>> {
    let name_bytes = iter.read_n(32).context(io!())?;
    let note_offset0 = iter.read_i16_be().context(io!())? - 12;
    let note_offset1 = iter.read_i16_be().context(io!())? - 12;
    let _velocity_offset = iter.read_or_die().context(io!())?;
    let fine_tuning = iter.read_or_die().context(io!())?;
    let given_note = iter.read_or_die().context(io!())?;
    let flags = iter.read_or_die().context(io!())?;
    let feedback0 = iter.read_or_die().context(io!())?;
    let feedback1 = iter.read_or_die().context(io!())?;
    let voice0 = read_voice(iter, feedback0, note_offset0)?;
    let voice1 = read_voice(iter, feedback1, note_offset1)?;
    if version >= 3 {
        // Keyoff delay data, unused here.
        iter.skip(4).context(io!())?;
    }

    let name = trimmed_name(&name_bytes);
    if flags & FLAG_IS_BLANK != 0 {
        return Ok(None);
    }
    if flags & FLAG_RHYTHM_MASK != 0 {
        warn!("skipping rhythm-mode instrument '{}'", name);
        return Ok(None);
    }
    let four_op = flags & FLAG_4OP_MODE != 0;
    let pseudo_four_op = flags & FLAG_PSEUDO_4OP != 0;
    if four_op && !pseudo_four_op {
        warn!("skipping true 4-operator instrument '{}'", name);
        return Ok(None);
    }

    Ok(Some(Instrument {
        name,
        use_given_note: kind == InstrumentKind::Percussion,
        use_secondary_voice: four_op && pseudo_four_op,
        fine_tuning,
        given_note,
        voices: vec![voice0, voice1],
    }))
}

/// Ten operator bytes per voice, carrier first.
fn read_voice<R: Read>(
    iter: &mut ByteIter<R>,
    feedback: u8,
    note_offset: i16,
) -> LibResult<Voice> {
    let carrier = read_operator(iter)?;
    let modulator = read_operator(iter)?;
    Ok(Voice {
        modulator,
        carrier,
        feedback,
        note_offset,
    })
}

fn read_operator<R: Read>(iter: &mut ByteIter<R>) -> LibResult<Operator> {
    let tvskm = iter.read_or_die().context(io!())?;
    let ksl_output = iter.read_or_die().context(io!())?;
    let attack_decay = iter.read_or_die().context(io!())?;
    let sustain_release = iter.read_or_die().context(io!())?;
    let waveform_select = iter.read_or_die().context(io!())?;
    Ok(Operator::new(
        tvskm,
        ksl_output,
        attack_decay,
        sustain_release,
        waveform_select,
    ))
}

fn trimmed_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const V3_ENTRY_SIZE: usize = 66;
    const BANK_META_SIZE: usize = 32 + 1 + 1;

    fn entry(name: &str, flags: u8, tvskm: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; V3_ENTRY_SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        bytes[33] = 12; // note offset 0, big endian: stored +12 so it loads as zero
        bytes[35] = 12; // note offset 1
        bytes[37] = 0x80; // fine tuning
        bytes[38] = 50; // given note
        bytes[39] = flags;
        bytes[40] = 0x07; // feedback voice 0
        bytes[42] = 0x01; // voice 0 carrier tvskm
        bytes[47] = tvskm; // voice 0 modulator tvskm
        bytes
    }

    /// A version 3 file with one melodic bank (msb 1, lsb 2) and one percussive bank 0.
    fn synthetic_bank(melodic_entries: Vec<Vec<u8>>, percussive_entries: Vec<Vec<u8>>) -> Vec<u8> {
        assert_eq!(BANK_SIZE, melodic_entries.len());
        assert_eq!(BANK_SIZE, percussive_entries.len());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SIGNATURE);
        bytes.extend_from_slice(&3u16.to_le_bytes()); // version
        bytes.extend_from_slice(&1u16.to_be_bytes()); // melodic banks
        bytes.extend_from_slice(&1u16.to_be_bytes()); // percussive banks
        bytes.push(0); // flags
        bytes.push(0); // volume model
        let mut melodic_meta = [0u8; BANK_META_SIZE];
        melodic_meta[..7].copy_from_slice(b"melodic");
        melodic_meta[32] = 2; // lsb
        melodic_meta[33] = 1; // msb
        bytes.extend_from_slice(&melodic_meta);
        let mut percussive_meta = [0u8; BANK_META_SIZE];
        percussive_meta[..5].copy_from_slice(b"drums");
        bytes.extend_from_slice(&percussive_meta);
        for entry in melodic_entries.iter().chain(percussive_entries.iter()) {
            bytes.extend_from_slice(entry);
        }
        bytes
    }

    fn blank() -> Vec<u8> {
        entry("", FLAG_IS_BLANK, 0)
    }

    #[test]
    fn loads_entries_and_assembles_bank_numbers() {
        let mut melodic = vec![blank(); BANK_SIZE];
        melodic[0] = entry("lead", 0, 0x21);
        melodic[5] = entry("pad", 0, 0x31);
        let mut percussive = vec![blank(); BANK_SIZE];
        percussive[38] = entry("snare", 0, 0x11);
        let bytes = synthetic_bank(melodic, percussive);
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        let instruments = read(&mut iter).unwrap();
        assert_eq!(3, instruments.len());

        let (id, lead) = &instruments[0];
        assert_eq!(InstrumentKind::Melodic, id.kind);
        assert_eq!(1 * 128 + 2, id.bank);
        assert_eq!(0, id.program);
        assert_eq!("lead", lead.name);
        assert_eq!(0x21, lead.voices[0].modulator.tvskm);
        assert_eq!(0x01, lead.voices[0].carrier.tvskm);
        assert_eq!(0x07, lead.voices[0].feedback);
        assert_eq!(0, lead.voices[0].note_offset);
        assert!(!lead.use_given_note);

        let (id, snare) = &instruments[2];
        assert_eq!(InstrumentKind::Percussion, id.kind);
        assert_eq!(0, id.bank);
        assert_eq!(38, id.program);
        assert_eq!(50, snare.given_note);
        assert!(snare.use_given_note);
    }

    #[test]
    fn skips_rhythm_and_true_4op_instruments() {
        let mut melodic = vec![blank(); BANK_SIZE];
        melodic[0] = entry("rhythm", 0x08, 0); // rhythm mode bits
        melodic[1] = entry("true4op", FLAG_4OP_MODE, 0);
        melodic[2] = entry("pseudo", FLAG_4OP_MODE | FLAG_PSEUDO_4OP, 0);
        let percussive = vec![blank(); BANK_SIZE];
        let bytes = synthetic_bank(melodic, percussive);
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        let instruments = read(&mut iter).unwrap();
        assert_eq!(1, instruments.len());
        let (id, pseudo) = &instruments[0];
        assert_eq!(2, id.program);
        assert!(pseudo.use_secondary_voice);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SIGNATURE);
        bytes.extend_from_slice(&9u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        let mut iter = ByteIter::new(Cursor::new(bytes).bytes()).unwrap();
        let error = read(&mut iter).unwrap_err();
        assert!(format!("{}", error).contains("version 9"));
    }
}

#![allow(dead_code)]

//! Byte-image builders shared by the integration tests. Everything is constructed in memory so
//! the tests carry no binary fixture files.

use log::LevelFilter;
use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn enable_logging() {
    LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter(None, LevelFilter::Warn)
            .is_test(true)
            .init()
    })
}

/// Encodes a MIDI variable-length quantity.
pub fn vlq(mut value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Builds a format 1 SMF from raw track bodies.
pub fn smf(division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
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

pub fn end_of_track() -> Vec<u8> {
    vec![0x00, 0xff, 0x2f, 0x00]
}

/// Builds a MUS image whose song data starts at offset 16.
pub fn mus(body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MUS\x1a");
    bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    bytes.extend_from_slice(body);
    bytes
}

/// One 36-byte OP2 entry. The operator layout within a voice is: tvskm, attack/decay,
/// sustain/release, waveform, KSL, output level.
pub struct Op2Entry {
    pub flags: u16,
    pub fine_tuning: u8,
    pub given_note: u8,
    pub modulator: [u8; 6],
    pub feedback: u8,
    pub carrier: [u8; 6],
    pub note_offset: i16,
}

impl Default for Op2Entry {
    fn default() -> Self {
        Self {
            flags: 0,
            fine_tuning: 0x80,
            given_note: 0,
            modulator: [0; 6],
            feedback: 0,
            carrier: [0; 6],
            note_offset: 0,
        }
    }
}

impl Op2Entry {
    fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..2].copy_from_slice(&self.flags.to_le_bytes());
        bytes[2] = self.fine_tuning;
        bytes[3] = self.given_note;
        bytes[4..10].copy_from_slice(&self.modulator);
        bytes[10] = self.feedback;
        bytes[11..17].copy_from_slice(&self.carrier);
        bytes[18..20].copy_from_slice(&self.note_offset.to_le_bytes());
        bytes
    }
}

/// The reference instrument most tests play: an additive-synthesis patch with fully open
/// operators.
pub fn reference_instrument() -> Op2Entry {
    Op2Entry {
        modulator: [0x10, 0xf5, 0x7b, 0x01, 0x00, 0x00],
        feedback: 0x01,
        carrier: [0x11, 0xf3, 0x9a, 0x02, 0x00, 0x00],
        ..Default::default()
    }
}

/// Builds a full 11908-byte OP2 bank. `overrides` assigns specific entries by index; everything
/// else is a default (silent) entry.
pub fn op2_bank(overrides: &[(usize, Op2Entry)]) -> Vec<u8> {
    let mut entries: Vec<[u8; 36]> = (0..175).map(|_| Op2Entry::default().to_bytes()).collect();
    for (index, entry) in overrides {
        entries[*index] = entry.to_bytes();
    }
    let mut bytes = Vec::with_capacity(11908);
    bytes.extend_from_slice(b"#OPL_II#");
    for entry in &entries {
        bytes.extend_from_slice(entry);
    }
    for index in 0..175usize {
        let mut name = [0u8; 32];
        let text = format!("instr{}", index);
        name[..text.len()].copy_from_slice(text.as_bytes());
        bytes.extend_from_slice(&name);
    }
    assert_eq!(11908, bytes.len());
    bytes
}

/// Builds a version 1 WOPL bank with one melodic bank and no percussive banks. `overrides`
/// assigns 62-byte entries by program number; everything else is blank.
pub fn wopl_v1_bank(overrides: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"WOPL3-BANK\0");
    bytes.extend_from_slice(&1u16.to_le_bytes()); // version
    bytes.extend_from_slice(&1u16.to_be_bytes()); // melodic banks
    bytes.extend_from_slice(&0u16.to_be_bytes()); // percussive banks
    bytes.push(0); // flags
    bytes.push(0); // volume model
    let mut entries: Vec<Vec<u8>> = (0..128).map(|_| wopl_blank_entry()).collect();
    for (program, entry) in overrides {
        entries[*program] = entry.clone();
    }
    for entry in &entries {
        bytes.extend_from_slice(entry);
    }
    bytes
}

fn wopl_blank_entry() -> Vec<u8> {
    let mut entry = vec![0u8; 62];
    entry[39] = 0x04; // blank flag
    entry
}

/// A playable 62-byte WOPL entry. Voice operators are carrier-first; `modulator_tvskm` lands in
/// the voice 0 modulator so tests can recognize the patch in the register stream.
pub fn wopl_entry(modulator_tvskm: u8) -> Vec<u8> {
    let mut entry = vec![0u8; 62];
    entry[33] = 12; // note offset 0 (stored +12), big endian
    entry[35] = 12;
    entry[37] = 0x80; // fine tuning
    entry[40] = 0x01; // feedback, additive
    entry[42] = 0x11; // voice 0 carrier tvskm
    entry[47] = modulator_tvskm; // voice 0 modulator tvskm
    entry
}

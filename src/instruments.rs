/*!
The `instruments` module stores the FM patches that conversion draws from. Banks are loaded from
OP2 or WOPL3 files (dispatched on their signatures) into one catalog keyed by
`(kind, bank, program)`; lookups fall back to bank 0, and optionally remap GM2-only drums onto
their closest GM1 neighbors.
!*/

use crate::adlib::Instrument;
use crate::byte_iter::ByteIter;
use crate::error::{LibResult, Result};
use crate::file::{op2, wopl};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum InstrumentKind {
    Melodic,
    Percussion,
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentKind::Melodic => write!(f, "MELODIC"),
            InstrumentKind::Percussion => write!(f, "PERCUSSION"),
        }
    }
}

/// The catalog key. `bank` is the assembled 14-bit value (`MSB * 128 + LSB`); `program` is the
/// patch number for melodic instruments and the drum note for percussion.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct InstrumentId {
    pub kind: InstrumentKind,
    pub bank: u16,
    pub program: u8,
}

impl InstrumentId {
    pub fn new(kind: InstrumentKind, bank: u16, program: u8) -> Self {
        debug_assert!(bank <= 16383);
        debug_assert!(program <= 127);
        Self {
            kind,
            bank,
            program,
        }
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bank {:#06x} program {}",
            self.kind, self.bank, self.program
        )
    }
}

/// GM2-only drum notes and the GM1 drums that stand in for them when a bank does not define
/// them. Nearest-neighbor choices by sound family.
const GM2_DRUM_FALLBACK: [(u8, u8); 14] = [
    (27, 37), // High Q -> Side Stick
    (28, 39), // Slap -> Hand Clap
    (29, 46), // Scratch Push -> Open Hi-Hat
    (30, 46), // Scratch Pull -> Open Hi-Hat
    (31, 37), // Sticks -> Side Stick
    (32, 76), // Square Click -> Hi Wood Block
    (33, 76), // Metronome Click -> Hi Wood Block
    (34, 81), // Metronome Bell -> Open Triangle
    (82, 70), // Shaker -> Maracas
    (83, 53), // Jingle Bell -> Ride Bell
    (84, 81), // Belltree -> Open Triangle
    (85, 75), // Castanets -> Claves
    (86, 61), // Mute Surdo -> Low Bongo
    (87, 61), // Open Surdo -> Low Bongo
];

/// The instrument store. Later additions replace earlier ones under the same key, so load order
/// decides which bank wins.
pub struct InstrumentCatalog {
    instruments: BTreeMap<InstrumentId, Instrument>,
    gm2_drum_remap: bool,
    /// Lookups that already produced a warning, so each missing key is logged once. Interior
    /// mutability keeps `get` shared; the conversion core is single-threaded.
    warned: RefCell<BTreeSet<InstrumentId>>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self {
            instruments: BTreeMap::new(),
            gm2_drum_remap: false,
            warned: RefCell::new(BTreeSet::new()),
        }
    }

    /// Enables the GM2 drum-note remap for percussion lookups.
    pub fn with_gm2_drum_remap(mut self, enabled: bool) -> Self {
        self.gm2_drum_remap = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Adds one instrument, replacing any existing entry under the same key.
    pub fn add(&mut self, id: InstrumentId, instrument: Instrument) {
        if self.instruments.contains_key(&id) {
            info!("replacing instrument {}", id);
        }
        self.instruments.insert(id, instrument);
    }

    /// Loads every instrument in a bank file. The format is chosen by file signature.
    pub fn add_bank_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("loading instrument bank \"{}\"", path.display());
        let iter = ByteIter::new_file(path).context(io!())?;
        Ok(self.add_bank_inner(iter)?)
    }

    /// Loads a bank from any reader, e.g. an in-memory byte image.
    pub fn add_bank<R: Read>(&mut self, reader: R) -> Result<()> {
        let iter = ByteIter::new(reader.bytes()).context(io!())?;
        Ok(self.add_bank_inner(iter)?)
    }

    fn add_bank_inner<R: Read>(&mut self, mut iter: ByteIter<R>) -> LibResult<()> {
        // The filetype registry: a match on the file signature.
        let loaded = match iter.peek() {
            Some(b'#') => op2::read(&mut iter)?,
            Some(b'W') => wopl::read(&mut iter)?,
            _ => invalid_format!("bank", "unrecognized instrument bank signature"),
        };
        info!("loaded {} instruments", loaded.len());
        for (id, instrument) in loaded {
            self.add(id, instrument);
        }
        Ok(())
    }

    /// Looks up an instrument, falling back to bank 0 when the exact bank is missing, and (when
    /// enabled) remapping undefined GM2-only drums. Returns the id that actually resolved so
    /// that callers can tell when two requests landed on the same patch.
    pub fn get(
        &self,
        kind: InstrumentKind,
        bank: u16,
        program: u8,
    ) -> Option<(InstrumentId, &Instrument)> {
        let mut id = InstrumentId::new(kind, bank, program);
        if id.bank > 0 && !self.instruments.contains_key(&id) {
            self.warn_once(id, "trying bank 0");
            id = InstrumentId::new(kind, 0, program);
        }
        if self.gm2_drum_remap
            && kind == InstrumentKind::Percussion
            && !self.instruments.contains_key(&id)
        {
            if let Some(&(_, fallback)) = GM2_DRUM_FALLBACK
                .iter()
                .find(|(gm2, _)| *gm2 == id.program)
            {
                debug!(
                    "remapping undefined GM2 drum {} to GM1 drum {}",
                    id.program, fallback
                );
                id = InstrumentId::new(kind, id.bank, fallback);
            }
        }
        match self.instruments.get(&id) {
            Some(instrument) => Some((id, instrument)),
            None => {
                self.warn_once(id, "the note will be dropped");
                None
            }
        }
    }

    fn warn_once(&self, id: InstrumentId, suffix: &str) {
        if self.warned.borrow_mut().insert(id) {
            warn!("could not find instrument: {}; {}", id, suffix);
        }
    }
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

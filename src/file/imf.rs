//! The IMF output format: a flat sequence of `(register, value, delay)` triples, either raw
//! (type 0) or prefixed with a two-byte data length (type 1). Type 1 files may carry an
//! unofficial metadata tag after the command data.

use crate::error::{LibResult, Result};
use crate::scribe::Scribe;
use log::{info, warn};
use snafu::ResultExt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One IMF command: a register, the value written to it, and the number of ticks to wait after
/// the write.
pub type ImfCommand = (u8, u8, u16);

/// The supported output flavors. They differ only in header and tick rate; several games read
/// "type 0" data at different speeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImfFileType {
    /// Type 0 at 560 Hz (Commander Keen, Cosmo, Bio Menace).
    Imf0,
    /// Type 0 at 280 Hz (Duke Nukem II).
    Imf0DukeNukem2,
    /// Type 0 at 700 Hz (Wolfenstein 3-D).
    Imf0Wolf,
    /// Type 1 at 700 Hz with a data-length prefix (Wolfenstein 3-D family).
    Imf1,
}

impl ImfFileType {
    /// The IMF tick rate games play this flavor at.
    pub fn ticks_per_second(&self) -> u16 {
        match self {
            ImfFileType::Imf0 => 560,
            ImfFileType::Imf0DukeNukem2 => 280,
            ImfFileType::Imf0Wolf | ImfFileType::Imf1 => 700,
        }
    }

    fn has_length_prefix(&self) -> bool {
        matches!(self, ImfFileType::Imf1)
    }

    /// The conventional file extension for this flavor.
    pub fn default_extension(&self) -> &'static str {
        match self {
            ImfFileType::Imf1 => "wlf",
            _ => "imf",
        }
    }
}

impl std::fmt::Display for ImfFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImfFileType::Imf0 => write!(f, "imf0"),
            ImfFileType::Imf0DukeNukem2 => write!(f, "imf0dn2"),
            ImfFileType::Imf0Wolf => write!(f, "imf0wlf"),
            ImfFileType::Imf1 => write!(f, "imf1"),
        }
    }
}

/// A converted song: the OPL command stream plus everything needed to serialize it. Handed to
/// the player or written to disk; immutable except for the tag fields.
#[derive(Clone, Debug)]
pub struct AdlibSong {
    filetype: ImfFileType,
    commands: Vec<ImfCommand>,
    title: Option<String>,
    composer: Option<String>,
    remarks: Option<String>,
    program: Option<String>,
}

impl AdlibSong {
    /// Type 1 data length is a u16 of bytes, so at most 16383 four-byte commands fit.
    const MAXIMUM_COMMAND_COUNT: usize = 0xffff / 4;

    /// The program name recorded in the tag when other tag fields are set but no program is
    /// given.
    const DEFAULT_TAG_PROGRAM: &'static str = "midi2imf";

    const TAG_BYTE: u8 = 0x1a;

    pub(crate) fn new(filetype: ImfFileType, commands: Vec<ImfCommand>) -> Self {
        Self {
            filetype,
            commands,
            title: None,
            composer: None,
            remarks: None,
            program: None,
        }
    }

    pub fn filetype(&self) -> ImfFileType {
        self.filetype
    }

    pub fn commands(&self) -> &[ImfCommand] {
        &self.commands
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn ticks_per_second(&self) -> u16 {
        self.filetype.ticks_per_second()
    }

    /// Sets the metadata stored in the type-1 tag block. Type 0 files have nowhere to put these;
    /// a warning is issued and they are ignored at write time.
    pub fn set_tags(
        &mut self,
        title: Option<String>,
        composer: Option<String>,
        remarks: Option<String>,
        program: Option<String>,
    ) {
        if !self.filetype.has_length_prefix()
            && (title.is_some() || composer.is_some() || remarks.is_some() || program.is_some())
        {
            warn!(
                "the title, composer, remarks, and program settings are not used by type '{}'",
                self.filetype
            );
        }
        self.title = title;
        self.composer = composer;
        self.remarks = remarks;
        self.program = program;
    }

    fn has_tags(&self) -> bool {
        self.title.is_some()
            || self.composer.is_some()
            || self.remarks.is_some()
            || self.program.is_some()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref()).context(wr!())?;
        self.write(BufWriter::new(file))?;
        info!("converted music saved as \"{}\"", path.as_ref().display());
        Ok(())
    }

    pub fn write<W: Write>(&self, w: W) -> Result<()> {
        Ok(self.write_inner(w)?)
    }

    fn write_inner<W: Write>(&self, w: W) -> LibResult<()> {
        let mut scribe = Scribe::new(w);
        let mut command_count = self.command_count();
        info!("writing {} commands", command_count);
        if self.filetype.has_length_prefix() {
            if command_count > Self::MAXIMUM_COMMAND_COUNT {
                warn!(
                    "imf file overflow; total commands: {}; written commands: {}",
                    command_count,
                    Self::MAXIMUM_COMMAND_COUNT
                );
                command_count = Self::MAXIMUM_COMMAND_COUNT;
            }
            scribe.write_u16_le((command_count * 4) as u16)?;
        }
        for &(reg, value, delay) in &self.commands[..command_count] {
            scribe.write_u8(reg)?;
            scribe.write_u8(value)?;
            scribe.write_u16_le(delay)?;
        }
        if self.filetype.has_length_prefix() && self.has_tags() {
            self.write_tag(&mut scribe)?;
        }
        Ok(())
    }

    /// The unofficial tag block: 0x1a, then title, composer, and remarks as NUL-terminated
    /// strings, then the program name padded to exactly eight bytes plus its terminator.
    fn write_tag<W: Write>(&self, scribe: &mut Scribe<W>) -> LibResult<()> {
        scribe.write_u8(Self::TAG_BYTE)?;
        scribe.write_cstr(self.title.as_deref().unwrap_or(""), 255)?;
        scribe.write_cstr(self.composer.as_deref().unwrap_or(""), 255)?;
        scribe.write_cstr(self.remarks.as_deref().unwrap_or(""), 255)?;
        let program = self
            .program
            .as_deref()
            .unwrap_or(Self::DEFAULT_TAG_PROGRAM);
        scribe.write_padded_str(program, 8)?;
        Ok(())
    }
}

/*!
The `file` module holds the on-disk formats: the two song inputs (SMF and DMX MUS), the two
instrument bank inputs (OP2 and WOPL3), and the IMF output.
!*/

use crate::byte_iter::ByteIter;
use crate::error::{LibResult, Result};
use crate::song::Song;
use snafu::ResultExt;
use std::io::Read;
use std::path::Path;

pub(crate) mod midi;
pub(crate) mod mus;
pub(crate) mod op2;
pub(crate) mod wopl;

mod imf;

pub use imf::{AdlibSong, ImfCommand, ImfFileType};

/// Loads a song file, choosing the reader by file signature (`MThd` or `MUS\x1a`).
pub fn load_song<P: AsRef<Path>>(path: P) -> Result<Song> {
    let iter = ByteIter::new_file(path).context(io!())?;
    Ok(read_song_inner(iter)?)
}

/// Reads a song from any reader, e.g. an in-memory byte image.
pub fn read_song<R: Read>(reader: R) -> Result<Song> {
    let iter = ByteIter::new(reader.bytes()).context(io!())?;
    Ok(read_song_inner(iter)?)
}

fn read_song_inner<R: Read>(mut iter: ByteIter<R>) -> LibResult<Song> {
    // The filetype registry: a match on the four-byte file signature. The chosen reader takes
    // over immediately after it.
    let signature = iter.read4().context(io!())?;
    let mut song = match &signature {
        b"MThd" => midi::read(&mut iter)?,
        b"MUS\x1a" => mus::read(&mut iter)?,
        other => invalid_format!(
            "song",
            "unrecognized song file signature '{}'",
            String::from_utf8_lossy(other)
        ),
    };
    song.sort();
    Ok(song)
}

/*!
Convert General MIDI (and id-Tech MUS) music into id Software IMF files for the Yamaha OPL2.

The pipeline is a straight line: a [`file`] reader produces a [`song::Song`], the
[`engine::MidiEngine`] walks it chronologically while tracking per-channel controller state, the
[`convert::ImfSongBuilder`] listens to the engine and accumulates OPL register writes, and the
resulting [`file::AdlibSong`] serializes itself as IMF type 0 or type 1.

```no_run
use midi2imf::convert::ImfSongBuilder;
use midi2imf::engine::MidiEngine;
use midi2imf::file::{self, ImfFileType};
use midi2imf::instruments::InstrumentCatalog;

fn main() -> midi2imf::Result<()> {
    let mut catalog = InstrumentCatalog::new();
    catalog.add_bank_file("GENMIDI.OP2")?;
    let song = file::load_song("song.mid")?;
    let mut engine = MidiEngine::new(song);
    let mut builder = ImfSongBuilder::new(&catalog, ImfFileType::Imf1);
    engine.run(&mut builder);
    builder.finish(&engine).save("song.wlf")
}
```
!*/

#[macro_use]
mod error;
#[macro_use]
mod clamp;

mod byte_iter;
mod scribe;

pub mod adlib;
pub mod convert;
pub mod core;
pub mod engine;
pub mod file;
pub mod instruments;
pub mod song;

pub use error::{Error, Result};

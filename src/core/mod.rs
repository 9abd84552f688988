/*!
The `core` module holds the small value types and scaling functions that the rest of the crate is
built on. These are MIDI-level concepts with no ties to any particular file format.
!*/

mod numbers;
mod scale;

pub mod controllers;

pub use numbers::{Channel, NoteNumber, Program, Velocity};
pub use scale::{balance_14bit, balance_14bit_inverse, calc_msb_lsb, scale_14bit};

/*!
The `adlib` module models the OPL2 register file: operator and channel register addresses, the
packed per-operator register bytes, FM instruments as loaded from bank files, and the note table
that maps MIDI note numbers onto block/F-number pairs.
!*/

use log::warn;

/// The OPL2 has nine two-operator melodic channels.
pub const OPL_CHANNELS: usize = 9;

/// Operator register offset for each channel's modulator.
pub(crate) const MODULATOR_OFFSETS: [u8; OPL_CHANNELS] = [0, 1, 2, 8, 9, 10, 16, 17, 18];

/// Operator register offset for each channel's carrier, always modulator + 3.
pub(crate) const CARRIER_OFFSETS: [u8; OPL_CHANNELS] = [3, 4, 5, 11, 12, 13, 19, 20, 21];

// Register bases. Operator-based registers are offset by the operator offsets above,
// channel-based registers by the channel number.
pub(crate) const TVSKM_REG: u8 = 0x20; // Operator: tremolo/vibrato/sustain/KSR/multiplier
pub(crate) const VOLUME_REG: u8 = 0x40; // Operator: KSL + output level
pub(crate) const ATTACK_DECAY_REG: u8 = 0x60; // Operator
pub(crate) const SUSTAIN_RELEASE_REG: u8 = 0x80; // Operator
pub(crate) const WAVEFORM_REG: u8 = 0xe0; // Operator
pub(crate) const FREQ_REG: u8 = 0xa0; // Channel: F-number low byte
pub(crate) const BLOCK_REG: u8 = 0xb0; // Channel: key-on, block, F-number high bits
pub(crate) const FEEDBACK_REG: u8 = 0xc0; // Channel: feedback + connection
pub(crate) const DRUM_REG: u8 = 0xbd; // Chip: tremolo/vibrato depth, percussion mode

/// Bit 5 of a `BLOCK_REG` value gates the envelope generator.
pub(crate) const KEY_ON_MASK: u8 = 0x20;

/// Maps MIDI note numbers onto `(block, f-number)` where
/// `f-num = freq * 2^(20 - block) / 49716`. The first 19 entries cover block 0; after that each
/// block holds one octave from 517 to 975. F# sits near the top of the 1023 limit while G is in
/// the middle at 517, so bends that cross the F#/G line are handled in the range below G and the
/// lower entry gets lifted into the higher note's block.
pub(crate) const BLOCK_FREQ_NOTE_MAP: [(u8, u16); 103] = [
    (0, 345), (0, 365), (0, 387), (0, 410), (0, 435), (0, 460),
    (0, 488), (0, 517), (0, 547), (0, 580), (0, 615), (0, 651),
    (0, 690), (0, 731), (0, 774), (0, 820), (0, 869), (0, 921),
    (0, 975), (1, 517), (1, 547), (1, 580), (1, 615), (1, 651),
    (1, 690), (1, 731), (1, 774), (1, 820), (1, 869), (1, 921),
    (1, 975), (2, 517), (2, 547), (2, 580), (2, 615), (2, 651),
    (2, 690), (2, 731), (2, 774), (2, 820), (2, 869), (2, 921),
    (2, 975), (3, 517), (3, 547), (3, 580), (3, 615), (3, 651),
    (3, 690), (3, 731), (3, 774), (3, 820), (3, 869), (3, 921),
    (3, 975), (4, 517), (4, 547), (4, 580), (4, 615), (4, 651),
    (4, 690), (4, 731), (4, 774), (4, 820), (4, 869), (4, 921),
    (4, 975), (5, 517), (5, 547), (5, 580), (5, 615), (5, 651),
    (5, 690), (5, 731), (5, 774), (5, 820), (5, 869), (5, 921),
    (5, 975), (6, 517), (6, 547), (6, 580), (6, 615), (6, 651),
    (6, 690), (6, 731), (6, 774), (6, 820), (6, 869), (6, 921),
    (6, 975), (7, 517), (7, 547), (7, 580), (7, 615), (7, 651),
    (7, 690), (7, 731), (7, 774), (7, 820), (7, 869), (7, 921),
    (7, 975),
];

/// One OPL operator as five packed register bytes. Sub-fields are exposed through shift/mask
/// accessors rather than one struct field per bit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Operator {
    /// `tvskffff`: tremolo, vibrato, sustain, KSR, frequency multiplier.
    pub(crate) tvskm: u8,
    /// `kkoooooo`: key scale level, output level.
    pub(crate) ksl_output: u8,
    /// `aaaadddd`: attack rate, decay rate.
    pub(crate) attack_decay: u8,
    /// `ssssrrrr`: sustain level, release rate.
    pub(crate) sustain_release: u8,
    /// `-----www`: waveform select.
    pub(crate) waveform_select: u8,
}

impl Operator {
    pub fn new(
        tvskm: u8,
        ksl_output: u8,
        attack_decay: u8,
        sustain_release: u8,
        waveform_select: u8,
    ) -> Self {
        Self {
            tvskm,
            ksl_output,
            attack_decay,
            sustain_release,
            waveform_select,
        }
    }

    fn bits(value: u8, shift: u8, count: u8) -> u8 {
        (value >> shift) & ((1 << count) - 1)
    }

    pub fn tremolo(&self) -> bool {
        Self::bits(self.tvskm, 7, 1) != 0
    }

    pub fn vibrato(&self) -> bool {
        Self::bits(self.tvskm, 6, 1) != 0
    }

    pub fn sustain(&self) -> bool {
        Self::bits(self.tvskm, 5, 1) != 0
    }

    pub fn ksr(&self) -> bool {
        Self::bits(self.tvskm, 4, 1) != 0
    }

    pub fn freq_mult(&self) -> u8 {
        Self::bits(self.tvskm, 0, 4)
    }

    pub fn key_scale_level(&self) -> u8 {
        Self::bits(self.ksl_output, 6, 2)
    }

    pub fn output_level(&self) -> u8 {
        Self::bits(self.ksl_output, 0, 6)
    }

    pub fn attack_rate(&self) -> u8 {
        Self::bits(self.attack_decay, 4, 4)
    }

    pub fn decay_rate(&self) -> u8 {
        Self::bits(self.attack_decay, 0, 4)
    }

    pub fn sustain_level(&self) -> u8 {
        Self::bits(self.sustain_release, 4, 4)
    }

    pub fn release_rate(&self) -> u8 {
        Self::bits(self.sustain_release, 0, 4)
    }

    pub fn waveform(&self) -> u8 {
        Self::bits(self.waveform_select, 0, 3)
    }

    /// Sets the six output-level bits. Values above 0x3f are clamped.
    pub fn set_output_level(&mut self, level: u8) {
        let level = level.min(0x3f);
        self.ksl_output = (self.ksl_output & 0xc0) | level;
    }

    /// Sets the two key-scale-level bits. Values above 3 are clamped.
    pub fn set_key_scale_level(&mut self, ksl: u8) {
        let ksl = ksl.min(3);
        self.ksl_output = (self.ksl_output & 0x3f) | (ksl << 6);
    }
}

/// One modulator/carrier pair of an instrument, along with the channel-level feedback/connection
/// byte and the note offset applied when the voice plays.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Voice {
    pub modulator: Operator,
    pub carrier: Operator,
    /// `----fffc`: feedback amount and connection. Bit 0 set means additive (AM) synthesis.
    pub feedback: u8,
    pub note_offset: i16,
}

impl Voice {
    /// True when the connection bit selects additive synthesis, in which case both operators
    /// carry the note volume.
    pub fn is_additive(&self) -> bool {
        self.feedback & 0x1 != 0
    }
}

/// An FM instrument as loaded from an OP2 or WOPL bank. Immutable once loaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instrument {
    pub name: String,
    /// When true this instrument plays `given_note` no matter which note is incoming
    /// (percussion).
    pub use_given_note: bool,
    /// When true the second voice may be layered with the first (pseudo 4-op), detuned by
    /// `fine_tuning`.
    pub use_secondary_voice: bool,
    /// Detune for the secondary voice. 0x80 is centered.
    pub fine_tuning: u8,
    pub given_note: u8,
    pub voices: Vec<Voice>,
}

impl Instrument {
    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    /// The register writes that program this instrument onto an OPL channel, excluding the two
    /// volume (`0x40`) registers, which are computed separately from the playing note's volume.
    pub(crate) fn setup_commands(&self, opl_channel: usize, voice: usize) -> [(u8, u8); 9] {
        let v = &self.voices[voice];
        let mod_op = MODULATOR_OFFSETS[opl_channel];
        let car_op = CARRIER_OFFSETS[opl_channel];
        [
            (TVSKM_REG | mod_op, v.modulator.tvskm),
            (ATTACK_DECAY_REG | mod_op, v.modulator.attack_decay),
            (SUSTAIN_RELEASE_REG | mod_op, v.modulator.sustain_release),
            (WAVEFORM_REG | mod_op, v.modulator.waveform_select),
            (TVSKM_REG | car_op, v.carrier.tvskm),
            (ATTACK_DECAY_REG | car_op, v.carrier.attack_decay),
            (SUSTAIN_RELEASE_REG | car_op, v.carrier.sustain_release),
            (WAVEFORM_REG | car_op, v.carrier.waveform_select),
            (FEEDBACK_REG | opl_channel as u8, v.feedback),
        ]
    }

    /// The note this instrument actually plays for an incoming MIDI note, clamped to 0..127 with
    /// a warning when the offset pushes it out of range.
    pub(crate) fn play_note(&self, note: u8, voice: usize) -> u8 {
        let base = if self.use_given_note {
            self.given_note
        } else {
            note
        };
        let adjusted = i32::from(base) + i32::from(self.voices[voice].note_offset);
        if adjusted < 0 || adjusted > 127 {
            warn!(
                "note {} went out of range for instrument '{}': {}",
                note, self.name, adjusted
            );
        }
        adjusted.max(0).min(127) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_bit_fields() {
        let op = Operator::new(0b1010_0111, 0b1110_1010, 0xf2, 0x8b, 0x03);
        assert!(op.tremolo());
        assert!(!op.vibrato());
        assert!(op.sustain());
        assert!(!op.ksr());
        assert_eq!(0b0111, op.freq_mult());
        assert_eq!(0b11, op.key_scale_level());
        assert_eq!(0b10_1010, op.output_level());
        assert_eq!(0xf, op.attack_rate());
        assert_eq!(0x2, op.decay_rate());
        assert_eq!(0x8, op.sustain_level());
        assert_eq!(0xb, op.release_rate());
        assert_eq!(0x3, op.waveform());
    }

    #[test]
    fn operator_setters_clamp() {
        let mut op = Operator::new(0, 0b1100_0000, 0, 0, 0);
        op.set_output_level(0xff);
        assert_eq!(0x3f, op.output_level());
        assert_eq!(0b11, op.key_scale_level());
        op.set_key_scale_level(9);
        assert_eq!(0b11, op.key_scale_level());
        op.set_key_scale_level(1);
        assert_eq!(1, op.key_scale_level());
        assert_eq!(0x3f, op.output_level());
    }

    #[test]
    fn note_map_fnum_is_monotonic_within_a_block() {
        for window in BLOCK_FREQ_NOTE_MAP.windows(2) {
            let (block_a, freq_a) = window[0];
            let (block_b, freq_b) = window[1];
            assert!(block_b >= block_a);
            if block_a == block_b {
                assert!(freq_a < freq_b);
            }
            assert!(freq_b <= 0x3ff);
            assert!(block_b <= 7);
        }
    }

    #[test]
    fn note_map_spans_eight_blocks() {
        assert_eq!(103, BLOCK_FREQ_NOTE_MAP.len());
        assert_eq!((0, 345), BLOCK_FREQ_NOTE_MAP[0]);
        assert_eq!((7, 975), BLOCK_FREQ_NOTE_MAP[102]);
        // One octave above an entry doubles the frequency: same f-num, next block.
        assert_eq!(BLOCK_FREQ_NOTE_MAP[31], (2, BLOCK_FREQ_NOTE_MAP[19].1));
    }

    #[test]
    fn carriers_are_modulators_plus_three() {
        for channel in 0..OPL_CHANNELS {
            assert_eq!(
                MODULATOR_OFFSETS[channel] + 3,
                CARRIER_OFFSETS[channel]
            );
        }
    }

    #[test]
    fn setup_commands_exclude_volume_registers() {
        let instrument = Instrument {
            voices: vec![Voice::default()],
            ..Default::default()
        };
        for (reg, _) in instrument.setup_commands(0, 0).iter() {
            assert_ne!(VOLUME_REG, reg & 0xf0);
        }
    }

    #[test]
    fn play_note_applies_offset_and_clamps() {
        let mut instrument = Instrument {
            voices: vec![Voice {
                note_offset: -12,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(48, instrument.play_note(60, 0));
        instrument.voices[0].note_offset = -100;
        assert_eq!(0, instrument.play_note(60, 0));
        instrument.use_given_note = true;
        instrument.given_note = 35;
        instrument.voices[0].note_offset = 0;
        assert_eq!(35, instrument.play_note(60, 0));
    }
}

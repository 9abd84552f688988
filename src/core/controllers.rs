//! Controller numbers the engine and converter care about. Controllers 0-31 are the MSB half of a
//! 14-bit pair whose LSB half lives 32 higher.

pub const BANK_SELECT_MSB: u8 = 0;
pub const MODULATION_WHEEL_MSB: u8 = 1;
pub const BREATH_CONTROLLER_MSB: u8 = 2;
pub const FOOT_CONTROLLER_MSB: u8 = 4;
pub const PORTAMENTO_TIME_MSB: u8 = 5;
pub const DATA_ENTRY_MSB: u8 = 6;
pub const VOLUME_MSB: u8 = 7;
pub const BALANCE_MSB: u8 = 8;
pub const PAN_MSB: u8 = 10;
pub const EXPRESSION_MSB: u8 = 11;

pub const BANK_SELECT_LSB: u8 = 32;
pub const MODULATION_WHEEL_LSB: u8 = 33;
pub const BREATH_CONTROLLER_LSB: u8 = 34;
pub const FOOT_CONTROLLER_LSB: u8 = 36;
pub const PORTAMENTO_TIME_LSB: u8 = 37;
pub const DATA_ENTRY_LSB: u8 = 38;
pub const VOLUME_LSB: u8 = 39;
pub const BALANCE_LSB: u8 = 40;
pub const PAN_LSB: u8 = 42;
pub const EXPRESSION_LSB: u8 = 43;

pub const SUSTAIN_PEDAL_SWITCH: u8 = 64;
pub const SOFT_PEDAL_SWITCH: u8 = 67;

/// Sound controller 5, the VCF cutoff. XG calls this Brightness; the converter uses it to scale
/// the modulator of FM-connected instruments.
pub const BRIGHTNESS: u8 = 74;

pub const REVERB_DEPTH: u8 = 91;
pub const CHORUS_DEPTH: u8 = 93;

pub const NRPN_LSB: u8 = 98;
pub const NRPN_MSB: u8 = 99;
pub const RPN_LSB: u8 = 100;
pub const RPN_MSB: u8 = 101;

pub const ALL_SOUND_OFF: u8 = 120;
pub const RESET_ALL_CONTROLLERS: u8 = 121;
pub const ALL_NOTES_OFF: u8 = 123;
pub const MONOPHONIC_MODE: u8 = 126;
pub const POLYPHONIC_MODE: u8 = 127;

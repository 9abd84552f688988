/*!
The `engine` module walks a sorted song chronologically, maintains the per-channel MIDI
controller state machine, and pushes derived events into an [`EventSink`]. The converter is one
such sink; the engine itself knows nothing about OPL.
!*/

use crate::core::controllers::*;
use crate::core::{balance_14bit, calc_msb_lsb, scale_14bit, Channel, Program};
use crate::song::{EventKind, MetaKind, Song, SongEvent};
use log::{debug, warn};

/// The two-controller-pair parameter protocol: which parameter number the next data-entry write
/// addresses, if any.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParameterMode {
    /// The null parameter (127, 127) is selected.
    Null,
    Registered,
    NonRegistered,
}

/// A note that is currently sounding on a MIDI channel. `adjusted_note` is the note after the
/// instrument's note offset (and given-note substitution) has been applied; key-off must find
/// the note by its original number to recover it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActiveNote {
    pub given_note: u8,
    pub velocity: u8,
    pub adjusted_note: u8,
}

/// The registered parameters this engine models, keyed by their (MSB, LSB) numbers.
const PITCH_BEND_SENSITIVITY_RPN: (u8, u8) = (0, 0);
const FINE_TUNING_RPN: (u8, u8) = (0, 1);
const COARSE_TUNING_RPN: (u8, u8) = (0, 2);
const TUNING_PROGRAM_SELECT_RPN: (u8, u8) = (0, 3);
const TUNING_BANK_SELECT_RPN: (u8, u8) = (0, 4);
const NULL_RPN: (u8, u8) = (127, 127);

/// Banks that select drum kits rather than melodic patches.
const GM_DRUM_BANK: u16 = 120 * 128;
const XG_SFX_BANK: u16 = 126 * 128;
const XG_DRUM_BANK: u16 = 127 * 128;
const DRUM_BANKS: [u16; 3] = [GM_DRUM_BANK, XG_SFX_BANK, XG_DRUM_BANK];

/// Per-channel controller and note state, derived lazily from the raw 128-entry controller
/// array as MSB/LSB pairs arrive.
#[derive(Clone, Debug)]
pub struct MidiChannelState {
    number: Channel,
    controllers: [u8; 128],
    program: Option<Program>,
    program_warned: bool,
    pitch_bend: f64,
    key_pressure: u8,
    active_notes: Vec<ActiveNote>,
    // Scalars recomputed from their MSB/LSB pairs.
    bank: u16,
    modulation_wheel: f64,
    breath_controller: f64,
    foot_controller: f64,
    portamento_time: f64,
    volume: f64,
    balance: f64,
    pan: f64,
    expression: f64,
    // Registered parameter state.
    parameter_mode: ParameterMode,
    rpn_values: [((u8, u8), [u8; 2]); 5],
    pitch_bend_sensitivity: f64,
    tuning: f64,
    default_pitch_bend_sensitivity: u8,
}

impl MidiChannelState {
    fn new(number: Channel, default_pitch_bend_sensitivity: u8) -> Self {
        let mut state = Self {
            number,
            controllers: [0; 128],
            program: None,
            program_warned: false,
            pitch_bend: 0.0,
            key_pressure: 127,
            active_notes: Vec::new(),
            bank: 0,
            modulation_wheel: 0.0,
            breath_controller: 0.0,
            foot_controller: 0.0,
            portamento_time: 0.0,
            volume: 0.0,
            balance: 0.0,
            pan: 0.0,
            expression: 0.0,
            parameter_mode: ParameterMode::Null,
            rpn_values: [
                (PITCH_BEND_SENSITIVITY_RPN, [0, 0]),
                (FINE_TUNING_RPN, [0, 0]),
                (COARSE_TUNING_RPN, [0, 0]),
                (TUNING_PROGRAM_SELECT_RPN, [0, 0]),
                (TUNING_BANK_SELECT_RPN, [0, 0]),
            ],
            pitch_bend_sensitivity: 0.0,
            tuning: 0.0,
            default_pitch_bend_sensitivity,
        };
        state.reset_controllers();
        state
    }

    /// Returns the channel to its documented defaults: volume 100/127, balance and pan centered,
    /// expression full, brightness full, null RPN selected, pitch-bend range at the default.
    pub fn reset_controllers(&mut self) {
        self.controllers = [0; 128];
        self.bank = 0;
        self.modulation_wheel = 0.0;
        self.breath_controller = 0.0;
        self.foot_controller = 0.0;
        self.portamento_time = 0.0;
        self.volume = 0.0;
        self.balance = 0.0;
        self.pan = 0.0;
        self.expression = 0.0;
        for entry in self.rpn_values.iter_mut() {
            entry.1 = [0, 0];
        }
        self.set_controller(VOLUME_MSB, 100);
        self.set_controller(BALANCE_MSB, 64);
        self.set_controller(PAN_MSB, 64);
        self.set_controller(BRIGHTNESS, 127);
        self.set_controller(EXPRESSION_MSB, 127);
        self.set_controller(RPN_MSB, 127);
        self.set_controller(RPN_LSB, 127);
        self.set_controller(NRPN_MSB, 127);
        self.set_controller(NRPN_LSB, 127);
        let default_sensitivity = self.default_pitch_bend_sensitivity;
        self.store_rpn(PITCH_BEND_SENSITIVITY_RPN, Some(default_sensitivity), Some(0));
        self.store_rpn(FINE_TUNING_RPN, Some(64), Some(0)); // centered, A440
        self.store_rpn(COARSE_TUNING_RPN, Some(64), Some(0)); // centered
    }

    /// Stores a controller value and updates whatever scalar is derived from it.
    pub fn set_controller(&mut self, controller: u8, value: u8) {
        let controller = controller & 0x7f;
        let value = value & 0x7f;
        self.controllers[controller as usize] = value;
        match controller {
            BANK_SELECT_MSB | BANK_SELECT_LSB => {
                self.bank = self.msb_lsb(BANK_SELECT_MSB, BANK_SELECT_LSB);
            }
            MODULATION_WHEEL_MSB | MODULATION_WHEEL_LSB => {
                self.modulation_wheel =
                    scale_14bit(self.msb_lsb(MODULATION_WHEEL_MSB, MODULATION_WHEEL_LSB));
            }
            BREATH_CONTROLLER_MSB | BREATH_CONTROLLER_LSB => {
                self.breath_controller =
                    scale_14bit(self.msb_lsb(BREATH_CONTROLLER_MSB, BREATH_CONTROLLER_LSB));
            }
            FOOT_CONTROLLER_MSB | FOOT_CONTROLLER_LSB => {
                self.foot_controller =
                    scale_14bit(self.msb_lsb(FOOT_CONTROLLER_MSB, FOOT_CONTROLLER_LSB));
            }
            PORTAMENTO_TIME_MSB | PORTAMENTO_TIME_LSB => {
                self.portamento_time =
                    scale_14bit(self.msb_lsb(PORTAMENTO_TIME_MSB, PORTAMENTO_TIME_LSB));
            }
            VOLUME_MSB | VOLUME_LSB => {
                self.volume = scale_14bit(self.msb_lsb(VOLUME_MSB, VOLUME_LSB));
            }
            BALANCE_MSB | BALANCE_LSB => {
                self.balance = balance_14bit(self.msb_lsb(BALANCE_MSB, BALANCE_LSB));
            }
            PAN_MSB | PAN_LSB => {
                self.pan = balance_14bit(self.msb_lsb(PAN_MSB, PAN_LSB));
            }
            EXPRESSION_MSB | EXPRESSION_LSB => {
                self.expression = scale_14bit(self.msb_lsb(EXPRESSION_MSB, EXPRESSION_LSB));
            }
            RPN_MSB | RPN_LSB => {
                self.parameter_mode = if self.selected_rpn() == NULL_RPN {
                    ParameterMode::Null
                } else {
                    ParameterMode::Registered
                };
            }
            NRPN_MSB | NRPN_LSB => {
                let selected = (self.controllers[NRPN_MSB as usize], self.controllers[NRPN_LSB as usize]);
                self.parameter_mode = if selected == NULL_RPN {
                    ParameterMode::Null
                } else {
                    ParameterMode::NonRegistered
                };
            }
            DATA_ENTRY_MSB => self.data_entry(Some(value), None),
            DATA_ENTRY_LSB => self.data_entry(None, Some(value)),
            RESET_ALL_CONTROLLERS => self.reset_controllers(),
            _ => {}
        }
    }

    fn data_entry(&mut self, msb: Option<u8>, lsb: Option<u8>) {
        match self.parameter_mode {
            ParameterMode::Null => {
                warn!(
                    "channel {}: data entry outside of an RPN or NRPN selection",
                    self.number
                );
            }
            // Non-registered parameters are vendor-specific; their data is ignored.
            ParameterMode::NonRegistered => {}
            ParameterMode::Registered => {
                let rpn = self.selected_rpn();
                self.store_rpn(rpn, msb, lsb);
            }
        }
    }

    fn selected_rpn(&self) -> (u8, u8) {
        (
            self.controllers[RPN_MSB as usize],
            self.controllers[RPN_LSB as usize],
        )
    }

    /// Writes one or both halves of a registered parameter and refreshes the values derived from
    /// it.
    fn store_rpn(&mut self, rpn: (u8, u8), msb: Option<u8>, lsb: Option<u8>) {
        match self.rpn_values.iter_mut().find(|(key, _)| *key == rpn) {
            Some((_, value)) => {
                if let Some(msb) = msb {
                    value[0] = msb;
                }
                if let Some(lsb) = lsb {
                    value[1] = lsb;
                }
            }
            None => {
                debug!("channel {}: ignoring unknown RPN {:?}", self.number, rpn);
                return;
            }
        }
        match rpn {
            PITCH_BEND_SENSITIVITY_RPN => {
                // The MIDI spec calls the LSB "cents", but 127 equals 100 cents.
                let [semitones, cents] = self.rpn_value(PITCH_BEND_SENSITIVITY_RPN);
                self.pitch_bend_sensitivity = f64::from(semitones) + f64::from(cents) / 127.0;
            }
            FINE_TUNING_RPN | COARSE_TUNING_RPN => {
                let [msb, lsb] = self.rpn_value(FINE_TUNING_RPN);
                let fine = balance_14bit(calc_msb_lsb(msb, lsb));
                let coarse = f64::from(self.rpn_value(COARSE_TUNING_RPN)[0]) - 64.0;
                self.tuning = coarse + fine;
            }
            _ => {}
        }
    }

    fn rpn_value(&self, rpn: (u8, u8)) -> [u8; 2] {
        self.rpn_values
            .iter()
            .find(|(key, _)| *key == rpn)
            .map(|(_, value)| *value)
            .unwrap_or([0, 0])
    }

    fn msb_lsb(&self, msb: u8, lsb: u8) -> u16 {
        calc_msb_lsb(
            self.controllers[msb as usize],
            self.controllers[lsb as usize],
        )
    }

    pub fn number(&self) -> Channel {
        self.number
    }

    /// The raw 0..127 value of any controller.
    pub fn controller(&self, controller: u8) -> u8 {
        self.controllers[(controller & 0x7f) as usize]
    }

    /// The assembled 14-bit bank number.
    pub fn bank(&self) -> u16 {
        self.bank
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn expression(&self) -> f64 {
        self.expression
    }

    pub fn pan(&self) -> f64 {
        self.pan
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn modulation_wheel(&self) -> f64 {
        self.modulation_wheel
    }

    pub fn pitch_bend(&self) -> f64 {
        self.pitch_bend
    }

    pub fn pitch_bend_sensitivity(&self) -> f64 {
        self.pitch_bend_sensitivity
    }

    /// The pitch bend scaled by the channel's bend sensitivity, in semitones.
    pub fn scaled_pitch_bend(&self) -> f64 {
        self.pitch_bend * self.pitch_bend_sensitivity
    }

    /// Coarse plus fine tuning in semitones, 0 at center.
    pub fn tuning(&self) -> f64 {
        self.tuning
    }

    pub fn key_pressure(&self) -> u8 {
        self.key_pressure
    }

    pub fn program(&self) -> Option<Program> {
        self.program
    }

    /// The channel's program, defaulting to 0 (with a one-time warning) when no program change
    /// was ever seen.
    pub fn program_or_default(&mut self) -> Program {
        match self.program {
            Some(program) => program,
            None => {
                if !self.program_warned {
                    warn!(
                        "no instrument assigned to channel {}, defaulting to 0",
                        self.number
                    );
                    self.program_warned = true;
                }
                let program = Program::new(0);
                self.program = Some(program);
                program
            }
        }
    }

    pub fn active_notes(&self) -> &[ActiveNote] {
        &self.active_notes
    }

    pub fn push_active_note(&mut self, note: ActiveNote) {
        self.active_notes.push(note);
    }

    /// Removes and returns the first active note matching the original MIDI note number.
    pub fn remove_active_note(&mut self, given_note: u8) -> Option<ActiveNote> {
        let index = self
            .active_notes
            .iter()
            .position(|n| n.given_note == given_note)?;
        Some(self.active_notes.remove(index))
    }
}

/// A derived note event.
#[derive(Clone, Copy, Debug)]
pub struct NoteEvent {
    pub time: f64,
    pub track: u32,
    pub channel: Channel,
    pub note: u8,
    pub velocity: u8,
}

/// A derived controller-change event. The channel state has already been updated when the sink
/// sees this.
#[derive(Clone, Copy, Debug)]
pub struct ControllerEvent {
    pub time: f64,
    pub channel: Channel,
    pub controller: u8,
    pub value: u8,
}

/// A derived pitch-bend event. The new normalized amount is already stored on the channel.
#[derive(Clone, Copy, Debug)]
pub struct BendEvent {
    pub time: f64,
    pub channel: Channel,
}

/// Receives derived events from [`MidiEngine::run`]. One method per variant; all of them default
/// to doing nothing so sinks implement only what they react to.
///
/// Note handlers receive the event's channel state mutably because the sink owns note tracking:
/// the converter appends to and removes from the channel's active-note list.
#[allow(unused_variables)]
pub trait EventSink {
    fn note_on(&mut self, event: &NoteEvent, channel: &mut MidiChannelState, percussion: bool) {}
    fn note_off(&mut self, event: &NoteEvent, channel: &mut MidiChannelState, percussion: bool) {}
    fn polyphonic_key_pressure(&mut self, event: &NoteEvent, channel: &mut MidiChannelState) {}
    fn controller_change(
        &mut self,
        event: &ControllerEvent,
        channel: &mut MidiChannelState,
        percussion: bool,
    ) {
    }
    fn program_change(&mut self, time: f64, channel: &mut MidiChannelState) {}
    fn channel_key_pressure(&mut self, time: f64, channel: &mut MidiChannelState) {}
    fn pitch_bend(&mut self, event: &BendEvent, channel: &mut MidiChannelState, percussion: bool) {
    }
    fn sysex(&mut self, event: &SongEvent) {}
    fn meta(&mut self, event: &SongEvent) {}
    fn tempo_change(&mut self, time: f64, bpm: f64) {}
    /// Fired once after the last event, carrying the last event's time.
    fn end_of_song(&mut self, time: f64) {}
}

/// Walks the sorted event stream, keeps the sixteen channel states current, and notifies the
/// sink. Duplicate program, pitch-bend, and channel-pressure values are suppressed.
pub struct MidiEngine {
    song: Song,
    channels: Vec<MidiChannelState>,
}

impl MidiEngine {
    pub fn new(mut song: Song) -> Self {
        song.sort();
        let default_sensitivity = song.default_pitch_bend_sensitivity() as u8;
        let channels = (0..16u8)
            .map(|number| MidiChannelState::new(Channel::new(number), default_sensitivity))
            .collect();
        Self { song, channels }
    }

    pub fn channels(&self) -> &[MidiChannelState] {
        &self.channels
    }

    /// A channel plays percussion when it is the format's percussion channel or its bank selects
    /// a drum kit.
    pub fn is_percussion_channel(&self, channel: Channel) -> bool {
        channel == self.song.percussion_channel()
            || DRUM_BANKS.contains(&self.channels[channel.get() as usize].bank())
    }

    /// Dispatches every event, then fires `end_of_song`.
    pub fn run<S: EventSink>(&mut self, sink: &mut S) {
        let song = &self.song;
        let channels = &mut self.channels;
        let percussion_channel = song.percussion_channel();
        let is_percussion = |channels: &[MidiChannelState], channel: Channel| {
            channel == percussion_channel
                || DRUM_BANKS.contains(&channels[channel.get() as usize].bank())
        };
        for event in song.events() {
            match (&event.kind, event.channel) {
                (EventKind::NoteOn { note, velocity }, Some(channel)) => {
                    let note_event = NoteEvent {
                        time: event.time,
                        track: event.track,
                        channel,
                        note: note.get(),
                        velocity: velocity.get(),
                    };
                    let percussion = is_percussion(channels, channel);
                    let state = &mut channels[channel.get() as usize];
                    if velocity.get() == 0 {
                        sink.note_off(&note_event, state, percussion);
                    } else {
                        sink.note_on(&note_event, state, percussion);
                    }
                }
                (EventKind::NoteOff { note, velocity }, Some(channel)) => {
                    let note_event = NoteEvent {
                        time: event.time,
                        track: event.track,
                        channel,
                        note: note.get(),
                        velocity: velocity.get(),
                    };
                    let percussion = is_percussion(channels, channel);
                    let state = &mut channels[channel.get() as usize];
                    sink.note_off(&note_event, state, percussion);
                }
                (EventKind::PolyphonicKeyPressure { note, pressure }, Some(channel)) => {
                    let note_event = NoteEvent {
                        time: event.time,
                        track: event.track,
                        channel,
                        note: note.get(),
                        velocity: *pressure,
                    };
                    let state = &mut channels[channel.get() as usize];
                    sink.polyphonic_key_pressure(&note_event, state);
                }
                (EventKind::ControllerChange { controller, value }, Some(channel)) => {
                    let state = &mut channels[channel.get() as usize];
                    state.set_controller(*controller, *value);
                    let percussion = is_percussion(channels, channel);
                    let state = &mut channels[channel.get() as usize];
                    sink.controller_change(
                        &ControllerEvent {
                            time: event.time,
                            channel,
                            controller: *controller,
                            value: *value,
                        },
                        state,
                        percussion,
                    );
                }
                (EventKind::ProgramChange { program }, Some(channel)) => {
                    let state = &mut channels[channel.get() as usize];
                    // Only notify when the value changes.
                    if state.program != Some(*program) {
                        state.program = Some(*program);
                        sink.program_change(event.time, state);
                    }
                }
                (EventKind::ChannelKeyPressure { pressure }, Some(channel)) => {
                    let state = &mut channels[channel.get() as usize];
                    if state.key_pressure != *pressure {
                        state.key_pressure = *pressure;
                        sink.channel_key_pressure(event.time, state);
                    }
                }
                (EventKind::PitchBend { amount }, Some(channel)) => {
                    let percussion = is_percussion(channels, channel);
                    let state = &mut channels[channel.get() as usize];
                    if (state.pitch_bend - *amount).abs() > f64::EPSILON {
                        state.pitch_bend = *amount;
                        sink.pitch_bend(
                            &BendEvent {
                                time: event.time,
                                channel,
                            },
                            state,
                            percussion,
                        );
                    }
                }
                (EventKind::SysexF0 { .. }, _) | (EventKind::SysexF7 { .. }, _) => {
                    sink.sysex(event)
                }
                (EventKind::Meta(meta), _) => {
                    if let MetaKind::SetTempo { bpm } = meta {
                        sink.tempo_change(event.time, *bpm);
                    }
                    sink.meta(event);
                }
                (kind, None) => {
                    warn!("channel event without a channel: {:?}", kind);
                }
            }
        }
        sink.end_of_song(song.last_time());
    }
}

// src/dispatch/midi.rs
//
// Decoder for MIDI-category messages. Recognises NoteOn, NoteOff and
// ControlChange, each with three non-negative integers. Text matching none
// of them is ignored.

use super::grammar::match_command;

/// Downstream consumer of decoded MIDI actions
pub trait MidiSink: Send {
    fn note_on(&mut self, channel: u32, note: u32, velocity: u32);
    fn note_off(&mut self, channel: u32, note: u32, velocity: u32);
    fn control_change(&mut self, channel: u32, controller: u32, value: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiCommand {
    NoteOn(u32, u32, u32),
    NoteOff(u32, u32, u32),
    ControlChange(u32, u32, u32),
}

impl MidiCommand {
    pub fn apply(self, sink: &mut dyn MidiSink) {
        match self {
            MidiCommand::NoteOn(a, b, c) => sink.note_on(a, b, c),
            MidiCommand::NoteOff(a, b, c) => sink.note_off(a, b, c),
            MidiCommand::ControlChange(a, b, c) => sink.control_change(a, b, c),
        }
    }
}

fn triple(text: &str, keyword: &str) -> Option<(u32, u32, u32)> {
    let [a, b, c] = match_command::<3>(text, keyword, false)?;
    Some((
        u32::try_from(a).ok()?,
        u32::try_from(b).ok()?,
        u32::try_from(c).ok()?,
    ))
}

/// Every command found in `text`, in NoteOn, NoteOff, ControlChange order.
/// The three grammars are checked independently.
pub fn parse(text: &str) -> Vec<MidiCommand> {
    let mut commands = Vec::new();
    if let Some((a, b, c)) = triple(text, "NoteOn") {
        commands.push(MidiCommand::NoteOn(a, b, c));
    }
    if let Some((a, b, c)) = triple(text, "NoteOff") {
        commands.push(MidiCommand::NoteOff(a, b, c));
    }
    if let Some((a, b, c)) = triple(text, "ControlChange") {
        commands.push(MidiCommand::ControlChange(a, b, c));
    }
    commands
}

pub fn decode(text: &str, sink: &mut dyn MidiSink) {
    for command in parse(text) {
        command.apply(sink);
    }
}

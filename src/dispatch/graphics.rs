// src/dispatch/graphics.rs
//
// Decoder for Graphics-category messages: tilt (Pitch, Roll) and the two
// knobs. Unmatched text is ignored.

use super::grammar::match_command;

/// Downstream consumer of decoded Graphics actions
pub trait GraphicsSink: Send {
    fn pitch(&mut self, degrees: i32);
    fn roll(&mut self, degrees: i32);
    fn knob0(&mut self, value: u32);
    fn knob1(&mut self, value: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsCommand {
    Pitch(i32),
    Roll(i32),
    Knob0(u32),
    Knob1(u32),
}

impl GraphicsCommand {
    pub fn apply(self, sink: &mut dyn GraphicsSink) {
        match self {
            GraphicsCommand::Pitch(v) => sink.pitch(v),
            GraphicsCommand::Roll(v) => sink.roll(v),
            GraphicsCommand::Knob0(v) => sink.knob0(v),
            GraphicsCommand::Knob1(v) => sink.knob1(v),
        }
    }
}

fn signed(text: &str, keyword: &str) -> Option<i32> {
    let [v] = match_command::<1>(text, keyword, true)?;
    i32::try_from(v).ok()
}

/// Every command found in `text`, in Pitch, Roll, Knob order.
pub fn parse(text: &str) -> Vec<GraphicsCommand> {
    let mut commands = Vec::new();
    if let Some(v) = signed(text, "Pitch") {
        commands.push(GraphicsCommand::Pitch(v));
    }
    if let Some(v) = signed(text, "Roll") {
        commands.push(GraphicsCommand::Roll(v));
    }
    if let Some([index, value]) = match_command::<2>(text, "Knob", false) {
        // Only knobs 0 and 1 exist
        match (index, u32::try_from(value)) {
            (0, Ok(v)) => commands.push(GraphicsCommand::Knob0(v)),
            (1, Ok(v)) => commands.push(GraphicsCommand::Knob1(v)),
            _ => {}
        }
    }
    commands
}

pub fn decode(text: &str, sink: &mut dyn GraphicsSink) {
    for command in parse(text) {
        command.apply(sink);
    }
}

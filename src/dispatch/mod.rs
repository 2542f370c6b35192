// src/dispatch/mod.rs
//
// Text dispatcher: decodes tokens, classifies messages by prefix and routes
// them to the display, the category decoders and the catch-all custom sink.
//
// Routing rules:
// - The display shows the latest message whose category is enabled
// - MIDI and Graphics decoders only see enabled, matching messages
// - The custom sink sees every decoded message regardless of filters

pub mod filter;
pub(crate) mod grammar;
pub mod graphics;
pub mod midi;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::LinkError;

pub use filter::FilterState;
pub use graphics::{GraphicsCommand, GraphicsSink};
pub use midi::{MidiCommand, MidiSink};

// ============================================================================
// Types
// ============================================================================

/// Message category, derived from the message prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Midi,
    Graphics,
    Other,
}

impl Category {
    pub fn classify(message: &str) -> Category {
        if message.starts_with("MIDI") {
            Category::Midi
        } else if message.starts_with("Graphics") {
            Category::Graphics
        } else {
            Category::Other
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Midi => write!(f, "MIDI"),
            Category::Graphics => write!(f, "Graphics"),
            Category::Other => write!(f, "Other"),
        }
    }
}

/// Presents the latest message. Each call replaces the previous one.
pub trait DisplaySink: Send {
    fn show(&mut self, message: &str);
}

/// Receives every dispatched message, independent of the filters
pub trait CustomSink: Send {
    fn receive(&mut self, message: &str);
}

impl<F> CustomSink for F
where
    F: FnMut(&str) + Send,
{
    fn receive(&mut self, message: &str) {
        self(message)
    }
}

/// Custom sink forwarding owned messages into a tokio channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        ChannelSink { tx }
    }
}

impl CustomSink for ChannelSink {
    fn receive(&mut self, message: &str) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(message.to_string());
    }
}

/// Decode a token to its message form: strict UTF-8, with surrounding
/// whitespace and byte order marks trimmed.
pub fn decode_token(token: &[u8]) -> Result<&str, LinkError> {
    std::str::from_utf8(token)
        .map(|text| text.trim_matches(|c: char| c.is_whitespace() || c == '\u{FEFF}'))
        .map_err(|source| LinkError::Decode {
            len: token.len(),
            source,
        })
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub dropped: u64,
}

pub struct TextDispatcher {
    filters: Arc<FilterState>,
    display: Option<Box<dyn DisplaySink>>,
    midi: Option<Box<dyn MidiSink>>,
    graphics: Option<Box<dyn GraphicsSink>>,
    custom: Option<Box<dyn CustomSink>>,
    stats: DispatchStats,
}

impl TextDispatcher {
    pub fn new(filters: Arc<FilterState>) -> Self {
        TextDispatcher {
            filters,
            display: None,
            midi: None,
            graphics: None,
            custom: None,
            stats: DispatchStats::default(),
        }
    }

    pub fn filters(&self) -> &Arc<FilterState> {
        &self.filters
    }

    pub fn set_display(&mut self, sink: impl DisplaySink + 'static) {
        self.display = Some(Box::new(sink));
    }

    pub fn set_midi(&mut self, sink: impl MidiSink + 'static) {
        self.midi = Some(Box::new(sink));
    }

    pub fn set_graphics(&mut self, sink: impl GraphicsSink + 'static) {
        self.graphics = Some(Box::new(sink));
    }

    pub fn set_custom(&mut self, sink: impl CustomSink + 'static) {
        self.custom = Some(Box::new(sink));
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Decode and dispatch one token. A malformed token is logged, counted
    /// and returned as an error; the dispatcher stays usable for the next one.
    pub fn handle_token(&mut self, token: &[u8]) -> Result<(), LinkError> {
        match decode_token(token) {
            Ok(message) => {
                self.dispatch(message);
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(len = token.len(), "dropping malformed token: {}", e);
                Err(e)
            }
        }
    }

    pub fn dispatch(&mut self, message: &str) {
        let category = Category::classify(message);
        // Read once so a concurrent flip cannot split this message's routing
        let accepted = self.filters.accepts(category);
        trace!(%category, accepted, message, "dispatch");

        self.stats.dispatched += 1;

        if accepted {
            if let Some(display) = self.display.as_mut() {
                display.show(message);
            }
        }

        if let Some(custom) = self.custom.as_mut() {
            custom.receive(message);
        }

        if !accepted {
            return;
        }
        match category {
            Category::Midi => {
                if let Some(midi) = self.midi.as_deref_mut() {
                    midi::decode(message, midi);
                }
            }
            Category::Graphics => {
                if let Some(graphics) = self.graphics.as_deref_mut() {
                    graphics::decode(message, graphics);
                }
            }
            Category::Other => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Everything the dispatcher delivered, in order
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Seen {
        Display(String),
        Custom(String),
        Midi(MidiCommand),
        Graphics(GraphicsCommand),
    }

    #[derive(Clone, Default)]
    pub(crate) struct Recorder(pub Arc<Mutex<Vec<Seen>>>);

    impl Recorder {
        pub(crate) fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        fn push(&self, seen: Seen) {
            self.0.lock().unwrap().push(seen);
        }
    }

    impl DisplaySink for Recorder {
        fn show(&mut self, message: &str) {
            self.push(Seen::Display(message.to_string()));
        }
    }

    impl CustomSink for Recorder {
        fn receive(&mut self, message: &str) {
            self.push(Seen::Custom(message.to_string()));
        }
    }

    impl MidiSink for Recorder {
        fn note_on(&mut self, a: u32, b: u32, c: u32) {
            self.push(Seen::Midi(MidiCommand::NoteOn(a, b, c)));
        }
        fn note_off(&mut self, a: u32, b: u32, c: u32) {
            self.push(Seen::Midi(MidiCommand::NoteOff(a, b, c)));
        }
        fn control_change(&mut self, a: u32, b: u32, c: u32) {
            self.push(Seen::Midi(MidiCommand::ControlChange(a, b, c)));
        }
    }

    impl GraphicsSink for Recorder {
        fn pitch(&mut self, v: i32) {
            self.push(Seen::Graphics(GraphicsCommand::Pitch(v)));
        }
        fn roll(&mut self, v: i32) {
            self.push(Seen::Graphics(GraphicsCommand::Roll(v)));
        }
        fn knob0(&mut self, v: u32) {
            self.push(Seen::Graphics(GraphicsCommand::Knob0(v)));
        }
        fn knob1(&mut self, v: u32) {
            self.push(Seen::Graphics(GraphicsCommand::Knob1(v)));
        }
    }

    pub(crate) fn recording_dispatcher(filters: Arc<FilterState>) -> (TextDispatcher, Recorder) {
        let recorder = Recorder::default();
        let mut dispatcher = TextDispatcher::new(filters);
        dispatcher.set_display(recorder.clone());
        dispatcher.set_custom(recorder.clone());
        dispatcher.set_midi(recorder.clone());
        dispatcher.set_graphics(recorder.clone());
        (dispatcher, recorder)
    }

    #[test]
    fn test_classify() {
        assert_eq!(Category::classify("MIDI NoteOn 1 2 3"), Category::Midi);
        assert_eq!(Category::classify("MIDIx"), Category::Midi);
        assert_eq!(Category::classify("Graphics Roll 1"), Category::Graphics);
        assert_eq!(Category::classify(" MIDI"), Category::Other);
        assert_eq!(Category::classify(""), Category::Other);
    }

    #[test]
    fn test_midi_message_reaches_all_sinks() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());
        dispatcher.handle_token(b"MIDI NoteOn 1 2 3\r").unwrap();
        assert_eq!(
            recorder.take(),
            vec![
                Seen::Display("MIDI NoteOn 1 2 3".into()),
                Seen::Custom("MIDI NoteOn 1 2 3".into()),
                Seen::Midi(MidiCommand::NoteOn(1, 2, 3)),
            ]
        );
    }

    #[test]
    fn test_byte_order_mark_is_trimmed() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());
        dispatcher
            .handle_token("\u{FEFF}MIDI NoteOn 1 2 3 \u{FEFF}".as_bytes())
            .unwrap();
        assert_eq!(
            recorder.take(),
            vec![
                Seen::Display("MIDI NoteOn 1 2 3".into()),
                Seen::Custom("MIDI NoteOn 1 2 3".into()),
                Seen::Midi(MidiCommand::NoteOn(1, 2, 3)),
            ]
        );
    }

    #[test]
    fn test_midi_filter_gates_display_and_decoder_only() {
        let filters = Arc::new(FilterState::default());
        filters.set(Category::Midi, false);
        let (mut dispatcher, recorder) = recording_dispatcher(filters);

        dispatcher.dispatch("MIDIx");
        dispatcher.dispatch("MIDI NoteOn 1 2 3");
        assert_eq!(
            recorder.take(),
            vec![
                Seen::Custom("MIDIx".into()),
                Seen::Custom("MIDI NoteOn 1 2 3".into()),
            ]
        );
    }

    #[test]
    fn test_filter_flip_applies_to_next_message() {
        let filters = Arc::new(FilterState::default());
        let (mut dispatcher, recorder) = recording_dispatcher(filters.clone());

        dispatcher.dispatch("temp=21");
        filters.set(Category::Other, false);
        dispatcher.dispatch("temp=22");
        assert_eq!(
            recorder.take(),
            vec![
                Seen::Display("temp=21".into()),
                Seen::Custom("temp=21".into()),
                Seen::Custom("temp=22".into()),
            ]
        );
    }

    #[test]
    fn test_graphics_decoding() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());
        dispatcher.dispatch("Graphics Knob 1 40");
        assert!(recorder
            .take()
            .contains(&Seen::Graphics(GraphicsCommand::Knob1(40))));
    }

    #[test]
    fn test_unprefixed_commands_are_not_decoded() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());
        dispatcher.dispatch("Pitch -12");
        dispatcher.dispatch("NoteOn 1 2 3");
        assert!(recorder
            .take()
            .iter()
            .all(|s| matches!(s, Seen::Display(_) | Seen::Custom(_))));
    }

    #[test]
    fn test_empty_token_is_other() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());
        dispatcher.handle_token(b"").unwrap();
        assert_eq!(
            recorder.take(),
            vec![Seen::Display(String::new()), Seen::Custom(String::new())]
        );
    }

    #[test]
    fn test_malformed_token_is_dropped_and_next_processed() {
        let (mut dispatcher, recorder) = recording_dispatcher(Arc::default());

        let err = dispatcher.handle_token(&[b'M', 0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, LinkError::Decode { len: 3, .. }));
        assert!(recorder.take().is_empty());

        dispatcher.handle_token(b"MIDI NoteOff 4 5 6").unwrap();
        assert!(recorder
            .take()
            .contains(&Seen::Midi(MidiCommand::NoteOff(4, 5, 6))));
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                dispatched: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_missing_sinks_are_skipped() {
        let mut dispatcher = TextDispatcher::new(Arc::default());
        dispatcher.dispatch("MIDI NoteOn 1 2 3");
        dispatcher.dispatch("Graphics Pitch 1");
        assert_eq!(dispatcher.stats().dispatched, 2);
    }

    #[test]
    fn test_closure_and_channel_custom_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut dispatcher = TextDispatcher::new(Arc::new(FilterState::new(false, false, false)));
        dispatcher.set_custom(move |m: &str| seen_clone.lock().unwrap().push(m.to_string()));
        dispatcher.dispatch("a=1,b=2");
        assert_eq!(*seen.lock().unwrap(), vec!["a=1,b=2".to_string()]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.set_custom(ChannelSink::new(tx));
        dispatcher.dispatch("x=3");
        assert_eq!(rx.try_recv().unwrap(), "x=3");
    }
}

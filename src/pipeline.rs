// src/pipeline.rs
//
// The merge point shared by every open session: one Tokenizer feeding one
// TextDispatcher. Each chunk is processed atomically under the lock, so bytes
// from two transports interleave at chunk granularity.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dispatch::{FilterState, TextDispatcher};
use crate::error::LinkError;
use crate::framer::Tokenizer;

struct Inner {
    tokenizer: Tokenizer,
    dispatcher: TextDispatcher,
}

pub struct Pipeline {
    inner: Mutex<Inner>,
    filters: Arc<FilterState>,
}

impl Pipeline {
    pub fn new(dispatcher: TextDispatcher) -> Self {
        let filters = dispatcher.filters().clone();
        Pipeline {
            inner: Mutex::new(Inner {
                tokenizer: Tokenizer::default(),
                dispatcher,
            }),
            filters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking sink must not wedge every later chunk
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tokenize `chunk` and dispatch every completed token. Decode failures
    /// are returned; they never stop the remaining tokens.
    pub fn feed(&self, chunk: &[u8]) -> Vec<LinkError> {
        let mut failures = Vec::new();
        let mut guard = self.lock();
        let Inner {
            tokenizer,
            dispatcher,
        } = &mut *guard;
        tokenizer.feed_with(chunk, |token| {
            if let Err(e) = dispatcher.handle_token(token.as_bytes()) {
                failures.push(e);
            }
        });
        failures
    }

    /// Run `f` against the dispatcher, e.g. to attach sinks.
    pub fn with_dispatcher<R>(&self, f: impl FnOnce(&mut TextDispatcher) -> R) -> R {
        f(&mut self.lock().dispatcher)
    }

    pub fn filters(&self) -> &Arc<FilterState> {
        &self.filters
    }

    pub fn pending_len(&self) -> usize {
        self.lock().tokenizer.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{recording_dispatcher, Seen};
    use crate::dispatch::{Category, GraphicsCommand};

    #[test]
    fn test_pitch_roll_scenario() {
        let (dispatcher, recorder) = recording_dispatcher(Arc::default());
        let pipeline = Pipeline::new(dispatcher);

        assert!(pipeline.feed(b"Graphics Pitch -12\nGraphics Roll 5\n").is_empty());
        let graphics: Vec<_> = recorder
            .take()
            .into_iter()
            .filter(|s| matches!(s, Seen::Graphics(_)))
            .collect();
        assert_eq!(
            graphics,
            vec![
                Seen::Graphics(GraphicsCommand::Pitch(-12)),
                Seen::Graphics(GraphicsCommand::Roll(5)),
            ]
        );
    }

    #[test]
    fn test_messages_split_across_chunks() {
        let (dispatcher, recorder) = recording_dispatcher(Arc::default());
        let pipeline = Pipeline::new(dispatcher);

        pipeline.feed(b"Pitch -");
        assert!(recorder.take().is_empty());
        assert_eq!(pipeline.pending_len(), 7);

        pipeline.feed(b"12\nRoll 5\n");
        assert_eq!(
            recorder.take(),
            vec![
                Seen::Display("Pitch -12".into()),
                Seen::Custom("Pitch -12".into()),
                Seen::Display("Roll 5".into()),
                Seen::Custom("Roll 5".into()),
            ]
        );
    }

    #[test]
    fn test_malformed_token_does_not_lose_following_tokens() {
        let (dispatcher, recorder) = recording_dispatcher(Arc::default());
        let pipeline = Pipeline::new(dispatcher);

        let failures = pipeline.feed(b"ok 1\n\xFF\xFE\nok 2\n");
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], LinkError::Decode { len: 2, .. }));

        let customs: Vec<_> = recorder
            .take()
            .into_iter()
            .filter(|s| matches!(s, Seen::Custom(_)))
            .collect();
        assert_eq!(
            customs,
            vec![Seen::Custom("ok 1".into()), Seen::Custom("ok 2".into())]
        );
    }

    #[test]
    fn test_filters_shared_with_dispatcher() {
        let filters = Arc::new(crate::dispatch::FilterState::default());
        let (dispatcher, _recorder) = recording_dispatcher(filters.clone());
        let pipeline = Pipeline::new(dispatcher);
        pipeline.filters().set(Category::Other, false);
        assert!(!filters.accepts(Category::Other));
    }
}

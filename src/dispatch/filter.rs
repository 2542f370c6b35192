// src/dispatch/filter.rs
//
// Runtime category toggles. Flipped by the UI at any time and read once per
// dispatched message; a flip never affects a message already in flight.

use std::sync::atomic::{AtomicBool, Ordering};

use super::Category;

#[derive(Debug)]
pub struct FilterState {
    accept_midi: AtomicBool,
    accept_graphics: AtomicBool,
    accept_other: AtomicBool,
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState::new(true, true, true)
    }
}

impl FilterState {
    pub fn new(midi: bool, graphics: bool, other: bool) -> Self {
        FilterState {
            accept_midi: AtomicBool::new(midi),
            accept_graphics: AtomicBool::new(graphics),
            accept_other: AtomicBool::new(other),
        }
    }

    fn flag(&self, category: Category) -> &AtomicBool {
        match category {
            Category::Midi => &self.accept_midi,
            Category::Graphics => &self.accept_graphics,
            Category::Other => &self.accept_other,
        }
    }

    pub fn accepts(&self, category: Category) -> bool {
        self.flag(category).load(Ordering::Relaxed)
    }

    pub fn set(&self, category: Category, enabled: bool) {
        self.flag(category).store(enabled, Ordering::Relaxed);
    }

    /// Flip one category and return its new value
    pub fn toggle(&self, category: Category) -> bool {
        !self.flag(category).fetch_xor(true, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_accept_everything() {
        let filters = FilterState::default();
        assert!(filters.accepts(Category::Midi));
        assert!(filters.accepts(Category::Graphics));
        assert!(filters.accepts(Category::Other));
    }

    #[test]
    fn test_flags_are_independent() {
        let filters = FilterState::default();
        filters.set(Category::Graphics, false);
        assert!(filters.accepts(Category::Midi));
        assert!(!filters.accepts(Category::Graphics));
        assert!(filters.accepts(Category::Other));
    }

    #[test]
    fn test_toggle_returns_new_value() {
        let filters = FilterState::new(true, false, true);
        assert!(!filters.toggle(Category::Midi));
        assert!(!filters.accepts(Category::Midi));
        assert!(filters.toggle(Category::Graphics));
        assert!(filters.accepts(Category::Graphics));
    }
}

//! Property-based tests for the digit code field using proptest

use std::sync::{Arc, Mutex};

use notegate_core::digit_input::digits_only;
use notegate_core::{DigitCodeInput, DigitInputListener};
use proptest::prelude::*;

#[derive(Default)]
struct Completions(Mutex<Vec<String>>);

impl DigitInputListener for Completions {
    fn on_focus_advance(&self, _index: usize) {}

    fn on_complete(&self, code: &str) {
        self.0.lock().unwrap().push(code.to_string());
    }
}

#[derive(Debug, Clone)]
enum Edit {
    Type(usize, String),
    Backspace(usize),
    Paste(String),
    Clear,
}

fn arb_edit(len: usize) -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0..len + 1, "[0-9a-z ]{0,3}").prop_map(|(i, s)| Edit::Type(i, s)),
        2 => (0..len + 1).prop_map(Edit::Backspace),
        1 => "[0-9 -]{0,10}".prop_map(Edit::Paste),
        1 => Just(Edit::Clear),
    ]
}

fn field(len: usize) -> (DigitCodeInput, Arc<Completions>) {
    let completions = Arc::new(Completions::default());
    (DigitCodeInput::new(len, completions.clone()), completions)
}

fn apply(input: &mut DigitCodeInput, edit: &Edit) {
    match edit {
        Edit::Type(index, raw) => input.on_character(*index, raw),
        Edit::Backspace(index) => input.on_backspace(*index),
        Edit::Paste(text) => input.on_paste(text),
        Edit::Clear => input.clear(),
    }
}

proptest! {
    #[test]
    fn prop_cells_only_hold_digits(
        len in 1usize..10,
        edits in prop::collection::vec(arb_edit(9), 0..40),
    ) {
        let (mut input, _) = field(len);
        for edit in &edits {
            apply(&mut input, edit);
        }

        let digits = input.digits();
        prop_assert_eq!(digits.len(), len);
        for i in 0..len {
            if let Some(c) = digits.get(i) {
                prop_assert!(c.is_ascii_digit());
            }
        }
        prop_assert!(input.focus() < len);
    }

    #[test]
    fn prop_paste_fills_from_start(len in 1usize..10, text in "[0-9a-z -]{0,16}") {
        let (mut input, completions) = field(len);
        input.on_paste(&text);

        let pasted = digits_only(&text);
        let filled = pasted.len().min(len);
        for (i, digit) in pasted.iter().take(filled).enumerate() {
            prop_assert_eq!(input.digits().get(i), Some(*digit));
        }
        for i in filled..len {
            prop_assert_eq!(input.digits().get(i), None);
        }

        if !pasted.is_empty() {
            prop_assert_eq!(input.focus(), pasted.len().min(len - 1));
        }

        let completed = completions.0.lock().unwrap().clone();
        if pasted.len() >= len {
            let expected: String = pasted.iter().take(len).collect();
            prop_assert_eq!(completed, vec![expected]);
        } else {
            prop_assert!(completed.is_empty());
        }
    }

    #[test]
    fn prop_only_a_full_paste_completes(
        len in 1usize..10,
        tail in "[0-9]{1,9}",
        text in "[0-9]{0,12}",
    ) {
        let (mut input, completions) = field(len);
        for (offset, digit) in tail.chars().take(len).enumerate() {
            input.on_character(len - 1 - offset, &digit.to_string());
        }
        completions.0.lock().unwrap().clear();

        input.on_paste(&text);

        let completed = completions.0.lock().unwrap().clone();
        if text.len() >= len {
            let expected: String = text.chars().take(len).collect();
            prop_assert_eq!(completed, vec![expected]);
        } else {
            prop_assert!(completed.is_empty());
        }
    }

    #[test]
    fn prop_typing_keeps_last_digit(index in 0usize..6, raw in "[0-9a-z]{1,4}") {
        let (mut input, _) = field(6);
        input.on_paste("111111");
        let before = input.digits().get(index);

        input.on_character(index, &raw);

        let expected = digits_only(&raw).last().copied().or(before);
        prop_assert_eq!(input.digits().get(index), expected);
    }

    #[test]
    fn prop_backspace_clears_at_most_one_cell(
        prefix in "[0-9]{0,6}",
        index in 0usize..6,
    ) {
        let (mut input, _) = field(6);
        input.on_paste(&prefix);
        let before = input.digits().clone();

        input.on_backspace(index);

        let changed = (0..6)
            .filter(|i| before.get(*i) != input.digits().get(*i))
            .count();
        prop_assert!(changed <= 1);
    }
}
